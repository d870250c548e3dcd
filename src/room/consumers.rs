//! Remote consumers keyed by remote producer id

use super::{Room, RoomError};
use crate::media::{ConsumeOptions, ConsumerHandle, MediaKind, TransportDirection};
use crate::signaling::SignalingError;
use log::{debug, info};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;

/// Consumer bookkeeping shown in snapshots
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConsumerInfo {
    pub id: String,
    pub producer_id: String,
    pub kind: MediaKind,
    pub peer_id: Option<String>,
    pub paused: bool,
}

struct ConsumerEntry {
    consumer: ConsumerHandle,
    peer_id: Option<String>,
    paused: bool,
}

/// Remote producer id -> local consumer. At most one entry per key.
#[derive(Default)]
pub struct ConsumerSet {
    entries: HashMap<String, ConsumerEntry>,
}

impl ConsumerSet {
    pub fn contains(&self, producer_id: &str) -> bool {
        self.entries.contains_key(producer_id)
    }

    /// Returns false (and keeps the existing entry) if the key is taken
    pub fn insert(&mut self, consumer: ConsumerHandle, peer_id: Option<String>, paused: bool) -> bool {
        let key = consumer.producer_id().to_string();
        if self.entries.contains_key(&key) {
            return false;
        }
        self.entries.insert(
            key,
            ConsumerEntry {
                consumer,
                peer_id,
                paused,
            },
        );
        true
    }

    pub fn remove_by_producer(&mut self, producer_id: &str) -> Option<ConsumerHandle> {
        self.entries.remove(producer_id).map(|entry| entry.consumer)
    }

    pub fn remove_by_consumer(&mut self, consumer_id: &str) -> Option<ConsumerHandle> {
        let key = self
            .entries
            .iter()
            .find(|(_, entry)| entry.consumer.id() == consumer_id)
            .map(|(key, _)| key.clone())?;
        self.remove_by_producer(&key)
    }

    pub fn set_paused(&mut self, consumer_id: &str, paused: bool) -> bool {
        match self
            .entries
            .values_mut()
            .find(|entry| entry.consumer.id() == consumer_id)
        {
            Some(entry) => {
                entry.paused = paused;
                true
            }
            None => false,
        }
    }

    pub fn drain(&mut self) -> Vec<ConsumerHandle> {
        self.entries.drain().map(|(_, entry)| entry.consumer).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Snapshot sorted by producer id
    pub fn infos(&self) -> Vec<ConsumerInfo> {
        let mut infos: Vec<ConsumerInfo> = self
            .entries
            .values()
            .map(|entry| ConsumerInfo {
                id: entry.consumer.id().to_string(),
                producer_id: entry.consumer.producer_id().to_string(),
                kind: entry.consumer.kind(),
                peer_id: entry.peer_id.clone(),
                paused: entry.paused,
            })
            .collect();
        infos.sort_by(|a, b| a.producer_id.cmp(&b.producer_id));
        infos
    }
}

impl Room {
    /// Create a consumer for a remote producer announced by the server.
    /// A repeated announcement for a known producer is accepted as-is.
    pub(super) async fn handle_new_consumer(&self, data: Value) -> Result<(), RoomError> {
        let options: ConsumeOptions = serde_json::from_value(data).map_err(|e| {
            SignalingError::Protocol(format!("Invalid newConsumer request: {}", e))
        })?;
        let transport = self
            .transport(TransportDirection::Recv)
            .ok_or_else(|| RoomError::InvalidState("receive transport not ready".to_string()))?;

        if self.consumers.lock().contains(&options.producer_id) {
            debug!(
                "Room {} already consuming producer {}",
                self.room_id, options.producer_id
            );
            return Ok(());
        }

        let peer_id = options.peer_id.clone();
        let paused = options.producer_paused;
        let consumer = transport.consume(options).await?;
        let (consumer_id, producer_id) = (consumer.id().to_string(), consumer.producer_id().to_string());
        if !self.consumers.lock().insert(consumer.clone(), peer_id, paused) {
            consumer.close();
            return Ok(());
        }
        // Re-check after storing; close() may have drained the set before the insert.
        if self.is_closed() {
            if let Some(stored) = self.consumers.lock().remove_by_consumer(&consumer_id) {
                stored.close();
            }
            return Err(RoomError::Closed);
        }
        info!(
            "Room {} consuming producer {} ({})",
            self.room_id, producer_id, consumer_id
        );
        Ok(())
    }

    pub(super) fn close_consumer_by_id(&self, consumer_id: &str) {
        let removed = self.consumers.lock().remove_by_consumer(consumer_id);
        if let Some(consumer) = removed {
            info!("Room {} consumer {} closed", self.room_id, consumer_id);
            consumer.close();
        }
    }

    pub(super) fn close_consumer_for_producer(&self, producer_id: &str) {
        let removed = self.consumers.lock().remove_by_producer(producer_id);
        if let Some(consumer) = removed {
            info!(
                "Room {} producer {} closed, dropping consumer {}",
                self.room_id,
                producer_id,
                consumer.id()
            );
            consumer.close();
        }
    }
}
