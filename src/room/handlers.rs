//! Inbound signaling dispatch

use super::{PeerInfo, Room, RoomError};
use crate::signaling::{InboundNotification, InboundRequest, InboundRequestMethod, NotificationMethod};
use log::{debug, info, warn};
use serde_json::{json, Value};

/// Error code sent back when a request cannot be served
const REQUEST_FAILED: u16 = 500;

impl Room {
    /// Answer one inbound request; unknown methods are rejected, never dropped
    pub(super) async fn handle_request(&self, request: InboundRequest) {
        let InboundRequest {
            method,
            data,
            responder,
        } = request;

        match self.dispatch_request(&method, data).await {
            Ok(body) => responder.accept(body),
            Err(e) => {
                warn!("Room {} rejecting {} request: {}", self.room_id, method, e);
                responder.reject(REQUEST_FAILED, e.to_string());
            }
        }
    }

    async fn dispatch_request(&self, method: &str, data: Value) -> Result<Value, RoomError> {
        match InboundRequestMethod::parse(method) {
            Some(InboundRequestMethod::NewConsumer) => {
                self.handle_new_consumer(data).await?;
                Ok(json!({}))
            }
            None => Err(RoomError::UnknownMethod(method.to_string())),
        }
    }

    pub(super) fn handle_notification(&self, notification: InboundNotification) {
        let Some(method) = NotificationMethod::parse(&notification.method) else {
            debug!("Room {} ignoring notification {}", self.room_id, notification.method);
            return;
        };
        let data = notification.data;

        match method {
            NotificationMethod::NewPeer => match serde_json::from_value::<PeerInfo>(data) {
                Ok(peer) => {
                    info!("Room {} new peer {}", self.room_id, peer.id);
                    let mut peers = self.peers.lock();
                    if !peers.iter().any(|p| p.id == peer.id) {
                        peers.push(peer);
                    }
                }
                Err(e) => warn!("Invalid newPeer notification: {}", e),
            },
            NotificationMethod::PeerClosed => {
                if let Some(peer_id) = str_field(&data, "peerId") {
                    info!("Room {} peer {} left", self.room_id, peer_id);
                    self.peers.lock().retain(|p| p.id != peer_id);
                }
            }
            NotificationMethod::ConsumerClosed => {
                if let Some(consumer_id) = str_field(&data, "consumerId") {
                    self.close_consumer_by_id(consumer_id);
                }
            }
            NotificationMethod::ProducerClosed => {
                if let Some(producer_id) = str_field(&data, "producerId") {
                    self.close_consumer_for_producer(producer_id);
                }
            }
            NotificationMethod::ConsumerPaused | NotificationMethod::ConsumerResumed => {
                let paused = method == NotificationMethod::ConsumerPaused;
                if let Some(consumer_id) = str_field(&data, "consumerId") {
                    self.consumers.lock().set_paused(consumer_id, paused);
                }
            }
            NotificationMethod::ProducerScore
            | NotificationMethod::ConsumerScore
            | NotificationMethod::ActiveSpeaker => {
                debug!("Room {} {}: {}", self.room_id, notification.method, data);
            }
        }
    }
}

fn str_field<'a>(data: &'a Value, key: &str) -> Option<&'a str> {
    data.get(key).and_then(Value::as_str)
}
