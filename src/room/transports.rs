//! Capability device loading and transport negotiation

use super::{Room, RoomError};
use crate::media::{
    ConnectionState, MediaTransport, TransportDirection, TransportEvent, TransportOptions,
    TransportParameters,
};
use crate::signaling::{RequestMethod, SignalingError};
use log::{debug, info, warn};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Transport bookkeeping shown in snapshots
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransportInfo {
    pub id: String,
    pub direction: TransportDirection,
    pub connection_state: ConnectionState,
    /// DTLS parameters have reached the server
    pub dtls_connected: bool,
}

pub(super) struct TransportEntry {
    pub(super) transport: Arc<dyn MediaTransport>,
    connection_state: ConnectionState,
    dtls_connected: bool,
}

impl TransportEntry {
    fn new(transport: Arc<dyn MediaTransport>) -> Self {
        Self {
            transport,
            connection_state: ConnectionState::New,
            dtls_connected: false,
        }
    }

    pub(super) fn info(&self) -> TransportInfo {
        TransportInfo {
            id: self.transport.id().to_string(),
            direction: self.transport.direction(),
            connection_state: self.connection_state,
            dtls_connected: self.dtls_connected,
        }
    }
}

impl Room {
    /// Step 1: fetch router capabilities and load the device with them
    pub(super) async fn load_device(&self) -> Result<(), RoomError> {
        let _guard = self.device_lock.lock().await;
        self.ensure_open()?;
        if self.device.loaded() {
            return Err(RoomError::InvalidState(
                "capability device already loaded".to_string(),
            ));
        }

        debug!("Room {} loading capability device", self.room_id);
        let capabilities = self
            .signaling
            .request(RequestMethod::GetRouterRtpCapabilities.as_str(), json!({}))
            .await?;
        self.ensure_open()?;

        self.device.load(capabilities).await?;
        info!("Room {} capability device loaded", self.room_id);
        Ok(())
    }

    /// Step 2
    pub(super) async fn create_send_transport(self: &Arc<Self>) -> Result<(), RoomError> {
        self.create_transport(TransportDirection::Send).await
    }

    /// Step 3
    pub(super) async fn create_recv_transport(self: &Arc<Self>) -> Result<(), RoomError> {
        self.create_transport(TransportDirection::Recv).await
    }

    async fn create_transport(self: &Arc<Self>, direction: TransportDirection) -> Result<(), RoomError> {
        let lock = match direction {
            TransportDirection::Send => &self.send_lock,
            TransportDirection::Recv => &self.recv_lock,
        };
        let _guard = lock.lock().await;
        self.ensure_open()?;
        if self.transport_slot(direction).lock().is_some() {
            return Err(RoomError::InvalidState(format!(
                "{:?} transport already exists",
                direction
            )));
        }

        debug!("Room {} creating {:?} transport", self.room_id, direction);
        let producing = direction == TransportDirection::Send;
        let response = self
            .signaling
            .request(
                RequestMethod::CreateWebRtcTransport.as_str(),
                json!({
                    "producing": producing,
                    "consuming": !producing,
                    "forceTcp": self.media.force_tcp,
                }),
            )
            .await?;
        self.ensure_open()?;

        let parameters: TransportParameters = serde_json::from_value(response).map_err(|e| {
            SignalingError::Protocol(format!("Invalid transport parameters: {}", e))
        })?;
        let options = TransportOptions {
            parameters,
            ice_servers: self.media.ice_servers.clone(),
        };
        let handle = match direction {
            TransportDirection::Send => self.device.create_send_transport(options)?,
            TransportDirection::Recv => self.device.create_recv_transport(options)?,
        };

        let transport_id = handle.transport.id().to_string();
        *self.transport_slot(direction).lock() = Some(TransportEntry::new(handle.transport.clone()));
        if self.is_closed() {
            if let Some(entry) = self.transport_slot(direction).lock().take() {
                entry.transport.close();
            }
            return Err(RoomError::Closed);
        }

        self.spawn_transport_listener(transport_id.clone(), direction, handle.events);
        info!("Room {} created {:?} transport {}", self.room_id, direction, transport_id);
        Ok(())
    }

    pub(super) fn transport_slot(&self, direction: TransportDirection) -> &Mutex<Option<TransportEntry>> {
        match direction {
            TransportDirection::Send => &self.send_transport,
            TransportDirection::Recv => &self.recv_transport,
        }
    }

    pub(super) fn transport(&self, direction: TransportDirection) -> Option<Arc<dyn MediaTransport>> {
        self.transport_slot(direction)
            .lock()
            .as_ref()
            .map(|entry| entry.transport.clone())
    }

    /// Answer connect/produce events for one transport over signaling.
    ///
    /// Only the send transport answers produce events.
    fn spawn_transport_listener(
        self: &Arc<Self>,
        transport_id: String,
        direction: TransportDirection,
        mut events: mpsc::UnboundedReceiver<TransportEvent>,
    ) {
        let room = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut connect_requested = false;
            while let Some(event) = events.recv().await {
                let Some(room) = room.upgrade() else { break };

                match event {
                    TransportEvent::Connect { dtls_parameters, reply } => {
                        if room.is_closed() {
                            let _ = reply.send(Err(RoomError::Closed.to_string()));
                            continue;
                        }
                        if connect_requested {
                            warn!("Transport {} asked to connect twice", transport_id);
                            let _ = reply.send(Err("transport already connected".to_string()));
                            continue;
                        }
                        connect_requested = true;

                        let result = room
                            .signaling
                            .request(
                                RequestMethod::ConnectWebRtcTransport.as_str(),
                                json!({
                                    "transportId": transport_id,
                                    "dtlsParameters": dtls_parameters,
                                }),
                            )
                            .await;
                        if result.is_ok() {
                            room.update_transport(direction, &transport_id, |entry| {
                                entry.dtls_connected = true;
                            });
                        }
                        let _ = reply.send(result.map(|_| ()).map_err(|e| e.to_string()));
                    }
                    TransportEvent::Produce { kind, rtp_parameters, app_data, reply } => {
                        if direction == TransportDirection::Recv {
                            warn!("Receive transport {} cannot produce", transport_id);
                            let _ = reply.send(Err("receive transport cannot produce".to_string()));
                            continue;
                        }
                        if room.is_closed() {
                            let _ = reply.send(Err(RoomError::Closed.to_string()));
                            continue;
                        }

                        debug!("Transport {} requesting to produce {}", transport_id, kind);
                        let result = room
                            .signaling
                            .request(
                                RequestMethod::Produce.as_str(),
                                json!({
                                    "transportId": transport_id,
                                    "kind": kind,
                                    "rtpParameters": rtp_parameters,
                                    "appData": app_data,
                                }),
                            )
                            .await
                            .and_then(|response| {
                                response
                                    .get("id")
                                    .and_then(Value::as_str)
                                    .map(str::to_string)
                                    .ok_or_else(|| {
                                        SignalingError::Protocol("produce response without id".to_string())
                                    })
                            });
                        let _ = reply.send(result.map_err(|e| e.to_string()));
                    }
                    TransportEvent::ConnectionStateChange(state) => {
                        debug!("Transport {} connection state: {:?}", transport_id, state);
                        room.update_transport(direction, &transport_id, |entry| {
                            entry.connection_state = state;
                        });
                        if state == ConnectionState::Closed {
                            room.drop_transport(direction, &transport_id);
                        } else if state == ConnectionState::Failed {
                            warn!("Transport {} failed", transport_id);
                        }
                    }
                }
            }
            debug!("Transport {} listener finished", transport_id);
        });
    }

    fn update_transport(
        &self,
        direction: TransportDirection,
        transport_id: &str,
        update: impl FnOnce(&mut TransportEntry),
    ) {
        let mut slot = self.transport_slot(direction).lock();
        if let Some(entry) = slot.as_mut() {
            if entry.transport.id() == transport_id {
                update(entry);
            }
        }
    }

    /// Forget a transport whose connection reported closed
    fn drop_transport(&self, direction: TransportDirection, transport_id: &str) {
        let removed = {
            let mut slot = self.transport_slot(direction).lock();
            match slot.as_ref() {
                Some(entry) if entry.transport.id() == transport_id => slot.take(),
                _ => None,
            }
        };
        if let Some(entry) = removed {
            info!("Room {} transport {} closed", self.room_id, transport_id);
            entry.transport.close();
        }
    }
}
