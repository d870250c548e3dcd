//! WebSocket signaling transport
//!
//! Connects to the signaling server with tokio-tungstenite and multiplexes
//! requests over the socket. Responses are matched to pending requests by id.

use super::{
    InboundNotification, InboundRequest, ProtocolMessage, Responder, SignalingChannel,
    SignalingConnector, SignalingError, SignalingEvent, SignalingSession,
};
use crate::config::SignalingConfig;
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::WebSocketStream;
use url::Url;

type PendingMap = HashMap<u64, oneshot::Sender<Result<Value, SignalingError>>>;

/// Opens protoo-style signaling channels over WebSocket
pub struct WebSocketConnector {
    config: SignalingConfig,
}

impl WebSocketConnector {
    pub fn new(config: SignalingConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl SignalingConnector for WebSocketConnector {
    async fn connect(&self, url: &Url) -> Result<SignalingSession, SignalingError> {
        info!("Connecting to signaling server {}", url);

        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| SignalingError::Connection(e.to_string()))?;
        if !self.config.protocol.is_empty() {
            let protocol = HeaderValue::from_str(&self.config.protocol)
                .map_err(|e| SignalingError::Connection(format!("Invalid subprotocol: {}", e)))?;
            request.headers_mut().insert("Sec-WebSocket-Protocol", protocol);
        }

        let (ws_stream, _response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| SignalingError::Connection(e.to_string()))?;
        info!("Signaling WebSocket handshake completed for {}", url);

        let (event_tx, events) = mpsc::unbounded_channel();
        let channel = WebSocketChannel::spawn(
            ws_stream,
            Duration::from_millis(self.config.request_timeout_ms),
            event_tx,
        );
        Ok(SignalingSession { channel, events })
    }
}

/// One open signaling WebSocket
pub struct WebSocketChannel {
    outbound: mpsc::UnboundedSender<ProtocolMessage>,
    pending: Arc<Mutex<PendingMap>>,
    next_id: AtomicU64,
    closed: Arc<AtomicBool>,
    shutdown: Mutex<Option<oneshot::Sender<()>>>,
    request_timeout: Duration,
}

impl WebSocketChannel {
    /// Start reader and writer tasks for an established socket and emit `Open`
    pub fn spawn<S>(
        ws_stream: WebSocketStream<S>,
        request_timeout: Duration,
        event_tx: mpsc::UnboundedSender<SignalingEvent>,
    ) -> Arc<Self>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (mut write, mut read) = ws_stream.split();
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<ProtocolMessage>();
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
        let pending: Arc<Mutex<PendingMap>> = Arc::new(Mutex::new(HashMap::new()));
        let closed = Arc::new(AtomicBool::new(false));

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    msg = outbound_rx.recv() => {
                        let Some(msg) = msg else { break };
                        if write.send(Message::Text(msg.to_json().into())).await.is_err() {
                            break;
                        }
                    }
                    _ = &mut shutdown_rx => {
                        let _ = write.send(Message::Close(None)).await;
                        break;
                    }
                }
            }
            debug!("Signaling writer finished");
        });

        let reader_pending = pending.clone();
        let reader_closed = closed.clone();
        let reader_outbound = outbound_tx.clone();
        let reader_events = event_tx.clone();
        tokio::spawn(async move {
            while let Some(result) = read.next().await {
                match result {
                    Ok(Message::Text(text)) => {
                        let text: &str = text.as_ref();
                        match ProtocolMessage::from_json(text) {
                            Ok(msg) => {
                                dispatch_inbound(msg, &reader_pending, &reader_outbound, &reader_events)
                            }
                            Err(e) => warn!("Invalid signaling message: {}", e),
                        }
                    }
                    Ok(Message::Binary(_)) => {
                        debug!("Ignoring binary message on signaling channel");
                    }
                    Ok(Message::Close(_)) => {
                        info!("Signaling connection closed by server");
                        break;
                    }
                    Err(e) => {
                        error!("Signaling WebSocket error: {}", e);
                        let _ = reader_events.send(SignalingEvent::Failed);
                        break;
                    }
                    _ => {}
                }
            }

            reader_closed.store(true, Ordering::SeqCst);
            fail_pending(&reader_pending);
            let _ = reader_events.send(SignalingEvent::Closed);
        });

        let _ = event_tx.send(SignalingEvent::Open);

        Arc::new(Self {
            outbound: outbound_tx,
            pending,
            next_id: AtomicU64::new(1),
            closed,
            shutdown: Mutex::new(Some(shutdown_tx)),
            request_timeout,
        })
    }
}

fn dispatch_inbound(
    msg: ProtocolMessage,
    pending: &Mutex<PendingMap>,
    outbound: &mpsc::UnboundedSender<ProtocolMessage>,
    events: &mpsc::UnboundedSender<SignalingEvent>,
) {
    match msg {
        ProtocolMessage::Response { id, result } => {
            let Some(waiter) = pending.lock().remove(&id) else {
                debug!("Response for unknown request {}", id);
                return;
            };
            let result = result.map_err(|rejection| SignalingError::Rejected {
                code: rejection.code,
                reason: rejection.reason,
            });
            let _ = waiter.send(result);
        }
        ProtocolMessage::Request { id, method, data } => {
            let request = InboundRequest {
                method,
                data,
                responder: Responder::new(id, outbound.clone()),
            };
            let _ = events.send(SignalingEvent::Request(request));
        }
        ProtocolMessage::Notification { method, data } => {
            let _ = events.send(SignalingEvent::Notification(InboundNotification { method, data }));
        }
    }
}

fn fail_pending(pending: &Mutex<PendingMap>) {
    let drained: Vec<_> = pending.lock().drain().collect();
    for (_, waiter) in drained {
        let _ = waiter.send(Err(SignalingError::Closed));
    }
}

#[async_trait]
impl SignalingChannel for WebSocketChannel {
    async fn request(&self, method: &str, data: Value) -> Result<Value, SignalingError> {
        if self.is_closed() {
            return Err(SignalingError::Closed);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);

        let msg = ProtocolMessage::Request {
            id,
            method: method.to_string(),
            data,
        };
        if self.outbound.send(msg).is_err() {
            self.pending.lock().remove(&id);
            return Err(SignalingError::Closed);
        }
        debug!("Sent signaling request #{} {}", id, method);

        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(SignalingError::Closed),
            Err(_) => {
                self.pending.lock().remove(&id);
                Err(SignalingError::Timeout(method.to_string()))
            }
        }
    }

    async fn notify(&self, method: &str, data: Value) -> Result<(), SignalingError> {
        if self.is_closed() {
            return Err(SignalingError::Closed);
        }
        let msg = ProtocolMessage::Notification {
            method: method.to_string(),
            data,
        };
        self.outbound.send(msg).map_err(|_| SignalingError::Closed)
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(shutdown) = self.shutdown.lock().take() {
            let _ = shutdown.send(());
        }
        fail_pending(&self.pending);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
