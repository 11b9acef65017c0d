//! Message Transport
//!
//! Owns the single duplex WebSocket connection to the relay. Outbound frames
//! go through an mpsc channel drained by a write task; inbound frames are
//! decoded once and either resolve a pending respondable request by nonce or
//! are handed to the session dispatcher as unsolicited events.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{RwLock, mpsc, oneshot};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{RequestError, SessionError};
use crate::pending::{PendingRequests, ResponseResult};
use crate::protocol::{ClientEvent, RespondableRequest, ServerEvent};

/// Capacity of the channel carrying unsolicited events to the session task.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Outcome of a respondable send. The connection state is known at call time;
/// no connect attempt is made on behalf of the caller.
pub enum SendOutcome {
    /// The request is on the wire; await the response here.
    Sent(ResponseFuture),
    /// No connection. Nothing was registered or transmitted; the caller
    /// applies its documented offline default.
    Offline,
}

/// Caller handle for an in-flight respondable request.
pub struct ResponseFuture {
    rx: oneshot::Receiver<ResponseResult>,
}

impl ResponseFuture {
    /// Wait for the authority's answer. Exactly one response resolves this;
    /// disconnect teardown rejects it with [`RequestError::ConnectionClosed`].
    pub async fn recv(self) -> Result<ServerEvent, RequestError> {
        match self.rx.await {
            Ok(result) => result,
            // Sender dropped without resolving: the table was torn down.
            Err(_) => Err(RequestError::ConnectionClosed),
        }
    }
}

struct TransportInner {
    /// `Some` while a connection is up; the sender feeds the write task.
    outbound: RwLock<Option<mpsc::Sender<String>>>,
    pending: PendingRequests,
    next_nonce: AtomicU64,
}

/// The session's connection to the relay.
///
/// Cheap to clone; all clones share the connection, the pending request
/// table, and the nonce counter.
#[derive(Clone)]
pub struct SessionTransport {
    inner: Arc<TransportInner>,
}

impl Default for SessionTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionTransport {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(TransportInner {
                outbound: RwLock::new(None),
                pending: PendingRequests::new(),
                next_nonce: AtomicU64::new(1),
            }),
        }
    }

    pub async fn is_connected(&self) -> bool {
        self.inner.outbound.read().await.is_some()
    }

    /// Fire-and-forget send. Offline or full-channel frames are dropped with
    /// a log line; no error crosses this API.
    pub async fn send(&self, event: &ClientEvent) {
        let encoded = match serde_json::to_string(event) {
            Ok(encoded) => encoded,
            Err(e) => {
                warn!("[TRANSPORT] Could not serialize outbound frame: {}", e);
                return;
            }
        };

        let guard = self.inner.outbound.read().await;
        match guard.as_ref() {
            Some(tx) => {
                if let Err(e) = tx.try_send(encoded) {
                    warn!("[TRANSPORT] Dropping outbound frame: {}", e);
                }
            }
            None => debug!("[TRANSPORT] Offline, dropping fire-and-forget frame"),
        }
    }

    /// Send a respondable request.
    ///
    /// When connected: stamps a process-unique nonce into the payload,
    /// registers the expected response kind in the pending table, transmits,
    /// and returns the future. When offline: transmits nothing, registers
    /// nothing, returns [`SendOutcome::Offline`].
    pub async fn send_respondable(&self, request: RespondableRequest) -> SendOutcome {
        let expected = request.expected_response();

        let guard = self.inner.outbound.read().await;
        let tx = match guard.as_ref() {
            Some(tx) => tx,
            None => return SendOutcome::Offline,
        };

        let nonce = self.inner.next_nonce.fetch_add(1, Ordering::Relaxed);
        let encoded = match serde_json::to_string(&request.into_event(nonce)) {
            Ok(encoded) => encoded,
            Err(e) => {
                warn!("[TRANSPORT] Could not serialize respondable frame: {}", e);
                return SendOutcome::Offline;
            }
        };

        let rx = self.inner.pending.register(nonce, expected);
        if let Err(e) = tx.try_send(encoded) {
            warn!("[TRANSPORT] Dropping respondable frame: {}", e);
            self.inner
                .pending
                .resolve_error(nonce, RequestError::ConnectionClosed);
        }
        SendOutcome::Sent(ResponseFuture { rx })
    }

    /// Decode one inbound frame. Responses resolve their pending entry and
    /// return `None`; unsolicited events are returned for the dispatcher.
    /// Invalid frames are logged and swallowed.
    pub(crate) fn handle_frame(&self, raw: &str) -> Option<ServerEvent> {
        let event: ServerEvent = match serde_json::from_str(raw) {
            Ok(event) => event,
            Err(e) => {
                warn!("[TRANSPORT] Undecodable inbound frame: {}", e);
                return None;
            }
        };

        match (event.response_nonce(), event.response_kind()) {
            (Some(nonce), Some(kind)) => {
                self.inner.pending.resolve(nonce, kind, event);
                None
            }
            _ => Some(event),
        }
    }

    /// Bind an outbound channel, marking the transport connected.
    /// Used by [`SessionTransport::connect`] and by tests that fake a relay.
    pub(crate) async fn attach(&self, tx: mpsc::Sender<String>) {
        *self.inner.outbound.write().await = Some(tx);
    }

    /// Tear the connection down: mark offline and reject every pending
    /// request so no caller stays parked on a dead connection.
    pub(crate) async fn detach(&self) {
        *self.inner.outbound.write().await = None;
        self.inner.pending.reject_all(RequestError::ConnectionClosed);
    }

    /// Connect to the relay and spawn the read/write tasks.
    ///
    /// Returns the channel of unsolicited events for the session dispatcher.
    /// The tasks run until the socket closes or `cancel` fires; either way
    /// the transport detaches itself and the event channel closes.
    pub async fn connect(
        &self,
        url: &str,
        outbound_capacity: usize,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<ServerEvent>, SessionError> {
        let (ws_stream, _) = connect_async(url).await?;
        info!("[TRANSPORT] Connected to {}", url);

        let (mut ws_sender, mut ws_receiver) = ws_stream.split();
        let (outbound_tx, mut outbound_rx) = mpsc::channel::<String>(outbound_capacity);
        let (event_tx, event_rx) = mpsc::channel::<ServerEvent>(EVENT_CHANNEL_CAPACITY);

        self.attach(outbound_tx).await;

        let write_cancel = cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = write_cancel.cancelled() => {
                        let _ = ws_sender.send(Message::Close(None)).await;
                        break;
                    }
                    frame = outbound_rx.recv() => {
                        match frame {
                            Some(frame) => {
                                if let Err(e) = ws_sender.send(Message::text(frame)).await {
                                    warn!("[TRANSPORT] Write failed: {}", e);
                                    break;
                                }
                            }
                            None => break,
                        }
                    }
                }
            }
        });

        let transport = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    frame = ws_receiver.next() => {
                        match frame {
                            Some(Ok(message)) => {
                                let Ok(text) = message.to_text() else { continue };
                                if text.is_empty() {
                                    continue;
                                }
                                if let Some(event) = transport.handle_frame(text) {
                                    if event_tx.send(event).await.is_err() {
                                        break;
                                    }
                                }
                            }
                            Some(Err(e)) => {
                                warn!("[TRANSPORT] Read failed: {}", e);
                                break;
                            }
                            None => break,
                        }
                    }
                }
            }
            info!("[TRANSPORT] Connection closed");
            transport.detach().await;
        });

        Ok(event_rx)
    }
}
