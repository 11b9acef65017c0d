//! Pending Request Table
//!
//! Maps the nonce of an in-flight respondable request to the oneshot channel
//! its caller is parked on. An entry is consumed by the first matching
//! response; duplicates and mismatches never re-invoke a waiter.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::error::RequestError;
use crate::protocol::{ResponseKind, ServerEvent};

pub(crate) type ResponseResult = Result<ServerEvent, RequestError>;

struct PendingEntry {
    expected: ResponseKind,
    tx: oneshot::Sender<ResponseResult>,
}

/// Table of outstanding respondable requests, keyed by nonce.
#[derive(Default)]
pub(crate) struct PendingRequests {
    entries: Mutex<HashMap<u64, PendingEntry>>,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a request and return the receiver its caller awaits.
    pub fn register(
        &self,
        nonce: u64,
        expected: ResponseKind,
    ) -> oneshot::Receiver<ResponseResult> {
        let (tx, rx) = oneshot::channel();
        let mut entries = self.entries.lock().expect("pending table poisoned");
        let replaced = entries.insert(nonce, PendingEntry { expected, tx });
        debug_assert!(replaced.is_none(), "nonce reused while still pending");
        rx
    }

    /// Resolve the entry for a response frame.
    ///
    /// A response whose kind does not match what the request registered for
    /// rejects the entry with [`RequestError::ResponseMismatch`] so the
    /// caller is not stuck forever. Unknown or already-consumed nonces are
    /// logged and dropped.
    pub fn resolve(&self, nonce: u64, kind: ResponseKind, event: ServerEvent) {
        let entry = {
            let mut entries = self.entries.lock().expect("pending table poisoned");
            entries.remove(&nonce)
        };

        match entry {
            Some(PendingEntry { expected, tx }) if expected == kind => {
                if tx.send(Ok(event)).is_err() {
                    debug!("[PENDING] Caller for nonce {} went away before response", nonce);
                }
            }
            Some(PendingEntry { expected, tx }) => {
                warn!(
                    "[PENDING] Response kind {:?} does not match expected {:?} for nonce {}",
                    kind, expected, nonce
                );
                let _ = tx.send(Err(RequestError::ResponseMismatch));
            }
            None => {
                warn!("[PENDING] Dropping duplicate or unknown response for nonce {}", nonce);
            }
        }
    }

    /// Reject a single entry, e.g. when its frame never made it onto the wire.
    pub fn resolve_error(&self, nonce: u64, error: RequestError) {
        let entry = {
            let mut entries = self.entries.lock().expect("pending table poisoned");
            entries.remove(&nonce)
        };
        if let Some(entry) = entry {
            let _ = entry.tx.send(Err(error));
        }
    }

    /// Reject every outstanding request. Called on disconnect teardown so no
    /// caller is left parked on a dead connection.
    pub fn reject_all(&self, error: RequestError) {
        let drained: Vec<(u64, PendingEntry)> = {
            let mut entries = self.entries.lock().expect("pending table poisoned");
            entries.drain().collect()
        };
        if !drained.is_empty() {
            debug!("[PENDING] Rejecting {} outstanding requests: {}", drained.len(), error);
        }
        for (_, entry) in drained {
            let _ = entry.tx.send(Err(error));
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.lock().expect("pending table poisoned").len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grab_response(nonce: u64, is_success: bool) -> ServerEvent {
        ServerEvent::ObjectGrabbedResponse { nonce, is_success }
    }

    #[tokio::test]
    async fn resolve_consumes_entry() {
        let table = PendingRequests::new();
        let rx = table.register(1, ResponseKind::ObjectGrabbed);

        table.resolve(1, ResponseKind::ObjectGrabbed, grab_response(1, true));
        assert_eq!(table.len(), 0);

        match rx.await.unwrap().unwrap() {
            ServerEvent::ObjectGrabbedResponse { is_success, .. } => assert!(is_success),
            _ => panic!("Expected ObjectGrabbedResponse"),
        }
    }

    #[tokio::test]
    async fn reversed_response_order_keeps_correlation() {
        let table = PendingRequests::new();
        let rx_a = table.register(1, ResponseKind::ObjectGrabbed);
        let rx_b = table.register(2, ResponseKind::ObjectGrabbed);

        // Responses arrive in reverse order of the requests.
        table.resolve(2, ResponseKind::ObjectGrabbed, grab_response(2, false));
        table.resolve(1, ResponseKind::ObjectGrabbed, grab_response(1, true));

        match rx_a.await.unwrap().unwrap() {
            ServerEvent::ObjectGrabbedResponse { nonce, is_success } => {
                assert_eq!(nonce, 1);
                assert!(is_success);
            }
            _ => panic!("Expected ObjectGrabbedResponse"),
        }
        match rx_b.await.unwrap().unwrap() {
            ServerEvent::ObjectGrabbedResponse { nonce, is_success } => {
                assert_eq!(nonce, 2);
                assert!(!is_success);
            }
            _ => panic!("Expected ObjectGrabbedResponse"),
        }
    }

    #[tokio::test]
    async fn duplicate_response_is_dropped() {
        let table = PendingRequests::new();
        let rx = table.register(1, ResponseKind::ObjectGrabbed);

        table.resolve(1, ResponseKind::ObjectGrabbed, grab_response(1, true));
        // Second response for the same nonce: no entry left, must not panic.
        table.resolve(1, ResponseKind::ObjectGrabbed, grab_response(1, false));

        match rx.await.unwrap().unwrap() {
            ServerEvent::ObjectGrabbedResponse { is_success, .. } => assert!(is_success),
            _ => panic!("Expected ObjectGrabbedResponse"),
        }
    }

    #[tokio::test]
    async fn kind_mismatch_rejects_entry() {
        let table = PendingRequests::new();
        let rx = table.register(1, ResponseKind::MenuDetached);

        table.resolve(1, ResponseKind::ObjectGrabbed, grab_response(1, true));

        assert!(matches!(rx.await.unwrap(), Err(RequestError::ResponseMismatch)));
        assert_eq!(table.len(), 0);
    }

    #[tokio::test]
    async fn reject_all_fails_every_waiter() {
        let table = PendingRequests::new();
        let rx_a = table.register(1, ResponseKind::ObjectGrabbed);
        let rx_b = table.register(2, ResponseKind::MenuDetached);

        table.reject_all(RequestError::ConnectionClosed);

        assert!(matches!(rx_a.await.unwrap(), Err(RequestError::ConnectionClosed)));
        assert!(matches!(rx_b.await.unwrap(), Err(RequestError::ConnectionClosed)));
        assert_eq!(table.len(), 0);
    }
}
