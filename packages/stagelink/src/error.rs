//! Error types for the session core.
//!
//! Transport-offline and arbitration-denied are ordinary values, not errors
//! (`SendOutcome::Offline`, a `false` grab decision). The enums here cover
//! the cases that genuinely abort an operation.

use thiserror::Error;

/// Failure of a respondable request after it was registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RequestError {
    /// The connection dropped before the response arrived. All pending
    /// requests are rejected with this on disconnect teardown.
    #[error("connection closed before a response arrived")]
    ConnectionClosed,
    /// A response arrived for this nonce but was the wrong event variant.
    #[error("response did not match the expected event kind")]
    ResponseMismatch,
}

/// Session-level failures surfaced to the embedding application.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("websocket connect failed: {0}")]
    Connect(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("invalid server url: {0}")]
    InvalidUrl(String),
    #[error("configuration error: {0}")]
    Config(String),
}
