//! Signaling client for peerdrop.
//!
//! Connects to a store-and-forward relay over WebSocket and exchanges
//! offer / answer / candidate messages with the remote peer of a session.
//! There is no automatic reconnect: a lost relay is reported once to the
//! owner as [`SignalingError::Unavailable`].

mod client;
mod pumps;

pub use client::{DisconnectCallback, MessageCallback, SignalingClient, session_url};

/// Errors from the signaling client.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SignalingError {
    #[error("signaling unavailable: {0}")]
    Unavailable(String),

    #[error("invalid relay URL: {0}")]
    InvalidUrl(String),

    #[error("JSON error: {0}")]
    Json(String),

    #[error("connection closed")]
    Closed,
}

impl From<serde_json::Error> for SignalingError {
    fn from(e: serde_json::Error) -> Self {
        Self::Json(e.to_string())
    }
}
