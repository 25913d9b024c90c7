//! Signaling relay for peerdrop.
//!
//! Upgrades `GET /<session-id>` to WebSocket and pairs at most two peers per
//! session. Text frames from one peer are forwarded verbatim to the other;
//! frames sent while the other peer is absent are queued and delivered when
//! it joins. The relay never looks inside a message and never carries file
//! data.

mod room;
mod server;

pub use server::{RelayConfig, RelayServer};

/// Per-peer outbound buffer capacity.
pub const SEND_BUFFER_SIZE: usize = 256;

/// Default cap on frames queued for a peer that has not joined yet.
pub const DEFAULT_MAX_QUEUED: usize = 256;

/// Default relay listen port.
pub const DEFAULT_PORT: u16 = 8787;

/// Errors produced by the relay.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("invalid session path: {0}")]
    InvalidSession(String),

    #[error("session full: {0}")]
    SessionFull(String),
}
