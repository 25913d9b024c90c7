//! Peer transport contract.
//!
//! A transport wraps one peer connection of some network stack. It is
//! created together with an event stream (`UnboundedReceiver<TransportEvent>`)
//! that the [`PeerLinkManager`](crate::PeerLinkManager) consumes.

use std::sync::Arc;

use peerdrop_protocol::Payload;

use crate::{BoxFuture, DataChannel};

/// Failure reported by the underlying network stack.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct TransportError(pub String);

impl TransportError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

/// Something the transport noticed on its own.
pub enum TransportEvent {
    /// A local candidate to relay to the remote peer.
    LocalCandidate(Payload),
    /// The data channel is open and usable.
    ChannelOpen(Arc<dyn DataChannel>),
    /// The connection failed or was closed by the remote side.
    Closed,
}

impl std::fmt::Debug for TransportEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LocalCandidate(c) => f.debug_tuple("LocalCandidate").field(c).finish(),
            Self::ChannelOpen(ch) => f.debug_tuple("ChannelOpen").field(&ch.label()).finish(),
            Self::Closed => f.write_str("Closed"),
        }
    }
}

/// One peer connection, driven by a [`PeerLinkManager`](crate::PeerLinkManager).
///
/// Descriptions and candidates are opaque [`Payload`]s; only the
/// transport parses them.
pub trait PeerTransport: Send + Sync + 'static {
    /// Creates and applies a local offer, returning it for the remote peer.
    fn create_offer(&self) -> BoxFuture<'_, Result<Payload, TransportError>>;

    /// Creates and applies a local answer. Requires a remote offer.
    fn create_answer(&self) -> BoxFuture<'_, Result<Payload, TransportError>>;

    fn set_remote_description(&self, desc: Payload)
    -> BoxFuture<'_, Result<(), TransportError>>;

    /// Applies a remote candidate. Requires a remote description.
    fn add_ice_candidate(&self, candidate: Payload) -> BoxFuture<'_, Result<(), TransportError>>;

    fn close(&self) -> BoxFuture<'_, Result<(), TransportError>>;
}
