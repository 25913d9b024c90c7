//! Peer link lifecycle for peerdrop.
//!
//! [`PeerLinkManager`] owns one direct link between two peers: it drives
//! offer/answer negotiation, holds remote candidates until they can be
//! applied, and hands out the data channel once the link is ready. The
//! concrete network stack sits behind [`PeerTransport`] and
//! [`DataChannel`]; [`memory`] provides an in-process implementation.
//!
//! [`negotiate`] wires a [`SignalingClient`](peerdrop_signaling::SignalingClient)
//! to a manager and resolves with the ready channel.

pub mod channel;
mod manager;
pub mod memory;
mod negotiate;
pub mod transport;

use std::future::Future;
use std::pin::Pin;

pub use channel::{ChannelError, DataChannel};
pub use manager::{
    LinkError, LinkState, LocalCandidateCallback, PeerLinkManager, ReadyCallback, ReadyChannel,
};
pub use negotiate::{Role, negotiate};
pub use transport::{PeerTransport, TransportError, TransportEvent};

/// A boxed future returned by transport and channel methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Remote candidates held back before a remote description is set.
///
/// Beyond this the link refuses further early candidates.
pub const MAX_PENDING_CANDIDATES: usize = 256;
