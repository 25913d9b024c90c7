//! In-process transport and data channel.
//!
//! Two linked endpoints that behave like a real peer connection from the
//! manager's point of view: descriptions must be exchanged in order,
//! candidates need a remote description, and the channel opens only when
//! both sides have both descriptions and at least one remote candidate.
//! Used by tests and for loopback transfers.

mod channel;
mod transport;

pub use channel::{MemoryChannel, channel_pair};
pub use transport::{MemoryEndpoint, MemoryTransport, transport_pair};
