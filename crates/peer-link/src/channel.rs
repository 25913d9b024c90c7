//! Data channel contract.

use peerdrop_protocol::ChannelMessage;

use crate::BoxFuture;

/// Errors from a data channel.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChannelError {
    #[error("channel closed")]
    Closed,

    #[error("send failed: {0}")]
    Send(String),
}

/// Ordered, reliable, bidirectional message pipe between two peers.
///
/// One channel backs exactly one sender or receiver. `recv` is meant for a
/// single consumer; concurrent callers are serialized.
pub trait DataChannel: Send + Sync + 'static {
    /// Label the channel was created with.
    fn label(&self) -> &str;

    /// Returns `true` while messages can be sent.
    fn is_open(&self) -> bool;

    /// Queues one message for delivery.
    fn send(&self, msg: ChannelMessage) -> BoxFuture<'_, Result<(), ChannelError>>;

    /// Bytes queued locally but not yet handed to the network.
    fn buffered_amount(&self) -> BoxFuture<'_, usize>;

    /// Resolves once [`buffered_amount`](Self::buffered_amount) is at or
    /// below `threshold`. Fails with [`ChannelError::Closed`] if the channel
    /// closes first.
    fn wait_buffered_low(&self, threshold: usize) -> BoxFuture<'_, Result<(), ChannelError>>;

    /// Next inbound message, or `None` once the channel is closed and
    /// drained.
    fn recv(&self) -> BoxFuture<'_, Option<ChannelMessage>>;

    /// Closes both directions.
    fn close(&self) -> BoxFuture<'_, Result<(), ChannelError>>;
}
