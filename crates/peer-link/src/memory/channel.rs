use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::{Mutex, Notify, mpsc};
use tokio_util::sync::CancellationToken;

use peerdrop_protocol::ChannelMessage;

use crate::{BoxFuture, ChannelError, DataChannel};

/// Accounting for one direction of a channel.
///
/// Bytes count as buffered from `send` until the remote end pulls the
/// message with `recv`, so a slow consumer looks like a slow network.
#[derive(Default)]
struct Direction {
    buffered: AtomicUsize,
    peak: AtomicUsize,
    drained: Notify,
}

/// One end of an in-memory channel pair.
pub struct MemoryChannel {
    label: String,
    tx: mpsc::UnboundedSender<ChannelMessage>,
    rx: Mutex<mpsc::UnboundedReceiver<ChannelMessage>>,
    outbound: Arc<Direction>,
    inbound: Arc<Direction>,
    closed: CancellationToken,
}

/// Creates two connected channel ends sharing one close signal.
pub fn channel_pair(label: &str) -> (MemoryChannel, MemoryChannel) {
    let (a_tx, b_rx) = mpsc::unbounded_channel();
    let (b_tx, a_rx) = mpsc::unbounded_channel();
    let a_to_b = Arc::new(Direction::default());
    let b_to_a = Arc::new(Direction::default());
    let closed = CancellationToken::new();

    let a = MemoryChannel {
        label: label.to_string(),
        tx: a_tx,
        rx: Mutex::new(a_rx),
        outbound: a_to_b.clone(),
        inbound: b_to_a.clone(),
        closed: closed.clone(),
    };
    let b = MemoryChannel {
        label: label.to_string(),
        tx: b_tx,
        rx: Mutex::new(b_rx),
        outbound: b_to_a,
        inbound: a_to_b,
        closed,
    };
    (a, b)
}

impl MemoryChannel {
    /// Highest buffered amount this end has reached.
    pub fn peak_buffered_amount(&self) -> usize {
        self.outbound.peak.load(Ordering::Acquire)
    }

    pub(crate) fn close_token(&self) -> CancellationToken {
        self.closed.clone()
    }

    fn shut(&self) {
        self.closed.cancel();
        self.outbound.drained.notify_waiters();
        self.inbound.drained.notify_waiters();
    }
}

impl DataChannel for MemoryChannel {
    fn label(&self) -> &str {
        &self.label
    }

    fn is_open(&self) -> bool {
        !self.closed.is_cancelled()
    }

    fn send(&self, msg: ChannelMessage) -> BoxFuture<'_, Result<(), ChannelError>> {
        Box::pin(async move {
            if self.closed.is_cancelled() {
                return Err(ChannelError::Closed);
            }
            let len = msg.len();
            let now = self.outbound.buffered.fetch_add(len, Ordering::AcqRel) + len;
            self.outbound.peak.fetch_max(now, Ordering::AcqRel);
            if self.tx.send(msg).is_err() {
                self.outbound.buffered.fetch_sub(len, Ordering::AcqRel);
                return Err(ChannelError::Closed);
            }
            Ok(())
        })
    }

    fn buffered_amount(&self) -> BoxFuture<'_, usize> {
        Box::pin(async move { self.outbound.buffered.load(Ordering::Acquire) })
    }

    fn wait_buffered_low(&self, threshold: usize) -> BoxFuture<'_, Result<(), ChannelError>> {
        Box::pin(async move {
            loop {
                let notified = self.outbound.drained.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();

                if self.outbound.buffered.load(Ordering::Acquire) <= threshold {
                    return Ok(());
                }
                if self.closed.is_cancelled() {
                    return Err(ChannelError::Closed);
                }

                // Either wake-up loops back, so a drain that raced the close
                // still counts.
                tokio::select! {
                    _ = &mut notified => {}
                    _ = self.closed.cancelled() => {}
                }
            }
        })
    }

    fn recv(&self) -> BoxFuture<'_, Option<ChannelMessage>> {
        Box::pin(async move {
            let mut rx = self.rx.lock().await;
            let msg = tokio::select! {
                biased;
                msg = rx.recv() => msg,
                _ = self.closed.cancelled() => rx.try_recv().ok(),
            }?;
            self.inbound.buffered.fetch_sub(msg.len(), Ordering::AcqRel);
            self.inbound.drained.notify_waiters();
            Some(msg)
        })
    }

    fn close(&self) -> BoxFuture<'_, Result<(), ChannelError>> {
        Box::pin(async move {
            self.shut();
            Ok(())
        })
    }
}
