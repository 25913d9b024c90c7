use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Notify, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use webrtc::data_channel::RTCDataChannel;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::data_channel_state::RTCDataChannelState;

use peerdrop_peer_link::{BoxFuture, ChannelError, DataChannel, TransportEvent};
use peerdrop_protocol::ChannelMessage;

/// Fallback poll while waiting for the buffer to drain.
///
/// The buffered-amount-low callback only fires on a downward crossing of
/// the configured threshold, so waits for other thresholds poll.
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// A WebRTC data channel.
pub struct WebRtcChannel {
    dc: Arc<RTCDataChannel>,
    rx: Mutex<mpsc::UnboundedReceiver<ChannelMessage>>,
    drained: Arc<Notify>,
    closed: CancellationToken,
}

impl WebRtcChannel {
    /// Hooks up handlers on `dc` and announces it on `events` once open.
    pub(crate) async fn attach(
        dc: Arc<RTCDataChannel>,
        low_water_mark: usize,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Arc<Self> {
        let (msg_tx, msg_rx) = mpsc::unbounded_channel();
        let drained = Arc::new(Notify::new());
        let closed = CancellationToken::new();

        dc.on_message(Box::new(move |msg: DataChannelMessage| {
            let _ = msg_tx.send(to_channel_message(msg));
            Box::pin(async {})
        }));

        let on_close = closed.clone();
        let label = dc.label().to_string();
        dc.on_close(Box::new(move || {
            debug!(%label, "data channel closed");
            on_close.cancel();
            Box::pin(async {})
        }));

        let notify = drained.clone();
        dc.set_buffered_amount_low_threshold(low_water_mark).await;
        dc.on_buffered_amount_low(Box::new(move || {
            notify.notify_waiters();
            Box::pin(async {})
        }))
        .await;

        let channel = Arc::new(Self {
            dc: dc.clone(),
            rx: Mutex::new(msg_rx),
            drained,
            closed,
        });

        // Fires immediately if the channel is already open.
        let opened = channel.clone();
        dc.on_open(Box::new(move || {
            let _ = events.send(TransportEvent::ChannelOpen(opened));
            Box::pin(async {})
        }));
        channel
    }
}

fn to_channel_message(msg: DataChannelMessage) -> ChannelMessage {
    if msg.is_string {
        match String::from_utf8(msg.data.to_vec()) {
            Ok(text) => ChannelMessage::Text(text),
            Err(e) => {
                warn!(error = %e, "text message is not UTF-8");
                ChannelMessage::Text(String::from_utf8_lossy(&msg.data).into_owned())
            }
        }
    } else {
        ChannelMessage::Binary(msg.data)
    }
}

impl WebRtcChannel {
    fn send_error(&self, e: webrtc::Error) -> ChannelError {
        if self.closed.is_cancelled() {
            ChannelError::Closed
        } else {
            ChannelError::Send(e.to_string())
        }
    }
}

impl DataChannel for WebRtcChannel {
    fn label(&self) -> &str {
        self.dc.label()
    }

    fn is_open(&self) -> bool {
        !self.closed.is_cancelled() && self.dc.ready_state() == RTCDataChannelState::Open
    }

    fn send(&self, msg: ChannelMessage) -> BoxFuture<'_, Result<(), ChannelError>> {
        Box::pin(async move {
            if !self.is_open() {
                return Err(ChannelError::Closed);
            }
            let result = match msg {
                ChannelMessage::Text(text) => self.dc.send_text(text).await,
                ChannelMessage::Binary(bytes) => self.dc.send(&bytes).await,
            };
            result.map(|_| ()).map_err(|e| self.send_error(e))
        })
    }

    fn buffered_amount(&self) -> BoxFuture<'_, usize> {
        Box::pin(self.dc.buffered_amount())
    }

    fn wait_buffered_low(&self, threshold: usize) -> BoxFuture<'_, Result<(), ChannelError>> {
        Box::pin(async move {
            loop {
                let notified = self.drained.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();

                if self.dc.buffered_amount().await <= threshold {
                    return Ok(());
                }
                if self.closed.is_cancelled() {
                    return Err(ChannelError::Closed);
                }

                tokio::select! {
                    _ = &mut notified => {}
                    _ = tokio::time::sleep(DRAIN_POLL_INTERVAL) => {}
                    _ = self.closed.cancelled() => {}
                }
            }
        })
    }

    fn recv(&self) -> BoxFuture<'_, Option<ChannelMessage>> {
        Box::pin(async move {
            let mut rx = self.rx.lock().await;
            tokio::select! {
                biased;
                msg = rx.recv() => msg,
                _ = self.closed.cancelled() => rx.try_recv().ok(),
            }
        })
    }

    fn close(&self) -> BoxFuture<'_, Result<(), ChannelError>> {
        Box::pin(async move {
            self.closed.cancel();
            self.dc
                .close()
                .await
                .map_err(|e| ChannelError::Send(e.to_string()))
        })
    }
}
