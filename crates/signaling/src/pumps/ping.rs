//! Ping pump: keeps idle relay connections alive.

use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use peerdrop_protocol::WS_PING_PERIOD;

/// Queues a ping every [`WS_PING_PERIOD`] until cancelled.
///
/// Relays and proxies drop idle WebSockets; the pong (or any other frame)
/// also feeds the read pump's deadline.
pub(crate) async fn ping_pump(
    write_tx: mpsc::Sender<tungstenite::Message>,
    cancel: CancellationToken,
) {
    let start = tokio::time::Instant::now() + WS_PING_PERIOD;
    let mut interval = tokio::time::interval_at(start, WS_PING_PERIOD);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = interval.tick() => {
                trace!("pinging relay");
                let ping = tungstenite::Message::Ping(Vec::new().into());
                if write_tx.send(ping).await.is_err() {
                    return;
                }
            }
        }
    }
}
