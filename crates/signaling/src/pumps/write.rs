//! Write pump: the only task that touches the WebSocket sink.

use futures_util::SinkExt;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use tracing::{error, trace};

use crate::client::SharedDisconnect;

/// Forwards queued frames to the relay until cancelled or the queue closes.
///
/// A failed write means the relay is gone; it is reported through the
/// disconnect slot and the remaining pumps are cancelled.
pub(crate) async fn write_pump<S>(
    mut write: S,
    mut write_rx: mpsc::Receiver<tungstenite::Message>,
    disconnect: SharedDisconnect,
    cancel: CancellationToken,
) where
    S: SinkExt<tungstenite::Message, Error = tungstenite::Error> + Unpin,
{
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            msg = write_rx.recv() => {
                let Some(msg) = msg else { break };
                let is_close = matches!(msg, tungstenite::Message::Close(_));
                trace!(len = msg.len(), "writing frame");
                if let Err(e) = write.send(msg).await {
                    error!("relay write error: {e}");
                    if !cancel.is_cancelled() {
                        cancel.cancel();
                        disconnect.lock().await.fire(format!("write failed: {e}"));
                    }
                    return;
                }
                if is_close {
                    return;
                }
            }
        }
    }

    let _ = write.send(tungstenite::Message::Close(None)).await;
}
