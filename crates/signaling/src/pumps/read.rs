//! Read pump: decodes relayed frames and dispatches them.

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use peerdrop_protocol::{SignalingMessage, WS_MAX_MESSAGE_SIZE, WS_PONG_WAIT};

use crate::client::{SharedDisconnect, SharedDispatch};

/// Reads frames from the relay until the connection ends.
///
/// Any incoming frame resets a read deadline of [`WS_PONG_WAIT`]; silence
/// past the deadline counts as a dead relay. When the loop ends for any
/// reason other than cancellation by the owner, the remaining pumps are
/// cancelled and the loss is reported once through the disconnect slot.
pub(crate) async fn read_pump<S>(
    mut read: S,
    dispatch: SharedDispatch,
    disconnect: SharedDisconnect,
    write_tx: mpsc::Sender<tungstenite::Message>,
    cancel: CancellationToken,
) where
    S: StreamExt<Item = Result<tungstenite::Message, tungstenite::Error>> + Unpin,
{
    let deadline = tokio::time::sleep(WS_PONG_WAIT);
    tokio::pin!(deadline);

    let reason = loop {
        tokio::select! {
            _ = cancel.cancelled() => return,

            () = &mut deadline => {
                warn!("relay silent past read deadline, closing");
                break "relay stopped responding".to_string();
            }

            frame = read.next() => {
                let msg = match frame {
                    Some(Ok(msg)) => msg,
                    Some(Err(e)) => {
                        warn!("relay read error: {e}");
                        break format!("read failed: {e}");
                    }
                    None => {
                        debug!("relay stream ended");
                        break "relay connection ended".to_string();
                    }
                };

                deadline.as_mut().reset(tokio::time::Instant::now() + WS_PONG_WAIT);

                match msg {
                    tungstenite::Message::Text(text) => {
                        handle_text_message(&text, &dispatch).await;
                    }
                    tungstenite::Message::Ping(data) => {
                        trace!("received ping, sending pong");
                        let _ = write_tx.send(tungstenite::Message::Pong(data)).await;
                    }
                    tungstenite::Message::Close(frame) => {
                        debug!(?frame, "relay sent close frame");
                        break "relay closed the connection".to_string();
                    }
                    tungstenite::Message::Binary(data) => {
                        debug!(len = data.len(), "ignoring binary frame from relay");
                    }
                    _ => {}
                }
            }
        }
    };

    if cancel.is_cancelled() {
        return;
    }
    cancel.cancel();
    disconnect.lock().await.fire(reason);
}

/// Decodes one text frame and hands it to the dispatcher.
///
/// Frames that are oversized or not a signaling message are dropped with a
/// warning; the relay may carry traffic from newer peers.
async fn handle_text_message(text: &str, dispatch: &SharedDispatch) {
    if text.len() > WS_MAX_MESSAGE_SIZE {
        warn!("message too large ({} bytes), dropping", text.len());
        return;
    }

    let msg = match SignalingMessage::decode(text) {
        Ok(m) => m,
        Err(e) => {
            warn!("ignoring undecodable signaling message: {e}");
            return;
        }
    };

    trace!(kind = msg.kind(), "received signaling message");
    dispatch.lock().await.deliver(msg);
}
