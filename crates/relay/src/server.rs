//! Relay WebSocket server.
//!
//! Listens on a TCP address, upgrades each connection whose path names a
//! valid session, and shuttles text frames between the two peers of that
//! session.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, mpsc};
use tokio_tungstenite::accept_hdr_async_with_config;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::tungstenite::Utf8Bytes;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::frame::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_util::sync::CancellationToken;

use peerdrop_protocol::{SessionId, WS_MAX_MESSAGE_SIZE};

use crate::room::{PeerId, Room, Route};
use crate::{DEFAULT_MAX_QUEUED, DEFAULT_PORT, RelayError, SEND_BUFFER_SIZE};

/// Relay configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Address to listen on (port 0 = OS-assigned).
    pub bind: SocketAddr,
    /// Frames kept for a peer that has not joined yet.
    pub max_queued: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind: ([0, 0, 0, 0], DEFAULT_PORT).into(),
            max_queued: DEFAULT_MAX_QUEUED,
        }
    }
}

/// The relay server.
pub struct RelayServer {
    config: RelayConfig,
    rooms: Mutex<HashMap<SessionId, Room>>,
    next_peer: AtomicU64,
    cancel: CancellationToken,
    local_addr: Mutex<Option<SocketAddr>>,
}

impl RelayServer {
    pub fn new(config: RelayConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            rooms: Mutex::new(HashMap::new()),
            next_peer: AtomicU64::new(1),
            cancel: CancellationToken::new(),
            local_addr: Mutex::new(None),
        })
    }

    /// Returns the bound address; `None` until [`run`](Self::run) binds.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().await
    }

    /// Number of sessions with at least one peer.
    pub async fn room_count(&self) -> usize {
        self.rooms.lock().await.len()
    }

    /// Number of peers currently joined to `session`.
    pub async fn peer_count(&self, session: &SessionId) -> usize {
        self.rooms
            .lock()
            .await
            .get(session)
            .map_or(0, Room::peer_count)
    }

    /// Stops accepting and closes every peer connection.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Runs the accept loop until [`shutdown`](Self::shutdown).
    pub async fn run(self: &Arc<Self>) -> Result<(), RelayError> {
        let listener = TcpListener::bind(self.config.bind).await?;
        let local_addr = listener.local_addr()?;
        *self.local_addr.lock().await = Some(local_addr);
        tracing::info!("relay listening on {local_addr}");

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::info!("relay shutting down");
                    break Ok(());
                }

                result = listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => {
                            let server = Arc::clone(self);
                            tokio::spawn(async move {
                                if let Err(e) = server.handle_connection(stream, peer_addr).await {
                                    tracing::warn!(%peer_addr, "connection ended: {e}");
                                }
                            });
                        }
                        Err(e) => tracing::error!("accept error: {e}"),
                    }
                }
            }
        }
    }

    /// Upgrades one TCP connection and serves it until either side leaves.
    async fn handle_connection(
        self: &Arc<Self>,
        stream: TcpStream,
        peer_addr: SocketAddr,
    ) -> Result<(), RelayError> {
        let mut ws_config = tokio_tungstenite::tungstenite::protocol::WebSocketConfig::default();
        ws_config.max_message_size = Some(WS_MAX_MESSAGE_SIZE);
        ws_config.max_frame_size = Some(WS_MAX_MESSAGE_SIZE);

        let mut requested: Option<Result<SessionId, String>> = None;
        let callback = |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
            let path = req.uri().path().trim_start_matches('/').to_string();
            match path.parse::<SessionId>() {
                Ok(id) => {
                    requested = Some(Ok(id));
                    Ok(resp)
                }
                Err(e) => {
                    requested = Some(Err(path));
                    let mut err = ErrorResponse::new(Some(format!("invalid session: {e}")));
                    *err.status_mut() = StatusCode::BAD_REQUEST;
                    Err(err)
                }
            }
        };
        let upgraded = accept_hdr_async_with_config(stream, callback, Some(ws_config)).await;
        let (ws, session) = match (upgraded, requested) {
            (Ok(ws), Some(Ok(session))) => (ws, session),
            (_, Some(Err(path))) => return Err(RelayError::InvalidSession(path)),
            (Err(e), _) => return Err(e.into()),
            (Ok(_), None) => return Err(RelayError::InvalidSession(String::new())),
        };

        let peer_id: PeerId = self.next_peer.fetch_add(1, Ordering::Relaxed);
        let (mut write, mut read) = ws.split();
        // Room for the whole backlog so it can be handed over under the lock,
        // ahead of anything the partner sends next.
        let (tx, mut rx) =
            mpsc::channel::<WsMessage>(SEND_BUFFER_SIZE.max(self.config.max_queued));

        let joined = {
            let mut rooms = self.rooms.lock().await;
            let room = rooms
                .entry(session.clone())
                .or_insert_with(|| Room::new(self.config.max_queued));
            room.join(peer_id, tx.clone()).map(|pending| {
                let queued = pending.len();
                for text in pending {
                    let _ = tx.try_send(WsMessage::Text(text.into()));
                }
                queued
            })
        };
        let Some(queued) = joined else {
            tracing::warn!(%peer_addr, %session, "rejecting third peer");
            let close = CloseFrame {
                code: CloseCode::Policy,
                reason: Utf8Bytes::from_static("session full"),
            };
            let _ = write.send(WsMessage::Close(Some(close))).await;
            return Err(RelayError::SessionFull(session.to_string()));
        };
        tracing::info!(%peer_addr, %session, peer_id, queued, "peer joined");

        let cancel = self.cancel.child_token();
        let writer = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        msg = rx.recv() => {
                            let Some(msg) = msg else { break };
                            if let Err(e) = write.send(msg).await {
                                tracing::debug!("peer write error: {e}");
                                return;
                            }
                        }
                    }
                }
                let _ = write.send(WsMessage::Close(None)).await;
            })
        };

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                frame = read.next() => {
                    match frame {
                        Some(Ok(WsMessage::Text(text))) => {
                            self.forward(&session, peer_id, text.to_string()).await;
                        }
                        Some(Ok(WsMessage::Binary(data))) => {
                            tracing::debug!(%session, len = data.len(), "dropping binary frame");
                        }
                        Some(Ok(WsMessage::Ping(data))) => {
                            let _ = tx.try_send(WsMessage::Pong(data));
                        }
                        Some(Ok(WsMessage::Close(_))) | None => break,
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            tracing::debug!(%session, "peer read error: {e}");
                            break;
                        }
                    }
                }
            }
        }

        self.leave(&session, peer_id).await;
        cancel.cancel();
        let _ = writer.await;
        tracing::info!(%peer_addr, %session, peer_id, "peer left");
        Ok(())
    }

    async fn forward(&self, session: &SessionId, from: PeerId, text: String) {
        let route = match self.rooms.lock().await.get_mut(session) {
            Some(room) => room.route(from, &text),
            None => return,
        };
        match route {
            Route::Deliver(to) => {
                if to.send(WsMessage::Text(text.into())).await.is_err() {
                    tracing::debug!(%session, "partner gone while forwarding");
                }
            }
            Route::Queued => tracing::debug!(%session, "partner absent, queued frame"),
            Route::Dropped => tracing::warn!(%session, "backlog full, dropping frame"),
        }
    }

    async fn leave(&self, session: &SessionId, peer_id: PeerId) {
        let mut rooms = self.rooms.lock().await;
        if let Some(room) = rooms.get_mut(session) {
            if room.leave(peer_id) {
                rooms.remove(session);
            }
        }
    }
}
