//! WebSocket client for one signaling session.
//!
//! Owns three pump tasks (read, write, ping) tied to a shared
//! cancellation token. Relayed messages are dispatched in receipt order to
//! the registered handler; messages that arrive before a handler is set
//! are held back and replayed on registration.

use std::sync::Arc;

use futures_util::StreamExt;
use tokio::sync::{Mutex, mpsc};
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use peerdrop_protocol::{SessionId, SignalingMessage, WS_CONNECT_TIMEOUT, WS_MAX_MESSAGE_SIZE};

use crate::SignalingError;

/// Callback invoked for every relayed message.
pub type MessageCallback = Box<dyn Fn(SignalingMessage) + Send + Sync>;

/// Callback invoked once when the relay connection is lost.
pub type DisconnectCallback = Box<dyn Fn(SignalingError) + Send + Sync>;

/// Message handler plus the messages received before one was registered.
#[derive(Default)]
pub(crate) struct Dispatch {
    handler: Option<MessageCallback>,
    backlog: Vec<SignalingMessage>,
}

impl Dispatch {
    /// Installs the handler after replaying the backlog through it.
    pub(crate) fn set_handler(&mut self, cb: MessageCallback) {
        for msg in self.backlog.drain(..) {
            cb(msg);
        }
        self.handler = Some(cb);
    }

    pub(crate) fn deliver(&mut self, msg: SignalingMessage) {
        match self.handler.as_ref() {
            Some(cb) => cb(msg),
            None => self.backlog.push(msg),
        }
    }
}

/// Disconnect handler plus the reason, once the connection has dropped.
#[derive(Default)]
pub(crate) struct DisconnectSlot {
    handler: Option<DisconnectCallback>,
    reason: Option<String>,
}

impl DisconnectSlot {
    /// Installs the owner's handler, firing it at once if already disconnected.
    pub(crate) fn set_handler(&mut self, cb: DisconnectCallback) {
        if let Some(reason) = self.reason.clone() {
            cb(SignalingError::Unavailable(reason));
        }
        self.handler = Some(cb);
    }

    /// Records the loss and notifies the owner. Only the first call counts.
    pub(crate) fn fire(&mut self, reason: String) {
        if self.reason.is_some() {
            return;
        }
        if let Some(cb) = self.handler.as_ref() {
            cb(SignalingError::Unavailable(reason.clone()));
        }
        self.reason = Some(reason);
    }
}

pub(crate) type SharedDispatch = Arc<Mutex<Dispatch>>;
pub(crate) type SharedDisconnect = Arc<Mutex<DisconnectSlot>>;

/// Builds the WebSocket URL of a session room on the relay.
pub fn session_url(relay_url: &str, session: &SessionId) -> Result<String, SignalingError> {
    let base = relay_url.trim().trim_end_matches('/');
    if !(base.starts_with("ws://") || base.starts_with("wss://")) {
        return Err(SignalingError::InvalidUrl(relay_url.to_string()));
    }
    Ok(format!("{base}/{session}"))
}

/// Connection to the relay for a single session.
pub struct SignalingClient {
    session: SessionId,
    write_tx: mpsc::Sender<tungstenite::Message>,
    dispatch: SharedDispatch,
    disconnect: SharedDisconnect,
    _read_handle: tokio::task::JoinHandle<()>,
    _write_handle: tokio::task::JoinHandle<()>,
    _ping_handle: tokio::task::JoinHandle<()>,
    cancel: CancellationToken,
}

impl SignalingClient {
    /// Connects to the relay room of `session`.
    ///
    /// Fails with [`SignalingError::Unavailable`] if the relay cannot be
    /// reached within [`WS_CONNECT_TIMEOUT`].
    pub async fn connect(relay_url: &str, session: &SessionId) -> Result<Self, SignalingError> {
        let url = session_url(relay_url, session)?;

        let mut ws_config = tungstenite::protocol::WebSocketConfig::default();
        ws_config.max_message_size = Some(WS_MAX_MESSAGE_SIZE);
        ws_config.max_frame_size = Some(WS_MAX_MESSAGE_SIZE);

        let connect =
            tokio_tungstenite::connect_async_with_config(url.as_str(), Some(ws_config), false);
        let ws_stream = match tokio::time::timeout(WS_CONNECT_TIMEOUT, connect).await {
            Ok(Ok((ws, _))) => ws,
            Ok(Err(e)) => return Err(SignalingError::Unavailable(e.to_string())),
            Err(_) => {
                return Err(SignalingError::Unavailable(
                    "timed out connecting to relay".into(),
                ));
            }
        };
        info!(%url, "connected to relay");

        let (write, read) = ws_stream.split();
        let (write_tx, write_rx) = mpsc::channel::<tungstenite::Message>(256);
        let dispatch: SharedDispatch = Arc::new(Mutex::new(Dispatch::default()));
        let disconnect: SharedDisconnect = Arc::new(Mutex::new(DisconnectSlot::default()));
        let cancel = CancellationToken::new();

        let write_handle = {
            let disconnect = disconnect.clone();
            let cancel = cancel.clone();
            tokio::spawn(crate::pumps::write::write_pump(
                write, write_rx, disconnect, cancel,
            ))
        };

        let read_handle = {
            let dispatch = dispatch.clone();
            let disconnect = disconnect.clone();
            let write_tx = write_tx.clone();
            let cancel = cancel.clone();
            tokio::spawn(crate::pumps::read::read_pump(
                read, dispatch, disconnect, write_tx, cancel,
            ))
        };

        let ping_handle = {
            let write_tx = write_tx.clone();
            let cancel = cancel.clone();
            tokio::spawn(crate::pumps::ping::ping_pump(write_tx, cancel))
        };

        Ok(Self {
            session: session.clone(),
            write_tx,
            dispatch,
            disconnect,
            _read_handle: read_handle,
            _write_handle: write_handle,
            _ping_handle: ping_handle,
            cancel,
        })
    }

    /// Returns the session this client joined.
    pub fn session(&self) -> &SessionId {
        &self.session
    }

    /// Relays a message to the remote peer.
    pub async fn send(&self, msg: SignalingMessage) -> Result<(), SignalingError> {
        if let Some(reason) = self.disconnect.lock().await.reason.clone() {
            return Err(SignalingError::Unavailable(reason));
        }
        let json = msg.encode()?;
        debug!(kind = msg.kind(), "sending signaling message");
        self.write_tx
            .send(tungstenite::Message::Text(json.into()))
            .await
            .map_err(|_| SignalingError::Closed)
    }

    /// Sets the handler for relayed messages.
    ///
    /// Messages received before registration are delivered first, in
    /// receipt order.
    pub async fn on_message(&self, cb: MessageCallback) {
        self.dispatch.lock().await.set_handler(cb);
    }

    /// Sets the handler notified when the relay connection is lost.
    ///
    /// Fires immediately if the connection has already dropped. Not fired
    /// for a [`close`](Self::close) initiated by the owner.
    pub async fn on_disconnect(&self, cb: DisconnectCallback) {
        self.disconnect.lock().await.set_handler(cb);
    }

    /// Returns `true` while the relay connection is up.
    pub fn is_connected(&self) -> bool {
        !self.cancel.is_cancelled() && !self.write_tx.is_closed()
    }

    /// Gracefully closes the connection.
    pub async fn close(&self) {
        self.cancel.cancel();
        let _ = self.write_tx.send(tungstenite::Message::Close(None)).await;
    }
}

impl Drop for SignalingClient {
    fn drop(&mut self) {
        self.cancel.cancel();
        self._read_handle.abort();
        self._write_handle.abort();
        self._ping_handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use peerdrop_protocol::Payload;
    use peerdrop_relay::{RelayConfig, RelayServer};

    fn candidate(n: u32) -> SignalingMessage {
        SignalingMessage::Candidate(
            Payload::from_json(format!(r#"{{"candidate":"candidate:{n}"}}"#)).unwrap(),
        )
    }

    async fn start_relay() -> (Arc<RelayServer>, String, tokio::task::JoinHandle<()>) {
        let server = RelayServer::new(RelayConfig {
            bind: "127.0.0.1:0".parse().unwrap(),
            ..RelayConfig::default()
        });
        let s = Arc::clone(&server);
        let handle = tokio::spawn(async move {
            s.run().await.unwrap();
        });
        let addr = loop {
            if let Some(addr) = server.local_addr().await {
                break addr;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        };
        (server, format!("ws://{addr}"), handle)
    }

    async fn collect(client: &SignalingClient) -> mpsc::UnboundedReceiver<SignalingMessage> {
        let (tx, rx) = mpsc::unbounded_channel();
        client
            .on_message(Box::new(move |msg| {
                let _ = tx.send(msg);
            }))
            .await;
        rx
    }

    #[test]
    fn session_url_joins_path() {
        let id: SessionId = "abc".parse().unwrap();
        assert_eq!(
            session_url("ws://relay.local:9000/", &id).unwrap(),
            "ws://relay.local:9000/abc"
        );
        assert!(matches!(
            session_url("http://relay.local", &id),
            Err(SignalingError::InvalidUrl(_))
        ));
    }

    #[test]
    fn error_display() {
        assert_eq!(
            SignalingError::Unavailable("gone".into()).to_string(),
            "signaling unavailable: gone"
        );
        assert_eq!(SignalingError::Closed.to_string(), "connection closed");
    }

    #[tokio::test]
    async fn connect_to_missing_relay_is_unavailable() {
        // Bind then drop to get a port nobody listens on.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let id = SessionId::generate();
        let result = SignalingClient::connect(&format!("ws://{addr}"), &id).await;
        assert!(matches!(result, Err(SignalingError::Unavailable(_))));
    }

    #[tokio::test]
    async fn relays_messages_in_order() {
        let (server, url, handle) = start_relay().await;
        let id = SessionId::generate();

        let a = SignalingClient::connect(&url, &id).await.unwrap();
        let b = SignalingClient::connect(&url, &id).await.unwrap();
        let mut b_rx = collect(&b).await;

        for n in 0..20 {
            a.send(candidate(n)).await.unwrap();
        }

        for n in 0..20 {
            let msg = tokio::time::timeout(Duration::from_secs(5), b_rx.recv())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(msg, candidate(n));
        }

        a.close().await;
        b.close().await;
        server.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn messages_before_handler_are_replayed() {
        let (server, url, handle) = start_relay().await;
        let id = SessionId::generate();

        let a = SignalingClient::connect(&url, &id).await.unwrap();
        let b = SignalingClient::connect(&url, &id).await.unwrap();

        let offer = SignalingMessage::Offer(Payload::from_json(r#"{"sdp":"x"}"#).unwrap());
        a.send(offer.clone()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        b.on_message(Box::new(move |msg| {
            let _ = tx.send(msg);
        }))
        .await;

        let got = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got, offer);

        server.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn relay_shutdown_reports_unavailable() {
        let (server, url, handle) = start_relay().await;
        let id = SessionId::generate();
        let client = SignalingClient::connect(&url, &id).await.unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        client
            .on_disconnect(Box::new(move |err| {
                let _ = tx.send(err);
            }))
            .await;

        server.shutdown();
        handle.await.unwrap();

        let err = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(err, SignalingError::Unavailable(_)));

        // Sending after loss fails instead of silently queueing.
        assert!(client.send(candidate(1)).await.is_err());
    }

    #[tokio::test]
    async fn close_does_not_report_unavailable() {
        let (server, url, handle) = start_relay().await;
        let id = SessionId::generate();
        let client = SignalingClient::connect(&url, &id).await.unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        client
            .on_disconnect(Box::new(move |err| {
                let _ = tx.send(err);
            }))
            .await;

        client.close().await;
        assert!(!client.is_connected());
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(rx.try_recv().is_err());

        server.shutdown();
        handle.await.unwrap();
    }
}
