use std::collections::HashSet;
use std::sync::Arc;

use serde_json::{Value, json};
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use peerdrop_protocol::{DATA_CHANNEL_LABEL, Payload};

use super::channel::channel_pair;
use crate::{BoxFuture, PeerTransport, TransportError, TransportEvent};

/// A transport plus the event stream its manager consumes.
pub type MemoryEndpoint = (Arc<MemoryTransport>, mpsc::UnboundedReceiver<TransportEvent>);

struct Side {
    events: mpsc::UnboundedSender<TransportEvent>,
    local: Option<&'static str>,
    remote: Option<String>,
    remote_candidates: HashSet<String>,
}

impl Side {
    fn new(events: mpsc::UnboundedSender<TransportEvent>) -> Self {
        Self {
            events,
            local: None,
            remote: None,
            remote_candidates: HashSet::new(),
        }
    }

    fn emit(&self, event: TransportEvent) {
        // Receiver gone means the manager already stopped.
        let _ = self.events.send(event);
    }

    fn connectable(&self) -> bool {
        self.local.is_some() && self.remote.is_some() && !self.remote_candidates.is_empty()
    }
}

struct Shared {
    sides: [Side; 2],
    next_candidate: u32,
    channel: Option<CancellationToken>,
    closed: bool,
}

impl Shared {
    fn emit_candidate(&mut self, side: usize) -> Result<(), TransportError> {
        self.next_candidate += 1;
        let candidate = Payload::from_value(&json!({
            "candidate": format!("candidate:{} 1 memory {side}", self.next_candidate),
            "sdpMid": "0",
            "sdpMLineIndex": 0,
        }))
        .map_err(|e| TransportError::new(e.to_string()))?;
        self.sides[side].emit(TransportEvent::LocalCandidate(candidate));
        Ok(())
    }

    fn try_open(&mut self) {
        if self.channel.is_some() || !self.sides.iter().all(Side::connectable) {
            return;
        }
        let (a, b) = channel_pair(DATA_CHANNEL_LABEL);
        self.channel = Some(a.close_token());
        debug!("memory link connected");
        self.sides[0].emit(TransportEvent::ChannelOpen(Arc::new(a)));
        self.sides[1].emit(TransportEvent::ChannelOpen(Arc::new(b)));
    }
}

/// One side of an in-process peer connection.
pub struct MemoryTransport {
    side: usize,
    shared: Arc<Mutex<Shared>>,
}

/// Creates two linked transports and their event streams.
pub fn transport_pair() -> (MemoryEndpoint, MemoryEndpoint) {
    let (a_tx, a_rx) = mpsc::unbounded_channel();
    let (b_tx, b_rx) = mpsc::unbounded_channel();
    let shared = Arc::new(Mutex::new(Shared {
        sides: [Side::new(a_tx), Side::new(b_tx)],
        next_candidate: 0,
        channel: None,
        closed: false,
    }));
    let a = MemoryTransport {
        side: 0,
        shared: shared.clone(),
    };
    let b = MemoryTransport { side: 1, shared };
    ((Arc::new(a), a_rx), (Arc::new(b), b_rx))
}

impl MemoryTransport {
    async fn describe(&self, kind: &'static str) -> Result<Payload, TransportError> {
        let mut shared = self.shared.lock().await;
        if shared.closed {
            return Err(TransportError::new("transport closed"));
        }
        let side = &mut shared.sides[self.side];
        if side.local.is_some() {
            return Err(TransportError::new("local description already set"));
        }
        if kind == "answer" && side.remote.as_deref() != Some("offer") {
            return Err(TransportError::new("answer requires a remote offer"));
        }
        side.local = Some(kind);

        let desc = Payload::from_value(&json!({
            "type": kind,
            "sdp": format!("v=0 memory {}", self.side),
        }))
        .map_err(|e| TransportError::new(e.to_string()))?;
        shared.emit_candidate(self.side)?;
        shared.try_open();
        Ok(desc)
    }
}

impl PeerTransport for MemoryTransport {
    fn create_offer(&self) -> BoxFuture<'_, Result<Payload, TransportError>> {
        Box::pin(self.describe("offer"))
    }

    fn create_answer(&self) -> BoxFuture<'_, Result<Payload, TransportError>> {
        Box::pin(self.describe("answer"))
    }

    fn set_remote_description(
        &self,
        desc: Payload,
    ) -> BoxFuture<'_, Result<(), TransportError>> {
        Box::pin(async move {
            let value: Value = desc
                .parse()
                .map_err(|e| TransportError::new(format!("bad description: {e}")))?;
            let kind = value
                .get("type")
                .and_then(Value::as_str)
                .filter(|k| matches!(*k, "offer" | "answer"))
                .ok_or_else(|| TransportError::new("description has no valid type"))?;

            let mut shared = self.shared.lock().await;
            if shared.closed {
                return Err(TransportError::new("transport closed"));
            }
            let side = &mut shared.sides[self.side];
            if side.remote.is_some() {
                return Err(TransportError::new("remote description already set"));
            }
            side.remote = Some(kind.to_string());
            shared.try_open();
            Ok(())
        })
    }

    fn add_ice_candidate(&self, candidate: Payload) -> BoxFuture<'_, Result<(), TransportError>> {
        Box::pin(async move {
            let mut shared = self.shared.lock().await;
            if shared.closed {
                return Err(TransportError::new("transport closed"));
            }
            let side = &mut shared.sides[self.side];
            if side.remote.is_none() {
                return Err(TransportError::new("remote description not set"));
            }
            side.remote_candidates.insert(candidate.as_str().to_string());
            shared.try_open();
            Ok(())
        })
    }

    fn close(&self) -> BoxFuture<'_, Result<(), TransportError>> {
        Box::pin(async move {
            let mut shared = self.shared.lock().await;
            if shared.closed {
                return Ok(());
            }
            shared.closed = true;
            if let Some(channel) = shared.channel.take() {
                channel.cancel();
            }
            for side in &shared.sides {
                side.emit(TransportEvent::Closed);
            }
            Ok(())
        })
    }
}
