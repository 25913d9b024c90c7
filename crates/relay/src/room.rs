use std::collections::VecDeque;

use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;

/// Peers are addressed by a server-wide counter.
pub(crate) type PeerId = u64;

struct Peer {
    id: PeerId,
    tx: mpsc::Sender<WsMessage>,
}

/// Where a relayed frame should go.
pub(crate) enum Route {
    /// Forward to the other peer through this sender.
    Deliver(mpsc::Sender<WsMessage>),
    /// Held until the other peer joins.
    Queued,
    /// Backlog full; the frame is discarded.
    Dropped,
}

/// One session: up to two peers and the frames waiting for an absent one.
pub(crate) struct Room {
    peers: Vec<Peer>,
    backlog: VecDeque<(PeerId, String)>,
    max_queued: usize,
}

impl Room {
    pub(crate) fn new(max_queued: usize) -> Self {
        Self {
            peers: Vec::with_capacity(2),
            backlog: VecDeque::new(),
            max_queued,
        }
    }

    /// Adds a peer, returning the queued frames it should receive first.
    ///
    /// Returns `None` when the room already holds two peers.
    pub(crate) fn join(&mut self, id: PeerId, tx: mpsc::Sender<WsMessage>) -> Option<Vec<String>> {
        if self.peers.len() >= 2 {
            return None;
        }
        self.peers.push(Peer { id, tx });
        let pending = self
            .backlog
            .drain(..)
            .filter(|(from, _)| *from != id)
            .map(|(_, text)| text)
            .collect();
        Some(pending)
    }

    /// Decides where a text frame from `from` goes.
    pub(crate) fn route(&mut self, from: PeerId, text: &str) -> Route {
        if let Some(other) = self.peers.iter().find(|p| p.id != from) {
            return Route::Deliver(other.tx.clone());
        }
        if self.backlog.len() >= self.max_queued {
            return Route::Dropped;
        }
        self.backlog.push_back((from, text.to_string()));
        Route::Queued
    }

    /// Removes a peer and anything it queued. Returns `true` if the room is
    /// now empty.
    pub(crate) fn leave(&mut self, id: PeerId) -> bool {
        self.peers.retain(|p| p.id != id);
        self.backlog.retain(|(from, _)| *from != id);
        self.peers.is_empty()
    }

    pub(crate) fn peer_count(&self) -> usize {
        self.peers.len()
    }
}
