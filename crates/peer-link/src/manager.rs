//! Peer link state machine.
//!
//! All link state lives in one actor task. Public calls and transport
//! events are messages into that task, so transitions are applied one at a
//! time in arrival order.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use peerdrop_protocol::Payload;
use peerdrop_signaling::SignalingError;

use crate::{DataChannel, MAX_PENDING_CANDIDATES, PeerTransport, TransportError, TransportEvent};

const COMMAND_BUFFER: usize = 64;

/// Negotiation state of a peer link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Idle,
    /// Initiator is producing its offer.
    OfferCreated,
    /// Offer sent, waiting for the remote answer.
    AnswerPending,
    /// Responder is applying a remote offer.
    OfferReceived,
    /// Answer sent, waiting for the channel to open.
    AnswerCreated,
    /// Both descriptions applied, connectivity checks running.
    Negotiating,
    Ready,
    Closed,
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::OfferCreated => "offer-created",
            Self::AnswerPending => "answer-pending",
            Self::OfferReceived => "offer-received",
            Self::AnswerCreated => "answer-created",
            Self::Negotiating => "negotiating",
            Self::Ready => "ready",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Errors from peer link operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum LinkError {
    #[error("cannot {operation} while {state}")]
    InvalidState {
        state: LinkState,
        operation: &'static str,
    },

    #[error("too many candidates before the remote description (limit {MAX_PENDING_CANDIDATES})")]
    PrematureCandidate,

    #[error("transport: {0}")]
    Transport(#[from] TransportError),

    #[error("signaling: {0}")]
    Signaling(#[from] SignalingError),

    #[error("link closed")]
    Closed,
}

/// The open data channel plus the token that cancels work on it.
///
/// The token is a child of the link's token: closing the link cancels it,
/// cancelling it leaves the link alone.
#[derive(Clone)]
pub struct ReadyChannel {
    channel: Arc<dyn DataChannel>,
    cancel: CancellationToken,
}

impl ReadyChannel {
    pub fn new(channel: Arc<dyn DataChannel>, cancel: CancellationToken) -> Self {
        Self { channel, cancel }
    }

    pub fn channel(&self) -> &dyn DataChannel {
        self.channel.as_ref()
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl fmt::Debug for ReadyChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadyChannel")
            .field("label", &self.channel.label())
            .field("open", &self.channel.is_open())
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

/// Receives local candidates to relay to the remote peer.
pub type LocalCandidateCallback = Box<dyn Fn(Payload) + Send + Sync>;

/// Receives the channel once the link is ready. Never called if the link
/// closes first.
pub type ReadyCallback = Box<dyn FnOnce(ReadyChannel) + Send>;

type Reply<T> = oneshot::Sender<Result<T, LinkError>>;

enum Command {
    CreateOffer(Reply<Payload>),
    AcceptOffer(Payload, Reply<Payload>),
    AcceptAnswer(Payload, Reply<()>),
    AddRemoteCandidate(Payload, Reply<()>),
    OnLocalCandidate(LocalCandidateCallback),
    OnReady(ReadyCallback),
    Ready(Reply<ReadyChannel>),
    Close(oneshot::Sender<()>),
}

enum ReadyWaiter {
    Callback(ReadyCallback),
    Reply(Reply<ReadyChannel>),
}

impl ReadyWaiter {
    fn resolve(self, result: Result<ReadyChannel, LinkError>) {
        match (self, result) {
            (Self::Callback(cb), Ok(channel)) => cb(channel),
            (Self::Callback(_), Err(_)) => {}
            (Self::Reply(tx), result) => {
                let _ = tx.send(result);
            }
        }
    }
}

/// Handle to one peer link.
///
/// Cheap to clone; all clones drive the same link. The link closes when
/// [`close`](Self::close) is called, the transport reports the connection
/// gone, or the last handle is dropped.
#[derive(Clone)]
pub struct PeerLinkManager {
    commands: mpsc::Sender<Command>,
    state: watch::Receiver<LinkState>,
    cancel: CancellationToken,
}

impl PeerLinkManager {
    /// Starts a link over `transport`, consuming its event stream.
    pub fn spawn(
        transport: Arc<dyn PeerTransport>,
        events: mpsc::UnboundedReceiver<TransportEvent>,
    ) -> Self {
        let (commands, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let (state_tx, state) = watch::channel(LinkState::Idle);
        let cancel = CancellationToken::new();

        let actor = Actor {
            transport,
            state: LinkState::Idle,
            state_tx,
            remote_description_set: false,
            pending: Vec::new(),
            seen: HashSet::new(),
            on_local_candidate: None,
            local_backlog: Vec::new(),
            waiters: Vec::new(),
            ready: None,
            cancel: cancel.clone(),
        };
        tokio::spawn(actor.run(command_rx, events));

        Self {
            commands,
            state,
            cancel,
        }
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(Reply<T>) -> Command,
    ) -> Result<T, LinkError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(make(tx))
            .await
            .map_err(|_| LinkError::Closed)?;
        rx.await.map_err(|_| LinkError::Closed)?
    }

    async fn notify(&self, cmd: Command) -> Result<(), LinkError> {
        self.commands.send(cmd).await.map_err(|_| LinkError::Closed)
    }

    /// Produces the local offer. Only valid from [`LinkState::Idle`].
    pub async fn create_offer(&self) -> Result<Payload, LinkError> {
        self.request(Command::CreateOffer).await
    }

    /// Applies a remote offer and returns the answer to send back.
    pub async fn accept_offer(&self, offer: Payload) -> Result<Payload, LinkError> {
        self.request(|tx| Command::AcceptOffer(offer, tx)).await
    }

    /// Applies the remote answer to an offer this side created.
    pub async fn accept_answer(&self, answer: Payload) -> Result<(), LinkError> {
        self.request(|tx| Command::AcceptAnswer(answer, tx)).await
    }

    /// Applies a remote candidate, or holds it until the remote description
    /// is known. Duplicates are ignored.
    pub async fn add_remote_candidate(&self, candidate: Payload) -> Result<(), LinkError> {
        self.request(|tx| Command::AddRemoteCandidate(candidate, tx))
            .await
    }

    /// Registers the local candidate handler. Candidates gathered before
    /// registration are delivered immediately, in order.
    pub async fn on_local_candidate(&self, cb: LocalCandidateCallback) -> Result<(), LinkError> {
        self.notify(Command::OnLocalCandidate(cb)).await
    }

    /// Registers a handler for the ready channel. Fires at once if the link
    /// is already ready.
    pub async fn on_ready(&self, cb: ReadyCallback) -> Result<(), LinkError> {
        self.notify(Command::OnReady(cb)).await
    }

    /// Waits for the data channel. Fails with [`LinkError::Closed`] if the
    /// link closes first.
    pub async fn ready(&self) -> Result<ReadyChannel, LinkError> {
        self.request(Command::Ready).await
    }

    /// Closes the link. Idempotent.
    pub async fn close(&self) {
        let (tx, rx) = oneshot::channel();
        if self.commands.send(Command::Close(tx)).await.is_ok() {
            let _ = rx.await;
        }
    }

    pub fn state(&self) -> LinkState {
        *self.state.borrow()
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Waits until the link reaches `target`. Fails with
    /// [`LinkError::Closed`] if it closes on the way.
    pub async fn wait_for_state(&self, target: LinkState) -> Result<(), LinkError> {
        let mut rx = self.state.clone();
        let reached = rx
            .wait_for(|s| *s == target || *s == LinkState::Closed)
            .await
            .map(|s| *s)
            .unwrap_or(LinkState::Closed);
        if reached == target {
            Ok(())
        } else {
            Err(LinkError::Closed)
        }
    }

    /// Token cancelled when the link closes.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

struct Actor {
    transport: Arc<dyn PeerTransport>,
    state: LinkState,
    state_tx: watch::Sender<LinkState>,
    remote_description_set: bool,
    pending: Vec<Payload>,
    seen: HashSet<Payload>,
    on_local_candidate: Option<LocalCandidateCallback>,
    local_backlog: Vec<Payload>,
    waiters: Vec<ReadyWaiter>,
    ready: Option<ReadyChannel>,
    cancel: CancellationToken,
}

impl Actor {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut events: mpsc::UnboundedReceiver<TransportEvent>,
    ) {
        while self.state != LinkState::Closed {
            tokio::select! {
                cmd = commands.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd).await,
                    None => self.close("all handles dropped").await,
                },
                event = events.recv() => match event {
                    Some(event) => self.handle_event(event).await,
                    None => self.close("transport event stream ended").await,
                },
            }
        }
        debug!("peer link actor stopped");
    }

    async fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::CreateOffer(reply) => {
                let result = self.create_offer().await;
                let _ = reply.send(result);
            }
            Command::AcceptOffer(offer, reply) => {
                let result = self.accept_offer(offer).await;
                let _ = reply.send(result);
            }
            Command::AcceptAnswer(answer, reply) => {
                let result = self.accept_answer(answer).await;
                let _ = reply.send(result);
            }
            Command::AddRemoteCandidate(candidate, reply) => {
                let result = self.add_remote_candidate(candidate).await;
                let _ = reply.send(result);
            }
            Command::OnLocalCandidate(cb) => {
                for candidate in self.local_backlog.drain(..) {
                    cb(candidate);
                }
                self.on_local_candidate = Some(cb);
            }
            Command::OnReady(cb) => self.add_waiter(ReadyWaiter::Callback(cb)),
            Command::Ready(reply) => self.add_waiter(ReadyWaiter::Reply(reply)),
            Command::Close(done) => {
                self.close("closed by owner").await;
                let _ = done.send(());
            }
        }
    }

    async fn handle_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::LocalCandidate(candidate) => match &self.on_local_candidate {
                Some(cb) => cb(candidate),
                None => self.local_backlog.push(candidate),
            },
            TransportEvent::ChannelOpen(channel) => {
                if self.ready.is_some() {
                    warn!(label = channel.label(), "ignoring second data channel");
                    return;
                }
                let ready = ReadyChannel::new(channel, self.cancel.child_token());
                info!(label = ready.channel().label(), from = %self.state, "peer link ready");
                self.set_state(LinkState::Ready);
                for waiter in self.waiters.drain(..) {
                    waiter.resolve(Ok(ready.clone()));
                }
                self.ready = Some(ready);
            }
            TransportEvent::Closed => self.close("transport closed").await,
        }
    }

    fn add_waiter(&mut self, waiter: ReadyWaiter) {
        match &self.ready {
            Some(ready) => waiter.resolve(Ok(ready.clone())),
            None => self.waiters.push(waiter),
        }
    }

    fn set_state(&mut self, state: LinkState) {
        debug!(from = %self.state, to = %state, "link state");
        self.state = state;
        self.state_tx.send_replace(state);
    }

    fn expect(&self, state: LinkState, operation: &'static str) -> Result<(), LinkError> {
        if self.state == state {
            Ok(())
        } else {
            Err(LinkError::InvalidState {
                state: self.state,
                operation,
            })
        }
    }

    /// Closes the link after a failed negotiation step.
    async fn fail(&mut self, err: TransportError) -> LinkError {
        warn!(error = %err, state = %self.state, "negotiation failed");
        self.close("negotiation failed").await;
        LinkError::Transport(err)
    }

    async fn create_offer(&mut self) -> Result<Payload, LinkError> {
        self.expect(LinkState::Idle, "create an offer")?;
        self.set_state(LinkState::OfferCreated);
        let result = self.transport.create_offer().await;
        let offer = match result {
            Ok(offer) => offer,
            Err(e) => return Err(self.fail(e).await),
        };
        self.set_state(LinkState::AnswerPending);
        Ok(offer)
    }

    async fn accept_offer(&mut self, offer: Payload) -> Result<Payload, LinkError> {
        self.expect(LinkState::Idle, "accept an offer")?;
        self.set_state(LinkState::OfferReceived);
        let applied = self.transport.set_remote_description(offer).await;
        if let Err(e) = applied {
            return Err(self.fail(e).await);
        }
        self.remote_description_set = true;
        self.flush_pending().await;

        let result = self.transport.create_answer().await;
        let answer = match result {
            Ok(answer) => answer,
            Err(e) => return Err(self.fail(e).await),
        };
        self.set_state(LinkState::AnswerCreated);
        // Both descriptions are in place once the answer exists.
        self.set_state(LinkState::Negotiating);
        Ok(answer)
    }

    async fn accept_answer(&mut self, answer: Payload) -> Result<(), LinkError> {
        self.expect(LinkState::AnswerPending, "accept an answer")?;
        let applied = self.transport.set_remote_description(answer).await;
        if let Err(e) = applied {
            return Err(self.fail(e).await);
        }
        self.remote_description_set = true;
        self.set_state(LinkState::Negotiating);
        self.flush_pending().await;
        Ok(())
    }

    async fn add_remote_candidate(&mut self, candidate: Payload) -> Result<(), LinkError> {
        if self.state == LinkState::Closed {
            return Err(LinkError::Closed);
        }
        if self.seen.contains(&candidate) {
            debug!("duplicate remote candidate ignored");
            return Ok(());
        }

        if !self.remote_description_set {
            if self.pending.len() >= MAX_PENDING_CANDIDATES {
                warn!(pending = self.pending.len(), "dropping early candidate");
                return Err(LinkError::PrematureCandidate);
            }
            self.seen.insert(candidate.clone());
            self.pending.push(candidate);
            debug!(pending = self.pending.len(), "holding candidate until remote description");
            return Ok(());
        }

        self.seen.insert(candidate.clone());
        self.transport.add_ice_candidate(candidate).await.map_err(|e| {
            warn!(error = %e, "remote candidate rejected");
            LinkError::Transport(e)
        })
    }

    async fn flush_pending(&mut self) {
        let pending = std::mem::take(&mut self.pending);
        if !pending.is_empty() {
            debug!(count = pending.len(), "applying held candidates");
        }
        for candidate in pending {
            if let Err(e) = self.transport.add_ice_candidate(candidate).await {
                warn!(error = %e, "held candidate rejected");
            }
        }
    }

    async fn close(&mut self, reason: &str) {
        if self.state == LinkState::Closed {
            return;
        }
        info!(%reason, from = %self.state, "closing peer link");
        self.set_state(LinkState::Closed);
        self.cancel.cancel();

        if let Some(ready) = &self.ready {
            if let Err(e) = ready.channel().close().await {
                debug!(error = %e, "data channel close");
            }
        }
        if let Err(e) = self.transport.close().await {
            debug!(error = %e, "transport close");
        }
        for waiter in self.waiters.drain(..) {
            waiter.resolve(Err(LinkError::Closed));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    use serde_json::json;

    use crate::memory::transport_pair;

    fn pair() -> (PeerLinkManager, PeerLinkManager) {
        let ((a, a_events), (b, b_events)) = transport_pair();
        (
            PeerLinkManager::spawn(a, a_events),
            PeerLinkManager::spawn(b, b_events),
        )
    }

    /// Collects a manager's local candidates.
    async fn capture(link: &PeerLinkManager) -> mpsc::UnboundedReceiver<Payload> {
        let (tx, rx) = mpsc::unbounded_channel();
        link.on_local_candidate(Box::new(move |c| {
            let _ = tx.send(c);
        }))
        .await
        .unwrap();
        rx
    }

    fn candidate(n: u32) -> Payload {
        Payload::from_value(&json!({"candidate": format!("candidate:{n}"), "sdpMid": "0"})).unwrap()
    }

    async fn ready_within(link: &PeerLinkManager) -> ReadyChannel {
        tokio::time::timeout(Duration::from_secs(2), link.ready())
            .await
            .expect("link ready in time")
            .expect("link ready")
    }

    #[tokio::test]
    async fn initiator_states() {
        let (a, _b) = pair();
        assert_eq!(a.state(), LinkState::Idle);
        a.create_offer().await.unwrap();
        assert_eq!(a.state(), LinkState::AnswerPending);

        let err = a.create_offer().await.unwrap_err();
        assert!(matches!(
            err,
            LinkError::InvalidState {
                state: LinkState::AnswerPending,
                ..
            }
        ));
        assert_eq!(a.state(), LinkState::AnswerPending);
    }

    #[tokio::test]
    async fn responder_negotiates_after_answering() {
        let (a, b) = pair();
        let offer = a.create_offer().await.unwrap();
        b.accept_offer(offer.clone()).await.unwrap();
        assert_eq!(b.state(), LinkState::Negotiating);

        let err = b.accept_offer(offer).await.unwrap_err();
        assert!(matches!(
            err,
            LinkError::InvalidState {
                state: LinkState::Negotiating,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn answer_in_idle_is_rejected() {
        let (a, _b) = pair();
        let answer = Payload::from_value(&json!({"type": "answer", "sdp": ""})).unwrap();
        let err = a.accept_answer(answer).await.unwrap_err();
        assert!(matches!(
            err,
            LinkError::InvalidState {
                state: LinkState::Idle,
                operation: "accept an answer"
            }
        ));
        assert_eq!(a.state(), LinkState::Idle);
    }

    #[tokio::test]
    async fn full_exchange_reaches_ready() {
        let (a, b) = pair();
        let mut a_candidates = capture(&a).await;
        let mut b_candidates = capture(&b).await;

        let offer = a.create_offer().await.unwrap();
        let answer = b.accept_offer(offer).await.unwrap();
        assert_eq!(b.state(), LinkState::Negotiating);
        a.accept_answer(answer).await.unwrap();
        assert_eq!(a.state(), LinkState::Negotiating);

        let from_a = a_candidates.recv().await.unwrap();
        let from_b = b_candidates.recv().await.unwrap();
        b.add_remote_candidate(from_a).await.unwrap();
        a.add_remote_candidate(from_b).await.unwrap();

        let a_ready = ready_within(&a).await;
        let b_ready = ready_within(&b).await;
        assert_eq!(a.state(), LinkState::Ready);
        assert_eq!(b.state(), LinkState::Ready);
        assert_eq!(a_ready.channel().label(), peerdrop_protocol::DATA_CHANNEL_LABEL);
        assert!(b_ready.channel().is_open());
    }

    #[tokio::test]
    async fn early_duplicate_candidates_are_held_once() {
        let (a, b) = pair();
        let mut a_candidates = capture(&a).await;
        let mut b_candidates = capture(&b).await;

        let offer = a.create_offer().await.unwrap();
        let from_a = a_candidates.recv().await.unwrap();

        // Responder sees the candidate twice before it has the offer.
        b.add_remote_candidate(from_a.clone()).await.unwrap();
        b.add_remote_candidate(from_a).await.unwrap();

        let answer = b.accept_offer(offer).await.unwrap();
        let from_b = b_candidates.recv().await.unwrap();

        // Initiator gets the candidate before the answer, twice as well.
        a.add_remote_candidate(from_b.clone()).await.unwrap();
        a.add_remote_candidate(from_b).await.unwrap();
        a.accept_answer(answer).await.unwrap();

        ready_within(&a).await;
        ready_within(&b).await;
    }

    #[tokio::test]
    async fn local_candidates_wait_for_handler() {
        let (a, _b) = pair();
        a.create_offer().await.unwrap();
        // Candidate gathered with no handler registered.
        tokio::task::yield_now().await;
        let mut rx = capture(&a).await;
        let got = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(got.as_str().contains("candidate"));
    }

    #[tokio::test]
    async fn too_many_early_candidates() {
        let (_a, b) = pair();
        for n in 0..MAX_PENDING_CANDIDATES as u32 {
            b.add_remote_candidate(candidate(n)).await.unwrap();
        }
        let err = b
            .add_remote_candidate(candidate(MAX_PENDING_CANDIDATES as u32))
            .await
            .unwrap_err();
        assert!(matches!(err, LinkError::PrematureCandidate));
        // A duplicate of a held one is still fine.
        b.add_remote_candidate(candidate(0)).await.unwrap();
    }

    #[tokio::test]
    async fn close_fails_waiters_and_later_calls() {
        let (a, _b) = pair();
        let token = a.cancellation();

        let waiter = {
            let a = a.clone();
            tokio::spawn(async move { a.ready().await })
        };
        tokio::task::yield_now().await;

        a.close().await;
        assert_eq!(a.state(), LinkState::Closed);
        assert!(token.is_cancelled());
        assert!(matches!(waiter.await.unwrap(), Err(LinkError::Closed)));
        assert!(matches!(a.create_offer().await, Err(LinkError::Closed)));
        assert!(matches!(
            a.add_remote_candidate(candidate(1)).await,
            Err(LinkError::Closed)
        ));
        a.close().await;
    }

    #[tokio::test]
    async fn remote_close_closes_link() {
        let (a, b) = pair();
        b.close().await;
        tokio::time::timeout(Duration::from_secs(2), a.wait_for_state(LinkState::Closed))
            .await
            .unwrap()
            .unwrap();
        assert!(a.is_closed());
    }

    #[tokio::test]
    async fn close_after_ready_cancels_channel_token() {
        let (a, b) = pair();
        let mut a_candidates = capture(&a).await;
        let mut b_candidates = capture(&b).await;
        let answer = b.accept_offer(a.create_offer().await.unwrap()).await.unwrap();
        a.accept_answer(answer).await.unwrap();
        b.add_remote_candidate(a_candidates.recv().await.unwrap())
            .await
            .unwrap();
        a.add_remote_candidate(b_candidates.recv().await.unwrap())
            .await
            .unwrap();

        let ready = ready_within(&a).await;
        let fired = Arc::new(Mutex::new(false));
        let flag = fired.clone();
        a.on_ready(Box::new(move |_| *flag.lock().unwrap() = true))
            .await
            .unwrap();
        // Any request round-trips through the actor after the callback ran.
        let _ = a.add_remote_candidate(candidate(99)).await;
        assert!(*fired.lock().unwrap());

        a.close().await;
        assert!(ready.is_cancelled());
        assert!(!ready.channel().is_open());
    }

    #[test]
    fn state_display() {
        assert_eq!(LinkState::AnswerPending.to_string(), "answer-pending");
        let err = LinkError::InvalidState {
            state: LinkState::Idle,
            operation: "accept an answer",
        };
        assert_eq!(err.to_string(), "cannot accept an answer while idle");
    }
}
