//! Glue between a signaling session and a peer link.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use peerdrop_protocol::{Payload, SignalingMessage};
use peerdrop_signaling::{SignalingClient, SignalingError};

use crate::{LinkError, PeerLinkManager, ReadyChannel};

/// Which side of the session starts negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Creates the offer. The sending peer.
    Initiator,
    /// Waits for an offer and answers it.
    Responder,
}

enum Inbound {
    Remote(SignalingMessage),
    LocalCandidate(Payload),
    Lost(SignalingError),
}

/// Negotiates `link` over `signaling` and resolves with the ready channel.
///
/// Messages keep flowing between the relay and the link until the link
/// closes, so late candidates still reach the transport. Losing the relay
/// closes the link; before Ready that fails this call with
/// [`LinkError::Signaling`].
pub async fn negotiate(
    role: Role,
    signaling: Arc<SignalingClient>,
    link: PeerLinkManager,
) -> Result<ReadyChannel, LinkError> {
    let (inbox_tx, inbox) = mpsc::unbounded_channel();

    let tx = inbox_tx.clone();
    link.on_local_candidate(Box::new(move |c| {
        let _ = tx.send(Inbound::LocalCandidate(c));
    }))
    .await?;
    let tx = inbox_tx.clone();
    signaling
        .on_disconnect(Box::new(move |e| {
            let _ = tx.send(Inbound::Lost(e));
        }))
        .await;
    signaling
        .on_message(Box::new(move |msg| {
            let _ = inbox_tx.send(Inbound::Remote(msg));
        }))
        .await;

    let (fatal_tx, fatal_rx) = oneshot::channel();
    tokio::spawn(session_pump(
        role,
        Arc::clone(&signaling),
        link.clone(),
        inbox,
        fatal_tx,
    ));

    if role == Role::Initiator {
        if let Err(e) = send_offer(&signaling, &link).await {
            link.close().await;
            return Err(e);
        }
    }

    let result = tokio::select! {
        biased;
        Ok(err) = fatal_rx => Err(err),
        ready = link.ready() => ready,
    };
    if result.is_err() {
        link.close().await;
    }
    result
}

async fn send_offer(signaling: &SignalingClient, link: &PeerLinkManager) -> Result<(), LinkError> {
    let offer = link.create_offer().await?;
    signaling.send(SignalingMessage::Offer(offer)).await?;
    debug!(session = %signaling.session(), "offer sent");
    Ok(())
}

async fn session_pump(
    role: Role,
    signaling: Arc<SignalingClient>,
    link: PeerLinkManager,
    mut inbox: mpsc::UnboundedReceiver<Inbound>,
    fatal: oneshot::Sender<LinkError>,
) {
    let cancel = link.cancellation();
    let mut fatal = Some(fatal);

    loop {
        let item = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            item = inbox.recv() => match item {
                Some(item) => item,
                None => break,
            },
        };

        match item {
            Inbound::LocalCandidate(candidate) => {
                if let Err(e) = signaling.send(SignalingMessage::Candidate(candidate)).await {
                    warn!(error = %e, "could not relay local candidate");
                }
            }
            Inbound::Remote(msg) => handle_remote(role, &signaling, &link, msg).await,
            Inbound::Lost(e) => {
                warn!(error = %e, state = %link.state(), "signaling lost");
                if let Some(tx) = fatal.take() {
                    let _ = tx.send(LinkError::Signaling(e));
                }
                link.close().await;
                break;
            }
        }
    }
    debug!("session pump stopped");
}

async fn handle_remote(
    role: Role,
    signaling: &SignalingClient,
    link: &PeerLinkManager,
    msg: SignalingMessage,
) {
    let kind = msg.kind();
    let result = match (role, msg) {
        (Role::Responder, SignalingMessage::Offer(offer)) => match link.accept_offer(offer).await {
            Ok(answer) => signaling
                .send(SignalingMessage::Answer(answer))
                .await
                .map_err(LinkError::from),
            Err(e) => Err(e),
        },
        (Role::Initiator, SignalingMessage::Answer(answer)) => link.accept_answer(answer).await,
        (_, SignalingMessage::Candidate(candidate)) => link.add_remote_candidate(candidate).await,
        (role, _) => {
            warn!(?role, kind, "ignoring message not meant for this role");
            Ok(())
        }
    };

    match result {
        Ok(()) => debug!(kind, "remote message applied"),
        Err(LinkError::InvalidState { state, operation }) => {
            warn!(kind, %state, operation, "ignoring out-of-order message");
        }
        Err(e) => warn!(kind, error = %e, "remote message failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use peerdrop_protocol::{ChannelMessage, SessionId};
    use peerdrop_relay::{RelayConfig, RelayServer};

    use crate::LinkState;
    use crate::memory::transport_pair;

    async fn start_relay() -> (Arc<RelayServer>, String) {
        let server = RelayServer::new(RelayConfig {
            bind: "127.0.0.1:0".parse().unwrap(),
            ..RelayConfig::default()
        });
        let s = Arc::clone(&server);
        tokio::spawn(async move {
            s.run().await.unwrap();
        });
        let addr = loop {
            if let Some(addr) = server.local_addr().await {
                break addr;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        };
        (server, format!("ws://{addr}"))
    }

    fn links() -> (PeerLinkManager, PeerLinkManager) {
        let ((a, a_events), (b, b_events)) = transport_pair();
        (
            PeerLinkManager::spawn(a, a_events),
            PeerLinkManager::spawn(b, b_events),
        )
    }

    #[tokio::test]
    async fn negotiates_over_relay() {
        let (_server, url) = start_relay().await;
        let session = SessionId::generate();
        let sender = Arc::new(SignalingClient::connect(&url, &session).await.unwrap());
        let receiver = Arc::new(SignalingClient::connect(&url, &session).await.unwrap());
        let (a, b) = links();

        let responder = tokio::spawn(negotiate(Role::Responder, receiver, b.clone()));
        let sent = tokio::time::timeout(
            Duration::from_secs(5),
            negotiate(Role::Initiator, sender, a.clone()),
        )
        .await
        .expect("initiator ready in time")
        .unwrap();
        let received = tokio::time::timeout(Duration::from_secs(5), responder)
            .await
            .expect("responder ready in time")
            .unwrap()
            .unwrap();

        assert_eq!(a.state(), LinkState::Ready);
        assert_eq!(b.state(), LinkState::Ready);

        sent.channel()
            .send(ChannelMessage::Text("hello".into()))
            .await
            .unwrap();
        assert_eq!(
            received.channel().recv().await,
            Some(ChannelMessage::Text("hello".into()))
        );
    }

    #[tokio::test]
    async fn responder_may_join_late() {
        let (_server, url) = start_relay().await;
        let session = SessionId::generate();
        let (a, b) = links();

        let sender = Arc::new(SignalingClient::connect(&url, &session).await.unwrap());
        let initiator = tokio::spawn(negotiate(Role::Initiator, sender, a));
        tokio::time::sleep(Duration::from_millis(100)).await;

        let receiver = Arc::new(SignalingClient::connect(&url, &session).await.unwrap());
        tokio::time::timeout(
            Duration::from_secs(5),
            negotiate(Role::Responder, receiver, b),
        )
        .await
        .expect("responder ready in time")
        .unwrap();
        initiator.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn relay_loss_before_ready_fails() {
        let (server, url) = start_relay().await;
        let session = SessionId::generate();
        let client = Arc::new(SignalingClient::connect(&url, &session).await.unwrap());
        let (a, _b) = links();

        let pending = tokio::spawn(negotiate(Role::Initiator, client, a.clone()));
        tokio::time::sleep(Duration::from_millis(100)).await;
        server.shutdown();

        let result = tokio::time::timeout(Duration::from_secs(5), pending)
            .await
            .expect("negotiation resolved")
            .unwrap();
        assert!(
            matches!(result, Err(LinkError::Signaling(SignalingError::Unavailable(_)))),
            "got {result:?}"
        );
        assert_eq!(a.state(), LinkState::Closed);
    }
}
