use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};
use webrtc::api::APIBuilder;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::data_channel::RTCDataChannel;
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

use peerdrop_peer_link::{BoxFuture, PeerTransport, Role, TransportError, TransportEvent};
use peerdrop_protocol::{DATA_CHANNEL_LABEL, DEFAULT_LOW_WATER_MARK, Payload};

use crate::{DEFAULT_STUN_SERVER, WebRtcChannel};

/// Settings for a WebRTC peer connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebRtcConfig {
    /// STUN/TURN URLs. Empty means host candidates only.
    pub ice_servers: Vec<String>,
    /// Buffered amount at which the channel reports it has drained.
    pub low_water_mark: usize,
}

impl Default for WebRtcConfig {
    fn default() -> Self {
        Self {
            ice_servers: vec![DEFAULT_STUN_SERVER.to_string()],
            low_water_mark: DEFAULT_LOW_WATER_MARK,
        }
    }
}

impl WebRtcConfig {
    fn rtc_configuration(&self) -> RTCConfiguration {
        let ice_servers = if self.ice_servers.is_empty() {
            Vec::new()
        } else {
            vec![RTCIceServer {
                urls: self.ice_servers.clone(),
                ..Default::default()
            }]
        };
        RTCConfiguration {
            ice_servers,
            ..Default::default()
        }
    }
}

fn err(context: &str) -> impl Fn(webrtc::Error) -> TransportError + '_ {
    move |e| TransportError::new(format!("{context}: {e}"))
}

/// Parses a relayed candidate. `None` marks the end of candidates.
fn parse_candidate(candidate: &Payload) -> Result<Option<RTCIceCandidateInit>, TransportError> {
    if candidate.as_str() == "null" {
        return Ok(None);
    }
    let init: RTCIceCandidateInit = candidate
        .parse()
        .map_err(|e| TransportError::new(format!("bad candidate: {e}")))?;
    if init.candidate.is_empty() {
        return Ok(None);
    }
    Ok(Some(init))
}

fn candidate_payload(candidate: &RTCIceCandidate) -> Result<Payload, TransportError> {
    let init = candidate.to_json().map_err(err("serialize candidate"))?;
    Payload::from_value(&init).map_err(|e| TransportError::new(e.to_string()))
}

/// One side of a WebRTC peer connection carrying a single data channel.
///
/// The initiator creates the ordered `"sendChannel"` before its offer; the
/// responder adopts the channel announced by the remote peer.
pub struct WebRtcTransport {
    pc: Arc<RTCPeerConnection>,
}

impl WebRtcTransport {
    /// Builds the peer connection and its event stream.
    pub async fn new(
        config: &WebRtcConfig,
        role: Role,
    ) -> Result<(Arc<Self>, mpsc::UnboundedReceiver<TransportEvent>), TransportError> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(err("register codecs"))?;
        let registry = register_default_interceptors(Registry::new(), &mut media_engine)
            .map_err(err("register interceptors"))?;
        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let pc = Arc::new(
            api.new_peer_connection(config.rtc_configuration())
                .await
                .map_err(err("create peer connection"))?,
        );
        let (events_tx, events) = mpsc::unbounded_channel();

        let tx = events_tx.clone();
        pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let tx = tx.clone();
            Box::pin(async move {
                let Some(candidate) = candidate else {
                    trace!("candidate gathering complete");
                    return;
                };
                match candidate_payload(&candidate) {
                    Ok(payload) => {
                        let _ = tx.send(TransportEvent::LocalCandidate(payload));
                    }
                    Err(e) => warn!(error = %e, "dropping local candidate"),
                }
            })
        }));

        let tx = events_tx.clone();
        pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            let tx = tx.clone();
            Box::pin(async move {
                info!(%state, "peer connection state");
                if matches!(
                    state,
                    RTCPeerConnectionState::Failed | RTCPeerConnectionState::Closed
                ) {
                    let _ = tx.send(TransportEvent::Closed);
                }
            })
        }));

        let low_water_mark = config.low_water_mark;
        match role {
            Role::Initiator => {
                let dc = pc
                    .create_data_channel(
                        DATA_CHANNEL_LABEL,
                        Some(RTCDataChannelInit {
                            ordered: Some(true),
                            ..Default::default()
                        }),
                    )
                    .await
                    .map_err(err("create data channel"))?;
                WebRtcChannel::attach(dc, low_water_mark, events_tx).await;
            }
            Role::Responder => {
                pc.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
                    let tx = events_tx.clone();
                    Box::pin(async move {
                        if dc.label() != DATA_CHANNEL_LABEL {
                            warn!(label = dc.label(), "ignoring unexpected data channel");
                            return;
                        }
                        debug!(label = dc.label(), "remote data channel announced");
                        WebRtcChannel::attach(dc, low_water_mark, tx).await;
                    })
                }));
            }
        }

        Ok((Arc::new(Self { pc }), events))
    }

    async fn describe(&self, offer: bool) -> Result<Payload, TransportError> {
        let desc = if offer {
            self.pc.create_offer(None).await.map_err(err("create offer"))?
        } else {
            self.pc.create_answer(None).await.map_err(err("create answer"))?
        };
        self.pc
            .set_local_description(desc.clone())
            .await
            .map_err(err("set local description"))?;
        Payload::from_value(&desc).map_err(|e| TransportError::new(e.to_string()))
    }
}

impl PeerTransport for WebRtcTransport {
    fn create_offer(&self) -> BoxFuture<'_, Result<Payload, TransportError>> {
        Box::pin(self.describe(true))
    }

    fn create_answer(&self) -> BoxFuture<'_, Result<Payload, TransportError>> {
        Box::pin(self.describe(false))
    }

    fn set_remote_description(
        &self,
        desc: Payload,
    ) -> BoxFuture<'_, Result<(), TransportError>> {
        Box::pin(async move {
            let desc: RTCSessionDescription = desc
                .parse()
                .map_err(|e| TransportError::new(format!("bad description: {e}")))?;
            self.pc
                .set_remote_description(desc)
                .await
                .map_err(err("set remote description"))
        })
    }

    fn add_ice_candidate(&self, candidate: Payload) -> BoxFuture<'_, Result<(), TransportError>> {
        Box::pin(async move {
            match parse_candidate(&candidate)? {
                Some(init) => self
                    .pc
                    .add_ice_candidate(init)
                    .await
                    .map_err(err("add candidate")),
                None => {
                    debug!("remote candidates complete");
                    Ok(())
                }
            }
        })
    }

    fn close(&self) -> BoxFuture<'_, Result<(), TransportError>> {
        Box::pin(async move { self.pc.close().await.map_err(err("close")) })
    }
}
