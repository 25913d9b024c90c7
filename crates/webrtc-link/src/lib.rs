//! WebRTC transport for peerdrop.
//!
//! [`WebRtcTransport`] implements [`PeerTransport`](peerdrop_peer_link::PeerTransport)
//! on top of an `RTCPeerConnection`, and [`WebRtcChannel`] implements
//! [`DataChannel`](peerdrop_peer_link::DataChannel) on the ordered
//! `"sendChannel"` data channel. Descriptions and candidates travel as the
//! same JSON a browser peer produces.

mod channel;
mod transport;

pub use channel::WebRtcChannel;
pub use transport::{WebRtcConfig, WebRtcTransport};

/// Public STUN server used when none is configured.
pub const DEFAULT_STUN_SERVER: &str = "stun:stun.l.google.com:19302";
