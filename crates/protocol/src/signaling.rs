use serde::{Deserialize, Serialize};

use crate::Payload;

/// Message exchanged between peers through the relay.
///
/// Serialized as a single-key JSON object, e.g. `{"offer": {...}}`. The
/// payload is relayed verbatim; only the key is ever inspected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalingMessage {
    /// Session description produced by the initiating peer.
    Offer(Payload),
    /// Session description produced by the responding peer.
    Answer(Payload),
    /// Network path candidate, sent by either peer at any time.
    Candidate(Payload),
}

impl SignalingMessage {
    /// Returns the wire key of this message.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Offer(_) => "offer",
            Self::Answer(_) => "answer",
            Self::Candidate(_) => "candidate",
        }
    }

    /// Returns the opaque payload.
    pub fn payload(&self) -> &Payload {
        match self {
            Self::Offer(p) | Self::Answer(p) | Self::Candidate(p) => p,
        }
    }

    /// Serializes the message to relay JSON.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parses relay JSON.
    pub fn decode(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}
