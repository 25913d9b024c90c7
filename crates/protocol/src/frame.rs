//! Data-channel framing for a single file transfer.
//!
//! Control frames travel as text messages holding JSON, chunks travel as
//! binary messages holding raw bytes:
//!
//! ```text
//! text    {"meta":{"name":"a.txt","type":"text/plain","size":5}}
//! binary  <chunk bytes>
//! ...
//! text    {"close":true}
//! ```
//!
//! The transport is ordered and reliable, so chunks carry no sequence
//! numbers. An unordered transport would need them.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Errors produced when decoding a frame.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unknown control frame: {0}")]
    UnknownControl(String),
}

/// Description of the file being transferred, declared once up front.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetadata {
    pub name: String,
    #[serde(rename = "type")]
    pub mime_type: String,
    pub size: u64,
}

/// Message as seen by the transport: text or binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelMessage {
    Text(String),
    Binary(Bytes),
}

impl ChannelMessage {
    /// Number of payload bytes this message occupies on the channel.
    pub fn len(&self) -> usize {
        match self {
            Self::Text(t) => t.len(),
            Self::Binary(b) => b.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One frame of the transfer protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferFrame {
    Metadata(FileMetadata),
    Chunk(Bytes),
    Close,
}

#[derive(Serialize, Deserialize)]
struct ControlFrame {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    meta: Option<FileMetadata>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    close: bool,
}

impl TransferFrame {
    /// Encodes the frame into the message the transport should carry.
    pub fn encode(&self) -> Result<ChannelMessage, FrameError> {
        let control = match self {
            Self::Chunk(bytes) => return Ok(ChannelMessage::Binary(bytes.clone())),
            Self::Metadata(meta) => ControlFrame {
                meta: Some(meta.clone()),
                close: false,
            },
            Self::Close => ControlFrame {
                meta: None,
                close: true,
            },
        };
        Ok(ChannelMessage::Text(serde_json::to_string(&control)?))
    }

    /// Decodes a transport message.
    ///
    /// Binary messages are always chunks. Text messages must be a control
    /// object carrying `meta` or `close: true`.
    pub fn decode(msg: ChannelMessage) -> Result<Self, FrameError> {
        match msg {
            ChannelMessage::Binary(bytes) => Ok(Self::Chunk(bytes)),
            ChannelMessage::Text(text) => {
                let control: ControlFrame = serde_json::from_str(&text)?;
                if let Some(meta) = control.meta {
                    Ok(Self::Metadata(meta))
                } else if control.close {
                    Ok(Self::Close)
                } else {
                    Err(FrameError::UnknownControl(text))
                }
            }
        }
    }
}
