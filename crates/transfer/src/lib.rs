//! Chunked file transfer over a peerdrop data channel.
//!
//! [`ChunkedSender`] streams one file as a metadata frame, binary chunks
//! and a close frame, pausing when the channel's buffer runs high.
//! [`ChunkedReceiver`] reassembles the stream into a [`ReceivedFile`], and
//! [`save_received`] writes it to disk under a validated name.

mod config;
mod digest;
mod file;
mod progress;
mod receiver;
mod sender;
mod validation;

pub use config::SenderConfig;
pub use digest::checksum_bytes;
pub use file::OutgoingFile;
pub use progress::{SpeedCalculator, TransferProgress, percent};
pub use receiver::{ChunkedReceiver, ReceivedFile, TransferSession};
pub use sender::{ChunkedSender, SendReport};
pub use validation::{save_received, validate_file_name};

use peerdrop_peer_link::ChannelError;
use peerdrop_protocol::FrameError;

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("data channel is not open")]
    ChannelNotOpen,

    #[error("close frame arrived before metadata")]
    MissingMetadata,

    #[error("metadata frame arrived twice")]
    UnexpectedMetadata,

    #[error("channel ended before the transfer completed")]
    Incomplete,

    #[error("transfer cancelled")]
    Cancelled,

    #[error("size mismatch: declared {expected} bytes, got {actual}")]
    SizeMismatch { expected: u64, actual: u64 },

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("invalid file name: {0}")]
    InvalidFileName(String),

    #[error("channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
