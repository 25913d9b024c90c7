//! Wire protocol types for peerdrop.
//!
//! Two wire surfaces live here:
//! - the relay protocol: [`SignalingMessage`] JSON objects exchanged over a
//!   WebSocket relay while the peer link is negotiated;
//! - the data-channel framing: [`TransferFrame`]s carried as text (control)
//!   and binary (chunk) messages once the link is up.

pub mod constants;
pub mod frame;
pub mod payload;
pub mod session;
pub mod signaling;

pub use constants::*;
pub use frame::{ChannelMessage, FileMetadata, FrameError, TransferFrame};
pub use payload::Payload;
pub use session::{SessionId, SessionIdError};
pub use signaling::SignalingMessage;
