use std::time::Duration;

/// Default size of one chunk frame (16 KiB).
///
/// Browsers cap a single data-channel message at roughly this size, so the
/// default stays interoperable. Receivers accept any chunk size.
pub const DEFAULT_CHUNK_SIZE: usize = 16 * 1024;

/// Buffered amount above which a sender pauses (1 MiB).
pub const DEFAULT_HIGH_WATER_MARK: usize = 1024 * 1024;

/// Buffered amount a paused sender waits for before resuming (256 KiB).
pub const DEFAULT_LOW_WATER_MARK: usize = 256 * 1024;

/// Label of the data channel opened by the initiating peer.
pub const DATA_CHANNEL_LABEL: &str = "sendChannel";

/// MIME type used when the real type is unknown.
pub const FALLBACK_MIME_TYPE: &str = "application/octet-stream";

/// Time to wait for any incoming relay traffic.
///
/// Acts as a read deadline: if nothing arrives within this window the relay
/// connection is considered dead.
pub const WS_PONG_WAIT: Duration = Duration::from_secs(60);

/// How often the signaling client pings the relay.
pub const WS_PING_PERIOD: Duration = Duration::from_secs(20);

/// Maximum relay message size in bytes (1 MiB).
///
/// Session descriptions are a few KiB; anything larger is not signaling.
pub const WS_MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Timeout for establishing the relay connection.
pub const WS_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);
