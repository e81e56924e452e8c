/// Version of the cafe HTTP API
pub const CAFE_API_VERSION: &str = "v1";

/// Header carrying the authenticated sender identity, set by the upstream
/// authenticator before a request reaches the cafe.
pub const PEER_HEADER: &str = "x-cafe-peer";

/// Largest payload a single search frame can carry (u16 length header)
pub const MAX_FRAME_PAYLOAD: usize = u16::MAX as usize;

/// Size of the frame length header in bytes
pub const FRAME_HEADER_SIZE: usize = 2;

/// Default HTTP API port
pub const DEFAULT_HTTP_PORT: u16 = 40601;

/// Maximum request body size in bytes (50 MiB)
pub const MAX_BODY_SIZE: usize = 50 * 1024 * 1024;

/// Multicodec code for raw blocks
pub const CODEC_RAW: u8 = 0x55;

/// Multicodec code for structured DAG nodes
pub const CODEC_NODE: u8 = 0x70;
