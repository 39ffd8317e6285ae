//! Disconnect reasons and WebSocket limits.

/// The session was closed locally through [`Session::close`](crate::Session::close).
pub const REASON_CLIENT_DISCONNECT: &str = "io client disconnect";

/// The server ended the session with a close frame.
pub const REASON_SERVER_DISCONNECT: &str = "io server disconnect";

/// The underlying stream ended without an error.
pub const REASON_TRANSPORT_CLOSE: &str = "transport close";

/// The underlying stream failed.
pub const REASON_TRANSPORT_ERROR: &str = "transport error";

/// Nothing arrived within the read deadline.
pub const REASON_PING_TIMEOUT: &str = "ping timeout";

/// Close code a server uses to revoke the client's credentials.
pub const WS_CLOSE_AUTH_REVOKED: u16 = 4001;

/// Maximum message and frame size in bytes (16 MB).
pub const WS_MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Capacity of the outbound frame queue per session.
pub const WS_OUTBOUND_BUFFER: usize = 256;
