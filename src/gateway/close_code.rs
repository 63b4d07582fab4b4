//! WebSocket close codes sent by the gateway.

/// The access token was missing or not in a form we accept.
pub const INVALID_TOKEN: u16 = 1007;
pub const AUTH_FAILED: u16 = 4004;
pub const SESSION_TIMED_OUT: u16 = 4009;
/// The session was closed on this node's initiative (kicked, send failure).
pub const SESSION_CLOSED: u16 = 4010;
