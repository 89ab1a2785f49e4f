//! Package-level constants.

/// Identity bound to a connection that presented no token.
pub const ANONYMOUS_IDENTITY: &str = "Anonymous";

/// Error string sent when an upgrade presents an unusable token.
pub const AUTH_FAILED: &str = "Authentication Failed";

/// Error string sent when an inbound frame is not a message envelope.
pub const INVALID_JSON: &str = "Invalid JSON format";

/// Error string sent when a hook, handler, or broadcast fails.
pub const INTERNAL_ERROR: &str = "Internal server error";

/// `WebSocket` close codes used by the server.
pub mod close_code {
    /// Endpoint going away (server shutdown).
    pub const GOING_AWAY: u16 = 1001;
    /// Policy violation (failed authentication).
    pub const POLICY_VIOLATION: u16 = 1008;
}
