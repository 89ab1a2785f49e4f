//! Server error types.

use relay_auth::AuthError;

use crate::hooks::HookError;

/// Errors surfaced by the relay server.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// Socket bind or serve failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A message could not be serialized.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Token issuance failed.
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// A hook or custom handler returned an error.
    #[error("hook failed: {0}")]
    Hook(#[from] HookError),

    /// A hook or custom handler panicked.
    #[error("hook panicked")]
    HookPanicked,

    /// The serve task could not be joined.
    #[error("server task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    /// `start` was called twice.
    #[error("server already started")]
    AlreadyStarted,
}
