//! Auth error types.

/// Why a token could not be issued or verified.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// The token's `exp` is in the past.
    #[error("token expired")]
    Expired,

    /// The signature does not match the configured secret.
    #[error("invalid token signature")]
    InvalidSignature,

    /// The token is not a well-formed JWT with the expected claims.
    #[error("malformed token: {0}")]
    Malformed(String),

    /// Signing a new token failed.
    #[error("failed to sign token: {0}")]
    Signing(#[source] jsonwebtoken::errors::Error),
}

impl From<jsonwebtoken::errors::Error> for AuthError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;

        match err.kind() {
            ErrorKind::ExpiredSignature => Self::Expired,
            ErrorKind::InvalidSignature => Self::InvalidSignature,
            _ => Self::Malformed(err.to_string()),
        }
    }
}
