//! # relay-auth
//!
//! Issues and verifies signed, time-bounded identity tokens.
//!
//! Tokens are HS256 JWTs whose `sub` claim is the identity. Verification
//! yields the identity or an [`AuthError`] describing why the token was
//! refused; it never panics and has no side effects.

#![deny(unsafe_code)]

pub mod errors;
pub mod token;

pub use errors::AuthError;
pub use token::{Claims, TokenAuthenticator};
