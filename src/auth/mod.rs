//! Bearer token verification.
//!
//! The core never inspects credentials itself: it asks an [`Authenticator`]
//! for the user id behind a token and rejects the connection before admission
//! when verification fails.

pub mod jwt;

pub use jwt::{Claims, JwtAuthenticator};

use crate::broker::topic::UserId;
use crate::utils::error::AuthError;

pub trait Authenticator: Send + Sync {
    fn verify(&self, token: &str) -> Result<UserId, AuthError>;
}
