use chrono::{Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};

use crate::auth::Authenticator;
use crate::broker::topic::UserId;
use crate::utils::error::AuthError;

/// JWT claims; `sub` carries the numeric user id.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: usize,
}

/// HS256 tokens signed with a shared secret.
pub struct JwtAuthenticator {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
}

impl JwtAuthenticator {
    pub fn new(secret: &str) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::default(),
        }
    }

    /// Issues a token for `user` valid for `ttl`.
    pub fn issue(&self, user: UserId, ttl: Duration) -> Result<String, AuthError> {
        let claims = Claims {
            sub: user.to_string(),
            exp: (Utc::now() + ttl).timestamp().max(0) as usize,
        };
        encode(&Header::default(), &claims, &self.encoding).map_err(|_| AuthError::Invalid)
    }
}

impl Authenticator for JwtAuthenticator {
    fn verify(&self, token: &str) -> Result<UserId, AuthError> {
        if token.is_empty() {
            return Err(AuthError::MissingToken);
        }
        let data = decode::<Claims>(token, &self.decoding, &self.validation).map_err(|e| {
            match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::Expired,
                _ => AuthError::Invalid,
            }
        })?;
        data.claims
            .sub
            .parse::<UserId>()
            .map_err(|_| AuthError::BadSubject)
    }
}
