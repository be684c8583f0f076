//! Signed identity tokens
//!
//! Tokens are HS256 JWTs carrying `{"user": {"id", "username"}}`. They are
//! stateless: the server keeps no token table, so a token stays valid for as
//! long as the signing secret does. Two opt-in hooks exist for deployments
//! that need more: a TTL that stamps and enforces `exp`, and a revocation
//! predicate consulted on every verification.

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUser {
    pub id: String,
    pub username: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub user: TokenUser,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<u64>,
}

/// Who a verified token speaks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: Uuid,
    pub username: String,
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("token rejected: {0}")]
    Invalid(#[from] jsonwebtoken::errors::Error),
    #[error("token carries a malformed user id: {0}")]
    MalformedUserId(#[from] uuid::Error),
    #[error("token has been revoked")]
    Revoked,
    #[error("token names a user with no record")]
    UnknownUser,
}

/// Returns true when the claims must no longer be accepted.
pub type RevocationHook = Arc<dyn Fn(&Claims) -> bool + Send + Sync>;

pub struct TokenAuthority {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    ttl: Option<Duration>,
    revocation: Option<RevocationHook>,
}

impl TokenAuthority {
    pub fn new(secret: &[u8]) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.required_spec_claims.clear();
        validation.validate_exp = false;

        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            validation,
            ttl: None,
            revocation: None,
        }
    }

    /// Stamp issued tokens with `exp = now + ttl` and refuse tokens without a
    /// future `exp`.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self.validation.validate_exp = true;
        self.validation.set_required_spec_claims(&["exp"]);
        self
    }

    pub fn with_revocation(mut self, hook: RevocationHook) -> Self {
        self.revocation = Some(hook);
        self
    }

    pub fn issue(&self, user_id: Uuid, username: &str) -> Result<String, AuthError> {
        let claims = Claims {
            user: TokenUser {
                id: user_id.to_string(),
                username: username.to_string(),
            },
            exp: self
                .ttl
                .map(|ttl| jsonwebtoken::get_current_timestamp() + ttl.as_secs()),
        };

        Ok(encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &self.encoding,
        )?)
    }

    pub fn verify(&self, token: &str) -> Result<Identity, AuthError> {
        let data = decode::<Claims>(token, &self.decoding, &self.validation)?;
        let claims = data.claims;

        if let Some(revoked) = &self.revocation {
            if revoked(&claims) {
                return Err(AuthError::Revoked);
            }
        }

        Ok(Identity {
            user_id: Uuid::parse_str(&claims.user.id)?,
            username: claims.user.username,
        })
    }
}
