use std::sync::Arc;

use chrono::{Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use tracing::debug;

use parlor_types::api::Claims;
use parlor_types::error::{ChatError, ChatResult};
use parlor_types::Identity;

const DEFAULT_TOKEN_TTL_HOURS: i64 = 30 * 24;

/// How connections without a token are treated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthMode {
    /// Every connection must present a valid token.
    Token,
    /// Token-less connections act as `identity`. Presented tokens are still
    /// verified. Only enabled through explicit configuration.
    Development { identity: Identity },
}

/// Resolves bearer tokens to identities and issues new ones.
#[derive(Clone)]
pub struct Verifier {
    secret: Arc<str>,
    mode: AuthMode,
    token_ttl: Duration,
}

impl Verifier {
    pub fn new(secret: impl Into<String>, mode: AuthMode) -> Self {
        Self {
            secret: Arc::from(secret.into()),
            mode,
            token_ttl: Duration::hours(DEFAULT_TOKEN_TTL_HOURS),
        }
    }

    pub fn with_token_ttl(mut self, ttl: Duration) -> Self {
        self.token_ttl = ttl;
        self
    }

    pub fn mode(&self) -> &AuthMode {
        &self.mode
    }

    pub fn verify(&self, token: Option<&str>) -> ChatResult<Identity> {
        match (token.filter(|t| !t.is_empty()), &self.mode) {
            (Some(token), _) => self.decode(token),
            (None, AuthMode::Development { identity }) => {
                debug!("No token presented, using development identity {}", identity.username);
                Ok(identity.clone())
            }
            (None, AuthMode::Token) => Err(ChatError::unauthenticated("missing token")),
        }
    }

    pub fn issue(&self, identity: &Identity) -> anyhow::Result<String> {
        let claims = Claims {
            sub: identity.id,
            username: identity.username.clone(),
            exp: (Utc::now() + self.token_ttl).timestamp() as usize,
        };

        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )?;

        Ok(token)
    }

    fn decode(&self, token: &str) -> ChatResult<Identity> {
        let token_data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &Validation::default(),
        )
        .map_err(|e| ChatError::unauthenticated(format!("invalid token: {}", e)))?;

        Ok(Identity::new(token_data.claims.sub, token_data.claims.username))
    }
}
