use anyhow::{Context, Result};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Access token claims. `token` names the server-side session record.
#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    exp: u64,
    token: String,
}

/// HS256 signer/verifier for access tokens.
#[derive(Clone)]
pub struct AccessTokens {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl AccessTokens {
    #[must_use]
    pub fn new(key: &SecretString) -> Self {
        let secret = key.expose_secret().as_bytes();
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
        }
    }

    /// # Errors
    /// Returns an error if signing fails.
    pub fn sign(&self, session: &str, ttl: Duration) -> Result<String> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .context("system clock is before the epoch")?;
        let claims = Claims {
            exp: (now + ttl).as_secs(),
            token: session.to_string(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .context("failed to sign access token")
    }

    /// Session handle inside a valid, unexpired token.
    #[must_use]
    pub fn verify(&self, token: &str) -> Option<String> {
        decode::<Claims>(token, &self.decoding_key, &Validation::new(Algorithm::HS256))
            .ok()
            .map(|data| data.claims.token)
            .filter(|session| !session.is_empty())
    }
}
