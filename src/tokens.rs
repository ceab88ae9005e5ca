//! Ephemeral token store.
//!
//! Single-use tokens (signup verification, password reset), session handles
//! and cooldown gates live in the key-value store under namespaced keys, e.g.
//! `signup_otp_<token>`. Callers never see key layout or store primitives.
//!
//! `consume` is an atomic take. A token that was never issued, has expired or
//! was already consumed all report `None`; callers cannot tell them apart.

use crate::kv::KvStore;
use anyhow::{Context, Result};
use rand::{Rng, rngs::OsRng};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};

const TOKEN_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
const COOLDOWN_SENTINEL: &str = "true";

/// Key prefixes, one per token purpose.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Namespace {
    Session,
    SignupOtp,
    VerifyCooldown,
    ForgotPassword,
}

impl Namespace {
    #[must_use]
    pub const fn prefix(self) -> &'static str {
        match self {
            Self::Session => "user_auth_",
            Self::SignupOtp => "signup_otp_",
            Self::VerifyCooldown => "verify_cooldown_",
            Self::ForgotPassword => "forgot_password_",
        }
    }

    /// Lifetime used by the auth flows.
    #[must_use]
    pub const fn default_ttl(self) -> Duration {
        match self {
            Self::Session => Duration::from_secs(24 * 60 * 60),
            Self::SignupOtp | Self::VerifyCooldown => Duration::from_secs(10 * 60),
            Self::ForgotPassword => Duration::from_secs(60 * 60),
        }
    }

    fn key(self, suffix: &str) -> String {
        format!("{}{suffix}", self.prefix())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GateDecision {
    Allowed,
    Blocked,
}

#[derive(Clone)]
pub struct TokenStore {
    kv: Arc<dyn KvStore>,
}

impl TokenStore {
    #[must_use]
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    /// Issue a random token of `length` characters mapped to `subject`.
    ///
    /// # Errors
    /// Returns an error if the key-value store rejects the write.
    #[instrument(skip(self, subject))]
    pub async fn issue(
        &self,
        namespace: Namespace,
        subject: &str,
        ttl: Duration,
        length: usize,
    ) -> Result<String> {
        let token = generate_token(length);
        self.kv
            .set_ex(&namespace.key(&token), subject, ttl)
            .await
            .context("failed to store token")?;
        debug!(prefix = namespace.prefix(), "token issued");
        Ok(token)
    }

    /// Consume a token exactly once, returning its subject.
    ///
    /// # Errors
    /// Returns an error only when the key-value store is unreachable.
    #[instrument(skip(self, token))]
    pub async fn consume(&self, namespace: Namespace, token: &str) -> Result<Option<String>> {
        self.kv
            .take(&namespace.key(token))
            .await
            .context("failed to consume token")
    }

    /// Resolve a token without consuming it (used for session lookups).
    ///
    /// # Errors
    /// Returns an error only when the key-value store is unreachable.
    pub async fn lookup(&self, namespace: Namespace, token: &str) -> Result<Option<String>> {
        self.kv
            .get(&namespace.key(token))
            .await
            .context("failed to look up token")
    }

    /// Allow one action per `ttl` window for `subject`.
    ///
    /// # Errors
    /// Returns an error only when the key-value store is unreachable.
    #[instrument(skip(self))]
    pub async fn gate(
        &self,
        namespace: Namespace,
        subject: &str,
        ttl: Duration,
    ) -> Result<GateDecision> {
        let written = self
            .kv
            .set_nx_ex(&namespace.key(subject), COOLDOWN_SENTINEL, ttl)
            .await
            .context("failed to evaluate cooldown gate")?;
        Ok(if written {
            GateDecision::Allowed
        } else {
            GateDecision::Blocked
        })
    }
}

/// Random lowercase alphanumeric token from the OS RNG.
#[must_use]
pub fn generate_token(length: usize) -> String {
    let mut rng = OsRng;
    (0..length.max(1))
        .map(|_| char::from(TOKEN_ALPHABET[rng.gen_range(0..TOKEN_ALPHABET.len())]))
        .collect()
}
