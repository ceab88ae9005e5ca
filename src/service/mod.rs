//! Account flows: registration, verification, login, password reset and
//! profile lookup.
//!
//! Operations return [`ServiceError`] with a status classification; the HTTP
//! layer only renders it. Email side effects are enqueued as tasks and never
//! block or fail the calling flow.

mod access;
mod error;
mod password;
mod types;
mod validation;

pub use access::AccessTokens;
pub use error::{FieldErrors, GENERIC_MESSAGE, ServiceError, VALIDATION_MESSAGE};
pub use password::{hash_password, verify_password};
pub use types::{
    AuthResponse, ForgotPasswordRequest, LoginRequest, MessageResponse, RegisterRequest,
    ResetPasswordRequest, UserResponse,
};

use crate::{
    mail::{self, EmailPayload},
    store::{CreateOutcome, NewUser, User, UserStore},
    tasks::TaskQueue,
    tokens::{GateDecision, Namespace, TokenStore},
};
use anyhow::Context;
use serde_json::{Map, Value, json};
use std::{sync::Arc, time::Duration};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;
use validation::{Validator, normalize_email};

const OTP_LENGTH: usize = 10;
const OPAQUE_TOKEN_LENGTH: usize = 32;

/// Tunables for the auth flows.
#[derive(Clone, Debug)]
pub struct AuthConfig {
    api_host: String,
    production: bool,
    session_ttl: Duration,
    otp_ttl: Duration,
    resend_cooldown: Duration,
    reset_ttl: Duration,
}

impl AuthConfig {
    /// Defaults: 24h sessions, 10 min OTPs and resend cooldown, 1h reset tokens.
    #[must_use]
    pub fn new(api_host: impl Into<String>) -> Self {
        Self {
            api_host: api_host.into(),
            production: false,
            session_ttl: Namespace::Session.default_ttl(),
            otp_ttl: Namespace::SignupOtp.default_ttl(),
            resend_cooldown: Namespace::VerifyCooldown.default_ttl(),
            reset_ttl: Namespace::ForgotPassword.default_ttl(),
        }
    }

    #[must_use]
    pub fn with_production(mut self, production: bool) -> Self {
        self.production = production;
        self
    }

    #[must_use]
    pub fn with_session_ttl(mut self, ttl: Duration) -> Self {
        self.session_ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_otp_ttl(mut self, ttl: Duration) -> Self {
        self.otp_ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_resend_cooldown(mut self, cooldown: Duration) -> Self {
        self.resend_cooldown = cooldown;
        self
    }

    #[must_use]
    pub fn with_reset_ttl(mut self, ttl: Duration) -> Self {
        self.reset_ttl = ttl;
        self
    }

    #[must_use]
    pub fn production(&self) -> bool {
        self.production
    }

    #[must_use]
    pub fn api_host(&self) -> &str {
        &self.api_host
    }

    fn link(&self, path: &str, token: &str) -> String {
        format!("{}{path}?token={token}", self.api_host.trim_end_matches('/'))
    }
}

#[derive(Clone)]
pub struct AuthService {
    users: Arc<dyn UserStore>,
    tokens: TokenStore,
    queue: TaskQueue,
    access: AccessTokens,
    config: AuthConfig,
}

impl AuthService {
    #[must_use]
    pub fn new(
        users: Arc<dyn UserStore>,
        tokens: TokenStore,
        queue: TaskQueue,
        access: AccessTokens,
        config: AuthConfig,
    ) -> Self {
        Self {
            users,
            tokens,
            queue,
            access,
            config,
        }
    }

    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    #[must_use]
    pub fn users(&self) -> &Arc<dyn UserStore> {
        &self.users
    }

    /// Create an account, start a session and send the verification email.
    ///
    /// # Errors
    /// [`ServiceError::Validation`], [`ServiceError::EmailTaken`] or
    /// [`ServiceError::Internal`].
    #[instrument(skip_all)]
    pub async fn register(&self, request: RegisterRequest) -> Result<AuthResponse, ServiceError> {
        Validator::new()
            .name(&request.name)
            .email(&request.email)
            .password(&request.password)
            .finish()?;

        let email = normalize_email(&request.email);
        if self.users.find_by_email(&email).await?.is_some() {
            debug!("registration rejected: email already taken");
            return Err(ServiceError::EmailTaken);
        }

        let password_hash = hash_password(request.password).await?;
        let user = match self
            .users
            .create(NewUser {
                name: request.name.trim().to_string(),
                email,
                password_hash,
            })
            .await?
        {
            CreateOutcome::Created(user) => user,
            // Lost a race with a concurrent registration.
            CreateOutcome::EmailTaken => return Err(ServiceError::EmailTaken),
        };
        info!(user.id = %user.id, "User registered");

        let token = self.start_session(&user).await?;
        self.send_verification(&user).await?;

        Ok(AuthResponse {
            token,
            user: UserResponse::from(&user),
        })
    }

    /// Redeem a signup OTP.
    ///
    /// # Errors
    /// [`ServiceError::InvalidVerificationToken`] when the token is unknown,
    /// expired or already used; [`ServiceError::UserNotFound`] when the account
    /// is gone.
    #[instrument(skip_all)]
    pub async fn verify_email(&self, token: &str) -> Result<MessageResponse, ServiceError> {
        Validator::new().token(token).finish()?;

        let subject = self
            .tokens
            .consume(Namespace::SignupOtp, token)
            .await?
            .ok_or(ServiceError::InvalidVerificationToken)?;
        let user_id = Uuid::parse_str(&subject).map_err(|_| ServiceError::InvalidVerificationToken)?;

        if !self.users.mark_verified(user_id).await? {
            return Err(ServiceError::UserNotFound);
        }
        info!(user.id = %user_id, "Email verified");
        Ok(MessageResponse::new("email verified"))
    }

    /// Authenticate with email and password.
    ///
    /// Unverified accounts never get a session; they get a fresh verification
    /// email at most once per cooldown window.
    ///
    /// # Errors
    /// [`ServiceError::InvalidCredentials`], [`ServiceError::EmailNotVerified`],
    /// [`ServiceError::VerificationCooldown`], [`ServiceError::Validation`] or
    /// [`ServiceError::Internal`].
    #[instrument(skip_all)]
    pub async fn login(&self, request: LoginRequest) -> Result<AuthResponse, ServiceError> {
        Validator::new()
            .email(&request.email)
            .password(&request.password)
            .finish()?;

        let email = normalize_email(&request.email);
        let Some(user) = self.users.find_by_email(&email).await? else {
            return Err(ServiceError::InvalidCredentials);
        };
        if !verify_password(request.password, user.password_hash.clone()).await? {
            return Err(ServiceError::InvalidCredentials);
        }

        if !user.email_verified() {
            let decision = self
                .tokens
                .gate(
                    Namespace::VerifyCooldown,
                    &user.id.to_string(),
                    self.config.resend_cooldown,
                )
                .await?;
            if decision == GateDecision::Blocked {
                return Err(ServiceError::VerificationCooldown);
            }
            self.send_verification(&user).await?;
            return Err(ServiceError::EmailNotVerified);
        }

        let token = self.start_session(&user).await?;
        info!(user.id = %user.id, "User logged in");
        Ok(AuthResponse {
            token,
            user: UserResponse::from(&user),
        })
    }

    /// Email a reset link if the account exists. The response never reveals
    /// whether it does.
    ///
    /// # Errors
    /// [`ServiceError::Validation`] or [`ServiceError::Internal`].
    #[instrument(skip_all)]
    pub async fn forgot_password(
        &self,
        request: ForgotPasswordRequest,
    ) -> Result<MessageResponse, ServiceError> {
        Validator::new().email(&request.email).finish()?;

        let email = normalize_email(&request.email);
        if let Some(user) = self.users.find_by_email(&email).await? {
            let token = self
                .tokens
                .issue(
                    Namespace::ForgotPassword,
                    &user.id.to_string(),
                    self.config.reset_ttl,
                    OPAQUE_TOKEN_LENGTH,
                )
                .await?;
            let data = template_data(&[
                (
                    "password_reset",
                    json!(self.config.link("/auth/password_reset", &token)),
                ),
                ("Name", json!(user.name)),
            ]);
            self.enqueue(&user, "forget_password", "Reset Your Password", data)
                .await;
        } else {
            debug!("password reset requested for unknown email");
        }

        Ok(MessageResponse::new("Check Your Email"))
    }

    /// Set a new password using a reset token.
    ///
    /// # Errors
    /// [`ServiceError::InvalidResetToken`] when the token is unknown, expired or
    /// already used.
    #[instrument(skip_all)]
    pub async fn reset_password(
        &self,
        token: &str,
        request: ResetPasswordRequest,
    ) -> Result<MessageResponse, ServiceError> {
        Validator::new()
            .token(token)
            .password(&request.password)
            .finish()?;

        let subject = self
            .tokens
            .consume(Namespace::ForgotPassword, token)
            .await?
            .ok_or(ServiceError::InvalidResetToken)?;
        let user_id = Uuid::parse_str(&subject).map_err(|_| ServiceError::InvalidResetToken)?;

        let password_hash = hash_password(request.password).await?;
        if !self.users.update_password(user_id, &password_hash).await? {
            return Err(ServiceError::UserNotFound);
        }
        info!(user.id = %user_id, "Password reset");
        Ok(MessageResponse::new("Password Reset Completed"))
    }

    /// Resolve a bearer token to its user.
    ///
    /// # Errors
    /// [`ServiceError::Unauthorized`] on any failure.
    pub async fn authenticate(&self, bearer: &str) -> Result<User, ServiceError> {
        let session = self
            .access
            .verify(bearer)
            .ok_or(ServiceError::Unauthorized)?;

        let subject = match self.tokens.lookup(Namespace::Session, &session).await {
            Ok(Some(subject)) => subject,
            Ok(None) => return Err(ServiceError::Unauthorized),
            Err(err) => {
                error!("session lookup failed: {err:#}");
                return Err(ServiceError::Unauthorized);
            }
        };
        let user_id = Uuid::parse_str(&subject).map_err(|_| ServiceError::Unauthorized)?;

        match self.users.find_by_id(user_id).await {
            Ok(Some(user)) => Ok(user),
            Ok(None) => Err(ServiceError::Unauthorized),
            Err(err) => {
                error!("user lookup failed: {err:#}");
                Err(ServiceError::Unauthorized)
            }
        }
    }

    /// Profile of the authenticated user, read fresh from the store.
    ///
    /// # Errors
    /// [`ServiceError::UserNotFound`] or [`ServiceError::Internal`].
    pub async fn get_user(&self, user: &User) -> Result<UserResponse, ServiceError> {
        let current = self
            .users
            .find_by_id(user.id)
            .await?
            .ok_or(ServiceError::UserNotFound)?;
        Ok(UserResponse::from(&current))
    }

    async fn start_session(&self, user: &User) -> Result<String, ServiceError> {
        let session = self
            .tokens
            .issue(
                Namespace::Session,
                &user.id.to_string(),
                self.config.session_ttl,
                OPAQUE_TOKEN_LENGTH,
            )
            .await?;
        let token = self
            .access
            .sign(&session, self.config.session_ttl)
            .context("failed to issue access token")?;
        Ok(token)
    }

    async fn send_verification(&self, user: &User) -> Result<(), ServiceError> {
        let otp = self
            .tokens
            .issue(
                Namespace::SignupOtp,
                &user.id.to_string(),
                self.config.otp_ttl,
                OTP_LENGTH,
            )
            .await?;
        let data = template_data(&[
            (
                "verification_link",
                json!(self.config.link("/auth/verify-email", &otp)),
            ),
            ("Name", json!(user.name)),
        ]);
        self.enqueue(user, "signup_otp", "Verify Your Email", data)
            .await;
        Ok(())
    }

    // Mail is best effort: a queue outage must not fail the user flow.
    async fn enqueue(&self, user: &User, template: &str, subject: &str, data: Map<String, Value>) {
        let payload = EmailPayload {
            template_name: template.to_string(),
            to: user.email.clone(),
            subject: subject.to_string(),
            data,
            attachments: Vec::new(),
        };
        match mail::enqueue_email(&self.queue, &payload).await {
            Ok(task_id) => debug!(task.id = %task_id, template, "Email enqueued"),
            Err(err) => warn!(user.id = %user.id, template, "Failed to enqueue email: {err}"),
        }
    }
}

fn template_data(pairs: &[(&str, Value)]) -> Map<String, Value> {
    pairs
        .iter()
        .map(|(key, value)| ((*key).to_string(), value.clone()))
        .collect()
}
