use axum::http::StatusCode;
use std::collections::BTreeMap;
use thiserror::Error;

pub const GENERIC_MESSAGE: &str = "Something went wrong";
pub const VALIDATION_MESSAGE: &str = "This data entity are invalids";

/// Per-field validation messages, in field order.
pub type FieldErrors = BTreeMap<String, Vec<String>>;

/// Failure of a service operation, classified for the transport layer.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("This data entity are invalids")]
    Validation(FieldErrors),
    #[error("email already taken")]
    EmailTaken,
    #[error("Invalid Credentials")]
    InvalidCredentials,
    #[error("Email Not Verified")]
    EmailNotVerified,
    #[error("Cant Resend Verification Mail")]
    VerificationCooldown,
    #[error("invalid or expired token")]
    InvalidVerificationToken,
    #[error("invalid token")]
    InvalidResetToken,
    #[error("user not found")]
    UserNotFound,
    #[error("Unauthorized")]
    Unauthorized,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ServiceError {
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::EmailTaken | Self::InvalidResetToken => StatusCode::NOT_ACCEPTABLE,
            Self::InvalidCredentials
            | Self::EmailNotVerified
            | Self::VerificationCooldown
            | Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::InvalidVerificationToken => StatusCode::BAD_REQUEST,
            Self::UserNotFound => StatusCode::NOT_FOUND,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to show to the caller. Infrastructure details are hidden
    /// in production.
    #[must_use]
    pub fn public_message(&self, production: bool) -> String {
        match self {
            Self::Internal(_) if production => GENERIC_MESSAGE.to_string(),
            Self::Internal(err) => format!("{err:#}"),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn domain_errors_have_stable_statuses() {
        assert_eq!(ServiceError::EmailTaken.status(), StatusCode::NOT_ACCEPTABLE);
        assert_eq!(ServiceError::InvalidCredentials.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(ServiceError::VerificationCooldown.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(ServiceError::InvalidVerificationToken.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            ServiceError::Validation(FieldErrors::new()).status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
    }

    #[test]
    fn internal_errors_are_masked_in_production() {
        let err = ServiceError::from(anyhow!("connection refused").context("failed to insert user"));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.public_message(true), GENERIC_MESSAGE);
        assert_eq!(
            err.public_message(false),
            "failed to insert user: connection refused"
        );
    }

    #[test]
    fn domain_messages_survive_production() {
        assert_eq!(
            ServiceError::VerificationCooldown.public_message(true),
            "Cant Resend Verification Mail"
        );
    }
}
