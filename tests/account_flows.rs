mod common;

use adly::{
    mail::SEND_EMAIL,
    service::{
        AuthConfig, ForgotPasswordRequest, LoginRequest, RegisterRequest, ResetPasswordRequest,
        ServiceError,
    },
    tasks::RetryPolicy,
};
use anyhow::Result;
use common::{API_HOST, drain_emails, fixture, fixture_with, link_token};
use std::time::Duration;

fn registration(email: &str) -> RegisterRequest {
    RegisterRequest {
        name: "Grace Hopper".to_string(),
        email: email.to_string(),
        password: "cobol-1959".to_string(),
    }
}

fn login(email: &str, password: &str) -> LoginRequest {
    LoginRequest {
        email: email.to_string(),
        password: password.to_string(),
    }
}

#[tokio::test]
async fn registration_enqueues_one_signup_email() -> Result<()> {
    let f = fixture();
    let response = f.service.register(registration("Grace@Navy.mil ")).await?;
    assert_eq!(response.user.email, "grace@navy.mil");
    assert!(!response.user.email_verified);
    assert!(!response.token.is_empty());

    let envelope = f
        .queue
        .dequeue(Duration::from_secs(30), Duration::ZERO)
        .await?;
    let envelope = envelope.ok_or_else(|| anyhow::anyhow!("no task enqueued"))?;
    assert_eq!(envelope.task_type, SEND_EMAIL);
    f.queue.ack(&envelope.id).await?;

    let payload: adly::mail::EmailPayload = serde_json::from_slice(&envelope.payload)?;
    assert_eq!(payload.template_name, "signup_otp");
    assert_eq!(payload.subject, "Verify Your Email");
    assert_eq!(payload.to, "grace@navy.mil");
    assert_eq!(payload.data["Name"], "Grace Hopper");

    let link = payload.data["verification_link"].as_str().unwrap_or_default();
    assert!(link.starts_with(&format!("{API_HOST}/auth/verify-email?token=")));
    assert_eq!(link_token(&payload, "verification_link")?.len(), 10);

    assert!(drain_emails(&f.queue).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn duplicate_registration_is_rejected_without_email() -> Result<()> {
    let f = fixture();
    f.service.register(registration("grace@navy.mil")).await?;
    assert_eq!(drain_emails(&f.queue).await?.len(), 1);

    let result = f.service.register(registration("GRACE@navy.mil")).await;
    assert!(matches!(result, Err(ServiceError::EmailTaken)));
    assert!(drain_emails(&f.queue).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn invalid_registration_lists_fields() {
    let f = fixture();
    let result = f
        .service
        .register(RegisterRequest {
            name: "R2-D2".to_string(),
            email: String::new(),
            password: "short".to_string(),
        })
        .await;

    match result {
        Err(ServiceError::Validation(errors)) => {
            assert!(errors.contains_key("name"));
            assert!(errors.contains_key("email"));
            assert!(errors.contains_key("password"));
        }
        other => panic!("expected validation error, got {other:?}"),
    }
}

#[tokio::test]
async fn verification_token_is_single_use() -> Result<()> {
    let f = fixture();
    f.service.register(registration("grace@navy.mil")).await?;
    let emails = drain_emails(&f.queue).await?;
    let token = link_token(&emails[0], "verification_link")?;

    let response = f.service.verify_email(&token).await?;
    assert_eq!(response.message, "email verified");

    let again = f.service.verify_email(&token).await;
    assert!(matches!(again, Err(ServiceError::InvalidVerificationToken)));

    let user = f.service.users().find_by_email("grace@navy.mil").await?;
    assert!(user.is_some_and(|user| user.email_verified()));
    Ok(())
}

#[tokio::test]
async fn unverified_login_sends_at_most_one_otp_per_window() -> Result<()> {
    let config = AuthConfig::new(API_HOST).with_resend_cooldown(Duration::from_millis(200));
    let f = fixture_with(config, RetryPolicy::new());
    f.service.register(registration("grace@navy.mil")).await?;
    drain_emails(&f.queue).await?;

    let first = f.service.login(login("grace@navy.mil", "cobol-1959")).await;
    assert!(matches!(first, Err(ServiceError::EmailNotVerified)));

    for _ in 0..3 {
        let retry = f.service.login(login("grace@navy.mil", "cobol-1959")).await;
        assert!(matches!(retry, Err(ServiceError::VerificationCooldown)));
    }
    let emails = drain_emails(&f.queue).await?;
    assert_eq!(emails.len(), 1);
    assert_eq!(emails[0].template_name, "signup_otp");

    tokio::time::sleep(Duration::from_millis(300)).await;
    let later = f.service.login(login("grace@navy.mil", "cobol-1959")).await;
    assert!(matches!(later, Err(ServiceError::EmailNotVerified)));
    assert_eq!(drain_emails(&f.queue).await?.len(), 1);
    Ok(())
}

#[tokio::test]
async fn wrong_credentials_never_reveal_the_account() -> Result<()> {
    let f = fixture();
    f.service.register(registration("grace@navy.mil")).await?;
    drain_emails(&f.queue).await?;

    let wrong_password = f.service.login(login("grace@navy.mil", "fortran-57")).await;
    assert!(matches!(wrong_password, Err(ServiceError::InvalidCredentials)));

    let unknown = f.service.login(login("ada@example.com", "cobol-1959")).await;
    assert!(matches!(unknown, Err(ServiceError::InvalidCredentials)));

    assert!(drain_emails(&f.queue).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn verified_login_starts_a_session() -> Result<()> {
    let f = fixture();
    f.service.register(registration("grace@navy.mil")).await?;
    let emails = drain_emails(&f.queue).await?;
    f.service
        .verify_email(&link_token(&emails[0], "verification_link")?)
        .await?;

    let response = f.service.login(login("grace@navy.mil", "cobol-1959")).await?;
    assert!(response.user.email_verified);

    let user = f.service.authenticate(&response.token).await?;
    assert_eq!(user.email, "grace@navy.mil");

    let profile = f.service.get_user(&user).await?;
    assert_eq!(profile.name, "Grace Hopper");
    assert!(profile.email_verified);

    let forged = f.service.authenticate("not-a-jwt").await;
    assert!(matches!(forged, Err(ServiceError::Unauthorized)));
    Ok(())
}

#[tokio::test]
async fn forgot_and_reset_password() -> Result<()> {
    let f = fixture();
    f.service.register(registration("grace@navy.mil")).await?;
    let emails = drain_emails(&f.queue).await?;
    f.service
        .verify_email(&link_token(&emails[0], "verification_link")?)
        .await?;

    let response = f
        .service
        .forgot_password(ForgotPasswordRequest {
            email: "grace@navy.mil".to_string(),
        })
        .await?;
    assert_eq!(response.message, "Check Your Email");

    let emails = drain_emails(&f.queue).await?;
    assert_eq!(emails.len(), 1);
    assert_eq!(emails[0].template_name, "forget_password");
    assert_eq!(emails[0].subject, "Reset Your Password");
    let link = emails[0].data["password_reset"].as_str().unwrap_or_default();
    assert!(link.starts_with(&format!("{API_HOST}/auth/password_reset?token=")));
    let token = link_token(&emails[0], "password_reset")?;

    let reset = ResetPasswordRequest {
        password: "flow-matic".to_string(),
    };
    let response = f.service.reset_password(&token, reset).await?;
    assert_eq!(response.message, "Password Reset Completed");

    let reused = f
        .service
        .reset_password(
            &token,
            ResetPasswordRequest {
                password: "another-one".to_string(),
            },
        )
        .await;
    assert!(matches!(reused, Err(ServiceError::InvalidResetToken)));

    let old = f.service.login(login("grace@navy.mil", "cobol-1959")).await;
    assert!(matches!(old, Err(ServiceError::InvalidCredentials)));
    f.service.login(login("grace@navy.mil", "flow-matic")).await?;
    Ok(())
}

#[tokio::test]
async fn forgot_password_for_unknown_email_sends_nothing() -> Result<()> {
    let f = fixture();
    let response = f
        .service
        .forgot_password(ForgotPasswordRequest {
            email: "nobody@example.com".to_string(),
        })
        .await?;
    assert_eq!(response.message, "Check Your Email");
    assert!(drain_emails(&f.queue).await?.is_empty());
    Ok(())
}
