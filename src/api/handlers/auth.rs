//! Account endpoints: registration, verification, login and password reset.

use super::{error_response, json_rejection};
use crate::service::{
    AuthResponse, AuthService, ForgotPasswordRequest, LoginRequest, MessageResponse,
    RegisterRequest, ResetPasswordRequest,
};
use axum::{
    Json,
    extract::{Extension, Query, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use utoipa::IntoParams;

#[derive(Deserialize, IntoParams, Debug, Default)]
#[into_params(parameter_in = Query)]
pub struct TokenQuery {
    #[serde(default)]
    pub token: String,
}

#[utoipa::path(
    post,
    path = "/auth/register",
    request_body = RegisterRequest,
    responses(
        (status = 200, description = "Account created, verification email queued", body = AuthResponse),
        (status = 400, description = "Malformed JSON", body = MessageResponse),
        (status = 406, description = "Email already taken", body = MessageResponse),
        (status = 422, description = "Validation failed")
    ),
    tag = "auth"
)]
pub async fn register(
    service: Extension<AuthService>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match payload {
        Ok(payload) => payload,
        Err(rejection) => return json_rejection(&rejection),
    };

    match service.register(request).await {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(err) => error_response(&err, service.config().production()),
    }
}

#[utoipa::path(
    get,
    path = "/auth/verify-email",
    params(TokenQuery),
    responses(
        (status = 200, description = "Email verified", body = MessageResponse),
        (status = 400, description = "Invalid or expired token", body = MessageResponse),
        (status = 404, description = "User not found", body = MessageResponse),
        (status = 422, description = "Validation failed")
    ),
    tag = "auth"
)]
pub async fn verify_email(
    service: Extension<AuthService>,
    Query(query): Query<TokenQuery>,
) -> Response {
    match service.verify_email(query.token.trim()).await {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(err) => error_response(&err, service.config().production()),
    }
}

#[utoipa::path(
    post,
    path = "/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Logged in", body = AuthResponse),
        (status = 400, description = "Malformed JSON", body = MessageResponse),
        (status = 401, description = "Invalid credentials or email not verified", body = MessageResponse),
        (status = 422, description = "Validation failed")
    ),
    tag = "auth"
)]
pub async fn login(
    service: Extension<AuthService>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match payload {
        Ok(payload) => payload,
        Err(rejection) => return json_rejection(&rejection),
    };

    match service.login(request).await {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(err) => error_response(&err, service.config().production()),
    }
}

#[utoipa::path(
    post,
    path = "/auth/forgot-password",
    request_body = ForgotPasswordRequest,
    responses(
        (status = 200, description = "Reset email queued when the account exists", body = MessageResponse),
        (status = 400, description = "Malformed JSON", body = MessageResponse),
        (status = 422, description = "Validation failed")
    ),
    tag = "auth"
)]
pub async fn forgot_password(
    service: Extension<AuthService>,
    payload: Result<Json<ForgotPasswordRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match payload {
        Ok(payload) => payload,
        Err(rejection) => return json_rejection(&rejection),
    };

    match service.forgot_password(request).await {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(err) => error_response(&err, service.config().production()),
    }
}

#[utoipa::path(
    post,
    path = "/auth/post-forgot",
    params(TokenQuery),
    request_body = ResetPasswordRequest,
    responses(
        (status = 200, description = "Password changed", body = MessageResponse),
        (status = 400, description = "Malformed JSON", body = MessageResponse),
        (status = 406, description = "Invalid token", body = MessageResponse),
        (status = 422, description = "Validation failed")
    ),
    tag = "auth"
)]
pub async fn post_forgot(
    service: Extension<AuthService>,
    Query(query): Query<TokenQuery>,
    payload: Result<Json<ResetPasswordRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match payload {
        Ok(payload) => payload,
        Err(rejection) => return json_rejection(&rejection),
    };

    match service.reset_password(query.token.trim(), request).await {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(err) => error_response(&err, service.config().production()),
    }
}
