pub mod auth;
pub mod health;
pub mod user;

use crate::service::{MessageResponse, ServiceError};
use axum::{
    Json,
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use tracing::{debug, error};

pub const INVALID_JSON: &str = "Invalid Json Format";

/// Render a [`ServiceError`] as `{ message }`, plus `errors` for validation.
pub(crate) fn error_response(err: &ServiceError, production: bool) -> Response {
    let status = err.status();
    if status.is_server_error() {
        error!("request failed: {err:#}");
    }

    match err {
        ServiceError::Validation(errors) => (
            status,
            Json(json!({ "message": err.public_message(production), "errors": errors })),
        )
            .into_response(),
        _ => (
            status,
            Json(MessageResponse::new(err.public_message(production))),
        )
            .into_response(),
    }
}

pub(crate) fn json_rejection(rejection: &JsonRejection) -> Response {
    debug!("rejected request body: {rejection}");
    (
        StatusCode::BAD_REQUEST,
        Json(MessageResponse::new(INVALID_JSON)),
    )
        .into_response()
}

pub async fn not_found() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(MessageResponse::new("404 Not Found")),
    )
}
