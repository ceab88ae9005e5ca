use super::error_response;
use crate::{
    service::{AuthService, MessageResponse, UserResponse},
    store::User,
};
use axum::{
    Json,
    extract::Extension,
    http::StatusCode,
    response::{IntoResponse, Response},
};

/// Profile of the caller identified by the bearer token.
#[utoipa::path(
    get,
    path = "/user/get-user",
    responses(
        (status = 200, description = "Current user", body = UserResponse),
        (status = 401, description = "Missing or invalid bearer token", body = MessageResponse)
    ),
    security(("bearer" = [])),
    tag = "user"
)]
pub async fn get_user(service: Extension<AuthService>, user: Extension<User>) -> Response {
    match service.get_user(&user).await {
        Ok(profile) => (StatusCode::OK, Json(profile)).into_response(),
        Err(err) => error_response(&err, service.config().production()),
    }
}
