//! Login and Identity Endpoints
//!
//! POST /auth/login exchanges credentials for a signed bearer token.
//! GET /auth/me echoes the authenticated user.

use axum::{
    extract::State,
    http::{header, HeaderValue},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;

use crate::auth::{generate_access_token, verify_password, AuthConfig};
use crate::db::DbClient;
use crate::error::{ApiError, ApiResult};
use crate::middleware::AuthExtractor;
use crate::state::AppState;
use crate::types::{LoginRequest, TokenResponse, UserResponse};

// ============================================================================
// ROUTE HANDLERS
// ============================================================================

/// Login failures carry a bearer challenge and never reveal whether the
/// email or the password was wrong.
fn login_rejection() -> Response {
    let mut response = ApiError::unauthorized("Incorrect username or password").into_response();
    response
        .headers_mut()
        .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
    response
}

/// POST /auth/login - Exchange credentials for an access token
#[utoipa::path(
    post,
    path = "/auth/login",
    tag = "Auth",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Token issued", body = TokenResponse),
        (status = 401, description = "Incorrect username or password", body = ApiError),
    ),
)]
pub async fn login(
    State(db): State<DbClient>,
    State(auth_config): State<Arc<AuthConfig>>,
    Json(req): Json<LoginRequest>,
) -> ApiResult<Response> {
    let user = match db.user_get_by_email(&req.email).await? {
        Some(user) if verify_password(&req.password, &user.hashed_password) => user,
        _ => {
            tracing::info!(user = %req.email, "Login rejected");
            return Ok(login_rejection());
        }
    };

    let token = generate_access_token(&auth_config, user.user_uuid)?;

    tracing::info!(user = %user.email, "Login succeeded");

    Ok(Json(TokenResponse::bearer(token)).into_response())
}

/// GET /auth/me - Current authenticated user
#[utoipa::path(
    get,
    path = "/auth/me",
    tag = "Auth",
    responses(
        (status = 200, description = "Authenticated user", body = UserResponse),
        (status = 401, description = "Unauthorized", body = ApiError),
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn me(
    State(db): State<DbClient>,
    AuthExtractor(auth): AuthExtractor,
) -> ApiResult<Json<UserResponse>> {
    let user = db
        .user_get_by_uuid(auth.user_uuid)
        .await?
        .ok_or_else(|| ApiError::user_not_found(auth.user_uuid))?;

    Ok(Json(UserResponse::from(user)))
}

// ============================================================================
// ROUTERS
// ============================================================================

/// Routes reachable without a token.
pub fn public_router() -> Router<AppState> {
    Router::new().route("/auth/login", post(login))
}

/// Routes behind the auth middleware.
pub fn protected_router() -> Router<AppState> {
    Router::new().route("/auth/me", get(me))
}
