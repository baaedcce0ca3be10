//! User Registration and Lookup Endpoints
//!
//! Signup is public; listing and lookup require a bearer token.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use uuid::Uuid;

use crate::auth::hash_password;
use crate::db::DbClient;
use crate::error::{ApiError, ApiResult};
use crate::middleware::AuthExtractor;
use crate::state::AppState;
use crate::types::{CreateUserRequest, UserResponse};

// ============================================================================
// VALIDATION
// ============================================================================

/// Light-weight email shape check; the unique constraint and the mail loop
/// are the real arbiters of address quality.
fn validate_email(email: &str) -> ApiResult<()> {
    if email.trim().is_empty() {
        return Err(ApiError::missing_field("email"));
    }

    let valid = match email.split_once('@') {
        Some((local, domain)) => !local.is_empty() && domain.contains('.'),
        None => false,
    };

    if !valid {
        return Err(ApiError::invalid_format(
            "email",
            "an address like user@example.com",
        ));
    }

    Ok(())
}

// ============================================================================
// ROUTE HANDLERS
// ============================================================================

/// POST /user/new - Register a new user
#[utoipa::path(
    post,
    path = "/user/new",
    tag = "Users",
    request_body = CreateUserRequest,
    responses(
        (status = 201, description = "User registered successfully", body = UserResponse),
        (status = 400, description = "Invalid request or duplicate email", body = ApiError),
    ),
)]
pub async fn create_user(
    State(db): State<DbClient>,
    Json(req): Json<CreateUserRequest>,
) -> ApiResult<impl IntoResponse> {
    validate_email(&req.email)?;

    if req.password.is_empty() {
        return Err(ApiError::missing_field("password"));
    }

    let hashed = hash_password(&req.password);
    let record = db.user_create(&req.email, &hashed).await?;

    tracing::info!(user = %record.email, "User registered");

    Ok((StatusCode::CREATED, Json(UserResponse::from(record))))
}

/// GET /user/all - List all users
#[utoipa::path(
    get,
    path = "/user/all",
    tag = "Users",
    responses(
        (status = 200, description = "List of users", body = Vec<UserResponse>),
        (status = 401, description = "Unauthorized", body = ApiError),
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn list_users(
    State(db): State<DbClient>,
    AuthExtractor(_auth): AuthExtractor,
) -> ApiResult<Json<Vec<UserResponse>>> {
    let users = db.user_list().await?;
    let users = users.into_iter().map(UserResponse::from).collect();

    Ok(Json(users))
}

/// GET /user/{user_id} - Get a user by public identifier
#[utoipa::path(
    get,
    path = "/user/{user_id}",
    tag = "Users",
    params(
        ("user_id" = String, Path, description = "User UUID"),
    ),
    responses(
        (status = 200, description = "User found", body = UserResponse),
        (status = 401, description = "Unauthorized", body = ApiError),
        (status = 404, description = "User not found", body = ApiError),
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn get_user(
    State(db): State<DbClient>,
    AuthExtractor(_auth): AuthExtractor,
    Path(user_id): Path<String>,
) -> ApiResult<Json<UserResponse>> {
    let user_uuid = Uuid::parse_str(&user_id)?;

    let user = db
        .user_get_by_uuid(user_uuid)
        .await?
        .ok_or_else(|| ApiError::user_not_found(user_uuid))?;

    Ok(Json(UserResponse::from(user)))
}

// ============================================================================
// ROUTERS
// ============================================================================

/// Routes reachable without a token.
pub fn public_router() -> Router<AppState> {
    Router::new().route("/user/new", post(create_user))
}

/// Routes behind the auth middleware.
pub fn protected_router() -> Router<AppState> {
    Router::new()
        .route("/user/all", get(list_users))
        .route("/user/:user_id", get(get_user))
}
