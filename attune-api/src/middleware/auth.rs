//! Axum Middleware for Authentication
//!
//! This module provides Axum middleware that:
//! - Validates the `Authorization: Bearer` header on protected routes
//! - Resolves the token subject to a known user
//! - Injects AuthContext into request extensions
//! - Returns 401 for missing/malformed credentials, wrong token types, and
//!   unknown subjects; 403 for signature failures and expired tokens

use crate::auth::{validate_jwt_token, AuthConfig, AuthContext};
use crate::error::{ApiError, ApiResult, ErrorCode};
use axum::{
    extract::{FromRequestParts, Request, State},
    http::request::Parts,
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use uuid::Uuid;

// ============================================================================
// SUBJECT RESOLUTION
// ============================================================================

/// Resolves a validated token subject to an authenticated user context.
///
/// The production implementation lives on [`DbClient`](crate::db::DbClient)
/// and performs a user lookup by public identifier. Tests substitute a
/// canned resolver so the middleware can be exercised without a database.
#[axum::async_trait]
pub trait SubjectResolver: Send + Sync {
    /// Look up the user behind a token subject. `Ok(None)` means the subject
    /// is not a known user.
    async fn resolve_subject(&self, user_uuid: Uuid) -> ApiResult<Option<AuthContext>>;
}

// ============================================================================
// MIDDLEWARE STATE
// ============================================================================

/// Shared state for authentication middleware.
///
/// This is passed to the middleware via Axum's State extractor.
#[derive(Clone)]
pub struct AuthMiddlewareState {
    /// Authentication configuration
    pub auth_config: Arc<AuthConfig>,

    /// Subject-to-user resolution (injected for testing)
    pub resolver: Arc<dyn SubjectResolver>,
}

impl AuthMiddlewareState {
    /// Create new middleware state with the given auth configuration and
    /// subject resolver.
    pub fn new(auth_config: AuthConfig, resolver: Arc<dyn SubjectResolver>) -> Self {
        Self {
            auth_config: Arc::new(auth_config),
            resolver,
        }
    }
}

impl std::fmt::Debug for AuthMiddlewareState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthMiddlewareState")
            .field("auth_config", &self.auth_config)
            .field("resolver", &"<SubjectResolver>")
            .finish()
    }
}

// ============================================================================
// MIDDLEWARE FUNCTION
// ============================================================================

/// Axum middleware for bearer-token authentication.
///
/// This middleware:
/// 1. Extracts the `Authorization: Bearer` header (401 when missing/malformed)
/// 2. Validates the JWT signature and expiry (403 on either failure)
/// 3. Rejects tokens whose `token_type` is not `access_token` (401)
/// 4. Resolves the subject to a known user (401 when unknown)
/// 5. Injects AuthContext into request extensions on success
///
/// # Example
///
/// ```ignore
/// use axum::{Router, middleware};
/// use attune_api::middleware::{auth_middleware, AuthMiddlewareState};
///
/// let app = Router::new()
///     .route("/experiment/all", axum::routing::get(|| async { "OK" }))
///     .layer(middleware::from_fn_with_state(auth_state.clone(), auth_middleware));
/// ```
pub async fn auth_middleware(
    State(state): State<AuthMiddlewareState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AuthMiddlewareError> {
    let auth_header = request
        .headers()
        .get("authorization")
        .and_then(|h| h.to_str().ok());

    let auth_value = auth_header.ok_or_else(|| {
        AuthMiddlewareError(ApiError::unauthorized(
            "Authentication required: provide a bearer token in the Authorization header",
        ))
    })?;

    let token = auth_value.strip_prefix("Bearer ").ok_or_else(|| {
        AuthMiddlewareError(ApiError::unauthorized(
            "Authorization header must use Bearer scheme",
        ))
    })?;

    // Signature/claims failures are 403, expiry is 403
    let claims = validate_jwt_token(&state.auth_config, token).map_err(AuthMiddlewareError)?;

    // Only access tokens open the door
    if !claims.is_access_token() {
        return Err(AuthMiddlewareError(ApiError::from_code(
            ErrorCode::InvalidToken,
        )));
    }

    // The subject must parse as a public identifier and resolve to a user.
    // Both failure modes surface identically so callers cannot probe for
    // known identifiers.
    let user_uuid = Uuid::parse_str(&claims.sub)
        .map_err(|_| AuthMiddlewareError(ApiError::from_code(ErrorCode::InvalidToken)))?;

    let auth_context = state
        .resolver
        .resolve_subject(user_uuid)
        .await
        .map_err(AuthMiddlewareError)?
        .ok_or_else(|| AuthMiddlewareError(ApiError::from_code(ErrorCode::InvalidToken)))?;

    // Inject AuthContext into request extensions
    request.extensions_mut().insert(auth_context);

    // Continue to the next middleware/handler
    Ok(next.run(request).await)
}

// ============================================================================
// ERROR HANDLING
// ============================================================================

/// Error wrapper for middleware that implements IntoResponse.
///
/// This allows the middleware to return errors that are automatically
/// converted to HTTP responses with appropriate status codes.
#[derive(Debug)]
pub struct AuthMiddlewareError(pub ApiError);

impl IntoResponse for AuthMiddlewareError {
    fn into_response(self) -> Response {
        self.0.into_response()
    }
}

// ============================================================================
// TYPED EXTRACTOR
// ============================================================================

/// Typed Axum extractor for authentication context.
///
/// This extractor implements `FromRequestParts`, allowing it to be used
/// directly in route handler signatures. It provides compile-time guarantees
/// that authentication has been performed and makes auth required by the type
/// system.
///
/// # Example
///
/// ```ignore
/// async fn whoami(AuthExtractor(auth): AuthExtractor) -> String {
///     auth.email
/// }
/// ```
///
/// # Requirements
///
/// The `auth_middleware` must be applied to the route or router for this
/// extractor to work. If the middleware is not present, the extractor will
/// return a 500 Internal Server Error.
#[derive(Debug, Clone)]
pub struct AuthExtractor(pub AuthContext);

#[axum::async_trait]
impl<S> FromRequestParts<S> for AuthExtractor
where
    S: Send + Sync,
{
    type Rejection = AuthMiddlewareError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        // Extract AuthContext from request extensions
        // This should have been injected by the auth_middleware
        parts
            .extensions
            .get::<AuthContext>()
            .cloned()
            .map(AuthExtractor)
            .ok_or_else(|| {
                AuthMiddlewareError(ApiError::internal_error(
                    "AuthContext not found in request extensions. \
                     Ensure auth_middleware is applied to this route.",
                ))
            })
    }
}

// Implement Deref to make it easier to access the inner AuthContext
impl std::ops::Deref for AuthExtractor {
    type Target = AuthContext;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

// ============================================================================
// TESTS
// ============================================================================
