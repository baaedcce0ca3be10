//! REST API Routes Module
//!
//! This module contains all REST API route handlers organized by entity type.
//!
//! Includes:
//! - Experiment lifecycle routes (create, ask, tell, list)
//! - User registration and lookup
//! - Login and identity
//! - Health check endpoints (Kubernetes-compatible)
//! - CORS support for browser-based clients

pub mod auth;
pub mod experiment;
pub mod health;
pub mod user;

use std::time::Duration;

use axum::{
    http::{header, HeaderValue, Method},
    middleware::from_fn_with_state,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;

use crate::config::ApiConfig;
use crate::error::{ApiError, ApiResult};
use crate::middleware::{auth_middleware, AuthMiddlewareState};
use crate::openapi::ApiDoc;
use crate::state::AppState;

// ============================================================================
// OPENAPI ENDPOINT
// ============================================================================

/// Handler for /openapi.json endpoint.
async fn openapi_json() -> impl IntoResponse {
    Json(ApiDoc::openapi())
}

// ============================================================================
// PRODUCTION VALIDATION
// ============================================================================

/// Check if running in a production environment.
fn is_production_environment() -> bool {
    std::env::var("ENVIRONMENT")
        .map(|e| matches!(e.to_lowercase().as_str(), "production" | "prod"))
        .unwrap_or(false)
}

/// Validate API configuration for production use.
fn validate_api_config_for_production(config: &ApiConfig) -> ApiResult<()> {
    if config.cors_origins.is_empty() {
        return Err(ApiError::invalid_input(
            "CORS origins not configured for production. Set ATTUNE_CORS_ORIGINS.",
        ));
    }
    Ok(())
}

// ============================================================================
// SECURE ROUTER BUILDER
// ============================================================================

/// Builder for the API router with auth enforced by default.
///
/// Experiment, user listing, and identity routes sit behind the JWT
/// middleware; signup, login, health, and the OpenAPI document stay public.
pub struct SecureRouterBuilder {
    state: AppState,
    api_config: ApiConfig,
    auth_state: AuthMiddlewareState,
}

impl SecureRouterBuilder {
    /// Create a new SecureRouterBuilder.
    ///
    /// In production environments, this validates that security
    /// configurations are properly set up and returns an error if critical
    /// settings are missing.
    pub fn new(state: AppState, api_config: ApiConfig) -> ApiResult<Self> {
        // Validate configurations in production
        if is_production_environment() {
            state.auth.validate_for_production()?;
            validate_api_config_for_production(&api_config)?;
        }

        let auth_state = AuthMiddlewareState::new(
            state.auth.as_ref().clone(),
            std::sync::Arc::new(state.db.clone()),
        );

        Ok(Self {
            state,
            api_config,
            auth_state,
        })
    }

    /// Routes that require a bearer token.
    fn build_protected_routes(&self) -> Router<AppState> {
        Router::new()
            .merge(experiment::protected_router())
            .merge(user::protected_router())
            .merge(auth::protected_router())
    }

    /// Routes reachable without credentials.
    fn build_public_routes(&self) -> Router<AppState> {
        Router::new()
            .merge(user::public_router())
            .merge(auth::public_router())
    }

    /// Build the complete router with the full security stack.
    ///
    /// # Middleware Order (outer to inner)
    /// 1. CORS (outermost) - handles preflight requests
    /// 2. Trace - request/response logging
    /// 3. Auth (innermost, protected routes only) - validates credentials
    pub fn build(self) -> ApiResult<Router> {
        // Protected routes (auth required)
        let protected = self
            .build_protected_routes()
            .layer(from_fn_with_state(self.auth_state.clone(), auth_middleware));

        // Build the main router
        let mut router = Router::new()
            .merge(protected)
            .merge(self.build_public_routes())
            // OpenAPI spec
            .route("/openapi.json", get(openapi_json))
            .with_state(self.state.clone())
            // Health checks (no auth required)
            .nest("/health", health::create_router(self.state.db.clone()));

        // Add Swagger UI if swagger-ui feature is enabled
        #[cfg(feature = "swagger-ui")]
        {
            use utoipa_swagger_ui::SwaggerUi;
            router =
                router.merge(SwaggerUi::new("/swagger-ui").url("/openapi.json", ApiDoc::openapi()));
        }

        // Build CORS layer
        let cors = build_cors_layer(&self.api_config);

        Ok(router.layer(TraceLayer::new_for_http()).layer(cors))
    }
}

// ============================================================================
// CORS LAYER
// ============================================================================

/// Build the CORS layer from ApiConfig.
///
/// In development mode (empty origins), allows all origins.
/// In production mode, only allows configured origins.
fn build_cors_layer(config: &ApiConfig) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE, header::ACCEPT])
        .max_age(Duration::from_secs(config.cors_max_age_secs));

    if config.cors_origins.is_empty() {
        // Development mode: allow all origins
        tracing::info!("CORS: Development mode - allowing all origins");
        cors.allow_origin(Any).allow_headers(Any)
    } else {
        // Production mode: only allow configured origins
        tracing::info!(
            "CORS: Production mode - allowing origins: {:?}",
            config.cors_origins
        );
        let origins: Vec<HeaderValue> = config
            .cors_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();

        if config.cors_allow_credentials {
            cors.allow_origin(origins).allow_credentials(true)
        } else {
            cors.allow_origin(origins)
        }
    }
}

/// Create the complete API router.
///
/// This function creates a fully configured Axum router with:
/// - Experiment routes under /experiment/* (protected)
/// - User routes under /user/* (signup public, the rest protected)
/// - Login at /auth/login (public) and identity at /auth/me (protected)
/// - Health checks at /health/* (public)
/// - OpenAPI spec at /openapi.json
/// - Swagger UI at /swagger-ui (when the swagger-ui feature is enabled)
///
/// # Security
/// In production, validates security configuration at startup.
pub fn create_api_router(state: AppState, api_config: &ApiConfig) -> ApiResult<Router> {
    SecureRouterBuilder::new(state, api_config.clone()).and_then(|builder| builder.build())
}

// ============================================================================
// DEVELOPMENT ROUTER
// ============================================================================

/// Resolves every request to the seeded default user instead of requiring
/// a token. Assumes the database has been seeded.
#[cfg(any(test, feature = "dev"))]
async fn dev_identity_middleware(
    axum::extract::State(db): axum::extract::State<crate::db::DbClient>,
    mut request: axum::extract::Request,
    next: axum::middleware::Next,
) -> Result<axum::response::Response, crate::middleware::AuthMiddlewareError> {
    use crate::middleware::AuthMiddlewareError;

    let user = db
        .user_get_by_email(crate::seed::DEFAULT_USER_EMAIL)
        .await
        .map_err(AuthMiddlewareError)?
        .ok_or_else(|| {
            AuthMiddlewareError(ApiError::internal_error(
                "Development identity user is missing; run database seeding",
            ))
        })?;

    request
        .extensions_mut()
        .insert(crate::auth::AuthContext::new(
            user.id,
            user.user_uuid,
            user.email,
        ));

    Ok(next.run(request).await)
}

/// Create an API router without authentication middleware.
///
/// **WARNING**: This should only be used for testing or development.
/// Production deployments MUST use `create_api_router`.
///
/// Protected handlers still need an identity, so every request runs as the
/// seeded default user.
#[cfg(any(test, feature = "dev"))]
pub fn create_api_router_unauthenticated(
    state: AppState,
    api_config: &ApiConfig,
) -> ApiResult<Router> {
    let protected = Router::new()
        .merge(experiment::protected_router())
        .merge(user::protected_router())
        .merge(auth::protected_router())
        .layer(from_fn_with_state(
            state.db.clone(),
            dev_identity_middleware,
        ));

    let mut router = Router::new()
        .merge(protected)
        .merge(user::public_router())
        .merge(auth::public_router())
        .route("/openapi.json", get(openapi_json))
        .with_state(state.clone())
        .nest("/health", health::create_router(state.db.clone()));

    #[cfg(feature = "swagger-ui")]
    {
        use utoipa_swagger_ui::SwaggerUi;
        router =
            router.merge(SwaggerUi::new("/swagger-ui").url("/openapi.json", ApiDoc::openapi()));
    }

    let cors = build_cors_layer(api_config);

    Ok(router.layer(TraceLayer::new_for_http()).layer(cors))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{AuthConfig, JwtSecret};
    use crate::db::{DbClient, DbConfig};
    use attune_optimizer::SequentialSearchEngine;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use std::sync::Arc;
    use tower::ServiceExt; // for `oneshot`

    /// Pool pointed at a closed port; never connects because every test
    /// below fails before its handler reaches the database.
    fn test_state() -> AppState {
        let db_config = DbConfig {
            host: "127.0.0.1".to_string(),
            port: 1,
            ..Default::default()
        };
        let db = DbClient::from_config(&db_config).expect("lazy pool construction");

        let auth = AuthConfig {
            jwt_secret: JwtSecret::new("router_test_secret".to_string()).expect("non-empty"),
            jwt_algorithm: jsonwebtoken::Algorithm::HS256,
            jwt_expiration_secs: 3600,
            jwt_clock_skew_secs: 60,
            clock: Arc::new(crate::auth::test_clocks::valid()),
        };

        AppState {
            db,
            engine: Arc::new(SequentialSearchEngine::new()),
            auth: Arc::new(auth),
        }
    }

    fn test_router() -> Router {
        create_api_router(test_state(), &ApiConfig::default()).expect("router should build")
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body should be readable");
        serde_json::from_slice(&bytes).expect("body should be JSON")
    }

    #[tokio::test]
    async fn test_protected_routes_require_token() {
        for path in ["/experiment/all", "/user/all", "/auth/me"] {
            let response = test_router()
                .oneshot(
                    Request::builder()
                        .uri(path)
                        .body(Body::empty())
                        .expect("request"),
                )
                .await
                .expect("infallible");

            assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "path {path}");

            let body = body_json(response).await;
            assert_eq!(body["code"], serde_json::json!("UNAUTHORIZED"));
        }
    }

    #[tokio::test]
    async fn test_signup_is_public_and_validated() {
        // A malformed email fails validation, not authentication.
        let response = test_router()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/user/new")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        r#"{"email": "not-an-address", "password": "pw"}"#,
                    ))
                    .expect("request"),
            )
            .await
            .expect("infallible");

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = body_json(response).await;
        assert_eq!(body["code"], serde_json::json!("INVALID_FORMAT"));
    }

    #[tokio::test]
    async fn test_login_is_reachable_without_token() {
        // An empty body is a deserialization failure, not a 401.
        let response = test_router()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/auth/login")
                    .header("content-type", "application/json")
                    .body(Body::from("{}"))
                    .expect("request"),
            )
            .await
            .expect("infallible");

        assert_ne!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_health_ping_is_public() {
        let response = test_router()
            .oneshot(
                Request::builder()
                    .uri("/health/ping")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("infallible");

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_openapi_json_is_served() {
        let response = test_router()
            .oneshot(
                Request::builder()
                    .uri("/openapi.json")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("infallible");

        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        assert_eq!(body["info"]["title"], serde_json::json!("ATTUNE API"));
    }

    #[tokio::test]
    async fn test_unknown_path_falls_through_to_404() {
        let response = test_router()
            .oneshot(
                Request::builder()
                    .uri("/experiments")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("infallible");

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_production_requires_cors_origins() {
        let empty = ApiConfig::default();
        assert!(validate_api_config_for_production(&empty).is_err());

        let mut configured = ApiConfig::default();
        configured.cors_origins = vec!["https://attune.heyoub.dev".to_string()];
        assert!(validate_api_config_for_production(&configured).is_ok());
    }

    #[test]
    fn test_cors_layer_builds_in_both_modes() {
        let dev = ApiConfig::default();
        let _ = build_cors_layer(&dev);

        let mut prod = ApiConfig::default();
        prod.cors_origins = vec!["https://attune.heyoub.dev".to_string()];
        prod.cors_allow_credentials = true;
        let _ = build_cors_layer(&prod);
    }

    #[tokio::test]
    async fn test_unauthenticated_router_builds() {
        let router = create_api_router_unauthenticated(test_state(), &ApiConfig::default())
            .expect("router should build");

        let response = router
            .oneshot(
                Request::builder()
                    .uri("/health/ping")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("infallible");

        assert_eq!(response.status(), StatusCode::OK);
    }
}
