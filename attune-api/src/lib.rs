//! ATTUNE API - REST API Layer
//!
//! This crate exposes sequential optimization experiments over HTTP (Axum).
//! Clients create an experiment from a covariate specification, ask for the
//! next point to evaluate, and tell the observed response back; the injected
//! optimizer engine owns the surrogate session between calls.
//!
//! The API layer owns routing, JWT authentication, validation, and the
//! PostgreSQL persistence glue. Proposal generation lives in
//! `attune-optimizer`; the covariate domain model lives in `attune-core`.

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod macros;
pub mod middleware;
pub mod openapi;
pub mod routes;
pub mod seed;
pub mod state;
pub mod types;

// Re-export commonly used types
pub use auth::{
    generate_access_token, hash_password, validate_jwt_token, verify_password, AuthConfig,
    AuthContext, Claims, JwtClock, JwtSecret, SystemClock,
};
pub use config::ApiConfig;
pub use db::{DbClient, DbConfig};
pub use error::{ApiError, ApiResult, ErrorCode};
pub use middleware::{auth_middleware, AuthExtractor, AuthMiddlewareState, SubjectResolver};
pub use openapi::ApiDoc;
pub use routes::create_api_router;
pub use seed::seed_default_users;
pub use state::AppState;
pub use types::*;
