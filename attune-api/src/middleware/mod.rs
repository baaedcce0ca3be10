//! Middleware modules for the ATTUNE API
//!
//! Currently a single middleware: bearer-token authentication. It validates
//! the JWT, resolves the token subject to a user row, and injects an
//! [`AuthContext`](crate::auth::AuthContext) into request extensions for
//! handlers to pick up via [`AuthExtractor`].

mod auth;

pub use auth::{
    auth_middleware, AuthExtractor, AuthMiddlewareError, AuthMiddlewareState, SubjectResolver,
};
