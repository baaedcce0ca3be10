//! Shared application state for Axum routers.

use std::sync::Arc;

use attune_optimizer::OptimizerEngine;

use crate::auth::AuthConfig;
use crate::db::DbClient;

/// Application-wide state shared across all routes.
#[derive(Clone)]
pub struct AppState {
    /// Database client backing users and experiments.
    pub db: DbClient,
    /// Optimizer engine that owns surrogate sessions. Injected so the HTTP
    /// layer never depends on a concrete proposal strategy.
    pub engine: Arc<dyn OptimizerEngine>,
    /// JWT signing configuration shared with the auth middleware.
    pub auth: Arc<AuthConfig>,
}

// Use macro to reduce boilerplate for FromRef implementations
crate::impl_from_ref!(DbClient, db);
crate::impl_from_ref!(Arc<dyn OptimizerEngine>, engine);
crate::impl_from_ref!(Arc<AuthConfig>, auth);
