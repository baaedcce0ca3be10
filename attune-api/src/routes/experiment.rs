//! Experiment Lifecycle Endpoints
//!
//! The sequential loop lives here: create an experiment from a covariate
//! specification, ask for the next point to evaluate, tell the observed
//! response back. Handlers own validation and persistence; proposal
//! generation belongs to the injected optimizer engine.
//!
//! Every ask and tell follows the same shape: load the stored session,
//! let the engine mutate it, persist the session under the version read at
//! load time. A lost version race surfaces as 409 and mutates nothing.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use uuid::Uuid;

use attune_core::{
    parse_covariate_row, parse_response_row, validate_covariate_spec, BestSnapshot,
    RESPONSE_COLUMN,
};
use attune_optimizer::OptimizerEngine;

use crate::auth::AuthContext;
use crate::db::{DbClient, ExperimentRecord, NewExperiment, ObservationUpdate};
use crate::error::{ApiError, ApiResult};
use crate::middleware::AuthExtractor;
use crate::state::AppState;
use crate::types::{
    AskResponse, CreateExperimentRequest, ExperimentResponse, TellReport, TellRequest,
};

// ============================================================================
// HELPERS
// ============================================================================

/// Experiments are only visible to their owner.
fn ensure_owner(record: &ExperimentRecord, auth: &AuthContext) -> ApiResult<()> {
    if record.user_id != auth.user_id {
        return Err(ApiError::forbidden("Experiment belongs to another user"));
    }
    Ok(())
}

/// Wire form of the best-observed snapshot: the response row and the
/// covariate row stored as separate JSON columns.
fn best_snapshot_wire(best: &BestSnapshot) -> ApiResult<(JsonValue, JsonValue)> {
    let response = serde_json::json!({ RESPONSE_COLUMN: best.response });
    let covars = serde_json::to_value(&best.covars)?;
    Ok((response, covars))
}

// ============================================================================
// ROUTE HANDLERS
// ============================================================================

/// POST /experiment/new - Create an experiment
#[utoipa::path(
    post,
    path = "/experiment/new",
    tag = "Experiments",
    request_body = CreateExperimentRequest,
    responses(
        (status = 201, description = "Experiment created", body = ExperimentResponse),
        (status = 401, description = "Unauthorized", body = ApiError),
        (status = 422, description = "Invalid covariate specification", body = ApiError),
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn create_experiment(
    State(db): State<DbClient>,
    State(engine): State<Arc<dyn OptimizerEngine>>,
    AuthExtractor(auth): AuthExtractor,
    Json(req): Json<CreateExperimentRequest>,
) -> ApiResult<impl IntoResponse> {
    validate_covariate_spec(&req.covars)?;

    let session = engine
        .construct(&req.covars, req.model_type(), req.acq_func())
        .await?;
    let session_blob = engine.serialize(&session)?;

    let covars_json = serde_json::to_value(&req.covars)?;
    let record = db
        .experiment_insert(&NewExperiment {
            exp_uuid: attune_core::new_entity_id(),
            name: req.name(),
            description: Some(req.description()),
            covars: &covars_json,
            model_type: req.model_type(),
            acq_func: req.acq_func(),
            covars_sampled_iter: session.covars_sampled_iter,
            response_sampled_iter: session.response_sampled_iter,
            session_blob: &session_blob,
            user_id: auth.user_id,
        })
        .await?;

    tracing::info!(
        exp_uuid = %record.exp_uuid,
        user = %auth.email,
        engine = engine.name(),
        "Experiment created"
    );

    Ok((
        StatusCode::CREATED,
        Json(ExperimentResponse::from_record(record, Some(auth.user_uuid))),
    ))
}

/// GET /experiment/ask/{exp_uuid} - Propose the next covariate point
///
/// Asking does not advance the iteration counters; only a tell does.
#[utoipa::path(
    get,
    path = "/experiment/ask/{exp_uuid}",
    tag = "Experiments",
    params(
        ("exp_uuid" = String, Path, description = "Experiment UUID"),
    ),
    responses(
        (status = 200, description = "Next point to evaluate", body = AskResponse),
        (status = 401, description = "Unauthorized", body = ApiError),
        (status = 403, description = "Experiment belongs to another user", body = ApiError),
        (status = 404, description = "Experiment not found", body = ApiError),
        (status = 409, description = "Concurrent modification", body = ApiError),
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn ask_experiment(
    State(db): State<DbClient>,
    State(engine): State<Arc<dyn OptimizerEngine>>,
    AuthExtractor(auth): AuthExtractor,
    Path(exp_uuid): Path<String>,
) -> ApiResult<Json<AskResponse>> {
    let exp_uuid = Uuid::parse_str(&exp_uuid)?;

    let record = db
        .experiment_get_by_uuid(exp_uuid)
        .await?
        .ok_or_else(|| ApiError::experiment_not_found(exp_uuid))?;
    ensure_owner(&record, &auth)?;

    let mut session = engine.deserialize(&record.model_object_binary)?;
    let proposal = engine.ask(&mut session).await?;
    let session_blob = engine.serialize(&session)?;

    let updated = db
        .experiment_store_session(exp_uuid, record.version, &session_blob)
        .await?
        .ok_or_else(|| ApiError::concurrent_modification("Experiment", exp_uuid))?;

    tracing::info!(exp_uuid = %exp_uuid, engine = engine.name(), "Proposal issued");

    Ok(Json(AskResponse {
        exp_uuid: updated.exp_uuid,
        time_updated: updated.time_updated,
        covars_next_exp: proposal,
    }))
}

/// POST /experiment/tell/{exp_uuid} - Report an observed response
///
/// The covariate row is validated against the experiment's specification,
/// then the response row; nothing is mutated until both pass.
#[utoipa::path(
    post,
    path = "/experiment/tell/{exp_uuid}",
    tag = "Experiments",
    params(
        ("exp_uuid" = String, Path, description = "Experiment UUID"),
    ),
    request_body = TellRequest,
    responses(
        (status = 202, description = "Observation absorbed", body = TellReport),
        (status = 401, description = "Unauthorized", body = ApiError),
        (status = 403, description = "Experiment belongs to another user", body = ApiError),
        (status = 404, description = "Experiment not found", body = ApiError),
        (status = 409, description = "Concurrent modification", body = ApiError),
        (status = 422, description = "Observation does not fit the specification", body = ApiError),
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn tell_experiment(
    State(db): State<DbClient>,
    State(engine): State<Arc<dyn OptimizerEngine>>,
    AuthExtractor(auth): AuthExtractor,
    Path(exp_uuid): Path<String>,
    Json(req): Json<TellRequest>,
) -> ApiResult<impl IntoResponse> {
    let exp_uuid = Uuid::parse_str(&exp_uuid)?;

    let record = db
        .experiment_get_by_uuid(exp_uuid)
        .await?
        .ok_or_else(|| ApiError::experiment_not_found(exp_uuid))?;
    ensure_owner(&record, &auth)?;

    let mut session = engine.deserialize(&record.model_object_binary)?;

    // Covariates are checked before the response row.
    let covars = parse_covariate_row(&session.spec, &req.covars)?;
    let response = parse_response_row(&req.response)?;

    engine.tell(&mut session, covars.clone(), response).await?;
    let session_blob = engine.serialize(&session)?;

    let best_wire = session
        .best
        .as_ref()
        .map(best_snapshot_wire)
        .transpose()?;
    let (best_response, covars_best_response) = match &best_wire {
        Some((response, covars)) => (Some(response), Some(covars)),
        None => (None, None),
    };

    let updated = db
        .experiment_store_observation(
            exp_uuid,
            record.version,
            &ObservationUpdate {
                session_blob: &session_blob,
                covars_sampled_iter: session.covars_sampled_iter,
                response_sampled_iter: session.response_sampled_iter,
                best_response,
                covars_best_response,
            },
        )
        .await?
        .ok_or_else(|| ApiError::concurrent_modification("Experiment", exp_uuid))?;

    tracing::info!(
        exp_uuid = %exp_uuid,
        response = response,
        iteration = updated.response_sampled_iter,
        "Observation absorbed"
    );

    let report = TellReport {
        exp_uuid: updated.exp_uuid,
        covars_tell: covars,
        response_tell: serde_json::json!({ RESPONSE_COLUMN: response }),
        best_response: updated.best_response,
        covars_best_response: updated.covars_best_response,
        covars_sampled_iter: updated.covars_sampled_iter,
        response_sampled_iter: updated.response_sampled_iter,
        time_updated: updated.time_updated,
    };

    Ok((StatusCode::ACCEPTED, Json(report)))
}

/// GET /experiment/all - List the caller's experiments
#[utoipa::path(
    get,
    path = "/experiment/all",
    tag = "Experiments",
    responses(
        (status = 200, description = "Experiments owned by the caller", body = Vec<ExperimentResponse>),
        (status = 401, description = "Unauthorized", body = ApiError),
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn list_experiments(
    State(db): State<DbClient>,
    AuthExtractor(auth): AuthExtractor,
) -> ApiResult<Json<Vec<ExperimentResponse>>> {
    let records = db.experiment_list_by_owner(auth.user_id).await?;
    let experiments = records
        .into_iter()
        .map(|record| ExperimentResponse::from_record(record, None))
        .collect();

    Ok(Json(experiments))
}

// ============================================================================
// ROUTER
// ============================================================================

/// All experiment routes sit behind the auth middleware.
pub fn protected_router() -> Router<AppState> {
    Router::new()
        .route("/experiment/new", post(create_experiment))
        .route("/experiment/ask/:exp_uuid", get(ask_experiment))
        .route("/experiment/tell/:exp_uuid", post(tell_experiment))
        .route("/experiment/all", get(list_experiments))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use attune_core::{CovariateValue, VariableKind};
    use chrono::Utc;
    use std::collections::BTreeMap;

    fn record_owned_by(user_id: i32) -> ExperimentRecord {
        let now = Utc::now();
        ExperimentRecord {
            id: 1,
            exp_uuid: attune_core::new_entity_id(),
            name: "test".to_string(),
            description: None,
            covars: serde_json::json!({}),
            model_type: "SingleTaskGP".to_string(),
            acq_func: "ExpectedImprovement".to_string(),
            covars_sampled_iter: 0,
            response_sampled_iter: 0,
            best_response: None,
            covars_best_response: None,
            model_object_binary: Vec::new(),
            version: 1,
            is_active: true,
            user_id,
            time_created: now,
            time_updated: now,
        }
    }

    fn auth_for(user_id: i32) -> AuthContext {
        AuthContext::new(
            user_id,
            attune_core::new_entity_id(),
            "test@test.com".to_string(),
        )
    }

    #[test]
    fn test_owner_passes_ownership_check() {
        assert!(ensure_owner(&record_owned_by(1), &auth_for(1)).is_ok());
    }

    #[test]
    fn test_foreign_experiment_is_forbidden() {
        let err = ensure_owner(&record_owned_by(1), &auth_for(2))
            .expect_err("foreign experiment should be rejected");
        assert_eq!(err.code, ErrorCode::Forbidden);
        assert_eq!(err.status_code(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn test_best_snapshot_wire_shape() {
        let mut covars = BTreeMap::new();
        covars.insert("x".to_string(), CovariateValue::Float(0.7));
        let best = BestSnapshot {
            response: 1.23,
            covars,
        };

        let (response, covars) = best_snapshot_wire(&best).unwrap();
        assert_eq!(response, serde_json::json!({ "Response": 1.23 }));
        assert_eq!(covars, serde_json::json!({ "x": 0.7 }));
    }

    #[test]
    fn test_spec_survives_json_round_trip() {
        let mut spec = BTreeMap::new();
        spec.insert(
            "temp".to_string(),
            VariableKind::Integer {
                guess: 40,
                min: 0,
                max: 100,
            },
        );

        let wire = serde_json::to_value(&spec).unwrap();
        assert_eq!(wire["temp"]["vtype"], serde_json::json!("int"));
    }
}
