//! Experiment-related API types

use attune_core::{CovariateRow, CovariateSpec, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::db::ExperimentRecord;

/// Fallback experiment name when the client does not supply one.
pub const DEFAULT_EXPERIMENT_NAME: &str = "Experiment name";
/// Fallback description when the client does not supply one.
pub const DEFAULT_EXPERIMENT_DESCRIPTION: &str =
    "A description of the experiment is typically a good idea";
/// Surrogate model constructed when the client does not pick one.
pub const DEFAULT_MODEL_TYPE: &str = "SingleTaskGP";
/// Acquisition function used when the client does not pick one.
pub const DEFAULT_ACQ_FUNC: &str = "ExpectedImprovement";

/// Request to create a new experiment.
///
/// Only the covariate specification is mandatory; everything else falls back
/// to a default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct CreateExperimentRequest {
    /// Name of the experiment
    pub name: Option<String>,
    /// Optional description
    pub description: Option<String>,
    /// Covariate specification: variable name to domain definition
    pub covars: CovariateSpec,
    /// Surrogate model type
    pub model_type: Option<String>,
    /// Acquisition function
    pub acq_func: Option<String>,
}

impl CreateExperimentRequest {
    /// Effective name after defaulting.
    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or(DEFAULT_EXPERIMENT_NAME)
    }

    /// Effective description after defaulting.
    pub fn description(&self) -> &str {
        self.description
            .as_deref()
            .unwrap_or(DEFAULT_EXPERIMENT_DESCRIPTION)
    }

    /// Effective surrogate model type after defaulting.
    pub fn model_type(&self) -> &str {
        self.model_type.as_deref().unwrap_or(DEFAULT_MODEL_TYPE)
    }

    /// Effective acquisition function after defaulting.
    pub fn acq_func(&self) -> &str {
        self.acq_func.as_deref().unwrap_or(DEFAULT_ACQ_FUNC)
    }
}

/// Experiment response with full details.
///
/// The internal primary key, the owner's foreign key, and the serialized
/// optimizer session never leave the database layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ExperimentResponse {
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub exp_uuid: Uuid,
    pub name: String,
    pub description: Option<String>,
    /// Covariate specification the experiment was created with
    #[cfg_attr(feature = "openapi", schema(value_type = Object))]
    pub covars: JsonValue,
    pub model_type: String,
    pub acq_func: String,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub time_created: Timestamp,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub time_updated: Timestamp,
    pub active: bool,
    /// Best observed response so far, as a response row
    #[cfg_attr(feature = "openapi", schema(value_type = Option<Object>))]
    pub best_response: Option<JsonValue>,
    /// Covariate row that produced the best response
    #[cfg_attr(feature = "openapi", schema(value_type = Option<Object>))]
    pub covars_best_response: Option<JsonValue>,
    /// Number of proposals handed out
    pub covars_sampled_iter: i32,
    /// Number of observations reported back
    pub response_sampled_iter: i32,
    /// Owner's public identifier; omitted in listings
    #[serde(skip_serializing_if = "Option::is_none")]
    #[cfg_attr(feature = "openapi", schema(value_type = Option<String>, format = "uuid"))]
    pub user_uuid: Option<Uuid>,
}

impl ExperimentResponse {
    /// Project a stored row onto the wire shape. `user_uuid` is only carried
    /// on single-experiment responses, never in listings.
    pub fn from_record(record: ExperimentRecord, user_uuid: Option<Uuid>) -> Self {
        Self {
            exp_uuid: record.exp_uuid,
            name: record.name,
            description: record.description,
            covars: record.covars,
            model_type: record.model_type,
            acq_func: record.acq_func,
            time_created: record.time_created,
            time_updated: record.time_updated,
            active: record.is_active,
            best_response: record.best_response,
            covars_best_response: record.covars_best_response,
            covars_sampled_iter: record.covars_sampled_iter,
            response_sampled_iter: record.response_sampled_iter,
            user_uuid,
        }
    }
}

/// Response to an ask: the next covariate point to evaluate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct AskResponse {
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub exp_uuid: Uuid,
    /// Timestamp committed with the proposal
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub time_updated: Timestamp,
    /// Proposed covariate values for the next iteration
    pub covars_next_exp: CovariateRow,
}

/// Request body for telling an observed outcome.
///
/// Both fields arrive as raw JSON and are validated against the experiment's
/// covariate specification before anything is mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct TellRequest {
    /// Covariate values the proposal was evaluated at
    #[cfg_attr(feature = "openapi", schema(value_type = Object))]
    pub covars: JsonValue,
    /// Observed response row, e.g. `{"Response": 1.23}`
    #[cfg_attr(feature = "openapi", schema(value_type = Object))]
    pub response: JsonValue,
}

/// Report returned after an observation has been absorbed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct TellReport {
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub exp_uuid: Uuid,
    /// Covariate row as accepted
    pub covars_tell: CovariateRow,
    /// Response row as accepted
    #[cfg_attr(feature = "openapi", schema(value_type = Object))]
    pub response_tell: JsonValue,
    /// Best observed response row so far
    #[cfg_attr(feature = "openapi", schema(value_type = Option<Object>))]
    pub best_response: Option<JsonValue>,
    /// Covariate row behind the best response
    #[cfg_attr(feature = "openapi", schema(value_type = Option<Object>))]
    pub covars_best_response: Option<JsonValue>,
    /// Proposals handed out after this tell
    pub covars_sampled_iter: i32,
    /// Observations absorbed after this tell
    pub response_sampled_iter: i32,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub time_updated: Timestamp,
}

#[cfg(test)]
mod tests {
    use super::*;
    use attune_core::VariableKind;
    use chrono::Utc;

    fn spec() -> CovariateSpec {
        let mut spec = CovariateSpec::new();
        spec.insert(
            "x".to_string(),
            VariableKind::Continuous {
                guess: 0.5,
                min: 0.0,
                max: 1.0,
            },
        );
        spec
    }

    fn record() -> ExperimentRecord {
        let now = Utc::now();
        ExperimentRecord {
            id: 1,
            exp_uuid: attune_core::new_entity_id(),
            name: "test".to_string(),
            description: None,
            covars: serde_json::to_value(spec()).unwrap(),
            model_type: DEFAULT_MODEL_TYPE.to_string(),
            acq_func: DEFAULT_ACQ_FUNC.to_string(),
            covars_sampled_iter: 0,
            response_sampled_iter: 0,
            best_response: None,
            covars_best_response: None,
            model_object_binary: Vec::new(),
            version: 1,
            is_active: true,
            user_id: 1,
            time_created: now,
            time_updated: now,
        }
    }

    #[test]
    fn test_create_request_defaults() {
        let request = CreateExperimentRequest {
            name: None,
            description: None,
            covars: spec(),
            model_type: None,
            acq_func: None,
        };

        assert_eq!(request.name(), DEFAULT_EXPERIMENT_NAME);
        assert_eq!(request.description(), DEFAULT_EXPERIMENT_DESCRIPTION);
        assert_eq!(request.model_type(), "SingleTaskGP");
        assert_eq!(request.acq_func(), "ExpectedImprovement");
    }

    #[test]
    fn test_create_request_overrides_win() {
        let request = CreateExperimentRequest {
            name: Some("tuning run".to_string()),
            description: Some("second pass".to_string()),
            covars: spec(),
            model_type: Some("MixedSingleTaskGP".to_string()),
            acq_func: Some("UpperConfidenceBound".to_string()),
        };

        assert_eq!(request.name(), "tuning run");
        assert_eq!(request.description(), "second pass");
        assert_eq!(request.model_type(), "MixedSingleTaskGP");
        assert_eq!(request.acq_func(), "UpperConfidenceBound");
    }

    #[test]
    fn test_covars_only_body_deserializes() {
        let body = r#"{"covars": {"x": {"vtype": "cont", "guess": 0.5, "min": 0.0, "max": 1.0}}}"#;
        let request: CreateExperimentRequest = serde_json::from_str(body).unwrap();
        assert!(request.name.is_none());
        assert_eq!(request.covars.len(), 1);
    }

    #[test]
    fn test_listing_projection_omits_owner() {
        let response = ExperimentResponse::from_record(record(), None);
        let wire = serde_json::to_value(&response).unwrap();
        assert!(wire.get("user_uuid").is_none());
        assert_eq!(wire["active"], serde_json::json!(true));
    }

    #[test]
    fn test_single_projection_carries_owner() {
        let owner = attune_core::new_entity_id();
        let response = ExperimentResponse::from_record(record(), Some(owner));
        let wire = serde_json::to_value(&response).unwrap();
        assert_eq!(wire["user_uuid"], serde_json::json!(owner.to_string()));
    }
}
