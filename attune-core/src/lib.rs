//! ATTUNE Core - Domain Types
//!
//! Pure data structures shared by every other crate: covariate
//! specifications, observation payloads, best-response snapshots, and the
//! domain error types. No I/O here - the only behavior is the validation
//! the types themselves carry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use thiserror::Error;
use uuid::Uuid;

// ============================================================================
// IDENTITY TYPES
// ============================================================================

/// Entity identifier using UUIDv7 for timestamp-sortable IDs.
/// Experiments and users expose these publicly; internal auto-increment
/// keys never leave the storage layer.
pub type EntityId = Uuid;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Generate a new UUIDv7 EntityId (timestamp-sortable).
pub fn new_entity_id() -> EntityId {
    Uuid::now_v7()
}

// ============================================================================
// COVARIATE SPECIFICATION
// ============================================================================

/// The designated response column name in tell payloads and best-response
/// snapshots.
pub const RESPONSE_COLUMN: &str = "Response";

/// Declared kind and domain of a single covariate.
///
/// Serialized with a `vtype` tag taking the wire values `int`, `cont` and
/// `cat`, e.g. `{"vtype": "cont", "guess": 0.5, "min": 0.0, "max": 1.0}`.
/// Which fields are mandatory follows from the tag, so a categorical entry
/// without `options` (or an integer entry with a string guess) fails at
/// parse time rather than in a runtime branch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(tag = "vtype")]
pub enum VariableKind {
    /// Integer-valued covariate with inclusive bounds.
    #[serde(rename = "int")]
    Integer { guess: i64, min: i64, max: i64 },
    /// Continuous covariate with inclusive bounds.
    #[serde(rename = "cont")]
    Continuous { guess: f64, min: f64, max: f64 },
    /// Categorical covariate drawing from a fixed set of string options.
    #[serde(rename = "cat")]
    Categorical { guess: String, options: Vec<String> },
}

impl VariableKind {
    /// Wire name of the kind, matching the serde tag.
    pub fn type_name(&self) -> &'static str {
        match self {
            VariableKind::Integer { .. } => "int",
            VariableKind::Continuous { .. } => "cont",
            VariableKind::Categorical { .. } => "cat",
        }
    }

    /// Native value type this kind expects in observations.
    pub fn expected_value_type(&self) -> &'static str {
        match self {
            VariableKind::Integer { .. } => "int",
            VariableKind::Continuous { .. } => "float",
            VariableKind::Categorical { .. } => "str",
        }
    }

    /// Check internal consistency: bounds ordered, guess inside the domain,
    /// options non-empty and containing the guess.
    pub fn validate(&self, name: &str) -> Result<(), SpecError> {
        match self {
            VariableKind::Integer { guess, min, max } => {
                if min > max {
                    return Err(SpecError::InvertedBounds {
                        name: name.to_string(),
                        min: min.to_string(),
                        max: max.to_string(),
                    });
                }
                if guess < min || guess > max {
                    return Err(SpecError::GuessOutOfBounds {
                        name: name.to_string(),
                        guess: guess.to_string(),
                        min: min.to_string(),
                        max: max.to_string(),
                    });
                }
                Ok(())
            }
            VariableKind::Continuous { guess, min, max } => {
                if min > max {
                    return Err(SpecError::InvertedBounds {
                        name: name.to_string(),
                        min: min.to_string(),
                        max: max.to_string(),
                    });
                }
                if guess < min || guess > max {
                    return Err(SpecError::GuessOutOfBounds {
                        name: name.to_string(),
                        guess: guess.to_string(),
                        min: min.to_string(),
                        max: max.to_string(),
                    });
                }
                Ok(())
            }
            VariableKind::Categorical { guess, options } => {
                if options.is_empty() {
                    return Err(SpecError::NoOptions {
                        name: name.to_string(),
                    });
                }
                if !options.contains(guess) {
                    return Err(SpecError::GuessNotAnOption {
                        name: name.to_string(),
                        guess: guess.clone(),
                    });
                }
                Ok(())
            }
        }
    }

    /// Check that a concrete value has the native type this kind expects.
    pub fn accepts_type(&self, value: &CovariateValue) -> bool {
        matches!(
            (self, value),
            (VariableKind::Integer { .. }, CovariateValue::Int(_))
                | (VariableKind::Continuous { .. }, CovariateValue::Float(_))
                | (VariableKind::Categorical { .. }, CovariateValue::Text(_))
        )
    }

    /// Check that a type-correct value lies within the declared domain.
    pub fn contains(&self, value: &CovariateValue) -> bool {
        match (self, value) {
            (VariableKind::Integer { min, max, .. }, CovariateValue::Int(v)) => {
                v >= min && v <= max
            }
            (VariableKind::Continuous { min, max, .. }, CovariateValue::Float(v)) => {
                v >= min && v <= max
            }
            (VariableKind::Categorical { options, .. }, CovariateValue::Text(v)) => {
                options.contains(v)
            }
            _ => false,
        }
    }

    /// The declared initial guess as a concrete value.
    pub fn guess_value(&self) -> CovariateValue {
        match self {
            VariableKind::Integer { guess, .. } => CovariateValue::Int(*guess),
            VariableKind::Continuous { guess, .. } => CovariateValue::Float(*guess),
            VariableKind::Categorical { guess, .. } => CovariateValue::Text(guess.clone()),
        }
    }
}

/// Full covariate specification for one experiment: covariate name to
/// declared kind. A BTreeMap keeps column order deterministic across
/// serialize/deserialize, so projections of the same row are byte-identical.
pub type CovariateSpec = BTreeMap<String, VariableKind>;

/// Validate a whole specification: at least one covariate, every entry
/// internally consistent. Returns the first violation found.
pub fn validate_covariate_spec(spec: &CovariateSpec) -> Result<(), SpecError> {
    if spec.is_empty() {
        return Err(SpecError::Empty);
    }
    for (name, kind) in spec {
        kind.validate(name)?;
    }
    Ok(())
}

// ============================================================================
// OBSERVATIONS
// ============================================================================

/// One observed or proposed covariate value. Serializes as a bare JSON
/// scalar; deserialization preserves the int/float distinction because
/// serde_json keeps number syntax (`1` is an int, `1.0` is a float).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(untagged)]
pub enum CovariateValue {
    Int(i64),
    Float(f64),
    Text(String),
}

impl CovariateValue {
    /// Native type name, as reported in validation errors.
    pub fn type_name(&self) -> &'static str {
        match self {
            CovariateValue::Int(_) => "int",
            CovariateValue::Float(_) => "float",
            CovariateValue::Text(_) => "str",
        }
    }
}

impl std::fmt::Display for CovariateValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CovariateValue::Int(v) => write!(f, "{}", v),
            CovariateValue::Float(v) => write!(f, "{}", v),
            CovariateValue::Text(v) => write!(f, "{}", v),
        }
    }
}

/// One wire-encoded tabular row: covariate name to observed value.
pub type CovariateRow = BTreeMap<String, CovariateValue>;

/// Best-observed response together with the covariate point that produced
/// it. Absent until the first observation has been told.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct BestSnapshot {
    pub response: f64,
    pub covars: CovariateRow,
}

/// Parse and validate a covariate observation payload against a
/// specification. Checks run in contract order - column names first, then
/// native types, then domain membership - and nothing downstream is touched
/// on failure.
pub fn parse_covariate_row(
    spec: &CovariateSpec,
    payload: &JsonValue,
) -> Result<CovariateRow, ObservationError> {
    let object = payload.as_object().ok_or(ObservationError::CovarsShape)?;

    for name in spec.keys() {
        if !object.contains_key(name) {
            return Err(ObservationError::MissingColumn { name: name.clone() });
        }
    }
    for name in object.keys() {
        if !spec.contains_key(name) {
            return Err(ObservationError::UnknownColumn { name: name.clone() });
        }
    }

    let mut row = CovariateRow::new();
    for (name, kind) in spec {
        let raw = &object[name];
        let value = covariate_value_from_json(raw).ok_or_else(|| {
            ObservationError::TypeMismatch {
                name: name.clone(),
                expected: kind.expected_value_type(),
                got: json_type_name(raw).to_string(),
            }
        })?;
        if !kind.accepts_type(&value) {
            return Err(ObservationError::TypeMismatch {
                name: name.clone(),
                expected: kind.expected_value_type(),
                got: value.type_name().to_string(),
            });
        }
        row.insert(name.clone(), value);
    }

    for (name, kind) in spec {
        let value = &row[name];
        if !kind.contains(value) {
            return Err(ObservationError::OutOfDomain {
                name: name.clone(),
                value: value.to_string(),
            });
        }
    }

    Ok(row)
}

/// Parse and validate a response observation payload: exactly one column,
/// named [`RESPONSE_COLUMN`], holding a float.
pub fn parse_response_row(payload: &JsonValue) -> Result<f64, ObservationError> {
    let object = payload.as_object().ok_or(ObservationError::ResponseShape)?;
    if object.len() != 1 || !object.contains_key(RESPONSE_COLUMN) {
        return Err(ObservationError::ResponseShape);
    }
    let raw = &object[RESPONSE_COLUMN];
    match raw.as_f64() {
        Some(v) if raw.is_f64() => Ok(v),
        _ => Err(ObservationError::ResponseType {
            got: json_type_name(raw).to_string(),
        }),
    }
}

/// Map a JSON scalar onto a covariate value, keeping the int/float syntax
/// distinction. Non-scalar values map to None.
fn covariate_value_from_json(value: &JsonValue) -> Option<CovariateValue> {
    if let Some(v) = value.as_i64() {
        return Some(CovariateValue::Int(v));
    }
    if value.is_f64() {
        return value.as_f64().map(CovariateValue::Float);
    }
    value.as_str().map(|s| CovariateValue::Text(s.to_string()))
}

/// JSON type name for error messages, distinguishing int from float.
fn json_type_name(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "bool",
        JsonValue::Number(n) if n.is_f64() => "float",
        JsonValue::Number(_) => "int",
        JsonValue::String(_) => "str",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Covariate specification validation errors (experiment creation).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SpecError {
    #[error("covariate specification must declare at least one covariate")]
    Empty,

    #[error("covariate '{name}': bounds are inverted (min {min} > max {max})")]
    InvertedBounds { name: String, min: String, max: String },

    #[error("covariate '{name}': guess {guess} lies outside [{min}, {max}]")]
    GuessOutOfBounds {
        name: String,
        guess: String,
        min: String,
        max: String,
    },

    #[error("covariate '{name}': options must not be empty")]
    NoOptions { name: String },

    #[error("covariate '{name}': guess '{guess}' is not one of the declared options")]
    GuessNotAnOption { name: String, guess: String },
}

/// Tell-payload validation errors. The covariates/response split matters to
/// callers, so [`ObservationError::concerns_response`] reports which payload
/// a given error belongs to.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ObservationError {
    #[error("covariate observation must be a JSON object with one value per covariate")]
    CovarsShape,

    #[error("covariate observation is missing declared column '{name}'")]
    MissingColumn { name: String },

    #[error("covariate observation contains unknown column '{name}'")]
    UnknownColumn { name: String },

    #[error("covariate '{name}' expects {expected}, got {got}")]
    TypeMismatch {
        name: String,
        expected: &'static str,
        got: String,
    },

    #[error("covariate '{name}' value {value} is outside its declared domain")]
    OutOfDomain { name: String, value: String },

    #[error("response observation must contain exactly the 'Response' column")]
    ResponseShape,

    #[error("response value must be a float, got {got}")]
    ResponseType { got: String },
}

impl ObservationError {
    /// True when the error belongs to the response payload rather than the
    /// covariate payload.
    pub fn concerns_response(&self) -> bool {
        matches!(
            self,
            ObservationError::ResponseShape | ObservationError::ResponseType { .. }
        )
    }
}

// ============================================================================
// TESTS
// ============================================================================


// ============================================================================
// PROPERTY-BASED TESTS
// ============================================================================

#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Any continuous spec with ordered bounds and an in-range guess
        /// validates.
        #[test]
        fn prop_valid_continuous_spec_accepted(
            min in -1000.0f64..0.0,
            max in 0.0f64..1000.0,
            t in 0.0f64..=1.0,
        ) {
            let guess = (min + t * (max - min)).clamp(min, max);
            let mut spec = CovariateSpec::new();
            spec.insert("x".to_string(), VariableKind::Continuous { guess, min, max });
            prop_assert!(validate_covariate_spec(&spec).is_ok());
        }

        /// Any integer guess outside its bounds is rejected.
        #[test]
        fn prop_out_of_bounds_guess_rejected(
            guess in 11i64..10_000,
        ) {
            let mut spec = CovariateSpec::new();
            spec.insert("n".to_string(), VariableKind::Integer { guess, min: 0, max: 10 });
            prop_assert!(matches!(
                validate_covariate_spec(&spec),
                Err(SpecError::GuessOutOfBounds { .. })
            ));
        }

        /// In-domain float observations parse back to the submitted value.
        #[test]
        fn prop_in_domain_observation_roundtrips(t in 0.0f64..=1.0) {
            let mut spec = CovariateSpec::new();
            spec.insert("x".to_string(), VariableKind::Continuous {
                guess: 0.5, min: 0.0, max: 1.0,
            });
            // json! keeps f64 inputs as float-syntax numbers, even at 0.0
            let row = parse_covariate_row(&spec, &json!({"x": t}));
            prop_assert!(row.is_ok());
            prop_assert_eq!(row.unwrap()["x"].clone(), CovariateValue::Float(t));
        }

        /// Out-of-domain float observations are always rejected.
        #[test]
        fn prop_out_of_domain_observation_rejected(t in 1.0001f64..1_000.0) {
            let mut spec = CovariateSpec::new();
            spec.insert("x".to_string(), VariableKind::Continuous {
                guess: 0.5, min: 0.0, max: 1.0,
            });
            prop_assert!(matches!(
                parse_covariate_row(&spec, &json!({"x": t})),
                Err(ObservationError::OutOfDomain { .. })
            ));
        }

        /// Every finite float is a valid response value.
        #[test]
        fn prop_any_finite_float_is_valid_response(v in -1e12f64..1e12) {
            let parsed = parse_response_row(&json!({"Response": v}));
            prop_assert!(parsed.is_ok());
        }
    }
}
