//! ATTUNE Optimizer - Sequential Optimization Engine
//!
//! The capability boundary around surrogate-model optimization. The API
//! layer moves opaque sessions through the [`OptimizerEngine`] trait and
//! never looks inside them beyond the counters and best-response snapshot
//! the session exposes as plain data. This crate ships a built-in
//! sequential-search backend and a scripted engine for tests; a heavier
//! Gaussian-process backend would implement the same trait.

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Mutex;
use thiserror::Error;

use attune_core::{
    validate_covariate_spec, BestSnapshot, CovariateRow, CovariateSpec, CovariateValue,
    VariableKind,
};

// ============================================================================
// SESSION STATE
// ============================================================================

/// Full optimizer state for one experiment: observation history, proposal
/// history, iteration counters, and the best-observed snapshot.
///
/// The session is the unit that crosses the serialize/deserialize boundary
/// on every ask and tell. Counters and the best snapshot are plain data for
/// the caller to read; everything else belongs to the engine that built it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizerSession {
    /// Covariate specification the session was constructed from.
    pub spec: CovariateSpec,
    /// Surrogate model tag recorded at construction.
    pub model_type: String,
    /// Acquisition-function tag recorded at construction.
    pub acq_func: String,
    /// Every point proposed so far, in proposal order.
    pub proposals: Vec<CovariateRow>,
    /// Every observation told so far, in arrival order.
    pub observations: Vec<Observation>,
    /// Number of covariate observations reported.
    pub covars_sampled_iter: i32,
    /// Number of response observations reported.
    pub response_sampled_iter: i32,
    /// Best-observed response and its covariate point. None until the
    /// first tell.
    pub best: Option<BestSnapshot>,
    /// Seed the engine derives per-step randomness from.
    pub seed: u64,
}

impl OptimizerSession {
    /// Fresh session with empty history and zeroed counters.
    pub fn new(spec: CovariateSpec, model_type: &str, acq_func: &str, seed: u64) -> Self {
        Self {
            spec,
            model_type: model_type.to_string(),
            acq_func: acq_func.to_string(),
            proposals: Vec::new(),
            observations: Vec::new(),
            covars_sampled_iter: 0,
            response_sampled_iter: 0,
            best: None,
            seed,
        }
    }
}

/// One reported observation: the covariate point and its measured response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub covars: CovariateRow,
    pub response: f64,
}

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Optimizer engine errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum OptimizerError {
    #[error("invalid engine parameter {parameter}: {reason}")]
    InvalidParameter { parameter: String, reason: String },

    #[error("cannot construct a session from an invalid covariate specification: {reason}")]
    InvalidSpec { reason: String },

    #[error("session blob could not be encoded or decoded: {reason}")]
    Serialization { reason: String },

    #[error("engine failure during {operation}: {reason}")]
    EngineFailure { operation: String, reason: String },
}

// ============================================================================
// ENGINE TRAIT
// ============================================================================

/// Capability boundary around the optimization algorithm.
///
/// The API layer owns persistence and validation; engines own proposal
/// generation and posterior bookkeeping. `tell` assumes the observation has
/// already been validated against the session's specification.
/// Implementations are shared across request handlers, hence Send + Sync.
#[async_trait]
pub trait OptimizerEngine: Send + Sync {
    /// Engine name, surfaced in logs.
    fn name(&self) -> &str;

    /// Build a fresh session for a covariate specification. Fails if the
    /// specification is internally inconsistent.
    async fn construct(
        &self,
        spec: &CovariateSpec,
        model_type: &str,
        acq_func: &str,
    ) -> Result<OptimizerSession, OptimizerError>;

    /// Propose the next covariate point, recording it in the session's
    /// proposal history. Does not touch the iteration counters.
    async fn ask(&self, session: &mut OptimizerSession) -> Result<CovariateRow, OptimizerError>;

    /// Report an observed response: appends to history, increments both
    /// iteration counters, and updates the best-observed snapshot.
    async fn tell(
        &self,
        session: &mut OptimizerSession,
        covars: CovariateRow,
        response: f64,
    ) -> Result<(), OptimizerError>;

    /// Serialize a session for blob storage.
    fn serialize(&self, session: &OptimizerSession) -> Result<Vec<u8>, OptimizerError> {
        serde_json::to_vec(session).map_err(|e| OptimizerError::Serialization {
            reason: e.to_string(),
        })
    }

    /// Rebuild a session from its stored blob.
    fn deserialize(&self, blob: &[u8]) -> Result<OptimizerSession, OptimizerError> {
        serde_json::from_slice(blob).map_err(|e| OptimizerError::Serialization {
            reason: e.to_string(),
        })
    }
}

// ============================================================================
// SEQUENTIAL SEARCH ENGINE
// ============================================================================

/// Built-in backend: proposes the declared guesses first, then runs
/// epsilon-greedy refinement - an occasional uniform draw from the domain,
/// otherwise a bounded perturbation of the best observed point.
///
/// A derivative-free sequential search, not a Gaussian process; it keeps
/// the same session contract a heavier backend would, so swapping one in
/// is a construction-time decision.
#[derive(Debug, Clone)]
pub struct SequentialSearchEngine {
    epsilon: f64,
    perturbation: f64,
    base_seed: Option<u64>,
}

impl SequentialSearchEngine {
    /// Probability of a uniform exploration draw once observations exist.
    pub const DEFAULT_EPSILON: f64 = 0.2;
    /// Relative width of the local step around the best observed point.
    pub const DEFAULT_PERTURBATION: f64 = 0.1;

    pub fn new() -> Self {
        Self {
            epsilon: Self::DEFAULT_EPSILON,
            perturbation: Self::DEFAULT_PERTURBATION,
            base_seed: None,
        }
    }

    /// Engine whose sessions all start from a fixed seed. Proposal
    /// sequences become reproducible; used by tests.
    pub fn seeded(seed: u64) -> Self {
        Self {
            base_seed: Some(seed),
            ..Self::new()
        }
    }

    /// Override the search parameters. Both must lie in (0, 1].
    pub fn with_parameters(epsilon: f64, perturbation: f64) -> Result<Self, OptimizerError> {
        if !(epsilon > 0.0 && epsilon <= 1.0) {
            return Err(OptimizerError::InvalidParameter {
                parameter: "epsilon".to_string(),
                reason: format!("{} is outside (0, 1]", epsilon),
            });
        }
        if !(perturbation > 0.0 && perturbation <= 1.0) {
            return Err(OptimizerError::InvalidParameter {
                parameter: "perturbation".to_string(),
                reason: format!("{} is outside (0, 1]", perturbation),
            });
        }
        Ok(Self {
            epsilon,
            perturbation,
            base_seed: None,
        })
    }

    /// RNG for the session's next step, derived from the session seed and
    /// how far the search has progressed. Reloading a session and asking
    /// again draws the same point.
    fn step_rng(session: &OptimizerSession) -> StdRng {
        let step = (session.proposals.len() as u64) ^ ((session.observations.len() as u64) << 32);
        StdRng::seed_from_u64(session.seed ^ step.wrapping_mul(0x9E37_79B9_7F4A_7C15))
    }

    /// Uniform draw from one covariate's declared domain.
    fn sample_uniform(kind: &VariableKind, rng: &mut StdRng) -> CovariateValue {
        match kind {
            VariableKind::Integer { min, max, .. } => {
                CovariateValue::Int(rng.random_range(*min..=*max))
            }
            VariableKind::Continuous { min, max, .. } => {
                CovariateValue::Float(rng.random_range(*min..=*max))
            }
            VariableKind::Categorical { options, .. } => {
                CovariateValue::Text(options[rng.random_range(0..options.len())].clone())
            }
        }
    }

    /// Bounded step around the current best value, clamped to the domain.
    /// Falls back to a uniform draw when the best point lacks a usable
    /// value for this covariate.
    fn sample_near(
        &self,
        kind: &VariableKind,
        current: Option<&CovariateValue>,
        rng: &mut StdRng,
    ) -> CovariateValue {
        match (kind, current) {
            (VariableKind::Integer { min, max, .. }, Some(CovariateValue::Int(best))) => {
                let step = ((*max as f64 - *min as f64) * self.perturbation).max(1.0);
                let delta = rng.random_range(-step..=step);
                let value = (*best as f64 + delta).round() as i64;
                CovariateValue::Int(value.clamp(*min, *max))
            }
            (VariableKind::Continuous { min, max, .. }, Some(CovariateValue::Float(best))) => {
                let width = (max - min) * self.perturbation;
                let value = best + rng.random_range(-width..=width);
                CovariateValue::Float(value.clamp(*min, *max))
            }
            _ => Self::sample_uniform(kind, rng),
        }
    }

    /// The declared initial guesses as one proposal row.
    fn guess_row(spec: &CovariateSpec) -> CovariateRow {
        spec.iter()
            .map(|(name, kind)| (name.clone(), kind.guess_value()))
            .collect()
    }
}

impl Default for SequentialSearchEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OptimizerEngine for SequentialSearchEngine {
    fn name(&self) -> &str {
        "sequential-search"
    }

    async fn construct(
        &self,
        spec: &CovariateSpec,
        model_type: &str,
        acq_func: &str,
    ) -> Result<OptimizerSession, OptimizerError> {
        validate_covariate_spec(spec).map_err(|e| OptimizerError::InvalidSpec {
            reason: e.to_string(),
        })?;
        let seed = self
            .base_seed
            .unwrap_or_else(|| rand::rng().random::<u64>());
        Ok(OptimizerSession::new(spec.clone(), model_type, acq_func, seed))
    }

    async fn ask(&self, session: &mut OptimizerSession) -> Result<CovariateRow, OptimizerError> {
        let mut rng = Self::step_rng(session);

        let proposal = if session.proposals.is_empty() && session.observations.is_empty() {
            Self::guess_row(&session.spec)
        } else if let Some(best) = &session.best {
            let explore = rng.random::<f64>() < self.epsilon;
            session
                .spec
                .iter()
                .map(|(name, kind)| {
                    let value = if explore {
                        Self::sample_uniform(kind, &mut rng)
                    } else {
                        self.sample_near(kind, best.covars.get(name), &mut rng)
                    };
                    (name.clone(), value)
                })
                .collect()
        } else {
            // Proposals outstanding but nothing observed yet
            session
                .spec
                .iter()
                .map(|(name, kind)| (name.clone(), Self::sample_uniform(kind, &mut rng)))
                .collect()
        };

        session.proposals.push(proposal.clone());
        Ok(proposal)
    }

    async fn tell(
        &self,
        session: &mut OptimizerSession,
        covars: CovariateRow,
        response: f64,
    ) -> Result<(), OptimizerError> {
        session.observations.push(Observation {
            covars: covars.clone(),
            response,
        });
        session.covars_sampled_iter += 1;
        session.response_sampled_iter += 1;

        let improved = match &session.best {
            None => true,
            Some(best) => response > best.response,
        };
        if improved {
            session.best = Some(BestSnapshot { response, covars });
        }
        Ok(())
    }
}

// ============================================================================
// SCRIPTED ENGINE (TEST DOUBLE)
// ============================================================================

/// Engine that replays canned proposals and fails on command. Tell and
/// construct behave like the real backend, so orchestration tests observe
/// genuine counter and best-snapshot updates.
#[derive(Debug, Default)]
pub struct ScriptedEngine {
    script: Mutex<VecDeque<CovariateRow>>,
    failure: Mutex<Option<OptimizerError>>,
}

impl ScriptedEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a proposal for the next ask. When the script runs out, ask
    /// falls back to the declared guesses.
    pub fn push_proposal(&self, row: CovariateRow) {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(row);
        }
    }

    /// Make the next engine operation fail with the given error.
    pub fn fail_next(&self, error: OptimizerError) {
        if let Ok(mut failure) = self.failure.lock() {
            *failure = Some(error);
        }
    }

    fn take_failure(&self) -> Result<(), OptimizerError> {
        let mut failure = self.failure.lock().map_err(|_| poisoned("failure"))?;
        match failure.take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

fn poisoned(what: &str) -> OptimizerError {
    OptimizerError::EngineFailure {
        operation: "lock".to_string(),
        reason: format!("scripted engine {} mutex poisoned", what),
    }
}

#[async_trait]
impl OptimizerEngine for ScriptedEngine {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn construct(
        &self,
        spec: &CovariateSpec,
        model_type: &str,
        acq_func: &str,
    ) -> Result<OptimizerSession, OptimizerError> {
        self.take_failure()?;
        validate_covariate_spec(spec).map_err(|e| OptimizerError::InvalidSpec {
            reason: e.to_string(),
        })?;
        Ok(OptimizerSession::new(spec.clone(), model_type, acq_func, 0))
    }

    async fn ask(&self, session: &mut OptimizerSession) -> Result<CovariateRow, OptimizerError> {
        self.take_failure()?;
        let mut script = self.script.lock().map_err(|_| poisoned("script"))?;
        let proposal = script
            .pop_front()
            .unwrap_or_else(|| SequentialSearchEngine::guess_row(&session.spec));
        session.proposals.push(proposal.clone());
        Ok(proposal)
    }

    async fn tell(
        &self,
        session: &mut OptimizerSession,
        covars: CovariateRow,
        response: f64,
    ) -> Result<(), OptimizerError> {
        self.take_failure()?;
        session.observations.push(Observation {
            covars: covars.clone(),
            response,
        });
        session.covars_sampled_iter += 1;
        session.response_sampled_iter += 1;
        let improved = match &session.best {
            None => true,
            Some(best) => response > best.response,
        };
        if improved {
            session.best = Some(BestSnapshot { response, covars });
        }
        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================


// ============================================================================
// PROPERTY-BASED TESTS
// ============================================================================
