//! Database Connection Pool Module
//!
//! This module provides PostgreSQL connection pooling using deadpool-postgres
//! plus the SQL operations for the two persisted tables (`users` and
//! `experiments`, see `schema.sql`).
//!
//! Optimizer sessions are stored as opaque BYTEA blobs; every experiment
//! mutation is predicated on the `version` column read at load time, so a
//! concurrent writer surfaces as zero updated rows rather than a lost update.

use crate::auth::AuthContext;
use crate::error::{ApiError, ApiResult};
use crate::middleware::SubjectResolver;
use chrono::{DateTime, Utc};
use deadpool_postgres::{Config, ManagerConfig, Pool, PoolConfig, RecyclingMethod, Runtime};
use serde_json::Value as JsonValue;
use std::time::Duration;
use tokio_postgres::error::SqlState;
use tokio_postgres::{NoTls, Row};
use uuid::Uuid;

/// Hard cap on the serialized optimizer session blob, matching the BYTEA
/// column's contract. Sessions beyond this are a server-side failure.
pub const MAX_SESSION_BLOB_BYTES: usize = 1_000_000;

// ============================================================================
// CONNECTION POOL CONFIGURATION
// ============================================================================

/// Database connection pool configuration.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// PostgreSQL host
    pub host: String,
    /// PostgreSQL port
    pub port: u16,
    /// Database name
    pub dbname: String,
    /// Database user
    pub user: String,
    /// Database password
    pub password: String,
    /// Maximum pool size
    pub max_size: usize,
    /// Connection wait timeout
    pub timeout: Duration,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            dbname: "attune".to_string(),
            user: "postgres".to_string(),
            password: "".to_string(),
            max_size: 16,
            timeout: Duration::from_secs(30),
        }
    }
}

impl DbConfig {
    /// Create a new database configuration from environment variables.
    ///
    /// # Environment Variables
    /// - `ATTUNE_DB_HOST` / `ATTUNE_DB_PORT` / `ATTUNE_DB_NAME`
    /// - `ATTUNE_DB_USER` / `ATTUNE_DB_PASSWORD`
    /// - `ATTUNE_DB_MAX_CONNECTIONS`: maximum pool size (default: 16)
    /// - `ATTUNE_DB_CONNECT_TIMEOUT_SECS`: connection wait bound (default: 30)
    pub fn from_env() -> Self {
        Self {
            host: std::env::var("ATTUNE_DB_HOST").unwrap_or_else(|_| "localhost".to_string()),
            port: std::env::var("ATTUNE_DB_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(5432),
            dbname: std::env::var("ATTUNE_DB_NAME").unwrap_or_else(|_| "attune".to_string()),
            user: std::env::var("ATTUNE_DB_USER").unwrap_or_else(|_| "postgres".to_string()),
            password: std::env::var("ATTUNE_DB_PASSWORD").unwrap_or_default(),
            max_size: std::env::var("ATTUNE_DB_MAX_CONNECTIONS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(16),
            timeout: Duration::from_secs(
                std::env::var("ATTUNE_DB_CONNECT_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(30),
            ),
        }
    }

    /// Create a connection pool from this configuration.
    pub fn create_pool(&self) -> ApiResult<Pool> {
        let mut cfg = Config::new();
        cfg.host = Some(self.host.clone());
        cfg.port = Some(self.port);
        cfg.dbname = Some(self.dbname.clone());
        cfg.user = Some(self.user.clone());
        cfg.password = Some(self.password.clone());

        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });

        let mut pool_config = PoolConfig::new(self.max_size);
        pool_config.timeouts.wait = Some(self.timeout);
        cfg.pool = Some(pool_config);

        let pool = cfg
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| ApiError::database_error(format!("Failed to create pool: {}", e)))?;

        Ok(pool)
    }
}

// ============================================================================
// STORED ROWS
// ============================================================================

/// One row of the `users` table.
#[derive(Debug, Clone, PartialEq)]
pub struct UserRecord {
    pub id: i32,
    pub user_uuid: Uuid,
    pub email: String,
    pub hashed_password: String,
    pub is_active: bool,
    pub time_created: DateTime<Utc>,
    pub time_updated: DateTime<Utc>,
}

/// One row of the `experiments` table.
#[derive(Debug, Clone, PartialEq)]
pub struct ExperimentRecord {
    pub id: i64,
    pub exp_uuid: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub covars: JsonValue,
    pub model_type: String,
    pub acq_func: String,
    pub covars_sampled_iter: i32,
    pub response_sampled_iter: i32,
    pub best_response: Option<JsonValue>,
    pub covars_best_response: Option<JsonValue>,
    pub model_object_binary: Vec<u8>,
    pub version: i64,
    pub is_active: bool,
    pub user_id: i32,
    pub time_created: DateTime<Utc>,
    pub time_updated: DateTime<Utc>,
}

/// Parameters for inserting a freshly constructed experiment.
pub struct NewExperiment<'a> {
    pub exp_uuid: Uuid,
    pub name: &'a str,
    pub description: Option<&'a str>,
    pub covars: &'a JsonValue,
    pub model_type: &'a str,
    pub acq_func: &'a str,
    pub covars_sampled_iter: i32,
    pub response_sampled_iter: i32,
    pub session_blob: &'a [u8],
    pub user_id: i32,
}

/// Parameters for persisting a completed tell mutation.
pub struct ObservationUpdate<'a> {
    pub session_blob: &'a [u8],
    pub covars_sampled_iter: i32,
    pub response_sampled_iter: i32,
    pub best_response: Option<&'a JsonValue>,
    pub covars_best_response: Option<&'a JsonValue>,
}

const USER_COLUMNS: &str =
    "id, user_uuid, email, hashed_password, is_active, time_created, time_updated";

const EXPERIMENT_COLUMNS: &str = "id, exp_uuid, name, description, covars, model_type, acq_func, \
     covars_sampled_iter, response_sampled_iter, best_response, covars_best_response, \
     model_object_binary, version, is_active, user_id, time_created, time_updated";

fn user_from_row(row: &Row) -> ApiResult<UserRecord> {
    Ok(UserRecord {
        id: row.try_get("id")?,
        user_uuid: row.try_get("user_uuid")?,
        email: row.try_get("email")?,
        hashed_password: row.try_get("hashed_password")?,
        is_active: row.try_get("is_active")?,
        time_created: row.try_get("time_created")?,
        time_updated: row.try_get("time_updated")?,
    })
}

fn experiment_from_row(row: &Row) -> ApiResult<ExperimentRecord> {
    Ok(ExperimentRecord {
        id: row.try_get("id")?,
        exp_uuid: row.try_get("exp_uuid")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        covars: row.try_get("covars")?,
        model_type: row.try_get("model_type")?,
        acq_func: row.try_get("acq_func")?,
        covars_sampled_iter: row.try_get("covars_sampled_iter")?,
        response_sampled_iter: row.try_get("response_sampled_iter")?,
        best_response: row.try_get("best_response")?,
        covars_best_response: row.try_get("covars_best_response")?,
        model_object_binary: row.try_get("model_object_binary")?,
        version: row.try_get("version")?,
        is_active: row.try_get("is_active")?,
        user_id: row.try_get("user_id")?,
        time_created: row.try_get("time_created")?,
        time_updated: row.try_get("time_updated")?,
    })
}

/// Reject session blobs that would not fit the storage column.
fn ensure_blob_fits(len: usize) -> ApiResult<()> {
    if len > MAX_SESSION_BLOB_BYTES {
        tracing::error!(
            blob_bytes = len,
            limit = MAX_SESSION_BLOB_BYTES,
            "Serialized optimizer session exceeds storage limit"
        );
        return Err(ApiError::internal_error(
            "Optimizer session too large to persist",
        ));
    }
    Ok(())
}

// ============================================================================
// DATABASE CLIENT WRAPPER
// ============================================================================

/// Database client that wraps a connection pool and provides the SQL
/// operations for users and experiments.
#[derive(Clone)]
pub struct DbClient {
    pool: Pool,
}

impl DbClient {
    /// Create a new database client with the given pool.
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Create a new database client from configuration.
    pub fn from_config(config: &DbConfig) -> ApiResult<Self> {
        let pool = config.create_pool()?;
        Ok(Self::new(pool))
    }

    /// Get the current pool size for observability.
    pub fn pool_size(&self) -> usize {
        let status = self.pool.status();
        status.size
    }

    /// Get a connection from the pool.
    async fn get_conn(&self) -> ApiResult<deadpool_postgres::Object> {
        self.pool.get().await.map_err(ApiError::from)
    }

    /// Verify database connectivity.
    pub async fn health_check(&self) -> ApiResult<()> {
        let conn = self.get_conn().await?;

        // Simple query to verify connectivity
        conn.query_one("SELECT 1", &[]).await?;

        Ok(())
    }

    // ========================================================================
    // USER OPERATIONS
    // ========================================================================

    /// Insert a new user. A duplicate email surfaces as the distinct
    /// signup error; the unique constraint is the arbiter, so concurrent
    /// signups of the same address cannot both win.
    pub async fn user_create(&self, email: &str, hashed_password: &str) -> ApiResult<UserRecord> {
        let conn = self.get_conn().await?;
        let user_uuid = attune_core::new_entity_id();

        let sql = format!(
            "INSERT INTO users (user_uuid, email, hashed_password) \
             VALUES ($1, $2, $3) RETURNING {}",
            USER_COLUMNS
        );

        let row = conn
            .query_one(&sql, &[&user_uuid, &email, &hashed_password])
            .await
            .map_err(|e| {
                if e.code() == Some(&SqlState::UNIQUE_VIOLATION) {
                    ApiError::email_already_registered()
                } else {
                    ApiError::from(e)
                }
            })?;

        user_from_row(&row)
    }

    /// Insert a user unless the email already exists, then return the row
    /// either way. Used by startup seeding; running it twice changes nothing.
    pub async fn user_get_or_create(
        &self,
        email: &str,
        hashed_password: &str,
    ) -> ApiResult<UserRecord> {
        let conn = self.get_conn().await?;
        let user_uuid = attune_core::new_entity_id();

        conn.execute(
            "INSERT INTO users (user_uuid, email, hashed_password) \
             VALUES ($1, $2, $3) ON CONFLICT (email) DO NOTHING",
            &[&user_uuid, &email, &hashed_password],
        )
        .await?;

        let sql = format!("SELECT {} FROM users WHERE email = $1", USER_COLUMNS);
        let row = conn.query_one(&sql, &[&email]).await?;

        user_from_row(&row)
    }

    /// Fetch a user by public identifier.
    pub async fn user_get_by_uuid(&self, user_uuid: Uuid) -> ApiResult<Option<UserRecord>> {
        let conn = self.get_conn().await?;

        let sql = format!("SELECT {} FROM users WHERE user_uuid = $1", USER_COLUMNS);
        let row = conn.query_opt(&sql, &[&user_uuid]).await?;

        row.as_ref().map(user_from_row).transpose()
    }

    /// Fetch a user by email address.
    pub async fn user_get_by_email(&self, email: &str) -> ApiResult<Option<UserRecord>> {
        let conn = self.get_conn().await?;

        let sql = format!("SELECT {} FROM users WHERE email = $1", USER_COLUMNS);
        let row = conn.query_opt(&sql, &[&email]).await?;

        row.as_ref().map(user_from_row).transpose()
    }

    /// Fetch a user by internal primary key.
    pub async fn user_get_by_id(&self, id: i32) -> ApiResult<Option<UserRecord>> {
        let conn = self.get_conn().await?;

        let sql = format!("SELECT {} FROM users WHERE id = $1", USER_COLUMNS);
        let row = conn.query_opt(&sql, &[&id]).await?;

        row.as_ref().map(user_from_row).transpose()
    }

    /// List all users, oldest account first.
    pub async fn user_list(&self) -> ApiResult<Vec<UserRecord>> {
        let conn = self.get_conn().await?;

        let sql = format!("SELECT {} FROM users ORDER BY id", USER_COLUMNS);
        let rows = conn.query(&sql, &[]).await?;

        rows.iter().map(user_from_row).collect()
    }

    // ========================================================================
    // EXPERIMENT OPERATIONS
    // ========================================================================

    /// Insert a freshly constructed experiment at version 1.
    pub async fn experiment_insert(&self, new: &NewExperiment<'_>) -> ApiResult<ExperimentRecord> {
        ensure_blob_fits(new.session_blob.len())?;
        let conn = self.get_conn().await?;

        let sql = format!(
            "INSERT INTO experiments \
             (exp_uuid, name, description, covars, model_type, acq_func, \
              covars_sampled_iter, response_sampled_iter, model_object_binary, version, user_id) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, 1, $10) RETURNING {}",
            EXPERIMENT_COLUMNS
        );

        let row = conn
            .query_one(
                &sql,
                &[
                    &new.exp_uuid,
                    &new.name,
                    &new.description,
                    &new.covars,
                    &new.model_type,
                    &new.acq_func,
                    &new.covars_sampled_iter,
                    &new.response_sampled_iter,
                    &new.session_blob,
                    &new.user_id,
                ],
            )
            .await?;

        experiment_from_row(&row)
    }

    /// Fetch an experiment by public identifier.
    pub async fn experiment_get_by_uuid(
        &self,
        exp_uuid: Uuid,
    ) -> ApiResult<Option<ExperimentRecord>> {
        let conn = self.get_conn().await?;

        let sql = format!(
            "SELECT {} FROM experiments WHERE exp_uuid = $1",
            EXPERIMENT_COLUMNS
        );
        let row = conn.query_opt(&sql, &[&exp_uuid]).await?;

        row.as_ref().map(experiment_from_row).transpose()
    }

    /// List all experiments owned by a user, most recently updated first.
    pub async fn experiment_list_by_owner(
        &self,
        user_id: i32,
    ) -> ApiResult<Vec<ExperimentRecord>> {
        let conn = self.get_conn().await?;

        let sql = format!(
            "SELECT {} FROM experiments WHERE user_id = $1 ORDER BY time_updated DESC",
            EXPERIMENT_COLUMNS
        );
        let rows = conn.query(&sql, &[&user_id]).await?;

        rows.iter().map(experiment_from_row).collect()
    }

    /// Persist a mutated session blob after ask. The update is predicated on
    /// the version read at load time; `None` means a concurrent writer won
    /// and the caller's mutation must be discarded.
    ///
    /// The returned row carries the committed `time_updated`, which is what
    /// goes back on the wire.
    pub async fn experiment_store_session(
        &self,
        exp_uuid: Uuid,
        expected_version: i64,
        session_blob: &[u8],
    ) -> ApiResult<Option<ExperimentRecord>> {
        ensure_blob_fits(session_blob.len())?;
        let conn = self.get_conn().await?;

        let sql = format!(
            "UPDATE experiments \
             SET model_object_binary = $3, version = version + 1, time_updated = now() \
             WHERE exp_uuid = $1 AND version = $2 RETURNING {}",
            EXPERIMENT_COLUMNS
        );

        let row = conn
            .query_opt(&sql, &[&exp_uuid, &expected_version, &session_blob])
            .await?;

        row.as_ref().map(experiment_from_row).transpose()
    }

    /// Persist a completed tell mutation: session blob, both iteration
    /// counters, and the best-response snapshots. Same version predicate as
    /// [`experiment_store_session`](Self::experiment_store_session).
    pub async fn experiment_store_observation(
        &self,
        exp_uuid: Uuid,
        expected_version: i64,
        update: &ObservationUpdate<'_>,
    ) -> ApiResult<Option<ExperimentRecord>> {
        ensure_blob_fits(update.session_blob.len())?;
        let conn = self.get_conn().await?;

        let sql = format!(
            "UPDATE experiments \
             SET model_object_binary = $3, covars_sampled_iter = $4, response_sampled_iter = $5, \
                 best_response = $6, covars_best_response = $7, version = version + 1, \
                 time_updated = now() \
             WHERE exp_uuid = $1 AND version = $2 RETURNING {}",
            EXPERIMENT_COLUMNS
        );

        let row = conn
            .query_opt(
                &sql,
                &[
                    &exp_uuid,
                    &expected_version,
                    &update.session_blob,
                    &update.covars_sampled_iter,
                    &update.response_sampled_iter,
                    &update.best_response,
                    &update.covars_best_response,
                ],
            )
            .await?;

        row.as_ref().map(experiment_from_row).transpose()
    }
}

// ============================================================================
// SUBJECT RESOLUTION FOR THE AUTH MIDDLEWARE
// ============================================================================

#[axum::async_trait]
impl SubjectResolver for DbClient {
    async fn resolve_subject(&self, user_uuid: Uuid) -> ApiResult<Option<AuthContext>> {
        let user = self.user_get_by_uuid(user_uuid).await?;
        Ok(user.map(|u| AuthContext::new(u.id, u.user_uuid, u.email)))
    }
}

// ============================================================================
// TESTS
// ============================================================================
