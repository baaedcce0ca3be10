//! User-related API types

use attune_core::Timestamp;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::UserRecord;

/// Request to register a new user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct CreateUserRequest {
    /// Email address, also the login name
    pub email: String,
    /// Plaintext password; only its salted hash is stored
    pub password: String,
}

/// User response. The password hash and internal primary key never leave
/// the database layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct UserResponse {
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub user_uuid: Uuid,
    pub email: String,
    pub is_active: bool,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub time_created: Timestamp,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub time_updated: Timestamp,
}

impl From<UserRecord> for UserResponse {
    fn from(record: UserRecord) -> Self {
        Self {
            user_uuid: record.user_uuid,
            email: record.email,
            is_active: record.is_active,
            time_created: record.time_created,
            time_updated: record.time_updated,
        }
    }
}
