//! Startup seeding of default users.
//!
//! Fresh deployments get two known accounts so the API is usable before any
//! real signup happens. Seeding is idempotent; existing rows are left alone.

use crate::auth::hash_password;
use crate::db::DbClient;
use crate::error::ApiResult;

/// First seeded account; the dev router also runs as this user.
pub const DEFAULT_USER_EMAIL: &str = "test@test.com";
/// Second seeded account.
pub const SECONDARY_USER_EMAIL: &str = "me@somewhere.com";

/// Shared initial password. Change it after the first login.
const DEFAULT_PASSWORD: &str = "CHANGEME";

/// Insert the default users unless they already exist.
pub async fn seed_default_users(db: &DbClient) -> ApiResult<()> {
    for email in [DEFAULT_USER_EMAIL, SECONDARY_USER_EMAIL] {
        let user = db
            .user_get_or_create(email, &hash_password(DEFAULT_PASSWORD))
            .await?;
        tracing::info!(user = %user.email, "Default user present");
    }

    Ok(())
}
