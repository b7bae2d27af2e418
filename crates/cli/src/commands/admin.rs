//! Super-admin bootstrap command.
//!
//! The role-management routes require an existing super-admin, so the very
//! first one has to come from here.

use chrono::Utc;

use copperleaf_core::{Email, Role, UserId};
use copperleaf_server::models::Identity;
use copperleaf_server::services::accounts::hash_password;
use copperleaf_server::store::{PgStore, Store, StoreError};

use super::{CliError, connect};

const MIN_PASSWORD_LENGTH: usize = 8;

/// Create a super-admin identity.
pub async fn create_super_admin(email: &str, name: &str, password: &str) -> Result<(), CliError> {
    let email = Email::parse(email).map_err(|e| CliError::Invalid(format!("email: {e}")))?;
    if name.trim().is_empty() {
        return Err(CliError::Invalid("name cannot be empty".to_owned()));
    }
    if password.len() < MIN_PASSWORD_LENGTH {
        return Err(CliError::Invalid(format!(
            "password must be at least {MIN_PASSWORD_LENGTH} characters"
        )));
    }
    let password_hash =
        hash_password(password).map_err(|e| CliError::Invalid(e.to_string()))?;

    let pool = connect().await?;
    let store = PgStore::new(pool);

    let now = Utc::now();
    let identity = Identity {
        id: UserId::generate(),
        name: name.trim().to_owned(),
        email: email.clone(),
        password_hash: Some(password_hash),
        role: Role::SuperAdmin,
        deleted_at: None,
        deleted_by: None,
        created_at: now,
        updated_at: now,
    };
    let id = identity.id.clone();

    match store.insert_identity(identity).await {
        Ok(()) => {
            tracing::info!("Created super-admin {} ({id})", email.as_str());
            Ok(())
        }
        Err(StoreError::Conflict(_)) => Err(CliError::Invalid(format!(
            "an identity already exists for {}",
            email.as_str()
        ))),
        Err(e) => Err(e.into()),
    }
}
