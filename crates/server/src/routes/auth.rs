//! Registration, login, and logout.

use axum::{Json, extract::State, http::StatusCode};
use serde::Serialize;
use serde_json::Value;
use tower_sessions::Session;

use copperleaf_core::{Role, UserId};

use crate::error::AppError;
use crate::middleware::{clear_current_user, set_current_user};
use crate::models::Identity;
use crate::services::accounts;
use crate::state::AppState;

/// Client-facing identity profile. Never includes the password hash.
#[derive(Debug, Serialize)]
pub struct ProfileView {
    pub id: UserId,
    pub name: String,
    pub email: String,
    pub role: Role,
}

impl From<Identity> for ProfileView {
    fn from(identity: Identity) -> Self {
        Self {
            id: identity.id,
            name: identity.name,
            email: identity.email.into_inner(),
            role: identity.role,
        }
    }
}

/// POST /auth/register
pub async fn register(
    State(state): State<AppState>,
    session: Session,
    Json(payload): Json<Value>,
) -> Result<(StatusCode, Json<ProfileView>), AppError> {
    let identity = accounts::register(state.store(), state.audit(), &payload).await?;
    set_current_user(&session, &identity.id)
        .await
        .map_err(|e| AppError::Internal(format!("session write failed: {e}")))?;
    Ok((StatusCode::CREATED, Json(identity.into())))
}

/// POST /auth/login
pub async fn login(
    State(state): State<AppState>,
    session: Session,
    Json(payload): Json<Value>,
) -> Result<Json<ProfileView>, AppError> {
    let email = payload.get("email").and_then(Value::as_str).unwrap_or("");
    let password = payload.get("password").and_then(Value::as_str).unwrap_or("");

    let identity = accounts::login(state.store(), state.audit(), email, password).await?;
    set_current_user(&session, &identity.id)
        .await
        .map_err(|e| AppError::Internal(format!("session write failed: {e}")))?;
    Ok(Json(identity.into()))
}

/// POST /auth/logout
pub async fn logout(session: Session) -> Result<StatusCode, AppError> {
    clear_current_user(&session)
        .await
        .map_err(|e| AppError::Internal(format!("session write failed: {e}")))?;
    Ok(StatusCode::NO_CONTENT)
}
