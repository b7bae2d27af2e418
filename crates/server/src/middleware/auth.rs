//! Session extractors.
//!
//! These only read the identity *id* the session carries. They deliberately
//! return no role: the authorization gate re-derives the role from the store
//! on every privileged decision, so a stale or forged claim in the cookie
//! can never grant access.

use axum::{
    extract::FromRequestParts,
    http::request::Parts,
    response::{IntoResponse, Response},
};
use tower_sessions::Session;

use copperleaf_core::UserId;

use crate::error::AppError;
use crate::models::session_keys;

/// Extractor yielding the session's identity id, rejecting with 401 when
/// there is none.
///
/// # Example
///
/// ```rust,ignore
/// async fn handler(SessionUser(user_id): SessionUser) -> impl IntoResponse {
///     format!("caller: {user_id}")
/// }
/// ```
pub struct SessionUser(pub UserId);

impl<S> FromRequestParts<S> for SessionUser
where
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let MaybeSessionUser(user) = MaybeSessionUser::from_request_parts(parts, state)
            .await
            .map_err(|_| {
                AppError::Unauthenticated("authentication required".to_owned()).into_response()
            })?;
        user.map(Self).ok_or_else(|| {
            AppError::Unauthenticated("authentication required".to_owned()).into_response()
        })
    }
}

/// Extractor yielding the session's identity id when present.
pub struct MaybeSessionUser(pub Option<UserId>);

impl<S> FromRequestParts<S> for MaybeSessionUser
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user = match parts.extensions.get::<Session>() {
            Some(session) => session
                .get::<UserId>(session_keys::CURRENT_USER)
                .await
                .ok()
                .flatten(),
            None => None,
        };
        Ok(Self(user))
    }
}

/// Store the authenticated identity id in the session.
///
/// Rotates the session id first so a pre-login cookie cannot be fixed onto
/// the authenticated session.
///
/// # Errors
///
/// Returns an error if the session cannot be modified.
pub async fn set_current_user(
    session: &Session,
    user: &UserId,
) -> Result<(), tower_sessions::session::Error> {
    session.cycle_id().await?;
    session.insert(session_keys::CURRENT_USER, user).await
}

/// Clear the identity id from the session (logout).
///
/// # Errors
///
/// Returns an error if the session cannot be modified.
pub async fn clear_current_user(session: &Session) -> Result<(), tower_sessions::session::Error> {
    session.remove::<UserId>(session_keys::CURRENT_USER).await?;
    Ok(())
}
