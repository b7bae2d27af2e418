//! Unified error handling.
//!
//! One taxonomy covers every worker. The `IntoResponse` impl maps it to
//! status codes and client-safe JSON bodies; internal detail is captured to
//! Sentry and `tracing` only, never exposed to clients. Ownership mismatches
//! surface as `NotFound` for non-admin callers (handled at the authorization
//! gate), so this layer never needs to second-guess the masking.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

use crate::store::StoreError;

/// Application-level error type.
#[derive(Debug, Error)]
pub enum AppError {
    /// No valid session, or the session references a revoked identity.
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    /// Authenticated but insufficient role.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Missing resource, or ownership mismatch masked as not-found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Structural or business-rule violation. Carries every field-level
    /// message from a validation pass, not just the first.
    #[error("validation failed: {0:?}")]
    Validation(Vec<String>),

    /// Uniqueness or state violation: duplicate rating, duplicate payment
    /// transaction id, last-super-admin protection.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Mid-transaction abort. No partial state was committed; the caller
    /// may safely resubmit.
    #[error("transient failure: {0}")]
    Transient(String),

    /// Unexpected fault.
    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Single-message validation failure.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(vec![message.into()])
    }
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound => Self::NotFound("resource not found".to_owned()),
            StoreError::InsufficientStock { item_id } => {
                Self::validation(format!("insufficient stock for item {item_id}"))
            }
            StoreError::Conflict(msg) => Self::Conflict(msg),
            StoreError::DataCorruption(msg) => Self::Internal(msg),
            StoreError::Storage(e) => Self::Internal(e.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        // Capture server faults with Sentry; clients only ever see the
        // generic message below.
        if matches!(self, Self::Internal(_) | Self::Transient(_)) {
            let event_id = sentry::capture_error(&self);
            tracing::error!(
                error = %self,
                sentry_event_id = %event_id,
                "request error"
            );
        }

        let status = match &self {
            Self::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Transient(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = match &self {
            Self::Validation(errors) => json!({
                "error": "validation failed",
                "details": errors,
            }),
            Self::Internal(_) => json!({ "error": "internal server error" }),
            Self::Transient(_) => json!({
                "error": "temporary failure, please retry",
            }),
            other => json!({ "error": other.to_string() }),
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_of(err: AppError) -> StatusCode {
        err.into_response().status()
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(
            status_of(AppError::Unauthenticated("no session".into())),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            status_of(AppError::Forbidden("admins only".into())),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            status_of(AppError::NotFound("order".into())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(AppError::validation("bad field")),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(AppError::Conflict("duplicate".into())),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(AppError::Transient("aborted".into())),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_of(AppError::Internal("boom".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_internal_detail_is_not_leaked() {
        let response = AppError::Internal("connection string leaked".into()).into_response();
        // The body is generic; the detail only reaches tracing/Sentry.
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_store_error_mapping() {
        let err: AppError = StoreError::NotFound.into();
        assert!(matches!(err, AppError::NotFound(_)));

        let err: AppError = StoreError::Conflict("email already registered".into()).into();
        assert!(matches!(err, AppError::Conflict(_)));
    }
}
