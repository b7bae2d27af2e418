//! Authorization gate.
//!
//! Every privileged decision re-reads the identity record from the store by
//! id. The session carries only the id; role claims are never cached, so a
//! role revoked after login takes effect on the very next request. Every
//! denial is recorded to the audit sink with the acting identity and the
//! endpoint it was denied on.

use serde_json::json;

use copperleaf_core::{OrderId, Role, UserId};

use crate::audit::{AuditCategory, AuditEvent, AuditLevel, AuditSink};
use crate::error::AppError;
use crate::models::{Identity, Order};
use crate::store::Store;

/// Resolve the session's identity id to a live identity record.
///
/// # Errors
///
/// `Unauthenticated` when there is no session, when the identity no longer
/// exists, or when it has been soft-deleted since the session was issued.
pub async fn require_identity(
    store: &dyn Store,
    audit: &AuditSink,
    session_user: Option<&UserId>,
    endpoint: &str,
) -> Result<Identity, AppError> {
    let Some(id) = session_user else {
        return Err(AppError::Unauthenticated("authentication required".to_owned()));
    };

    let identity = store.identity_by_id(id).await?;
    match identity {
        Some(identity) if !identity.is_deleted() => Ok(identity),
        // A session outliving its identity is worth a distinct audit trail:
        // either the account was deleted or the session was forged.
        _ => {
            audit.record(
                AuditEvent::new(AuditLevel::Security, AuditCategory::Authz, "stale_session")
                    .actor(id)
                    .context(json!({ "endpoint": endpoint })),
            );
            Err(AppError::Unauthenticated("session is no longer valid".to_owned()))
        }
    }
}

/// Resolve the session identity and require at least the given role.
///
/// # Errors
///
/// `Unauthenticated` per [`require_identity`]; `Forbidden` when the caller's
/// freshly-read role is below `minimum`.
pub async fn require_role(
    store: &dyn Store,
    audit: &AuditSink,
    session_user: Option<&UserId>,
    minimum: Role,
    endpoint: &str,
) -> Result<Identity, AppError> {
    let identity = require_identity(store, audit, session_user, endpoint).await?;
    if identity.role >= minimum {
        return Ok(identity);
    }
    audit.record(
        AuditEvent::new(AuditLevel::Warn, AuditCategory::Authz, "role_denied")
            .actor(&identity.id)
            .context(json!({ "endpoint": endpoint, "required": minimum.to_string() })),
    );
    Err(AppError::Forbidden("insufficient privileges".to_owned()))
}

/// Fetch an order the caller is allowed to see.
///
/// Non-admin callers must own the order; a mismatch is masked as `NotFound`
/// so an unauthorized caller cannot confirm the order exists. Admins may
/// bypass ownership when `admin_override` is set (the access is audited as
/// an admin access); with the override off, an admin who is not the owner
/// receives a true `Forbidden`, since admins already have visibility.
///
/// # Errors
///
/// `Validation` for a malformed id (rejected before any lookup), `NotFound`,
/// or `Forbidden` as described above.
pub async fn require_order_access(
    store: &dyn Store,
    audit: &AuditSink,
    caller: &Identity,
    raw_order_id: &str,
    admin_override: bool,
    endpoint: &str,
) -> Result<Order, AppError> {
    let order_id: OrderId = raw_order_id
        .parse()
        .map_err(|_| AppError::validation("malformed order id"))?;

    let order = store
        .order_by_id(&order_id)
        .await?
        .ok_or_else(|| AppError::NotFound("order not found".to_owned()))?;

    if order.user_id == caller.id {
        return Ok(order);
    }

    if caller.role.is_admin() {
        if admin_override {
            audit.record(
                AuditEvent::new(AuditLevel::Info, AuditCategory::Authz, "admin_order_access")
                    .actor(&caller.id)
                    .subject(&order.id)
                    .context(json!({ "endpoint": endpoint })),
            );
            return Ok(order);
        }
        return Err(AppError::Forbidden("not the order owner".to_owned()));
    }

    audit.record(
        AuditEvent::new(AuditLevel::Security, AuditCategory::Authz, "ownership_denied")
            .actor(&caller.id)
            .subject(&order.id)
            .context(json!({ "endpoint": endpoint })),
    );
    Err(AppError::NotFound("order not found".to_owned()))
}
