//! Fulfillment worker.
//!
//! Marks a paid order delivered. Admin-only; routes additionally require an
//! anti-forgery token. An order delivered unusually fast (under 24 hours,
//! without the expedited flag) is audited as an anomaly for review but the
//! delivery itself goes through; a delivery timestamp that predates the
//! order is impossible and is rejected outright.

use chrono::{DateTime, Duration, Utc};
use serde_json::json;

use copperleaf_core::{OrderId, OrderStatus};

use crate::audit::{AuditCategory, AuditEvent, AuditLevel, AuditSink};
use crate::error::AppError;
use crate::models::{Identity, Order};
use crate::store::{Store, StoreError};

/// Deliveries faster than this without the expedited flag are flagged.
const REVIEW_WINDOW_HOURS: i64 = 24;

/// Length cap for the optional delivery note.
const MAX_NOTE_LENGTH: usize = 500;

fn reject_precondition(order: &Order) -> Result<(), AppError> {
    if !order.is_paid {
        return Err(AppError::validation("order is not paid"));
    }
    if order.is_delivered {
        return Err(AppError::Conflict("order is already delivered".to_owned()));
    }
    if order.status == OrderStatus::Cancelled {
        return Err(AppError::validation("order is cancelled"));
    }
    if !order.address.is_complete() {
        return Err(AppError::validation("shipping address is incomplete"));
    }
    Ok(())
}

/// Mark an order delivered.
///
/// The caller must already have passed the admin gate; `admin` is the
/// freshly re-derived identity.
///
/// # Errors
///
/// `Validation` for a malformed id, an unpaid or cancelled order, an
/// incomplete address, or an over-long note; `Conflict` when the order is
/// already delivered; `NotFound` when it does not exist; `Internal` when
/// the order's timestamps are inconsistent.
pub async fn deliver(
    store: &dyn Store,
    audit: &AuditSink,
    admin: &Identity,
    raw_order_id: &str,
    note: Option<&str>,
    now: DateTime<Utc>,
) -> Result<Order, AppError> {
    let order_id: OrderId = raw_order_id
        .parse()
        .map_err(|_| AppError::validation("malformed order id"))?;

    let note = match note.map(str::trim).filter(|n| !n.is_empty()) {
        Some(n) if n.chars().count() > MAX_NOTE_LENGTH => {
            return Err(AppError::validation(format!(
                "delivery note must have at most {MAX_NOTE_LENGTH} characters"
            )));
        }
        other => other.map(str::to_owned),
    };

    let order = store
        .order_by_id(&order_id)
        .await?
        .ok_or_else(|| AppError::NotFound("order not found".to_owned()))?;
    reject_precondition(&order)?;

    let age = now - order.created_at;
    if age < Duration::zero() {
        // A delivery cannot predate its order. Storage clock or data fault.
        return Err(AppError::Internal(format!(
            "order {order_id} has a creation time in the future"
        )));
    }
    if age < Duration::hours(REVIEW_WINDOW_HOURS) && !order.expedited {
        // Flagged for review, not denied.
        audit.record(
            AuditEvent::new(AuditLevel::Security, AuditCategory::Fulfillment, "rapid_delivery")
                .actor(&admin.id)
                .subject(&order_id)
                .context(json!({ "age_minutes": age.num_minutes() })),
        );
    }

    let delivered = match store.mark_delivered(&order_id, &admin.id, note, now).await {
        Ok(order) => order,
        Err(StoreError::Conflict(msg)) => return Err(AppError::Conflict(msg)),
        Err(e) => return Err(e.into()),
    };

    audit.record(
        AuditEvent::new(AuditLevel::Info, AuditCategory::Fulfillment, "order_delivered")
            .actor(&admin.id)
            .subject(&order_id),
    );
    Ok(delivered)
}
