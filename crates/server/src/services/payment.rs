//! Payment settlement worker.
//!
//! Transitions an order from pending to paid on an externally supplied
//! payment confirmation. Owner-only. The stored settlement amount is always
//! the order's server-computed total: a client-supplied amount is checked
//! against it and rejected on mismatch, never written. A payment transaction
//! id settles at most one order, ever; a reuse attempt is rejected as a
//! replay and audited as a security event, distinct from ordinary
//! validation failures.

use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::{Value, json};

use copperleaf_core::{Email, OrderId, OrderStatus, PaymentStatus};

use crate::audit::{AuditCategory, AuditEvent, AuditLevel, AuditSink};
use crate::error::AppError;
use crate::models::{Identity, Order, PaymentResult};
use crate::services::authz;
use crate::services::validate::{Expected, Rule, validate};
use crate::store::{Store, StoreError};

/// Unpaid orders expire after this long; the caller must re-order.
const UNPAID_EXPIRY_HOURS: i64 = 24;

/// Transaction id length bounds.
const MIN_TXN_ID_LENGTH: usize = 8;
const MAX_TXN_ID_LENGTH: usize = 128;

/// A client amount off by a full cent or more is a mismatch, so a
/// confirmation short by 0.01 is rejected.
const AMOUNT_TOLERANCE: Decimal = Decimal::from_parts(1, 0, 0, false, 2);

/// What the caller gets back from a successful settlement.
#[derive(Debug, Serialize)]
pub struct SettlementReceipt {
    pub order_id: OrderId,
    pub total_paid: Decimal,
    pub payment_id: String,
}

fn payment_rules() -> Vec<Rule> {
    vec![
        Rule::new("transaction_id")
            .required()
            .expect(Expected::String)
            .min_length(MIN_TXN_ID_LENGTH)
            .max_length(MAX_TXN_ID_LENGTH),
        Rule::new("status")
            .required()
            .expect(Expected::String)
            .predicate(
                |v| v.as_str().is_some_and(|s| s.parse::<PaymentStatus>().is_ok()),
                "unrecognized payment status",
            ),
        Rule::new("payer_email").required().expect(Expected::String),
        Rule::new("amount").predicate(
            |v| parse_amount(v).is_some(),
            "must be a decimal amount",
        ),
    ]
}

fn reject_precondition(order: &Order) -> Result<(), AppError> {
    if order.is_paid {
        return Err(AppError::Conflict("order is already paid".to_owned()));
    }
    if order.status == OrderStatus::Cancelled {
        return Err(AppError::validation("order is cancelled"));
    }
    let age = Utc::now() - order.created_at;
    if age > Duration::hours(UNPAID_EXPIRY_HOURS) {
        return Err(AppError::validation(
            "order has expired unpaid; place a new order",
        ));
    }
    Ok(())
}

/// Settle an order against a payment confirmation payload.
///
/// # Errors
///
/// `NotFound`/`Forbidden` per the ownership contract, `Conflict` for an
/// already-paid order or a reused transaction id, `Validation` for a
/// cancelled or expired order or a malformed confirmation (including an
/// amount that does not match the stored total).
pub async fn settle(
    store: &dyn Store,
    audit: &AuditSink,
    caller: &Identity,
    raw_order_id: &str,
    payload: &Value,
) -> Result<SettlementReceipt, AppError> {
    // Owner only: even admins cannot pay someone else's order.
    let order = authz::require_order_access(
        store,
        audit,
        caller,
        raw_order_id,
        false,
        "/orders/{id}/pay",
    )
    .await?;

    reject_precondition(&order)?;
    validate(payload, &payment_rules()).into_result()?;

    let transaction_id = payload
        .get("transaction_id")
        .and_then(Value::as_str)
        .map(str::trim)
        .ok_or_else(|| AppError::validation("transaction_id is required"))?
        .to_owned();
    let status: PaymentStatus = payload
        .get("status")
        .and_then(Value::as_str)
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| AppError::validation("unrecognized payment status"))?;
    let payer_email = payload
        .get("payer_email")
        .and_then(Value::as_str)
        .ok_or_else(|| AppError::validation("payer_email is required"))
        .and_then(|raw| {
            Email::parse(raw).map_err(|e| AppError::validation(format!("payer_email: {e}")))
        })?;

    // The stored amount is always the order's total. A client amount is only
    // a cross-check.
    if let Some(claimed) = payload.get("amount").and_then(parse_amount) {
        if (claimed - order.total_price).abs() >= AMOUNT_TOLERANCE {
            audit.record(
                AuditEvent::new(AuditLevel::Warn, AuditCategory::Payment, "payment_amount_mismatch")
                    .actor(&caller.id)
                    .subject(&order.id)
                    .context(json!({
                        "claimed": claimed.to_string(),
                        "expected": order.total_price.to_string(),
                    })),
            );
            return Err(AppError::validation(
                "payment amount does not match the order total",
            ));
        }
    }

    // Replay check before the commit; the store repeats it inside the
    // critical section to close the race with a concurrent settlement.
    if store.payment_transaction_exists(&transaction_id).await? {
        audit.record(
            AuditEvent::new(AuditLevel::Security, AuditCategory::Payment, "payment_replay_rejected")
                .actor(&caller.id)
                .subject(&order.id)
                .context(json!({ "transaction_id": transaction_id })),
        );
        return Err(AppError::Conflict(
            "payment transaction already used".to_owned(),
        ));
    }

    let payment = PaymentResult {
        transaction_id,
        status,
        payer_email,
        amount: order.total_price,
        paid_at: Utc::now(),
    };
    let settled = match store.settle_payment(&order.id, payment).await {
        Ok(order) => order,
        Err(StoreError::Conflict(msg)) => {
            audit.record(
                AuditEvent::new(AuditLevel::Security, AuditCategory::Payment, "payment_replay_rejected")
                    .actor(&caller.id)
                    .subject(&order.id),
            );
            return Err(AppError::Conflict(msg));
        }
        Err(e) => return Err(e.into()),
    };

    let payment_id = settled
        .payment
        .as_ref()
        .map(|p| p.transaction_id.clone())
        .unwrap_or_default();
    audit.record(
        AuditEvent::new(AuditLevel::Info, AuditCategory::Payment, "payment_settled")
            .actor(&caller.id)
            .subject(&settled.id)
            .context(json!({ "amount": settled.total_price.to_string() })),
    );

    Ok(SettlementReceipt {
        order_id: settled.id,
        total_paid: settled.total_price,
        payment_id,
    })
}

/// Reads an amount supplied either as a JSON number or a decimal string.
fn parse_amount(value: &Value) -> Option<Decimal> {
    match value {
        Value::String(s) => s.trim().parse().ok(),
        Value::Number(_) => value.as_f64().and_then(Decimal::from_f64_retain),
        _ => None,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use copperleaf_core::Role;
    use rust_decimal::dec;

    use crate::store::MemoryStore;
    use crate::test_support::{identity_with_role, pending_order};

    fn confirmation(amount: f64) -> Value {
        json!({
            "transaction_id": "txn-0000001",
            "status": "completed",
            "payer_email": "payer@example.com",
            "amount": amount,
        })
    }

    async fn seeded() -> (MemoryStore, Identity, OrderId) {
        let store = MemoryStore::new();
        let owner = identity_with_role(Role::User);
        let order = pending_order(&owner.id);
        let order_id = order.id.clone();
        store.insert_identity(owner.clone()).await.unwrap();
        store.commit_checkout(order).await.unwrap();
        (store, owner, order_id)
    }

    #[tokio::test]
    async fn test_exact_amount_settles() {
        let (store, owner, order_id) = seeded().await;
        let receipt = settle(
            &store,
            &AuditSink::disabled(),
            &owner,
            order_id.as_str(),
            &confirmation(230.00),
        )
        .await
        .unwrap();
        assert_eq!(receipt.total_paid, dec!(230.00));

        let order = store.order_by_id(&order_id).await.unwrap().unwrap();
        assert!(order.is_paid);
        assert_eq!(order.status, OrderStatus::Paid);
        // The stored amount is the order total, not the request amount.
        assert_eq!(order.payment.unwrap().amount, dec!(230.00));
    }

    #[tokio::test]
    async fn test_amount_short_by_a_cent_rejected() {
        let (store, owner, order_id) = seeded().await;
        let err = settle(
            &store,
            &AuditSink::disabled(),
            &owner,
            order_id.as_str(),
            &confirmation(229.99),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        let order = store.order_by_id(&order_id).await.unwrap().unwrap();
        assert!(!order.is_paid);
    }

    #[tokio::test]
    async fn test_already_paid_is_conflict() {
        let (store, owner, order_id) = seeded().await;
        let audit = AuditSink::disabled();
        settle(&store, &audit, &owner, order_id.as_str(), &confirmation(230.00))
            .await
            .unwrap();
        let mut second = confirmation(230.00);
        second["transaction_id"] = json!("txn-0000002");
        let err = settle(&store, &audit, &owner, order_id.as_str(), &second)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_transaction_id_reuse_across_orders_rejected() {
        let (store, owner, first_id) = seeded().await;
        let audit = AuditSink::disabled();
        settle(&store, &audit, &owner, first_id.as_str(), &confirmation(230.00))
            .await
            .unwrap();

        let second = pending_order(&owner.id);
        let second_id = second.id.clone();
        store.commit_checkout(second).await.unwrap();
        let err = settle(&store, &audit, &owner, second_id.as_str(), &confirmation(230.00))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_expired_order_rejected() {
        let store = MemoryStore::new();
        let owner = identity_with_role(Role::User);
        let mut order = pending_order(&owner.id);
        order.created_at = Utc::now() - Duration::hours(25);
        let order_id = order.id.clone();
        store.insert_identity(owner.clone()).await.unwrap();
        store.commit_checkout(order).await.unwrap();

        let err = settle(
            &store,
            &AuditSink::disabled(),
            &owner,
            order_id.as_str(),
            &confirmation(230.00),
        )
        .await
        .unwrap_err();
        let AppError::Validation(errors) = err else {
            panic!("expected validation error");
        };
        assert!(errors[0].contains("expired"));
    }

    #[tokio::test]
    async fn test_cancelled_order_rejected() {
        let store = MemoryStore::new();
        let owner = identity_with_role(Role::User);
        let mut order = pending_order(&owner.id);
        order.status = OrderStatus::Cancelled;
        let order_id = order.id.clone();
        store.insert_identity(owner.clone()).await.unwrap();
        store.commit_checkout(order).await.unwrap();

        let err = settle(
            &store,
            &AuditSink::disabled(),
            &owner,
            order_id.as_str(),
            &confirmation(230.00),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn test_malformed_confirmation_rejected() {
        let (store, owner, order_id) = seeded().await;
        let payload = json!({
            "transaction_id": "short",
            "status": "launder",
            "payer_email": "not-an-email",
        });
        let err = settle(
            &store,
            &AuditSink::disabled(),
            &owner,
            order_id.as_str(),
            &payload,
        )
        .await
        .unwrap_err();
        let AppError::Validation(errors) = err else {
            panic!("expected validation error");
        };
        assert!(errors.len() >= 2);
    }

    #[tokio::test]
    async fn test_admin_cannot_pay_someone_elses_order() {
        let (store, _owner, order_id) = seeded().await;
        let admin = identity_with_role(Role::Admin);
        store.insert_identity(admin.clone()).await.unwrap();
        let err = settle(
            &store,
            &AuditSink::disabled(),
            &admin,
            order_id.as_str(),
            &confirmation(230.00),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
    }
}
