//! Full order lifecycle: checkout, settlement, delivery, and the visibility
//! rules along the way.

#![allow(clippy::unwrap_used)]

use chrono::{Duration, Utc};
use rust_decimal::dec;

use copperleaf_core::{OrderStatus, Role};
use copperleaf_integration_tests::{Harness, checkout_payload, make_pending_order, payment_payload};
use copperleaf_server::AppError;
use copperleaf_server::services::{authz, checkout, fulfillment, payment};
use copperleaf_server::store::Store;

#[tokio::test]
async fn checkout_pay_deliver_happy_path() {
    let harness = Harness::new();
    let item = harness.item(dec!(80), 5).await.unwrap();
    let buyer = harness.identity(Role::User).await.unwrap();
    let admin = harness.identity(Role::Admin).await.unwrap();

    let receipt = checkout::place_order(
        &harness.store,
        &harness.audit,
        &harness.pricing,
        &buyer,
        &checkout_payload(&item.id, 1),
    )
    .await
    .unwrap();
    // 80 + 12 tax + 10 shipping.
    assert_eq!(receipt.total_price, dec!(102.00));

    payment::settle(
        &harness.store,
        &harness.audit,
        &buyer,
        receipt.order_id.as_str(),
        &payment_payload("txn-lifecycle", 102.00),
    )
    .await
    .unwrap();

    // An unpaid-order-only precondition would have failed here otherwise.
    let delivered = fulfillment::deliver(
        &harness.store,
        &harness.audit,
        &admin,
        receipt.order_id.as_str(),
        Some("left with the concierge"),
        Utc::now() + Duration::hours(30),
    )
    .await
    .unwrap();
    assert_eq!(delivered.status, OrderStatus::Delivered);
    assert!(delivered.is_delivered);
    assert_eq!(delivered.delivered_by, Some(admin.id.clone()));

    // Delivering twice is a conflict, not a silent overwrite.
    let err = fulfillment::deliver(
        &harness.store,
        &harness.audit,
        &admin,
        receipt.order_id.as_str(),
        None,
        Utc::now() + Duration::hours(31),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));
}

#[tokio::test]
async fn unpaid_order_cannot_be_delivered() {
    let harness = Harness::new();
    let item = harness.item(dec!(80), 5).await.unwrap();
    let buyer = harness.identity(Role::User).await.unwrap();
    let admin = harness.identity(Role::Admin).await.unwrap();

    let receipt = checkout::place_order(
        &harness.store,
        &harness.audit,
        &harness.pricing,
        &buyer,
        &checkout_payload(&item.id, 1),
    )
    .await
    .unwrap();

    let err = fulfillment::deliver(
        &harness.store,
        &harness.audit,
        &admin,
        receipt.order_id.as_str(),
        None,
        Utc::now() + Duration::hours(30),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));
}

#[tokio::test]
async fn stranger_sees_not_found_admin_sees_order() {
    let harness = Harness::new();
    let item = harness.item(dec!(80), 5).await.unwrap();
    let buyer = harness.identity(Role::User).await.unwrap();
    let stranger = harness.identity(Role::User).await.unwrap();
    let admin = harness.identity(Role::Admin).await.unwrap();

    let receipt = checkout::place_order(
        &harness.store,
        &harness.audit,
        &harness.pricing,
        &buyer,
        &checkout_payload(&item.id, 1),
    )
    .await
    .unwrap();

    // Another user gets the existence-masking NotFound.
    let err = authz::require_order_access(
        &harness.store,
        &harness.audit,
        &stranger,
        receipt.order_id.as_str(),
        true,
        "/orders/{id}",
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));

    // An admin with the override sees the real order.
    let order = authz::require_order_access(
        &harness.store,
        &harness.audit,
        &admin,
        receipt.order_id.as_str(),
        true,
        "/admin/orders",
    )
    .await
    .unwrap();
    assert_eq!(order.user_id, buyer.id);

    // But payment stays owner-only even for admins.
    let err = payment::settle(
        &harness.store,
        &harness.audit,
        &admin,
        receipt.order_id.as_str(),
        &payment_payload("txn-admin-attempt", 102.00),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::Forbidden(_)));
}

#[tokio::test]
async fn stale_unpaid_order_cannot_be_settled() {
    let harness = Harness::new();
    let buyer = harness.identity(Role::User).await.unwrap();

    // An order placed 25 hours ago, past the payment window.
    let mut order = make_pending_order(&buyer.id);
    order.created_at = Utc::now() - Duration::hours(25);
    let order_id = order.id.clone();
    harness.store.commit_checkout(order).await.unwrap();

    let err = payment::settle(
        &harness.store,
        &harness.audit,
        &buyer,
        order_id.as_str(),
        &payment_payload("txn-too-late", 230.00),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));
}
