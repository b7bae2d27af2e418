//! Concurrency properties of checkout.
//!
//! Many tasks race for the same limited stock; exactly as many orders as
//! supply allows may succeed, and stock never goes negative.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;

use rust_decimal::dec;

use copperleaf_core::Role;
use copperleaf_integration_tests::{Harness, checkout_payload, make_identity};
use copperleaf_server::services::checkout;
use copperleaf_server::store::Store;

#[tokio::test]
async fn concurrent_checkouts_never_oversell() {
    let harness = Arc::new(Harness::new());
    let item = harness.item(dec!(25.00), 10).await.unwrap();

    // 40 buyers each want 1 unit; only 10 can win.
    let mut handles = Vec::new();
    for _ in 0..40 {
        let harness = Arc::clone(&harness);
        let item_id = item.id.clone();
        let buyer = make_identity(Role::User);
        harness.store.insert_identity(buyer.clone()).await.unwrap();
        handles.push(tokio::spawn(async move {
            checkout::place_order(
                &harness.store,
                &harness.audit,
                &harness.pricing,
                &buyer,
                &checkout_payload(&item_id, 1),
            )
            .await
        }));
    }

    let mut won = 0;
    let mut lost = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => won += 1,
            Err(_) => lost += 1,
        }
    }

    assert_eq!(won, 10);
    assert_eq!(lost, 30);

    let remaining = harness.store.item_by_id(&item.id).await.unwrap().unwrap();
    assert_eq!(remaining.stock, 0);
}

#[tokio::test]
async fn failed_multi_line_checkout_leaves_no_partial_state() {
    let harness = Harness::new();
    let plentiful = harness.item(dec!(5.00), 100).await.unwrap();
    let scarce = harness.item(dec!(5.00), 1).await.unwrap();
    let buyer = harness.identity(Role::User).await.unwrap();

    let payload = serde_json::json!({
        "items": [
            { "id": plentiful.id.as_str(), "quantity": 10 },
            { "id": scarce.id.as_str(), "quantity": 5 },
        ],
        "full_name": "Grace Hopper",
        "street": "1 Compiler Court",
        "city": "Arlington",
        "postal_code": "22201",
        "country": "US",
        "payment_method": "card",
    });

    let result = checkout::place_order(
        &harness.store,
        &harness.audit,
        &harness.pricing,
        &buyer,
        &payload,
    )
    .await;
    assert!(result.is_err());

    // The first line's decrement must not have stuck.
    let plentiful_after = harness
        .store
        .item_by_id(&plentiful.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(plentiful_after.stock, 100);
    let orders = harness.store.orders_for(&buyer.id).await.unwrap();
    assert!(orders.is_empty());
}

#[tokio::test]
async fn duplicate_lines_for_one_item_cannot_oversell() {
    let harness = Harness::new();
    let item = harness.item(dec!(5.00), 3).await.unwrap();
    let buyer = harness.identity(Role::User).await.unwrap();

    // Demand for one item split across two lines. Per-line checks against
    // the same stock count would admit 2 + 2 against 3.
    let payload = serde_json::json!({
        "items": [
            { "id": item.id.as_str(), "quantity": 2 },
            { "id": item.id.as_str(), "quantity": 2 },
        ],
        "full_name": "Grace Hopper",
        "street": "1 Compiler Court",
        "city": "Arlington",
        "postal_code": "22201",
        "country": "US",
        "payment_method": "card",
    });

    let result = checkout::place_order(
        &harness.store,
        &harness.audit,
        &harness.pricing,
        &buyer,
        &payload,
    )
    .await;
    assert!(result.is_err());

    let after = harness.store.item_by_id(&item.id).await.unwrap().unwrap();
    assert_eq!(after.stock, 3);
    let orders = harness.store.orders_for(&buyer.id).await.unwrap();
    assert!(orders.is_empty());
}

#[tokio::test]
async fn combined_demand_splits_supply_exactly() {
    let harness = Arc::new(Harness::new());
    // 7 units; three buyers want 3 each: exactly two can win.
    let item = harness.item(dec!(10.00), 7).await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..3 {
        let harness = Arc::clone(&harness);
        let item_id = item.id.clone();
        let buyer = make_identity(Role::User);
        harness.store.insert_identity(buyer.clone()).await.unwrap();
        handles.push(tokio::spawn(async move {
            checkout::place_order(
                &harness.store,
                &harness.audit,
                &harness.pricing,
                &buyer,
                &checkout_payload(&item_id, 3),
            )
            .await
        }));
    }

    let mut won = 0;
    for handle in handles {
        if handle.await.unwrap().is_ok() {
            won += 1;
        }
    }
    assert_eq!(won, 2);

    let remaining = harness.store.item_by_id(&item.id).await.unwrap().unwrap();
    assert_eq!(remaining.stock, 1);
}
