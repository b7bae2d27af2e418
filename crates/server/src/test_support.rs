//! Fixture builders shared by the unit tests.

use chrono::Utc;
use rust_decimal::Decimal;

use copperleaf_core::{Email, ItemId, OrderId, OrderStatus, PaymentMethod, Role, UserId};

use crate::models::{CatalogItem, Identity, Order, ShippingAddress};

pub fn identity_with_role(role: Role) -> Identity {
    let id = UserId::generate();
    let email = Email::parse(&format!("{}@example.com", id.as_str()))
        .unwrap_or_else(|_| unreachable!("hex local part is a valid email"));
    let now = Utc::now();
    Identity {
        id,
        name: "Test User".to_owned(),
        email,
        password_hash: None,
        role,
        deleted_at: None,
        deleted_by: None,
        created_at: now,
        updated_at: now,
    }
}

pub fn catalog_item(price: Decimal, stock: i32) -> CatalogItem {
    let now = Utc::now();
    CatalogItem {
        id: ItemId::generate(),
        name: "Test Item".to_owned(),
        price,
        stock,
        critical: false,
        deleted_at: None,
        rating_count: 0,
        rating_sum: 0,
        created_at: now,
        updated_at: now,
    }
}

pub fn complete_address() -> ShippingAddress {
    ShippingAddress {
        full_name: "Ada Lovelace".to_owned(),
        street: "1 Analytical Way".to_owned(),
        city: "London".to_owned(),
        postal_code: "EC1".to_owned(),
        country: "GB".to_owned(),
    }
}

/// A pending order with no lines, priced at 230.00 total.
pub fn pending_order(owner: &UserId) -> Order {
    let now = Utc::now();
    Order {
        id: OrderId::generate(),
        user_id: owner.clone(),
        lines: Vec::new(),
        address: complete_address(),
        payment_method: PaymentMethod::Card,
        items_price: Decimal::new(200, 0),
        tax_price: Decimal::new(30, 0),
        shipping_price: Decimal::ZERO,
        total_price: Decimal::new(23_000, 2),
        status: OrderStatus::Pending,
        is_paid: false,
        is_delivered: false,
        expedited: false,
        payment: None,
        delivered_at: None,
        delivered_by: None,
        delivery_note: None,
        created_at: now,
        updated_at: now,
    }
}
