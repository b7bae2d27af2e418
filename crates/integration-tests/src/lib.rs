//! Shared fixtures for the service-level integration tests.
//!
//! Everything runs against the in-memory store, which implements the same
//! transactional contract as the `PostgreSQL` store.

use chrono::Utc;
use rust_decimal::Decimal;
use serde_json::{Value, json};

use copperleaf_core::{Email, ItemId, OrderId, OrderStatus, PaymentMethod, Role, UserId};
use copperleaf_server::audit::AuditSink;
use copperleaf_server::config::PricingConfig;
use copperleaf_server::models::{CatalogItem, Identity, Order, ShippingAddress};
use copperleaf_server::store::{MemoryStore, Store, StoreError};

/// A memory-backed store, silent audit sink, and default pricing.
pub struct Harness {
    pub store: MemoryStore,
    pub audit: AuditSink,
    pub pricing: PricingConfig,
}

impl Harness {
    #[must_use]
    pub fn new() -> Self {
        Self {
            store: MemoryStore::new(),
            audit: AuditSink::disabled(),
            pricing: PricingConfig::default(),
        }
    }

    /// Insert and return an identity with the given role.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn identity(&self, role: Role) -> Result<Identity, StoreError> {
        let identity = make_identity(role);
        self.store.insert_identity(identity.clone()).await?;
        Ok(identity)
    }

    /// Insert and return a catalog item.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn item(&self, price: Decimal, stock: i32) -> Result<CatalogItem, StoreError> {
        let item = make_item(price, stock);
        self.store.upsert_item(item.clone()).await?;
        Ok(item)
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}

/// An identity fixture with a unique email.
#[must_use]
pub fn make_identity(role: Role) -> Identity {
    let id = UserId::generate();
    #[allow(clippy::unwrap_used)] // hex local part is always a valid email
    let email = Email::parse(&format!("{}@example.com", id.as_str())).unwrap();
    let now = Utc::now();
    Identity {
        id,
        name: "Integration Fixture".to_owned(),
        email,
        password_hash: None,
        role,
        deleted_at: None,
        deleted_by: None,
        created_at: now,
        updated_at: now,
    }
}

/// A catalog item fixture.
#[must_use]
pub fn make_item(price: Decimal, stock: i32) -> CatalogItem {
    let now = Utc::now();
    CatalogItem {
        id: ItemId::generate(),
        name: "Fixture Item".to_owned(),
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

/// A pending order fixture with a 230.00 total, priced as 200.00 in items,
/// 30.00 tax, and free shipping.
#[must_use]
pub fn make_pending_order(owner: &UserId) -> Order {
    let now = Utc::now();
    Order {
        id: OrderId::generate(),
        user_id: owner.clone(),
        lines: Vec::new(),
        address: ShippingAddress {
            full_name: "Grace Hopper".to_owned(),
            street: "1 Compiler Court".to_owned(),
            city: "Arlington".to_owned(),
            postal_code: "22201".to_owned(),
            country: "US".to_owned(),
        },
        payment_method: PaymentMethod::Card,
        items_price: Decimal::new(20_000, 2),
        tax_price: Decimal::new(3_000, 2),
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

/// A well-formed single-line checkout payload.
#[must_use]
pub fn checkout_payload(item: &ItemId, quantity: u32) -> Value {
    json!({
        "items": [{ "id": item.as_str(), "quantity": quantity }],
        "full_name": "Grace Hopper",
        "street": "1 Compiler Court",
        "city": "Arlington",
        "postal_code": "22201",
        "country": "US",
        "payment_method": "card",
    })
}

/// A well-formed payment confirmation.
#[must_use]
pub fn payment_payload(transaction_id: &str, amount: f64) -> Value {
    json!({
        "transaction_id": transaction_id,
        "status": "completed",
        "payer_email": "payer@example.com",
        "amount": amount,
    })
}
