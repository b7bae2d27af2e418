//! Storage abstraction.
//!
//! The workers never touch a database driver directly. They speak to a
//! [`Store`], which exposes the narrow identity/catalog/order interfaces and
//! the transactional operations (checkout commit, payment settlement,
//! delivery). Two implementations exist:
//!
//! - [`memory::MemoryStore`] - in-process tables behind a single async mutex,
//!   used by every test
//! - [`postgres::PgStore`] - `PostgreSQL`, with the same atomicity guarantees
//!   expressed as database transactions
//!
//! The correctness-critical contract is [`Store::commit_checkout`]: the
//! stock check-and-decrement for every line plus the order insert commit or
//! abort as one unit, so two callers racing for the last unit of an item can
//! never both succeed.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use copperleaf_core::{Email, ItemId, OrderId, Role, UserId};

use crate::models::{CatalogItem, Identity, Order, PaymentResult};

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Requested record was not found.
    #[error("not found")]
    NotFound,

    /// A line's ordered quantity exceeds the available stock.
    #[error("insufficient stock for item {item_id}")]
    InsufficientStock {
        /// The item whose stock ran out.
        item_id: ItemId,
    },

    /// Uniqueness or state-transition violation (duplicate email, duplicate
    /// payment transaction id, order already settled).
    #[error("conflict: {0}")]
    Conflict(String),

    /// Data in the store is corrupted or invalid.
    #[error("data corruption: {0}")]
    DataCorruption(String),

    /// Underlying storage failure. A mid-transaction abort leaves no partial
    /// state; the caller may safely retry.
    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),
}

/// The narrow storage interface the workers operate against.
#[async_trait]
pub trait Store: Send + Sync {
    // =========================================================================
    // Identities
    // =========================================================================

    /// Fetch an identity by id, including soft-deleted records.
    ///
    /// The authorization gate filters deleted identities itself so it can
    /// distinguish "never existed" from "revoked".
    async fn identity_by_id(&self, id: &UserId) -> Result<Option<Identity>, StoreError>;

    /// Fetch a non-deleted identity by its normalized email.
    async fn identity_by_email(&self, email: &Email) -> Result<Option<Identity>, StoreError>;

    /// Insert a new identity. Fails with [`StoreError::Conflict`] if the
    /// email is already registered.
    async fn insert_identity(&self, identity: Identity) -> Result<(), StoreError>;

    /// Change an identity's role, returning the updated record.
    ///
    /// Fails with [`StoreError::Conflict`] when the change would demote the
    /// last active super-admin. The check runs inside the same critical
    /// section as the write, so concurrent demotions cannot jointly empty
    /// the quorum.
    async fn update_identity_role(&self, id: &UserId, role: Role)
    -> Result<Identity, StoreError>;

    /// Soft-delete an identity: replace the email with an anonymized
    /// placeholder and set the deletion marker. The record itself remains.
    ///
    /// Fails with [`StoreError::Conflict`] when the target is the last
    /// active super-admin, under the same critical-section guarantee as
    /// [`Store::update_identity_role`].
    async fn anonymize_identity(
        &self,
        id: &UserId,
        actor: &UserId,
        anonymized_email: Email,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Number of non-deleted identities holding the super-admin role.
    async fn count_active_super_admins(&self) -> Result<i64, StoreError>;

    /// Number of paid-but-undelivered orders owned by an identity.
    async fn count_active_orders_for(&self, user: &UserId) -> Result<i64, StoreError>;

    // =========================================================================
    // Catalog
    // =========================================================================

    /// Fetch a catalog item by id, including soft-deleted records.
    async fn item_by_id(&self, id: &ItemId) -> Result<Option<CatalogItem>, StoreError>;

    /// List all non-deleted catalog items.
    async fn list_items(&self) -> Result<Vec<CatalogItem>, StoreError>;

    /// Insert or update a catalog item.
    async fn upsert_item(&self, item: CatalogItem) -> Result<(), StoreError>;

    /// Record a rating for an item and fold it into the aggregate.
    ///
    /// Fails with [`StoreError::Conflict`] if this user already rated the
    /// item, [`StoreError::NotFound`] if the item is missing or deleted.
    async fn insert_rating(
        &self,
        item: &ItemId,
        user: &UserId,
        score: u8,
    ) -> Result<CatalogItem, StoreError>;

    // =========================================================================
    // Orders
    // =========================================================================

    /// Fetch an order by id.
    async fn order_by_id(&self, id: &OrderId) -> Result<Option<Order>, StoreError>;

    /// List orders owned by an identity, newest first.
    async fn orders_for(&self, user: &UserId) -> Result<Vec<Order>, StoreError>;

    /// List every order, newest first. Admin views only.
    async fn list_orders(&self) -> Result<Vec<Order>, StoreError>;

    /// Atomically decrement stock for every line and insert the order.
    ///
    /// If any line's decrement would make stock negative, or any item has
    /// vanished since validation, the whole commit aborts with no partial
    /// state and the corresponding error is returned.
    async fn commit_checkout(&self, order: Order) -> Result<(), StoreError>;

    /// Whether any order already carries this payment transaction id.
    async fn payment_transaction_exists(&self, transaction_id: &str) -> Result<bool, StoreError>;

    /// Settle an order: compare-and-set from unpaid to paid.
    ///
    /// Fails with [`StoreError::Conflict`] if the order is already paid or
    /// the transaction id is already used by another order (the check is
    /// repeated inside the commit to close the race with a concurrent
    /// settlement). Returns the updated order.
    async fn settle_payment(
        &self,
        id: &OrderId,
        payment: PaymentResult,
    ) -> Result<Order, StoreError>;

    /// Mark a paid order delivered. Returns the updated order.
    async fn mark_delivered(
        &self,
        id: &OrderId,
        delivered_by: &UserId,
        note: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<Order, StoreError>;
}
