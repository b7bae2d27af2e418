//! Catalog item domain type.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use copperleaf_core::ItemId;

/// A purchasable catalog item.
///
/// The price is authoritative: order totals are always computed from the
/// server-held price, never from client input. Stock is only mutated inside
/// an order transaction or through a validated admin update.
#[derive(Debug, Clone)]
pub struct CatalogItem {
    /// Unique item id.
    pub id: ItemId,
    /// Display name.
    pub name: String,
    /// Server-set unit price.
    pub price: Decimal,
    /// Units available. Never negative.
    pub stock: i32,
    /// Critical items may only be mutated by super-admins.
    pub critical: bool,
    /// When the item was soft-deleted, if ever.
    pub deleted_at: Option<DateTime<Utc>>,
    /// Number of ratings submitted.
    pub rating_count: i64,
    /// Sum of all rating scores (1-5 each).
    pub rating_sum: i64,
    /// When the item was created.
    pub created_at: DateTime<Utc>,
    /// When the item was last updated.
    pub updated_at: DateTime<Utc>,
}

impl CatalogItem {
    /// Whether this item has been soft-deleted.
    #[must_use]
    pub const fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Average rating, if any ratings have been submitted.
    #[must_use]
    pub fn average_rating(&self) -> Option<f64> {
        if self.rating_count == 0 {
            return None;
        }
        #[allow(clippy::cast_precision_loss)]
        Some(self.rating_sum as f64 / self.rating_count as f64)
    }
}
