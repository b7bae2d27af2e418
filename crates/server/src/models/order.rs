//! Order domain types.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use copperleaf_core::{Email, ItemId, OrderId, OrderStatus, PaymentMethod, PaymentStatus, UserId};

/// A shipping address: five required, trimmed, length-capped fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShippingAddress {
    pub full_name: String,
    pub street: String,
    pub city: String,
    pub postal_code: String,
    pub country: String,
}

impl ShippingAddress {
    /// Whether every field is present after trimming.
    ///
    /// Used by fulfillment as a structural-completeness gate before an order
    /// may be handed to delivery.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        [
            &self.full_name,
            &self.street,
            &self.city,
            &self.postal_code,
            &self.country,
        ]
        .iter()
        .all(|f| !f.trim().is_empty())
    }
}

/// An immutable per-item snapshot taken at checkout.
///
/// The unit price is the server-held catalog price at the time of the order,
/// never a client-supplied value. The snapshot survives later catalog edits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderLine {
    pub item_id: ItemId,
    pub name: String,
    pub unit_price: Decimal,
    pub quantity: u32,
}

/// The settlement record attached to a paid order.
///
/// `transaction_id` is unique across all orders; a confirmation can settle
/// at most one order. `amount` is always the order's server-computed total.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentResult {
    pub transaction_id: String,
    pub status: PaymentStatus,
    pub payer_email: Email,
    pub amount: Decimal,
    pub paid_at: DateTime<Utc>,
}

/// An order.
///
/// Created pending by checkout, settled by the payment worker, delivered by
/// the fulfillment worker. Never physically deleted.
#[derive(Debug, Clone)]
pub struct Order {
    pub id: OrderId,
    /// Owning identity.
    pub user_id: UserId,
    pub lines: Vec<OrderLine>,
    pub address: ShippingAddress,
    pub payment_method: PaymentMethod,
    /// Sum of line prices, server-computed.
    pub items_price: Decimal,
    pub tax_price: Decimal,
    pub shipping_price: Decimal,
    /// Always server-computed from the snapshot; never copied from client input.
    pub total_price: Decimal,
    pub status: OrderStatus,
    pub is_paid: bool,
    pub is_delivered: bool,
    /// Expedited orders skip the short-delivery-window anomaly flag.
    pub expedited: bool,
    pub payment: Option<PaymentResult>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub delivered_by: Option<UserId>,
    pub delivery_note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Apply a settlement, keeping the status booleans in sync.
    pub fn settle(&mut self, payment: PaymentResult) {
        self.updated_at = payment.paid_at;
        self.payment = Some(payment);
        self.is_paid = true;
        self.status = OrderStatus::Paid;
    }

    /// Apply a delivery, keeping the status booleans in sync.
    pub fn deliver(&mut self, by: UserId, note: Option<String>, at: DateTime<Utc>) {
        self.is_delivered = true;
        self.status = OrderStatus::Delivered;
        self.delivered_at = Some(at);
        self.delivered_by = Some(by);
        self.delivery_note = note;
        self.updated_at = at;
    }

    /// A paid order that has not yet been delivered.
    ///
    /// Identities holding such orders cannot be deleted.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.is_paid && !self.is_delivered
    }
}
