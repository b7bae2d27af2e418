//! Order transaction processor.
//!
//! Turns an untrusted checkout payload into a pending order. Prices are
//! server-authoritative: the unit price in every snapshot line comes from
//! the catalog record fetched here, and any price field in the request body
//! is ignored. All structural and business validation happens before the
//! atomic commit, so client errors never open a transaction; a storage fault
//! after the commit begins surfaces as `Transient` with no partial state.

use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::{Value, json};

use copperleaf_core::{ItemId, OrderId, OrderStatus, PaymentMethod, is_well_formed_id, round2};

use crate::audit::{AuditCategory, AuditEvent, AuditLevel, AuditSink};
use crate::config::PricingConfig;
use crate::error::AppError;
use crate::models::{Identity, Order, OrderLine, ShippingAddress};
use crate::services::validate::{Expected, Rule, validate};
use crate::store::{Store, StoreError};

/// Maximum number of distinct lines per order.
pub const MAX_LINES: usize = 50;
/// Maximum quantity per line.
pub const MAX_QUANTITY: u32 = 100;
/// Length cap for the free-text address fields.
const MAX_FIELD_LENGTH: usize = 100;
/// Length cap for postal codes.
const MAX_POSTAL_LENGTH: usize = 20;

/// What the caller gets back from a successful checkout.
#[derive(Debug, Serialize)]
pub struct OrderReceipt {
    pub order_id: OrderId,
    pub total_price: Decimal,
}

fn checkout_rules() -> Vec<Rule> {
    vec![
        Rule::new("items")
            .required()
            .expect(Expected::Array)
            .min_length(1)
            .max_length(MAX_LINES),
        Rule::new("full_name")
            .required()
            .expect(Expected::String)
            .min_length(1)
            .max_length(MAX_FIELD_LENGTH),
        Rule::new("street")
            .required()
            .expect(Expected::String)
            .min_length(1)
            .max_length(MAX_FIELD_LENGTH),
        Rule::new("city")
            .required()
            .expect(Expected::String)
            .min_length(1)
            .max_length(MAX_FIELD_LENGTH),
        Rule::new("postal_code")
            .required()
            .expect(Expected::String)
            .min_length(1)
            .max_length(MAX_POSTAL_LENGTH),
        Rule::new("country")
            .required()
            .expect(Expected::String)
            .min_length(1)
            .max_length(MAX_FIELD_LENGTH),
        Rule::new("payment_method")
            .required()
            .expect(Expected::String)
            .predicate(
                |v| v.as_str().is_some_and(|s| s.parse::<PaymentMethod>().is_ok()),
                "unknown payment method",
            ),
        Rule::new("expedited").expect(Expected::Boolean),
    ]
}

fn required_str<'a>(payload: &'a Value, field: &str) -> Result<&'a str, AppError> {
    payload
        .get(field)
        .and_then(Value::as_str)
        .map(str::trim)
        .ok_or_else(|| AppError::validation(format!("{field} is required")))
}

/// Parsed and shape-checked order lines. Collects every violation instead of
/// stopping at the first.
///
/// An item id may appear on at most one line. Splitting demand for one item
/// across lines would otherwise let each line pass the stock check against
/// the same undecremented count.
fn parse_lines(payload: &Value) -> Result<Vec<(ItemId, u32)>, AppError> {
    let Some(raw) = payload.get("items").and_then(Value::as_array) else {
        return Err(AppError::validation("items is required"));
    };

    let mut lines = Vec::with_capacity(raw.len());
    let mut errors = Vec::new();
    let mut seen = std::collections::HashSet::new();
    for (i, entry) in raw.iter().enumerate() {
        let id = entry.get("id").and_then(Value::as_str);
        let quantity = entry.get("quantity").and_then(Value::as_u64);

        match id {
            Some(id) if is_well_formed_id(id) => {}
            _ => errors.push(format!("items[{i}].id must be a well-formed item id")),
        }
        match quantity {
            Some(q) if (1..=u64::from(MAX_QUANTITY)).contains(&q) => {}
            _ => errors.push(format!(
                "items[{i}].quantity must be an integer between 1 and {MAX_QUANTITY}"
            )),
        }

        if let (Some(id), Some(quantity)) = (id, quantity)
            && let (Ok(id), Ok(quantity)) = (id.parse::<ItemId>(), u32::try_from(quantity))
            && (1..=MAX_QUANTITY).contains(&quantity)
        {
            if seen.insert(id.clone()) {
                lines.push((id, quantity));
            } else {
                errors.push(format!("items[{i}].id duplicates an earlier line"));
            }
        }
    }

    if errors.is_empty() {
        Ok(lines)
    } else {
        Err(AppError::Validation(errors))
    }
}

/// Validate a checkout payload, price it from the catalog, and commit it
/// atomically.
///
/// # Errors
///
/// `Validation` for structural violations or insufficient stock detected
/// before the commit, `NotFound` for a missing or deleted item, `Transient`
/// when the commit aborts on a storage fault (safe to resubmit), `Conflict`
/// or `Validation` when a concurrent order won a stock race.
pub async fn place_order(
    store: &dyn Store,
    audit: &AuditSink,
    pricing: &PricingConfig,
    caller: &Identity,
    payload: &Value,
) -> Result<OrderReceipt, AppError> {
    validate(payload, &checkout_rules()).into_result()?;
    let requested = parse_lines(payload)?;

    let address = ShippingAddress {
        full_name: required_str(payload, "full_name")?.to_owned(),
        street: required_str(payload, "street")?.to_owned(),
        city: required_str(payload, "city")?.to_owned(),
        postal_code: required_str(payload, "postal_code")?.to_owned(),
        country: required_str(payload, "country")?.to_owned(),
    };
    let payment_method: PaymentMethod = required_str(payload, "payment_method")?
        .parse()
        .map_err(|_| AppError::validation("unknown payment method"))?;
    let expedited = payload
        .get("expedited")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    // Re-fetch every item and snapshot it at the server-held price.
    let mut lines = Vec::with_capacity(requested.len());
    let mut items_price = Decimal::ZERO;
    for (item_id, quantity) in requested {
        let item = store
            .item_by_id(&item_id)
            .await?
            .filter(|item| !item.is_deleted())
            .ok_or_else(|| AppError::NotFound(format!("item {item_id} not found")))?;

        if i64::from(item.stock) < i64::from(quantity) {
            return Err(AppError::validation(format!(
                "insufficient stock for item {item_id}"
            )));
        }

        items_price += item.price * Decimal::from(quantity);
        lines.push(OrderLine {
            item_id: item.id,
            name: item.name,
            unit_price: item.price,
            quantity,
        });
    }

    // Each monetary field is rounded exactly once; intermediate sums are not.
    let items_price = round2(items_price);
    let tax_price = round2(items_price * pricing.tax_rate);
    let shipping_price = if items_price >= pricing.free_shipping_threshold {
        Decimal::ZERO
    } else {
        pricing.flat_shipping_fee
    };
    let total_price = round2(items_price + tax_price + shipping_price);

    let now = chrono::Utc::now();
    let order = Order {
        id: OrderId::generate(),
        user_id: caller.id.clone(),
        lines,
        address,
        payment_method,
        items_price,
        tax_price,
        shipping_price,
        total_price,
        status: OrderStatus::Pending,
        is_paid: false,
        is_delivered: false,
        expedited,
        payment: None,
        delivered_at: None,
        delivered_by: None,
        delivery_note: None,
        created_at: now,
        updated_at: now,
    };
    let order_id = order.id.clone();

    match store.commit_checkout(order).await {
        Ok(()) => {}
        // A concurrent order may have taken the stock between validation
        // and commit; the abort left no partial state either way.
        Err(e @ (StoreError::InsufficientStock { .. } | StoreError::NotFound)) => {
            return Err(e.into());
        }
        Err(StoreError::Storage(e)) => {
            return Err(AppError::Transient(format!("checkout aborted: {e}")));
        }
        Err(e) => return Err(e.into()),
    }

    audit.record(
        AuditEvent::new(AuditLevel::Info, AuditCategory::Order, "order_created")
            .actor(&caller.id)
            .subject(&order_id)
            .context(json!({ "total_price": total_price.to_string() })),
    );

    Ok(OrderReceipt {
        order_id,
        total_price,
    })
}
