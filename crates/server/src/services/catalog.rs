//! Catalog management and ratings.
//!
//! Admin updates go through validation and the critical-item rule: items
//! flagged critical may only be mutated by super-admins. Stock set here is
//! an inventory correction; decrements during checkout happen only inside
//! the order transaction.

use chrono::Utc;
use rust_decimal::Decimal;
use serde_json::{Value, json};

use copperleaf_core::{ItemId, Role, round2};

use crate::audit::{AuditCategory, AuditEvent, AuditLevel, AuditSink};
use crate::error::AppError;
use crate::models::{CatalogItem, Identity};
use crate::services::validate::{Expected, Rule, validate};
use crate::store::{Store, StoreError};

const MAX_NAME_LENGTH: usize = 200;
const MAX_STOCK: f64 = 1_000_000.0;

fn item_rules() -> Vec<Rule> {
    vec![
        Rule::new("name")
            .required()
            .expect(Expected::String)
            .min_length(1)
            .max_length(MAX_NAME_LENGTH),
        Rule::new("price")
            .required()
            .expect(Expected::Number)
            .min(0.0),
        Rule::new("stock")
            .required()
            .expect(Expected::Integer)
            .min(0.0)
            .max(MAX_STOCK),
        Rule::new("critical").expect(Expected::Boolean),
    ]
}

/// Create or update a catalog item at `raw_item_id`.
///
/// The caller must already have passed the admin gate. Setting or touching
/// a critical item requires the super-admin role.
///
/// # Errors
///
/// `Validation` for a malformed id or payload, `Forbidden` when a plain
/// admin touches a critical item (existing or requested).
pub async fn upsert_item(
    store: &dyn Store,
    audit: &AuditSink,
    actor: &Identity,
    raw_item_id: &str,
    payload: &Value,
) -> Result<CatalogItem, AppError> {
    let item_id: ItemId = raw_item_id
        .parse()
        .map_err(|_| AppError::validation("malformed item id"))?;
    validate(payload, &item_rules()).into_result()?;

    let name = payload
        .get("name")
        .and_then(Value::as_str)
        .map(str::trim)
        .ok_or_else(|| AppError::validation("name is required"))?
        .to_owned();
    let price = payload
        .get("price")
        .and_then(Value::as_f64)
        .and_then(Decimal::from_f64_retain)
        .map(round2)
        .ok_or_else(|| AppError::validation("price is required"))?;
    let stock = payload
        .get("stock")
        .and_then(Value::as_i64)
        .and_then(|s| i32::try_from(s).ok())
        .ok_or_else(|| AppError::validation("stock is required"))?;
    let critical = payload
        .get("critical")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    let existing = store.item_by_id(&item_id).await?;
    let touches_critical = critical || existing.as_ref().is_some_and(|item| item.critical);
    if touches_critical && actor.role < Role::SuperAdmin {
        audit.record(
            AuditEvent::new(AuditLevel::Warn, AuditCategory::Authz, "critical_item_denied")
                .actor(&actor.id)
                .subject(&item_id),
        );
        return Err(AppError::Forbidden(
            "critical items require super-admin".to_owned(),
        ));
    }

    let now = Utc::now();
    let item = match existing {
        Some(mut item) => {
            item.name = name;
            item.price = price;
            item.stock = stock;
            item.critical = critical;
            item.deleted_at = None;
            item.updated_at = now;
            item
        }
        None => CatalogItem {
            id: item_id.clone(),
            name,
            price,
            stock,
            critical,
            deleted_at: None,
            rating_count: 0,
            rating_sum: 0,
            created_at: now,
            updated_at: now,
        },
    };
    store.upsert_item(item.clone()).await?;

    audit.record(
        AuditEvent::new(AuditLevel::Info, AuditCategory::Catalog, "item_updated")
            .actor(&actor.id)
            .subject(&item_id)
            .context(json!({
                "price": item.price.to_string(),
                "stock": item.stock,
                "critical": item.critical,
            })),
    );
    Ok(item)
}

/// Record a 1-5 rating for an item, once per user.
///
/// # Errors
///
/// `Validation` for a malformed id or score, `NotFound` for a missing or
/// deleted item, `Conflict` when the caller already rated it.
pub async fn rate_item(
    store: &dyn Store,
    audit: &AuditSink,
    caller: &Identity,
    raw_item_id: &str,
    score: u8,
) -> Result<CatalogItem, AppError> {
    let item_id: ItemId = raw_item_id
        .parse()
        .map_err(|_| AppError::validation("malformed item id"))?;
    if !(1..=5).contains(&score) {
        return Err(AppError::validation("score must be between 1 and 5"));
    }

    let item = match store.insert_rating(&item_id, &caller.id, score).await {
        Ok(item) => item,
        Err(StoreError::Conflict(_)) => {
            return Err(AppError::Conflict("item already rated".to_owned()));
        }
        Err(e) => return Err(e.into()),
    };

    audit.record(
        AuditEvent::new(AuditLevel::Info, AuditCategory::Catalog, "item_rated")
            .actor(&caller.id)
            .subject(&item_id)
            .context(json!({ "score": score })),
    );
    Ok(item)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use rust_decimal::dec;

    use crate::store::MemoryStore;
    use crate::test_support::{catalog_item, identity_with_role};

    fn item_payload(critical: bool) -> Value {
        json!({
            "name": "Copper Kettle",
            "price": 49.95,
            "stock": 12,
            "critical": critical,
        })
    }

    #[tokio::test]
    async fn test_admin_creates_plain_item() {
        let store = MemoryStore::new();
        let admin = identity_with_role(Role::Admin);
        let id = ItemId::generate();
        let item = upsert_item(
            &store,
            &AuditSink::disabled(),
            &admin,
            id.as_str(),
            &item_payload(false),
        )
        .await
        .unwrap();
        assert_eq!(item.price, dec!(49.95));
        assert_eq!(item.stock, 12);
    }

    #[tokio::test]
    async fn test_critical_item_requires_super_admin() {
        let store = MemoryStore::new();
        let admin = identity_with_role(Role::Admin);
        let root = identity_with_role(Role::SuperAdmin);
        let id = ItemId::generate();

        let err = upsert_item(
            &store,
            &AuditSink::disabled(),
            &admin,
            id.as_str(),
            &item_payload(true),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));

        assert!(
            upsert_item(
                &store,
                &AuditSink::disabled(),
                &root,
                id.as_str(),
                &item_payload(true),
            )
            .await
            .is_ok()
        );

        // Once critical, a plain admin cannot even un-flag it.
        let err = upsert_item(
            &store,
            &AuditSink::disabled(),
            &admin,
            id.as_str(),
            &item_payload(false),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
    }

    #[tokio::test]
    async fn test_duplicate_rating_is_conflict() {
        let store = MemoryStore::new();
        let user = identity_with_role(Role::User);
        let item = catalog_item(dec!(10), 5);
        let id = item.id.clone();
        store.upsert_item(item).await.unwrap();

        let rated = rate_item(&store, &AuditSink::disabled(), &user, id.as_str(), 4)
            .await
            .unwrap();
        assert_eq!(rated.rating_count, 1);
        assert_eq!(rated.rating_sum, 4);

        let err = rate_item(&store, &AuditSink::disabled(), &user, id.as_str(), 5)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_rating_aggregates_across_users() {
        let store = MemoryStore::new();
        let a = identity_with_role(Role::User);
        let b = identity_with_role(Role::User);
        let item = catalog_item(dec!(10), 5);
        let id = item.id.clone();
        store.upsert_item(item).await.unwrap();

        rate_item(&store, &AuditSink::disabled(), &a, id.as_str(), 2)
            .await
            .unwrap();
        let after = rate_item(&store, &AuditSink::disabled(), &b, id.as_str(), 4)
            .await
            .unwrap();
        assert_eq!(after.rating_count, 2);
        assert_eq!(after.rating_sum, 6);
        assert_eq!(after.average_rating(), Some(3.0));
    }

    #[tokio::test]
    async fn test_out_of_range_score_rejected() {
        let store = MemoryStore::new();
        let user = identity_with_role(Role::User);
        let item = catalog_item(dec!(10), 5);
        let id = item.id.clone();
        store.upsert_item(item).await.unwrap();

        let err = rate_item(&store, &AuditSink::disabled(), &user, id.as_str(), 6)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }
}
