//! In-memory store.
//!
//! All tables live behind one async mutex, which makes every multi-step
//! operation trivially atomic: `commit_checkout` checks and decrements all
//! line stocks and inserts the order under a single lock acquisition, and
//! `settle_payment` re-checks the paid flag and transaction-id uniqueness
//! inside the same critical section that writes them.
//!
//! This is the implementation the test suites run against; it upholds the
//! same invariants as the `PostgreSQL` store.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use copperleaf_core::{Email, ItemId, OrderId, Role, UserId};

use crate::models::{CatalogItem, Identity, Order, PaymentResult};

use super::{Store, StoreError};

#[derive(Default)]
struct Tables {
    identities: HashMap<UserId, Identity>,
    items: HashMap<ItemId, CatalogItem>,
    ratings: HashSet<(ItemId, UserId)>,
    orders: HashMap<OrderId, Order>,
}

/// In-process store used by tests and local development.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

fn active_super_admins(tables: &Tables) -> usize {
    tables
        .identities
        .values()
        .filter(|i| !i.is_deleted() && i.role == Role::SuperAdmin)
        .count()
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn identity_by_id(&self, id: &UserId) -> Result<Option<Identity>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables.identities.get(id).cloned())
    }

    async fn identity_by_email(&self, email: &Email) -> Result<Option<Identity>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .identities
            .values()
            .find(|i| !i.is_deleted() && i.email == *email)
            .cloned())
    }

    async fn insert_identity(&self, identity: Identity) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        let duplicate = tables
            .identities
            .values()
            .any(|i| !i.is_deleted() && i.email == identity.email);
        if duplicate {
            return Err(StoreError::Conflict("email already registered".to_owned()));
        }
        tables.identities.insert(identity.id.clone(), identity);
        Ok(())
    }

    async fn update_identity_role(
        &self,
        id: &UserId,
        role: Role,
    ) -> Result<Identity, StoreError> {
        let mut tables = self.tables.lock().await;
        let target = tables.identities.get(id).ok_or(StoreError::NotFound)?;

        // The quorum re-check lives inside the critical section that writes
        // the role, so two concurrent demotions cannot both see a quorum.
        if !target.is_deleted()
            && target.role == Role::SuperAdmin
            && role < Role::SuperAdmin
            && active_super_admins(&tables) <= 1
        {
            return Err(StoreError::Conflict(
                "cannot demote the last super-admin".to_owned(),
            ));
        }

        let identity = tables.identities.get_mut(id).ok_or(StoreError::NotFound)?;
        identity.role = role;
        identity.updated_at = Utc::now();
        Ok(identity.clone())
    }

    async fn anonymize_identity(
        &self,
        id: &UserId,
        actor: &UserId,
        anonymized_email: Email,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        let target = tables.identities.get(id).ok_or(StoreError::NotFound)?;

        if !target.is_deleted()
            && target.role == Role::SuperAdmin
            && active_super_admins(&tables) <= 1
        {
            return Err(StoreError::Conflict(
                "cannot delete the last super-admin".to_owned(),
            ));
        }

        let identity = tables.identities.get_mut(id).ok_or(StoreError::NotFound)?;
        identity.email = anonymized_email;
        identity.password_hash = None;
        identity.deleted_at = Some(at);
        identity.deleted_by = Some(actor.clone());
        identity.updated_at = at;
        Ok(())
    }

    async fn count_active_super_admins(&self) -> Result<i64, StoreError> {
        let tables = self.tables.lock().await;
        Ok(i64::try_from(active_super_admins(&tables)).unwrap_or(i64::MAX))
    }

    async fn count_active_orders_for(&self, user: &UserId) -> Result<i64, StoreError> {
        let tables = self.tables.lock().await;
        let count = tables
            .orders
            .values()
            .filter(|o| o.user_id == *user && o.is_active())
            .count();
        Ok(i64::try_from(count).unwrap_or(i64::MAX))
    }

    async fn item_by_id(&self, id: &ItemId) -> Result<Option<CatalogItem>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables.items.get(id).cloned())
    }

    async fn list_items(&self) -> Result<Vec<CatalogItem>, StoreError> {
        let tables = self.tables.lock().await;
        let mut items: Vec<_> = tables
            .items
            .values()
            .filter(|i| !i.is_deleted())
            .cloned()
            .collect();
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(items)
    }

    async fn upsert_item(&self, item: CatalogItem) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        tables.items.insert(item.id.clone(), item);
        Ok(())
    }

    async fn insert_rating(
        &self,
        item: &ItemId,
        user: &UserId,
        score: u8,
    ) -> Result<CatalogItem, StoreError> {
        let mut tables = self.tables.lock().await;
        match tables.items.get(item) {
            Some(i) if !i.is_deleted() => {}
            _ => return Err(StoreError::NotFound),
        }
        if !tables.ratings.insert((item.clone(), user.clone())) {
            return Err(StoreError::Conflict("item already rated".to_owned()));
        }
        let record = tables
            .items
            .get_mut(item)
            .ok_or(StoreError::NotFound)?;
        record.rating_count += 1;
        record.rating_sum += i64::from(score);
        record.updated_at = Utc::now();
        Ok(record.clone())
    }

    async fn order_by_id(&self, id: &OrderId) -> Result<Option<Order>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables.orders.get(id).cloned())
    }

    async fn orders_for(&self, user: &UserId) -> Result<Vec<Order>, StoreError> {
        let tables = self.tables.lock().await;
        let mut orders: Vec<_> = tables
            .orders
            .values()
            .filter(|o| o.user_id == *user)
            .cloned()
            .collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(orders)
    }

    async fn list_orders(&self) -> Result<Vec<Order>, StoreError> {
        let tables = self.tables.lock().await;
        let mut orders: Vec<_> = tables.orders.values().cloned().collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(orders)
    }

    async fn commit_checkout(&self, order: Order) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;

        // Aggregate demand per item first: an item repeated across lines is
        // checked against stock as one combined quantity, not once per line.
        let mut demand: HashMap<ItemId, i32> = HashMap::new();
        for line in &order.lines {
            let quantity = i32::try_from(line.quantity)
                .map_err(|_| StoreError::DataCorruption("quantity overflow".to_owned()))?;
            let combined = demand.entry(line.item_id.clone()).or_insert(0);
            *combined = combined
                .checked_add(quantity)
                .ok_or_else(|| StoreError::DataCorruption("quantity overflow".to_owned()))?;
        }

        // Check every item before mutating anything, so a late failure
        // leaves no partial decrement.
        for (item_id, quantity) in &demand {
            match tables.items.get(item_id) {
                None => return Err(StoreError::NotFound),
                Some(item) if item.is_deleted() => return Err(StoreError::NotFound),
                Some(item) if item.stock < *quantity => {
                    return Err(StoreError::InsufficientStock {
                        item_id: item_id.clone(),
                    });
                }
                Some(_) => {}
            }
        }

        for (item_id, quantity) in &demand {
            let item = tables.items.get_mut(item_id).ok_or(StoreError::NotFound)?;
            item.stock -= quantity;
        }

        tables.orders.insert(order.id.clone(), order);
        Ok(())
    }

    async fn payment_transaction_exists(
        &self,
        transaction_id: &str,
    ) -> Result<bool, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables.orders.values().any(|o| {
            o.payment
                .as_ref()
                .is_some_and(|p| p.transaction_id == transaction_id)
        }))
    }

    async fn settle_payment(
        &self,
        id: &OrderId,
        payment: PaymentResult,
    ) -> Result<Order, StoreError> {
        let mut tables = self.tables.lock().await;

        // Re-check uniqueness inside the critical section that writes the
        // settlement, closing the race with a concurrent settle.
        let replay = tables.orders.values().any(|o| {
            o.payment
                .as_ref()
                .is_some_and(|p| p.transaction_id == payment.transaction_id)
        });
        if replay {
            return Err(StoreError::Conflict(
                "payment transaction id already used".to_owned(),
            ));
        }

        let order = tables.orders.get_mut(id).ok_or(StoreError::NotFound)?;
        if order.is_paid {
            return Err(StoreError::Conflict("order already paid".to_owned()));
        }
        order.settle(payment);
        Ok(order.clone())
    }

    async fn mark_delivered(
        &self,
        id: &OrderId,
        delivered_by: &UserId,
        note: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<Order, StoreError> {
        let mut tables = self.tables.lock().await;
        let order = tables.orders.get_mut(id).ok_or(StoreError::NotFound)?;
        if order.is_delivered {
            return Err(StoreError::Conflict("order already delivered".to_owned()));
        }
        order.deliver(delivered_by.clone(), note, at);
        Ok(order.clone())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::Utc;
    use copperleaf_core::{OrderStatus, PaymentMethod};
    use rust_decimal::dec;

    use crate::models::{OrderLine, ShippingAddress};

    fn item(stock: i32) -> CatalogItem {
        let now = Utc::now();
        CatalogItem {
            id: ItemId::generate(),
            name: "Widget".into(),
            price: dec!(10.00),
            stock,
            critical: false,
            deleted_at: None,
            rating_count: 0,
            rating_sum: 0,
            created_at: now,
            updated_at: now,
        }
    }

    fn order_for(item: &CatalogItem, quantity: u32) -> Order {
        let now = Utc::now();
        Order {
            id: OrderId::generate(),
            user_id: UserId::generate(),
            lines: vec![OrderLine {
                item_id: item.id.clone(),
                name: item.name.clone(),
                unit_price: item.price,
                quantity,
            }],
            address: ShippingAddress {
                full_name: "A".into(),
                street: "B".into(),
                city: "C".into(),
                postal_code: "D".into(),
                country: "E".into(),
            },
            payment_method: PaymentMethod::Card,
            items_price: dec!(10.00),
            tax_price: dec!(1.50),
            shipping_price: dec!(10.00),
            total_price: dec!(21.50),
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

    #[tokio::test]
    async fn test_checkout_decrements_stock() {
        let store = MemoryStore::new();
        let widget = item(5);
        store.upsert_item(widget.clone()).await.unwrap();

        store.commit_checkout(order_for(&widget, 3)).await.unwrap();

        let after = store.item_by_id(&widget.id).await.unwrap().unwrap();
        assert_eq!(after.stock, 2);
    }

    #[tokio::test]
    async fn test_checkout_rejects_oversell_without_partial_state() {
        let store = MemoryStore::new();
        let widget = item(2);
        store.upsert_item(widget.clone()).await.unwrap();

        let result = store.commit_checkout(order_for(&widget, 3)).await;
        assert!(matches!(result, Err(StoreError::InsufficientStock { .. })));

        let after = store.item_by_id(&widget.id).await.unwrap().unwrap();
        assert_eq!(after.stock, 2, "failed checkout must not touch stock");
    }

    #[tokio::test]
    async fn test_checkout_combines_duplicate_lines_before_stock_check() {
        let store = MemoryStore::new();
        let widget = item(3);
        store.upsert_item(widget.clone()).await.unwrap();

        // Two lines for the same item, 2 + 2 against stock 3. Checked per
        // line each would pass; combined they must not.
        let mut order = order_for(&widget, 2);
        let dup = order.lines.first().cloned().unwrap();
        order.lines.push(dup);

        let result = store.commit_checkout(order).await;
        assert!(matches!(result, Err(StoreError::InsufficientStock { .. })));

        let after = store.item_by_id(&widget.id).await.unwrap().unwrap();
        assert_eq!(after.stock, 3, "failed checkout must not touch stock");
    }

    #[tokio::test]
    async fn test_checkout_duplicate_lines_within_stock_decrement_combined() {
        let store = MemoryStore::new();
        let widget = item(4);
        store.upsert_item(widget.clone()).await.unwrap();

        let mut order = order_for(&widget, 2);
        let dup = order.lines.first().cloned().unwrap();
        order.lines.push(dup);

        store.commit_checkout(order).await.unwrap();
        let after = store.item_by_id(&widget.id).await.unwrap().unwrap();
        assert_eq!(after.stock, 0);
    }

    fn identity_with(role: Role) -> Identity {
        let id = UserId::generate();
        let email = Email::parse(&format!("{}@example.com", id.as_str())).unwrap();
        let now = Utc::now();
        Identity {
            id,
            name: "Fixture".into(),
            email,
            password_hash: None,
            role,
            deleted_at: None,
            deleted_by: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_role_update_guard_keeps_last_super_admin() {
        let store = MemoryStore::new();
        let first = identity_with(Role::SuperAdmin);
        let second = identity_with(Role::SuperAdmin);
        store.insert_identity(first.clone()).await.unwrap();
        store.insert_identity(second.clone()).await.unwrap();

        store
            .update_identity_role(&first.id, Role::Admin)
            .await
            .unwrap();

        // The guard sits in the store itself, behind the same lock as the
        // write, so it holds even when the caller skipped its own count.
        let err = store
            .update_identity_role(&second.id, Role::Admin)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
        assert_eq!(store.count_active_super_admins().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_anonymize_guard_keeps_last_super_admin() {
        let store = MemoryStore::new();
        let only = identity_with(Role::SuperAdmin);
        let actor = identity_with(Role::SuperAdmin);
        store.insert_identity(only.clone()).await.unwrap();
        store.insert_identity(actor.clone()).await.unwrap();

        store
            .anonymize_identity(
                &actor.id,
                &only.id,
                Email::parse("deleted-1@anonymized.invalid").unwrap(),
                Utc::now(),
            )
            .await
            .unwrap();

        let err = store
            .anonymize_identity(
                &only.id,
                &only.id,
                Email::parse("deleted-2@anonymized.invalid").unwrap(),
                Utc::now(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_settle_rejects_duplicate_transaction_id() {
        let store = MemoryStore::new();
        let widget = item(10);
        store.upsert_item(widget.clone()).await.unwrap();

        let first = order_for(&widget, 1);
        let second = order_for(&widget, 1);
        store.commit_checkout(first.clone()).await.unwrap();
        store.commit_checkout(second.clone()).await.unwrap();

        let payment = PaymentResult {
            transaction_id: "txn-12345678".into(),
            status: "completed".parse().unwrap(),
            payer_email: Email::parse("payer@example.com").unwrap(),
            amount: first.total_price,
            paid_at: Utc::now(),
        };

        store.settle_payment(&first.id, payment.clone()).await.unwrap();
        let replay = store.settle_payment(&second.id, payment).await;
        assert!(matches!(replay, Err(StoreError::Conflict(_))));
    }
}
