//! `PostgreSQL` store.
//!
//! Queries are runtime-checked (`sqlx::query` / `query_as`) because the same
//! [`Store`] trait must also be implementable in memory; the schema lives in
//! `crates/server/migrations` and is applied via the CLI, never on startup.
//!
//! Atomicity: checkout and settlement each run inside a single database
//! transaction. Stock decrements use a guarded `UPDATE ... WHERE stock >= $n`
//! so a concurrent checkout can never drive stock negative, and the
//! `payment_transaction_id` unique index backs up the in-transaction replay
//! check.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use secrecy::ExposeSecret;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

use copperleaf_core::{Email, ItemId, OrderId, OrderStatus, PaymentMethod, Role, UserId};

use crate::models::{CatalogItem, Identity, Order, OrderLine, PaymentResult, ShippingAddress};

use super::{Store, StoreError};

/// Create a `PostgreSQL` connection pool with sensible defaults.
///
/// # Errors
///
/// Returns `sqlx::Error` if the connection cannot be established.
pub async fn create_pool(database_url: &secrecy::SecretString) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url.expose_secret())
        .await
}

// =============================================================================
// Internal Row Types
// =============================================================================

#[derive(Debug, sqlx::FromRow)]
struct IdentityRow {
    id: UserId,
    name: String,
    email: Email,
    password_hash: Option<String>,
    role: Role,
    deleted_at: Option<DateTime<Utc>>,
    deleted_by: Option<UserId>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<IdentityRow> for Identity {
    fn from(row: IdentityRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            email: row.email,
            password_hash: row.password_hash,
            role: row.role,
            deleted_at: row.deleted_at,
            deleted_by: row.deleted_by,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ItemRow {
    id: ItemId,
    name: String,
    price: Decimal,
    stock: i32,
    critical: bool,
    deleted_at: Option<DateTime<Utc>>,
    rating_count: i64,
    rating_sum: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<ItemRow> for CatalogItem {
    fn from(row: ItemRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            price: row.price,
            stock: row.stock,
            critical: row.critical,
            deleted_at: row.deleted_at,
            rating_count: row.rating_count,
            rating_sum: row.rating_sum,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct OrderRow {
    id: OrderId,
    user_id: UserId,
    full_name: String,
    street: String,
    city: String,
    postal_code: String,
    country: String,
    payment_method: PaymentMethod,
    items_price: Decimal,
    tax_price: Decimal,
    shipping_price: Decimal,
    total_price: Decimal,
    status: OrderStatus,
    is_paid: bool,
    is_delivered: bool,
    expedited: bool,
    payment_transaction_id: Option<String>,
    payment_status: Option<String>,
    payer_email: Option<Email>,
    payment_amount: Option<Decimal>,
    paid_at: Option<DateTime<Utc>>,
    delivered_at: Option<DateTime<Utc>>,
    delivered_by: Option<UserId>,
    delivery_note: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, sqlx::FromRow)]
struct OrderLineRow {
    item_id: ItemId,
    name: String,
    unit_price: Decimal,
    quantity: i32,
}

impl TryFrom<OrderLineRow> for OrderLine {
    type Error = StoreError;

    fn try_from(row: OrderLineRow) -> Result<Self, Self::Error> {
        let quantity = u32::try_from(row.quantity)
            .map_err(|_| StoreError::DataCorruption("negative line quantity".to_owned()))?;
        Ok(Self {
            item_id: row.item_id,
            name: row.name,
            unit_price: row.unit_price,
            quantity,
        })
    }
}

impl OrderRow {
    fn into_order(self, lines: Vec<OrderLine>) -> Result<Order, StoreError> {
        let payment = match (
            self.payment_transaction_id,
            self.payment_status,
            self.payer_email,
            self.payment_amount,
            self.paid_at,
        ) {
            (Some(transaction_id), Some(status), Some(payer_email), Some(amount), Some(paid_at)) => {
                let status = status.parse().map_err(|e: String| {
                    StoreError::DataCorruption(format!("invalid payment status: {e}"))
                })?;
                Some(PaymentResult {
                    transaction_id,
                    status,
                    payer_email,
                    amount,
                    paid_at,
                })
            }
            (None, None, None, None, None) => None,
            _ => {
                return Err(StoreError::DataCorruption(
                    "partial payment result columns".to_owned(),
                ));
            }
        };

        Ok(Order {
            id: self.id,
            user_id: self.user_id,
            lines,
            address: ShippingAddress {
                full_name: self.full_name,
                street: self.street,
                city: self.city,
                postal_code: self.postal_code,
                country: self.country,
            },
            payment_method: self.payment_method,
            items_price: self.items_price,
            tax_price: self.tax_price,
            shipping_price: self.shipping_price,
            total_price: self.total_price,
            status: self.status,
            is_paid: self.is_paid,
            is_delivered: self.is_delivered,
            expedited: self.expedited,
            payment,
            delivered_at: self.delivered_at,
            delivered_by: self.delivered_by,
            delivery_note: self.delivery_note,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

const ORDER_COLUMNS: &str = "id, user_id, full_name, street, city, postal_code, country, \
     payment_method, items_price, tax_price, shipping_price, total_price, status, \
     is_paid, is_delivered, expedited, payment_transaction_id, payment_status, \
     payer_email, payment_amount, paid_at, delivered_at, delivered_by, delivery_note, \
     created_at, updated_at";

// =============================================================================
// Store
// =============================================================================

/// `PostgreSQL`-backed store.
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Wrap an existing connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The underlying pool (for session storage and health checks).
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Lock every active super-admin row for the rest of the transaction and
    /// return the count. Quorum checks behind this lock cannot race.
    async fn lock_active_super_admins(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    ) -> Result<i64, StoreError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM ( \
                 SELECT id FROM identity \
                 WHERE role = 'super_admin' AND deleted_at IS NULL \
                 FOR UPDATE \
             ) AS locked",
        )
        .fetch_one(&mut **tx)
        .await?;
        Ok(count)
    }

    async fn lines_for<'e, E>(executor: E, order_id: &OrderId) -> Result<Vec<OrderLine>, StoreError>
    where
        E: sqlx::PgExecutor<'e>,
    {
        let rows: Vec<OrderLineRow> = sqlx::query_as(
            "SELECT item_id, name, unit_price, quantity \
             FROM order_line WHERE order_id = $1 ORDER BY position",
        )
        .bind(order_id)
        .fetch_all(executor)
        .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn orders_from_rows(&self, rows: Vec<OrderRow>) -> Result<Vec<Order>, StoreError> {
        let mut orders = Vec::with_capacity(rows.len());
        for row in rows {
            let lines = Self::lines_for(&self.pool, &row.id).await?;
            orders.push(row.into_order(lines)?);
        }
        Ok(orders)
    }
}

fn map_unique_violation(e: sqlx::Error, conflict: &str) -> StoreError {
    if let sqlx::Error::Database(ref db_err) = e
        && db_err.is_unique_violation()
    {
        return StoreError::Conflict(conflict.to_owned());
    }
    StoreError::Storage(e)
}

#[async_trait]
impl Store for PgStore {
    async fn identity_by_id(&self, id: &UserId) -> Result<Option<Identity>, StoreError> {
        let row: Option<IdentityRow> = sqlx::query_as(
            "SELECT id, name, email, password_hash, role, deleted_at, deleted_by, \
                    created_at, updated_at \
             FROM identity WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Into::into))
    }

    async fn identity_by_email(&self, email: &Email) -> Result<Option<Identity>, StoreError> {
        let row: Option<IdentityRow> = sqlx::query_as(
            "SELECT id, name, email, password_hash, role, deleted_at, deleted_by, \
                    created_at, updated_at \
             FROM identity WHERE email = $1 AND deleted_at IS NULL",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Into::into))
    }

    async fn insert_identity(&self, identity: Identity) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO identity \
                 (id, name, email, password_hash, role, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(&identity.id)
        .bind(&identity.name)
        .bind(&identity.email)
        .bind(&identity.password_hash)
        .bind(identity.role)
        .bind(identity.created_at)
        .bind(identity.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_unique_violation(e, "email already registered"))?;

        Ok(())
    }

    async fn update_identity_role(
        &self,
        id: &UserId,
        role: Role,
    ) -> Result<Identity, StoreError> {
        let mut tx = self.pool.begin().await?;

        // Lock the active super-admin rows so the quorum count cannot change
        // between the check and the write. Concurrent demotions serialize
        // here; the second one sees the count the first one left behind.
        let supers = Self::lock_active_super_admins(&mut tx).await?;
        let target_is_active_super: Option<bool> = sqlx::query_scalar(
            "SELECT role = 'super_admin' AND deleted_at IS NULL \
             FROM identity WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(target_is_active_super) = target_is_active_super else {
            tx.rollback().await?;
            return Err(StoreError::NotFound);
        };
        if target_is_active_super && role < Role::SuperAdmin && supers <= 1 {
            tx.rollback().await?;
            return Err(StoreError::Conflict(
                "cannot demote the last super-admin".to_owned(),
            ));
        }

        let row: Option<IdentityRow> = sqlx::query_as(
            "UPDATE identity SET role = $2, updated_at = now() \
             WHERE id = $1 \
             RETURNING id, name, email, password_hash, role, deleted_at, deleted_by, \
                       created_at, updated_at",
        )
        .bind(id)
        .bind(role)
        .fetch_optional(&mut *tx)
        .await?;

        let identity = row.map(Into::into).ok_or(StoreError::NotFound)?;
        tx.commit().await?;
        Ok(identity)
    }

    async fn anonymize_identity(
        &self,
        id: &UserId,
        actor: &UserId,
        anonymized_email: Email,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        let supers = Self::lock_active_super_admins(&mut tx).await?;
        let target_is_active_super: Option<bool> = sqlx::query_scalar(
            "SELECT role = 'super_admin' AND deleted_at IS NULL \
             FROM identity WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(target_is_active_super) = target_is_active_super else {
            tx.rollback().await?;
            return Err(StoreError::NotFound);
        };
        if target_is_active_super && supers <= 1 {
            tx.rollback().await?;
            return Err(StoreError::Conflict(
                "cannot delete the last super-admin".to_owned(),
            ));
        }

        let result = sqlx::query(
            "UPDATE identity \
             SET email = $2, password_hash = NULL, deleted_at = $3, deleted_by = $4, \
                 updated_at = $3 \
             WHERE id = $1",
        )
        .bind(id)
        .bind(&anonymized_email)
        .bind(at)
        .bind(actor)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(StoreError::NotFound);
        }
        tx.commit().await?;
        Ok(())
    }

    async fn count_active_super_admins(&self) -> Result<i64, StoreError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM identity \
             WHERE role = 'super_admin' AND deleted_at IS NULL",
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    async fn count_active_orders_for(&self, user: &UserId) -> Result<i64, StoreError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM orders \
             WHERE user_id = $1 AND is_paid AND NOT is_delivered",
        )
        .bind(user)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    async fn item_by_id(&self, id: &ItemId) -> Result<Option<CatalogItem>, StoreError> {
        let row: Option<ItemRow> = sqlx::query_as(
            "SELECT id, name, price, stock, critical, deleted_at, rating_count, \
                    rating_sum, created_at, updated_at \
             FROM catalog_item WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Into::into))
    }

    async fn list_items(&self) -> Result<Vec<CatalogItem>, StoreError> {
        let rows: Vec<ItemRow> = sqlx::query_as(
            "SELECT id, name, price, stock, critical, deleted_at, rating_count, \
                    rating_sum, created_at, updated_at \
             FROM catalog_item WHERE deleted_at IS NULL \
             ORDER BY created_at DESC",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn upsert_item(&self, item: CatalogItem) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO catalog_item \
                 (id, name, price, stock, critical, deleted_at, rating_count, \
                  rating_sum, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
             ON CONFLICT (id) DO UPDATE SET \
                 name = EXCLUDED.name, price = EXCLUDED.price, \
                 stock = EXCLUDED.stock, critical = EXCLUDED.critical, \
                 deleted_at = EXCLUDED.deleted_at, updated_at = EXCLUDED.updated_at",
        )
        .bind(&item.id)
        .bind(&item.name)
        .bind(item.price)
        .bind(item.stock)
        .bind(item.critical)
        .bind(item.deleted_at)
        .bind(item.rating_count)
        .bind(item.rating_sum)
        .bind(item.created_at)
        .bind(item.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn insert_rating(
        &self,
        item: &ItemId,
        user: &UserId,
        score: u8,
    ) -> Result<CatalogItem, StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO item_rating (item_id, user_id, score, created_at) \
             VALUES ($1, $2, $3, now())",
        )
        .bind(item)
        .bind(user)
        .bind(i16::from(score))
        .execute(&mut *tx)
        .await
        .map_err(|e| map_unique_violation(e, "item already rated"))?;

        let row: Option<ItemRow> = sqlx::query_as(
            "UPDATE catalog_item \
             SET rating_count = rating_count + 1, rating_sum = rating_sum + $2, \
                 updated_at = now() \
             WHERE id = $1 AND deleted_at IS NULL \
             RETURNING id, name, price, stock, critical, deleted_at, rating_count, \
                       rating_sum, created_at, updated_at",
        )
        .bind(item)
        .bind(i64::from(score))
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            tx.rollback().await?;
            return Err(StoreError::NotFound);
        };

        tx.commit().await?;
        Ok(row.into())
    }

    async fn order_by_id(&self, id: &OrderId) -> Result<Option<Order>, StoreError> {
        let row: Option<OrderRow> =
            sqlx::query_as(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        let Some(row) = row else { return Ok(None) };
        let lines = Self::lines_for(&self.pool, &row.id).await?;
        Ok(Some(row.into_order(lines)?))
    }

    async fn orders_for(&self, user: &UserId) -> Result<Vec<Order>, StoreError> {
        let rows: Vec<OrderRow> = sqlx::query_as(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE user_id = $1 ORDER BY created_at DESC"
        ))
        .bind(user)
        .fetch_all(&self.pool)
        .await?;

        self.orders_from_rows(rows).await
    }

    async fn list_orders(&self) -> Result<Vec<Order>, StoreError> {
        let rows: Vec<OrderRow> = sqlx::query_as(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders ORDER BY created_at DESC"
        ))
        .fetch_all(&self.pool)
        .await?;

        self.orders_from_rows(rows).await
    }

    async fn commit_checkout(&self, order: Order) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        // Guarded decrement per line. Zero rows means the item vanished,
        // was soft-deleted, or lacks stock; a follow-up probe inside the
        // same transaction tells the two apart. Either way the transaction
        // rolls back whole.
        for line in &order.lines {
            let quantity = i32::try_from(line.quantity)
                .map_err(|_| StoreError::DataCorruption("quantity overflow".to_owned()))?;

            let result = sqlx::query(
                "UPDATE catalog_item SET stock = stock - $2, updated_at = now() \
                 WHERE id = $1 AND deleted_at IS NULL AND stock >= $2",
            )
            .bind(&line.item_id)
            .bind(quantity)
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() == 0 {
                let exists: bool = sqlx::query_scalar(
                    "SELECT EXISTS(SELECT 1 FROM catalog_item \
                     WHERE id = $1 AND deleted_at IS NULL)",
                )
                .bind(&line.item_id)
                .fetch_one(&mut *tx)
                .await?;

                tx.rollback().await?;
                return Err(if exists {
                    StoreError::InsufficientStock {
                        item_id: line.item_id.clone(),
                    }
                } else {
                    StoreError::NotFound
                });
            }
        }

        sqlx::query(
            "INSERT INTO orders \
                 (id, user_id, full_name, street, city, postal_code, country, \
                  payment_method, items_price, tax_price, shipping_price, total_price, \
                  status, is_paid, is_delivered, expedited, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, \
                     $13, $14, $15, $16, $17, $18)",
        )
        .bind(&order.id)
        .bind(&order.user_id)
        .bind(&order.address.full_name)
        .bind(&order.address.street)
        .bind(&order.address.city)
        .bind(&order.address.postal_code)
        .bind(&order.address.country)
        .bind(order.payment_method)
        .bind(order.items_price)
        .bind(order.tax_price)
        .bind(order.shipping_price)
        .bind(order.total_price)
        .bind(order.status)
        .bind(order.is_paid)
        .bind(order.is_delivered)
        .bind(order.expedited)
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&mut *tx)
        .await?;

        for (position, line) in order.lines.iter().enumerate() {
            let quantity = i32::try_from(line.quantity)
                .map_err(|_| StoreError::DataCorruption("quantity overflow".to_owned()))?;
            let position = i32::try_from(position)
                .map_err(|_| StoreError::DataCorruption("too many lines".to_owned()))?;

            sqlx::query(
                "INSERT INTO order_line (order_id, position, item_id, name, unit_price, quantity) \
                 VALUES ($1, $2, $3, $4, $5, $6)",
            )
            .bind(&order.id)
            .bind(position)
            .bind(&line.item_id)
            .bind(&line.name)
            .bind(line.unit_price)
            .bind(quantity)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn payment_transaction_exists(
        &self,
        transaction_id: &str,
    ) -> Result<bool, StoreError> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM orders WHERE payment_transaction_id = $1)",
        )
        .bind(transaction_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }

    async fn settle_payment(
        &self,
        id: &OrderId,
        payment: PaymentResult,
    ) -> Result<Order, StoreError> {
        let mut tx = self.pool.begin().await?;

        // Compare-and-set from unpaid to paid. The unique index on
        // payment_transaction_id closes the replay race at commit.
        let row: Option<OrderRow> = sqlx::query_as(&format!(
            "UPDATE orders \
             SET status = 'paid', is_paid = TRUE, payment_transaction_id = $2, \
                 payment_status = $3, payer_email = $4, payment_amount = $5, \
                 paid_at = $6, updated_at = $6 \
             WHERE id = $1 AND NOT is_paid AND status = 'pending' \
             RETURNING {ORDER_COLUMNS}"
        ))
        .bind(id)
        .bind(&payment.transaction_id)
        .bind(payment.status.as_str())
        .bind(&payment.payer_email)
        .bind(payment.amount)
        .bind(payment.paid_at)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_unique_violation(e, "payment transaction id already used"))?;

        let Some(row) = row else {
            let exists: bool =
                sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM orders WHERE id = $1)")
                    .bind(id)
                    .fetch_one(&mut *tx)
                    .await?;
            tx.rollback().await?;
            return Err(if exists {
                StoreError::Conflict("order already paid".to_owned())
            } else {
                StoreError::NotFound
            });
        };

        let lines = Self::lines_for(&mut *tx, &row.id).await?;
        let order = row.into_order(lines)?;
        tx.commit().await?;
        Ok(order)
    }

    async fn mark_delivered(
        &self,
        id: &OrderId,
        delivered_by: &UserId,
        note: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<Order, StoreError> {
        let mut tx = self.pool.begin().await?;

        let row: Option<OrderRow> = sqlx::query_as(&format!(
            "UPDATE orders \
             SET status = 'delivered', is_delivered = TRUE, delivered_at = $2, \
                 delivered_by = $3, delivery_note = $4, updated_at = $2 \
             WHERE id = $1 AND NOT is_delivered \
             RETURNING {ORDER_COLUMNS}"
        ))
        .bind(id)
        .bind(at)
        .bind(delivered_by)
        .bind(&note)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            let exists: bool =
                sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM orders WHERE id = $1)")
                    .bind(id)
                    .fetch_one(&mut *tx)
                    .await?;
            tx.rollback().await?;
            return Err(if exists {
                StoreError::Conflict("order already delivered".to_owned())
            } else {
                StoreError::NotFound
            });
        };

        let lines = Self::lines_for(&mut *tx, &row.id).await?;
        let order = row.into_order(lines)?;
        tx.commit().await?;
        Ok(order)
    }
}
