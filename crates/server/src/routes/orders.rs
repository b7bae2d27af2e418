//! Checkout, order views, and payment settlement.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::Value;

use copperleaf_core::{OrderId, OrderStatus, PaymentMethod, UserId};

use crate::error::AppError;
use crate::middleware::SessionUser;
use crate::models::{Order, OrderLine, PaymentResult, ShippingAddress};
use crate::services::authz;
use crate::services::checkout::{self, OrderReceipt};
use crate::services::payment::{self, SettlementReceipt};
use crate::state::AppState;

/// Payment detail exposed only on admin views.
#[derive(Debug, Serialize)]
pub struct PaymentView {
    pub transaction_id: String,
    pub status: String,
    pub payer_email: String,
    pub amount: Decimal,
    pub paid_at: DateTime<Utc>,
}

impl From<PaymentResult> for PaymentView {
    fn from(p: PaymentResult) -> Self {
        Self {
            transaction_id: p.transaction_id,
            status: p.status.as_str().to_owned(),
            payer_email: p.payer_email.into_inner(),
            amount: p.amount,
            paid_at: p.paid_at,
        }
    }
}

/// An order as returned to clients.
///
/// The owner view omits payer identity and payment detail; the admin view
/// carries both for back-office diagnostics.
#[derive(Debug, Serialize)]
pub struct OrderView {
    pub id: OrderId,
    pub lines: Vec<OrderLine>,
    pub address: ShippingAddress,
    pub payment_method: PaymentMethod,
    pub items_price: Decimal,
    pub tax_price: Decimal,
    pub shipping_price: Decimal,
    pub total_price: Decimal,
    pub status: OrderStatus,
    pub is_paid: bool,
    pub is_delivered: bool,
    pub expedited: bool,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delivered_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<UserId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment: Option<PaymentView>,
}

impl OrderView {
    fn new(order: Order, admin_detail: bool) -> Self {
        Self {
            user_id: admin_detail.then(|| order.user_id.clone()),
            payment: if admin_detail {
                order.payment.map(PaymentView::from)
            } else {
                None
            },
            id: order.id,
            lines: order.lines,
            address: order.address,
            payment_method: order.payment_method,
            items_price: order.items_price,
            tax_price: order.tax_price,
            shipping_price: order.shipping_price,
            total_price: order.total_price,
            status: order.status,
            is_paid: order.is_paid,
            is_delivered: order.is_delivered,
            expedited: order.expedited,
            created_at: order.created_at,
            delivered_at: order.delivered_at,
        }
    }

    /// The owner-facing view.
    #[must_use]
    pub fn for_owner(order: Order) -> Self {
        Self::new(order, false)
    }

    /// The back-office view including payer identity and payment detail.
    #[must_use]
    pub fn for_admin(order: Order) -> Self {
        Self::new(order, true)
    }
}

/// POST /orders
pub async fn create(
    State(state): State<AppState>,
    SessionUser(user_id): SessionUser,
    Json(payload): Json<Value>,
) -> Result<(StatusCode, Json<OrderReceipt>), AppError> {
    let caller =
        authz::require_identity(state.store(), state.audit(), Some(&user_id), "/orders").await?;
    let receipt = checkout::place_order(
        state.store(),
        state.audit(),
        state.pricing(),
        &caller,
        &payload,
    )
    .await?;
    Ok((StatusCode::CREATED, Json(receipt)))
}

/// GET /orders
pub async fn index(
    State(state): State<AppState>,
    SessionUser(user_id): SessionUser,
) -> Result<Json<Vec<OrderView>>, AppError> {
    let caller =
        authz::require_identity(state.store(), state.audit(), Some(&user_id), "/orders").await?;
    let orders = state.store().orders_for(&caller.id).await?;
    Ok(Json(orders.into_iter().map(OrderView::for_owner).collect()))
}

/// GET /orders/{id}
pub async fn show(
    State(state): State<AppState>,
    SessionUser(user_id): SessionUser,
    Path(raw_id): Path<String>,
) -> Result<Json<OrderView>, AppError> {
    let caller =
        authz::require_identity(state.store(), state.audit(), Some(&user_id), "/orders/{id}")
            .await?;
    let order = authz::require_order_access(
        state.store(),
        state.audit(),
        &caller,
        &raw_id,
        true,
        "/orders/{id}",
    )
    .await?;

    let view = if caller.role.is_admin() {
        OrderView::for_admin(order)
    } else {
        OrderView::for_owner(order)
    };
    Ok(Json(view))
}

/// POST /orders/{id}/pay
pub async fn pay(
    State(state): State<AppState>,
    SessionUser(user_id): SessionUser,
    Path(raw_id): Path<String>,
    Json(payload): Json<Value>,
) -> Result<Json<SettlementReceipt>, AppError> {
    let caller = authz::require_identity(
        state.store(),
        state.audit(),
        Some(&user_id),
        "/orders/{id}/pay",
    )
    .await?;
    let receipt =
        payment::settle(state.store(), state.audit(), &caller, &raw_id, &payload).await?;
    Ok(Json(receipt))
}
