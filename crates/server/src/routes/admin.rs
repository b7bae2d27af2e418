//! Back-office routes.
//!
//! Every handler re-derives the caller's role through the authorization
//! gate; every mutation additionally verifies the anti-forgery token from
//! the `x-csrf-token` header against the freshly-resolved identity.

use axum::{
    Json,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use copperleaf_core::{OrderId, Role, UserId};

use crate::error::AppError;
use crate::middleware::SessionUser;
use crate::models::Identity;
use crate::routes::auth::ProfileView;
use crate::routes::catalog::ItemView;
use crate::routes::orders::OrderView;
use crate::services::csrf::CSRF_HEADER;
use crate::services::{accounts, authz, catalog, fulfillment};
use crate::state::AppState;

fn verify_csrf(state: &AppState, caller: &Identity, headers: &HeaderMap) -> Result<(), AppError> {
    let token = headers.get(CSRF_HEADER).and_then(|v| v.to_str().ok());
    state.csrf().verify(&caller.id, token)
}

async fn require_admin(
    state: &AppState,
    user_id: &UserId,
    minimum: Role,
    endpoint: &str,
) -> Result<Identity, AppError> {
    authz::require_role(state.store(), state.audit(), Some(user_id), minimum, endpoint).await
}

#[derive(Debug, Serialize)]
pub struct CsrfTokenView {
    pub token: String,
}

/// GET /admin/csrf
pub async fn csrf_token(
    State(state): State<AppState>,
    SessionUser(user_id): SessionUser,
) -> Result<Json<CsrfTokenView>, AppError> {
    let caller = require_admin(&state, &user_id, Role::Admin, "/admin/csrf").await?;
    let token = state.csrf().issue(&caller.id)?;
    Ok(Json(CsrfTokenView { token }))
}

/// GET /admin/orders
pub async fn list_orders(
    State(state): State<AppState>,
    SessionUser(user_id): SessionUser,
) -> Result<Json<Vec<OrderView>>, AppError> {
    require_admin(&state, &user_id, Role::Admin, "/admin/orders").await?;
    let orders = state.store().list_orders().await?;
    Ok(Json(orders.into_iter().map(OrderView::for_admin).collect()))
}

#[derive(Debug, Serialize)]
pub struct DeliveryView {
    pub order_id: OrderId,
    pub delivered_at: DateTime<Utc>,
}

/// POST /admin/orders/{id}/deliver
pub async fn deliver_order(
    State(state): State<AppState>,
    SessionUser(user_id): SessionUser,
    Path(raw_id): Path<String>,
    headers: HeaderMap,
    Json(payload): Json<Value>,
) -> Result<Json<DeliveryView>, AppError> {
    let caller =
        require_admin(&state, &user_id, Role::Admin, "/admin/orders/{id}/deliver").await?;
    verify_csrf(&state, &caller, &headers)?;

    let note = payload.get("note").and_then(Value::as_str);
    let order = fulfillment::deliver(
        state.store(),
        state.audit(),
        &caller,
        &raw_id,
        note,
        Utc::now(),
    )
    .await?;

    let delivered_at = order
        .delivered_at
        .ok_or_else(|| AppError::Internal("delivered order lost its timestamp".to_owned()))?;
    Ok(Json(DeliveryView {
        order_id: order.id,
        delivered_at,
    }))
}

/// PUT /admin/items/{id}
pub async fn upsert_item(
    State(state): State<AppState>,
    SessionUser(user_id): SessionUser,
    Path(raw_id): Path<String>,
    headers: HeaderMap,
    Json(payload): Json<Value>,
) -> Result<Json<ItemView>, AppError> {
    let caller = require_admin(&state, &user_id, Role::Admin, "/admin/items/{id}").await?;
    verify_csrf(&state, &caller, &headers)?;

    let item =
        catalog::upsert_item(state.store(), state.audit(), &caller, &raw_id, &payload).await?;
    Ok(Json(item.into()))
}

/// PUT /admin/users/{id}/role
pub async fn update_role(
    State(state): State<AppState>,
    SessionUser(user_id): SessionUser,
    Path(raw_id): Path<String>,
    headers: HeaderMap,
    Json(payload): Json<Value>,
) -> Result<Json<ProfileView>, AppError> {
    let caller =
        require_admin(&state, &user_id, Role::SuperAdmin, "/admin/users/{id}/role").await?;
    verify_csrf(&state, &caller, &headers)?;

    let new_role: Role = payload
        .get("role")
        .and_then(Value::as_str)
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| AppError::validation("role must be one of user, admin, super_admin"))?;

    let updated =
        accounts::update_role(state.store(), state.audit(), &caller, &raw_id, new_role).await?;
    Ok(Json(updated.into()))
}

/// DELETE /admin/users/{id}
pub async fn delete_user(
    State(state): State<AppState>,
    SessionUser(user_id): SessionUser,
    Path(raw_id): Path<String>,
    headers: HeaderMap,
) -> Result<StatusCode, AppError> {
    let caller = require_admin(&state, &user_id, Role::SuperAdmin, "/admin/users/{id}").await?;
    verify_csrf(&state, &caller, &headers)?;

    accounts::delete_identity(state.store(), state.audit(), &caller, &raw_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
