//! Public catalog and rating routes.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::Value;

use copperleaf_core::ItemId;

use crate::error::AppError;
use crate::middleware::SessionUser;
use crate::models::CatalogItem;
use crate::services::{authz, catalog};
use crate::state::AppState;

/// Storefront view of a catalog item.
#[derive(Debug, Serialize)]
pub struct ItemView {
    pub id: ItemId,
    pub name: String,
    pub price: Decimal,
    pub stock: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub average_rating: Option<f64>,
    pub rating_count: i64,
}

impl From<CatalogItem> for ItemView {
    fn from(item: CatalogItem) -> Self {
        Self {
            average_rating: item.average_rating(),
            id: item.id,
            name: item.name,
            price: item.price,
            stock: item.stock,
            rating_count: item.rating_count,
        }
    }
}

/// GET /items
pub async fn index(State(state): State<AppState>) -> Result<Json<Vec<ItemView>>, AppError> {
    let items = state.store().list_items().await?;
    Ok(Json(items.into_iter().map(ItemView::from).collect()))
}

/// GET /items/{id}
pub async fn show(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
) -> Result<Json<ItemView>, AppError> {
    let item_id: ItemId = raw_id
        .parse()
        .map_err(|_| AppError::validation("malformed item id"))?;
    let item = state
        .store()
        .item_by_id(&item_id)
        .await?
        .filter(|item| !item.is_deleted())
        .ok_or_else(|| AppError::NotFound("item not found".to_owned()))?;
    Ok(Json(item.into()))
}

/// POST /items/{id}/ratings
pub async fn rate(
    State(state): State<AppState>,
    SessionUser(user_id): SessionUser,
    Path(raw_id): Path<String>,
    Json(payload): Json<Value>,
) -> Result<(StatusCode, Json<ItemView>), AppError> {
    let caller = authz::require_identity(
        state.store(),
        state.audit(),
        Some(&user_id),
        "/items/{id}/ratings",
    )
    .await?;

    let score = payload
        .get("score")
        .and_then(Value::as_u64)
        .and_then(|s| u8::try_from(s).ok())
        .ok_or_else(|| AppError::validation("score must be an integer between 1 and 5"))?;

    let item = catalog::rate_item(state.store(), state.audit(), &caller, &raw_id, score).await?;
    Ok((StatusCode::CREATED, Json(item.into())))
}
