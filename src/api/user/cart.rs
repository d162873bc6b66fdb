use axum::{
    extract::{rejection::JsonRejection, Extension},
    http::StatusCode,
    response::Response,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Duration, Utc};
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, Condition, DatabaseConnection, EntityTrait,
    QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::{collections::HashMap, sync::Arc};
use validator::Validate;

use crate::api::error::ApiError;
use crate::entities::{
    cart::{self, Entity as CartEntity},
    plant_sku::{self, Entity as PlantSkuEntity},
};
use crate::middleware::{auth::Claims, logging::to_response};

/// A cart not synced for this long is treated as gone.
pub const CART_TTL_DAYS: i64 = 7;

pub fn cart_router(db: Arc<DatabaseConnection>) -> Router {
    Router::new()
        .route("/cart", get(get_cart))
        .route("/cart/sync", post(sync_cart))
        .route("/cart/sync-stock", post(sync_stock))
        .layer(Extension(db))
}

async fn get_cart(
    Extension(db): Extension<Arc<DatabaseConnection>>,
    Extension(claims): Extension<Claims>,
) -> Result<Response, ApiError> {
    let entries: Vec<CartEntry> = CartEntity::find()
        .filter(cart::Column::UserId.eq(claims.user_id))
        .filter(cart::Column::UpdatedAt.gte(expiry_cutoff(Utc::now())))
        .order_by_asc(cart::Column::Id)
        .all(&*db)
        .await?
        .into_iter()
        .map(|entry| CartEntry {
            id: entry.plant_id,
            size: entry.size,
            quantity: entry.quantity,
        })
        .collect();

    Ok(to_response(
        (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "message": "cart",
                "data": entries,
            })),
        ),
        Ok(()),
    ))
}

/// Applies an incremental cart change: drops an expired cart, upserts keyed
/// by (plant, size), applies deletions, then refreshes the expiry of
/// everything left.
async fn sync_cart(
    Extension(db): Extension<Arc<DatabaseConnection>>,
    Extension(claims): Extension<Claims>,
    payload: Result<Json<CartSyncRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(payload) = payload?;
    payload.validate()?;

    if payload.added_or_updated_items.is_empty() && payload.deleted_items.is_empty() {
        return Ok(to_response(
            (
                StatusCode::OK,
                Json(json!({
                    "success": true,
                    "message": "nothing to sync",
                })),
            ),
            Ok(()),
        ));
    }

    let user_id = claims.user_id;
    let now = Utc::now();
    let txn = db.begin().await?;

    // an expired cart is gone; it must not be revived by the touch below
    let expired = CartEntity::delete_many()
        .filter(cart::Column::UserId.eq(user_id))
        .filter(cart::Column::UpdatedAt.lt(expiry_cutoff(now)))
        .exec(&txn)
        .await?;
    if expired.rows_affected > 0 {
        tracing::debug!(user_id, removed = expired.rows_affected, "expired cart entries dropped");
    }

    for item in &payload.added_or_updated_items {
        let existing = CartEntity::find()
            .filter(cart::Column::UserId.eq(user_id))
            .filter(cart::Column::PlantId.eq(item.id))
            .filter(cart::Column::Size.eq(item.size.as_str()))
            .one(&txn)
            .await?;

        match existing {
            Some(entry) => {
                let mut entry: cart::ActiveModel = entry.into();
                entry.quantity = Set(item.quantity);
                entry.updated_at = Set(now);
                entry.update(&txn).await?;
            }
            None => {
                cart::ActiveModel {
                    user_id: Set(user_id),
                    plant_id: Set(item.id),
                    size: Set(item.size.clone()),
                    quantity: Set(item.quantity),
                    updated_at: Set(now),
                    ..Default::default()
                }
                .insert(&txn)
                .await?;
            }
        }
    }

    if !payload.deleted_items.is_empty() {
        let keys = payload
            .deleted_items
            .iter()
            .fold(Condition::any(), |cond, item| {
                cond.add(
                    Condition::all()
                        .add(cart::Column::PlantId.eq(item.id))
                        .add(cart::Column::Size.eq(item.size.as_str())),
                )
            });
        CartEntity::delete_many()
            .filter(cart::Column::UserId.eq(user_id))
            .filter(keys)
            .exec(&txn)
            .await?;
    }

    CartEntity::update_many()
        .col_expr(cart::Column::UpdatedAt, Expr::value(now))
        .filter(cart::Column::UserId.eq(user_id))
        .exec(&txn)
        .await?;

    txn.commit().await?;

    let added = payload.added_or_updated_items.len();
    let deleted = payload.deleted_items.len();
    tracing::info!(user_id, added, deleted, "cart synced");
    Ok(to_response(
        (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "message": "cart synced",
                "data": {
                    "addedOrUpdatedCount": added,
                    "deletedCount": deleted,
                },
            })),
        ),
        Ok(()),
    ))
}

fn expiry_cutoff(now: DateTime<Utc>) -> DateTime<Utc> {
    now - Duration::days(CART_TTL_DAYS)
}

/// Clamps each cart quantity to the SKU's current stock. Read only.
async fn sync_stock(
    Extension(db): Extension<Arc<DatabaseConnection>>,
    payload: Result<Json<SyncStockRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(payload) = payload?;

    let stock_by_sku: HashMap<i32, plant_sku::Model> = if payload.cart_items.is_empty() {
        HashMap::new()
    } else {
        PlantSkuEntity::find()
            .filter(
                plant_sku::Column::Id.is_in(payload.cart_items.iter().map(|item| item.sku_id)),
            )
            .all(&*db)
            .await?
            .into_iter()
            .map(|sku| (sku.id, sku))
            .collect()
    };

    let stock_info: Vec<StockInfo> = payload
        .cart_items
        .iter()
        .map(|item| clamp_to_stock(item, &stock_by_sku))
        .collect();

    Ok(to_response(
        (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "message": "cart quantities checked against stock",
                "data": { "stockInfo": stock_info },
            })),
        ),
        Ok(()),
    ))
}

/// A SKU that is missing, or belongs to another plant, has no stock.
fn clamp_to_stock(item: &StockItem, skus: &HashMap<i32, plant_sku::Model>) -> StockInfo {
    let stock = skus
        .get(&item.sku_id)
        .filter(|sku| sku.plant_id == item.id)
        .map_or(0, |sku| sku.stock.max(0) as u32);

    StockInfo {
        id: item.id,
        sku_id: item.sku_id,
        old_quantity: item.quantity,
        new_quantity: item.quantity.min(stock),
        stock,
    }
}

#[derive(Serialize)]
struct CartEntry {
    id: i32,
    size: String,
    quantity: i32,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
struct CartSyncRequest {
    #[serde(default)]
    #[validate(nested)]
    added_or_updated_items: Vec<UpsertItem>,
    #[serde(default)]
    deleted_items: Vec<DeleteItem>,
}

#[derive(Debug, Deserialize, Validate)]
struct UpsertItem {
    id: i32,
    #[serde(default)]
    size: String,
    #[validate(range(min = 1))]
    quantity: i32,
}

#[derive(Debug, Deserialize)]
struct DeleteItem {
    id: i32,
    #[serde(default)]
    size: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SyncStockRequest {
    #[serde(default)]
    cart_items: Vec<StockItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StockItem {
    id: i32,
    sku_id: i32,
    quantity: u32,
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
struct StockInfo {
    id: i32,
    sku_id: i32,
    old_quantity: u32,
    new_quantity: u32,
    stock: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn skus() -> HashMap<i32, plant_sku::Model> {
        [(
            10,
            plant_sku::Model {
                id: 10,
                plant_id: 1,
                size: "M".into(),
                stock: 4,
                price_cents: 900,
                sort: 0,
            },
        )]
        .into_iter()
        .collect()
    }

    fn item(id: i32, sku_id: i32, quantity: u32) -> StockItem {
        StockItem {
            id,
            sku_id,
            quantity,
        }
    }

    #[test]
    fn quantity_is_clamped_to_stock() {
        let info = clamp_to_stock(&item(1, 10, 6), &skus());
        assert_eq!((info.old_quantity, info.new_quantity, info.stock), (6, 4, 4));

        let info = clamp_to_stock(&item(1, 10, 2), &skus());
        assert_eq!((info.old_quantity, info.new_quantity, info.stock), (2, 2, 4));
    }

    #[test]
    fn missing_or_foreign_sku_has_no_stock() {
        assert_eq!(clamp_to_stock(&item(1, 99, 3), &skus()).new_quantity, 0);
        assert_eq!(clamp_to_stock(&item(2, 10, 3), &skus()).stock, 0);
    }

    #[test]
    fn upsert_quantity_must_be_positive() {
        let payload: CartSyncRequest = serde_json::from_str(
            r#"{"addedOrUpdatedItems": [{"id": 1, "size": "M", "quantity": 0}]}"#,
        )
        .unwrap();

        assert!(payload.validate().is_err());
    }
}
