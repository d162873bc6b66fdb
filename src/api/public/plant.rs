use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::Response,
    routing::get,
    Json, Router,
};
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;

use crate::api::error::ApiError;
use crate::entities::{
    plant::{self, Entity as PlantEntity},
    plant_image::{self, Entity as PlantImageEntity},
    plant_sku::{self, Entity as PlantSkuEntity},
};
use crate::middleware::logging::to_response;

pub fn plant_router(db: Arc<DatabaseConnection>) -> Router {
    Router::new()
        .route("/plants", get(get_plants))
        .route("/plants/:id", get(get_plant))
        .layer(Extension(db))
}

async fn get_plants(
    Extension(db): Extension<Arc<DatabaseConnection>>,
) -> Result<Response, ApiError> {
    let plants: Vec<PlantSummary> = PlantEntity::find()
        .filter(plant::Column::IsOnSale.eq(true))
        .order_by_asc(plant::Column::Id)
        .all(&*db)
        .await?
        .into_iter()
        .map(PlantSummary::from)
        .collect();

    let count = plants.len();
    Ok(to_response(
        (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "message": "plants on sale",
                "data": plants,
                "count": count,
            })),
        ),
        Ok(()),
    ))
}

async fn get_plant(
    Path(id): Path<i32>,
    Extension(db): Extension<Arc<DatabaseConnection>>,
) -> Result<Response, ApiError> {
    let plant = PlantEntity::find_by_id(id)
        .one(&*db)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("plant {id} not found")))?;

    let skus: Vec<SkuView> = PlantSkuEntity::find()
        .filter(plant_sku::Column::PlantId.eq(id))
        .order_by_asc(plant_sku::Column::Sort)
        .order_by_asc(plant_sku::Column::Id)
        .all(&*db)
        .await?
        .into_iter()
        .map(SkuView::from)
        .collect();

    let images: Vec<ImageView> = PlantImageEntity::find()
        .filter(plant_image::Column::PlantId.eq(id))
        .order_by_asc(plant_image::Column::Sort)
        .order_by_asc(plant_image::Column::Id)
        .all(&*db)
        .await?
        .into_iter()
        .map(|image| ImageView {
            img_url: image.img_url,
        })
        .collect();

    Ok(to_response(
        (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "message": "plant detail",
                "data": {
                    "plant": PlantSummary::from(plant),
                    "skus": skus,
                    "images": images,
                },
            })),
        ),
        Ok(()),
    ))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PlantSummary {
    plant_id: i32,
    name: String,
    latin_name: String,
    main_img_url: String,
    min_price_cents: i64,
}

impl From<plant::Model> for PlantSummary {
    fn from(value: plant::Model) -> Self {
        PlantSummary {
            plant_id: value.id,
            name: value.name,
            latin_name: value.latin_name,
            main_img_url: value.main_img_url,
            min_price_cents: value.min_price_cents,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SkuView {
    sku_id: i32,
    size: String,
    price_cents: i64,
    stock: i32,
}

impl From<plant_sku::Model> for SkuView {
    fn from(value: plant_sku::Model) -> Self {
        SkuView {
            sku_id: value.id,
            size: value.size,
            price_cents: value.price_cents,
            stock: value.stock,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ImageView {
    img_url: String,
}
