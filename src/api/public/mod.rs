pub mod plant;
pub mod register;

use axum::Router;
use sea_orm::DatabaseConnection;
use std::sync::Arc;

use plant::plant_router;
use register::register_router;

pub fn public_api_router(db: Arc<DatabaseConnection>) -> Router {
    Router::new()
        .merge(register_router(db.clone()))
        .merge(plant_router(db))
}
