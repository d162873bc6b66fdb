pub mod error;
pub mod public;
pub mod user;

use axum::{middleware::from_fn, response::IntoResponse, routing::get, Json, Router};
use sea_orm::DatabaseConnection;
use serde_json::json;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::middleware::logging::{logging_middleware, to_response};
use public::public_api_router;
use user::user_api_router;

pub fn create_api_router(shared_db: Arc<DatabaseConnection>, secret: Arc<str>) -> Router {
    let api = public_api_router(shared_db.clone()).merge(user_api_router(shared_db, secret));

    Router::new()
        .route("/health", get(health))
        .nest("/api", api)
        .layer(from_fn(logging_middleware))
        .layer(TraceLayer::new_for_http())
}

async fn health() -> impl IntoResponse {
    to_response(Json(json!({ "status": "ok" })), Ok(()))
}
