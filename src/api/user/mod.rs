pub mod cart;
pub mod payment;

use axum::{middleware::from_fn_with_state, Router};
use sea_orm::DatabaseConnection;
use std::sync::Arc;

use crate::middleware::auth::{auth_middleware, AuthState};
use cart::cart_router;
use payment::payment_router;

pub fn user_api_router(db: Arc<DatabaseConnection>, secret: Arc<str>) -> Router {
    Router::new()
        .merge(cart_router(db.clone()))
        .merge(payment_router(db.clone()))
        .route_layer(from_fn_with_state(
            AuthState {
                db: db.clone(),
                secret,
            },
            auth_middleware,
        ))
}
