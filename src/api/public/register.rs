use axum::{
    extract::{rejection::JsonRejection, Extension},
    http::StatusCode,
    response::Response,
    routing::post,
    Json, Router,
};
use once_cell::sync::Lazy;
use regex::Regex;
use sea_orm::{
    ColumnTrait, Condition, DatabaseConnection, EntityTrait, QueryFilter, Set, SqlErr,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use validator::Validate;

use crate::api::error::ApiError;
use crate::entities::user::{self, hash_password, Entity as UserEntity};
use crate::middleware::logging::to_response;

pub fn register_router(db: Arc<DatabaseConnection>) -> Router {
    Router::new()
        .route("/register", post(register_user))
        .layer(Extension(db))
}

async fn register_user(
    Extension(db): Extension<Arc<DatabaseConnection>>,
    payload: Result<Json<CreateUser>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(payload) = payload?;
    payload.validate()?;

    let taken = UserEntity::find()
        .filter(
            Condition::any()
                .add(user::Column::Username.eq(payload.username.as_str()))
                .add(user::Column::Email.eq(payload.email.as_str()))
                .add(user::Column::Phone.eq(payload.phone.as_str())),
        )
        .one(&*db)
        .await?;
    if taken.is_some() {
        return Err(already_registered());
    }

    let password = hash_password(&payload.password)
        .map_err(|err| ApiError::Internal(format!("failed to hash password: {err}")))?;

    let new_user = user::ActiveModel {
        username: Set(payload.username),
        email: Set(payload.email),
        phone: Set(payload.phone),
        password: Set(password),
        ..Default::default()
    };

    let inserted = UserEntity::insert(new_user).exec(&*db).await.map_err(|err| {
        // lost a race with a concurrent registration
        match err.sql_err() {
            Some(SqlErr::UniqueConstraintViolation(_)) => already_registered(),
            _ => err.into(),
        }
    })?;

    tracing::info!(user_id = inserted.last_insert_id, "user registered");
    Ok(to_response(
        (
            StatusCode::CREATED,
            Json(json!({
                "success": true,
                "message": "user registered",
                "data": { "userId": inserted.last_insert_id },
            })),
        ),
        Ok(()),
    ))
}

fn already_registered() -> ApiError {
    ApiError::Conflict("username, email or phone already registered".into())
}

#[derive(Debug, Deserialize, Validate)]
struct CreateUser {
    #[validate(length(min = 3, max = 20))]
    username: String,
    #[validate(email)]
    email: String,
    #[validate(length(min = 6))]
    password: String,
    #[validate(regex(path = *PHONE_REGEX))]
    phone: String,
}

static PHONE_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[0-9]{11}$").unwrap());
