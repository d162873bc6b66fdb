use crate::api::error::ApiError;
use crate::entities::user::Entity as UserEntity;
use axum::{
    extract::{Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use sea_orm::{DatabaseConnection, DbErr, EntityTrait};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// Cookie consulted when no `Authorization` header is present.
pub const TOKEN_COOKIE: &str = "plant_token";

pub async fn auth_middleware(
    State(state): State<AuthState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let claims = match authenticate(&state, req.headers()).await {
        Ok(claims) => claims,
        Err(AuthError::Database(err)) => return Err(err.into()),
        Err(err) => {
            tracing::debug!(error = %err, "rejected credentials");
            return Err(ApiError::Unauthorized(err.to_string()));
        }
    };

    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: i32,
    pub exp: usize,
}

#[derive(Clone)]
pub struct AuthState {
    pub db: Arc<DatabaseConnection>,
    pub secret: Arc<str>,
}

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("missing credentials")]
    MissingToken,
    #[error("invalid or expired token")]
    InvalidToken(#[source] jsonwebtoken::errors::Error),
    #[error("unknown user")]
    UnknownUser,
    #[error("database error: {0}")]
    Database(#[from] DbErr),
}

async fn authenticate(state: &AuthState, headers: &HeaderMap) -> Result<Claims, AuthError> {
    let token = extract_token(headers).ok_or(AuthError::MissingToken)?;
    let claims = validate_token(&state.secret, token)?;

    UserEntity::find_by_id(claims.user_id)
        .one(&*state.db)
        .await?
        .ok_or(AuthError::UnknownUser)?;

    Ok(claims)
}

/// Bearer header first, then the `plant_token` cookie.
pub fn extract_token(headers: &HeaderMap) -> Option<&str> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty());
    if bearer.is_some() {
        return bearer;
    }

    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, value)| *name == TOKEN_COOKIE && !value.is_empty())
        .map(|(_, value)| value)
}

pub fn validate_token(secret: &str, token: &str) -> Result<Claims, AuthError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = true;

    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map(|data| data.claims)
    .map_err(AuthError::InvalidToken)
}
