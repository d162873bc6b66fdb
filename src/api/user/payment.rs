use axum::{
    extract::{rejection::JsonRejection, Extension},
    http::StatusCode,
    response::Response,
    routing::post,
    Json, Router,
};
use sea_orm::DatabaseConnection;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use validator::Validate;

use crate::api::error::ApiError;
use crate::checkout::{place_order, CartLine, CheckoutRequest, ShippingAddress};
use crate::middleware::{auth::Claims, logging::to_response};

pub fn payment_router(db: Arc<DatabaseConnection>) -> Router {
    Router::new()
        .route("/payment", post(create_payment))
        .layer(Extension(db))
}

async fn create_payment(
    Extension(db): Extension<Arc<DatabaseConnection>>,
    Extension(claims): Extension<Claims>,
    payload: Result<Json<PaymentRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(payload) = payload?;
    payload.validate()?;

    let request = payload.into_checkout(claims.user_id);
    let placed = place_order(&db, &request).await?;

    Ok(to_response(
        (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "message": "order created",
                "data": placed,
            })),
        ),
        Ok(()),
    ))
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
struct PaymentRequest {
    #[serde(default)]
    cart_items: Vec<CartItem>,
    #[validate(nested)]
    address: Address,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CartItem {
    #[serde(alias = "plantId")]
    product_id: i32,
    sku_id: i32,
    quantity: i32,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
struct Address {
    #[validate(length(min = 1, max = 64))]
    receiver: String,
    #[validate(length(min = 1, max = 32))]
    phone: String,
    #[serde(default)]
    province: String,
    #[serde(default)]
    city: String,
    #[serde(default)]
    area: String,
    #[serde(alias = "detailAddress")]
    #[validate(length(min = 1, max = 255))]
    detail: String,
}

impl PaymentRequest {
    fn into_checkout(self, user_id: i32) -> CheckoutRequest {
        CheckoutRequest {
            user_id,
            lines: self
                .cart_items
                .into_iter()
                .map(|item| CartLine {
                    product_id: item.product_id,
                    sku_id: item.sku_id,
                    quantity: item.quantity,
                })
                .collect(),
            address: ShippingAddress {
                receiver: self.address.receiver,
                phone: self.address.phone,
                province: self.address.province,
                city: self.address.city,
                area: self.address.area,
                detail: self.address.detail,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_both_field_spellings() {
        let body = r#"{
            "cartItems": [
                {"productId": 1, "skuId": 2, "quantity": 3},
                {"plantId": 4, "skuId": 5, "quantity": 1}
            ],
            "address": {
                "receiver": "Ann", "phone": "13800000000",
                "province": "P", "city": "C", "area": "A",
                "detailAddress": "1 Garden Rd"
            }
        }"#;
        let payload: PaymentRequest = serde_json::from_str(body).unwrap();
        assert!(payload.validate().is_ok());

        let request = payload.into_checkout(9);
        assert_eq!(request.user_id, 9);
        assert_eq!(
            request.lines[1],
            CartLine {
                product_id: 4,
                sku_id: 5,
                quantity: 1
            }
        );
        assert_eq!(request.address.full_address(), "PCA1 Garden Rd");
    }

    #[test]
    fn blank_receiver_is_rejected() {
        let body = r#"{"cartItems": [], "address": {"receiver": "", "phone": "1", "detail": "x"}}"#;
        let payload: PaymentRequest = serde_json::from_str(body).unwrap();

        assert!(payload.validate().is_err());
    }
}
