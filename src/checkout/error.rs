use sea_orm::DbErr;
use thiserror::Error;

/// How a checkout failure should be treated by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The request itself is unusable; nothing was touched.
    Validation,
    /// The request is well formed but conflicts with the catalog or stock.
    Conflict,
    /// Storage or transaction failure.
    Infrastructure,
}

#[derive(Debug, Error)]
pub enum CheckoutError {
    #[error("cart is empty")]
    EmptyCart,
    #[error("quantity must be positive (SKU {sku_id}, got {quantity})")]
    NonPositiveQuantity { sku_id: i32, quantity: i32 },
    #[error("order total overflows")]
    AmountOverflow,

    #[error("SKU {sku_id} does not exist")]
    UnknownSku { sku_id: i32 },
    #[error("SKU {sku_id} does not belong to product {product_id}")]
    SkuProductMismatch { sku_id: i32, product_id: i32 },
    #[error("insufficient stock for SKU {sku_id}: requested {requested}, available {available}")]
    InsufficientStock {
        sku_id: i32,
        requested: i64,
        available: i32,
    },
    #[error("product {product_id} does not exist")]
    UnknownProduct { product_id: i32 },

    #[error("database error while {step}: {source}")]
    Database {
        step: &'static str,
        #[source]
        source: DbErr,
    },
    #[error("stock update changed {actual} rows, expected {expected}")]
    StockUpdateMismatch { expected: u64, actual: u64 },
    #[error("no unique order number after {attempts} attempts")]
    OrderSnExhausted { attempts: u32 },
}

impl CheckoutError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::EmptyCart | Self::NonPositiveQuantity { .. } | Self::AmountOverflow => {
                ErrorKind::Validation
            }
            Self::UnknownSku { .. }
            | Self::SkuProductMismatch { .. }
            | Self::InsufficientStock { .. }
            | Self::UnknownProduct { .. } => ErrorKind::Conflict,
            Self::Database { .. }
            | Self::StockUpdateMismatch { .. }
            | Self::OrderSnExhausted { .. } => ErrorKind::Infrastructure,
        }
    }

    pub(crate) fn db(step: &'static str) -> impl FnOnce(DbErr) -> Self {
        move |source| Self::Database { step, source }
    }
}
