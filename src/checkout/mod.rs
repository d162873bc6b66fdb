//! Checkout: turns a cart into a persisted order inside one database
//! transaction.
//!
//! The steps run in a fixed order on a single transaction:
//! lock the SKU rows, validate quantities against the locked stock,
//! decrement stock in one statement, write the order header and then the
//! order lines. Any failure rolls the whole unit back.

mod error;
pub mod inventory;
pub mod snapshot;
pub mod stock;

use std::collections::BTreeSet;
use std::fmt;

use chrono::Utc;
use sea_orm::{DatabaseConnection, DatabaseTransaction, Set, TransactionTrait};
use serde::Serialize;

pub use error::{CheckoutError, ErrorKind};

use crate::entities::order::{self, Status};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CartLine {
    pub product_id: i32,
    pub sku_id: i32,
    pub quantity: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShippingAddress {
    pub receiver: String,
    pub phone: String,
    pub province: String,
    pub city: String,
    pub area: String,
    pub detail: String,
}

impl ShippingAddress {
    /// Province, city, area and street joined as written on a parcel.
    pub fn full_address(&self) -> String {
        [&self.province, &self.city, &self.area, &self.detail]
            .into_iter()
            .map(String::as_str)
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct CheckoutRequest {
    pub user_id: i32,
    pub lines: Vec<CartLine>,
    pub address: ShippingAddress,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlacedOrder {
    pub order_id: i32,
    pub order_sn: String,
    pub total_amount_cents: i64,
    pub pay_amount_cents: i64,
    pub line_count: usize,
}

/// Last step a checkout reached, reported alongside failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckoutStage {
    Started,
    Locked,
    Validated,
    Decremented,
    OrderWritten,
    LineItemsWritten,
    Committed,
    RolledBack,
}

impl fmt::Display for CheckoutStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Started => "started",
            Self::Locked => "locked",
            Self::Validated => "validated",
            Self::Decremented => "decremented",
            Self::OrderWritten => "order_written",
            Self::LineItemsWritten => "line_items_written",
            Self::Committed => "committed",
            Self::RolledBack => "rolled_back",
        };
        f.write_str(name)
    }
}

/// Places an order for `request`.
///
/// Either every effect is committed (stock decremented, order header and
/// all order lines written) or none is. If the returned future is dropped or
/// panics mid-way, the open transaction is rolled back when it is dropped.
pub async fn place_order(
    db: &DatabaseConnection,
    request: &CheckoutRequest,
) -> Result<PlacedOrder, CheckoutError> {
    place_order_with(db, request, || snapshot::generate_order_sn(request.user_id)).await
}

/// Same as [`place_order`] with a caller supplied order number source.
pub async fn place_order_with<F>(
    db: &DatabaseConnection,
    request: &CheckoutRequest,
    next_sn: F,
) -> Result<PlacedOrder, CheckoutError>
where
    F: FnMut() -> String,
{
    if request.lines.is_empty() {
        return Err(CheckoutError::EmptyCart);
    }

    let txn = db
        .begin()
        .await
        .map_err(CheckoutError::db("beginning transaction"))?;

    let mut stage = CheckoutStage::Started;
    match run_steps(&txn, request, next_sn, &mut stage).await {
        Ok(placed) => {
            if let Err(source) = txn.commit().await {
                tracing::error!(user_id = request.user_id, %stage, error = %source, "checkout commit failed");
                return Err(CheckoutError::Database {
                    step: "committing",
                    source,
                });
            }
            tracing::info!(
                user_id = request.user_id,
                order_id = placed.order_id,
                order_sn = %placed.order_sn,
                total_cents = placed.total_amount_cents,
                stage = %CheckoutStage::Committed,
                "order placed"
            );
            Ok(placed)
        }
        Err(err) => {
            match err.kind() {
                ErrorKind::Infrastructure => {
                    tracing::error!(user_id = request.user_id, %stage, error = %err, "checkout failed")
                }
                _ => tracing::warn!(user_id = request.user_id, %stage, error = %err, "checkout rejected"),
            }
            match txn.rollback().await {
                Ok(()) => tracing::debug!(stage = %CheckoutStage::RolledBack, "checkout rolled back"),
                Err(rollback_err) => {
                    tracing::error!(error = %rollback_err, "checkout rollback failed")
                }
            }
            Err(err)
        }
    }
}

async fn run_steps<F>(
    txn: &DatabaseTransaction,
    request: &CheckoutRequest,
    next_sn: F,
    stage: &mut CheckoutStage,
) -> Result<PlacedOrder, CheckoutError>
where
    F: FnMut() -> String,
{
    let sku_ids: BTreeSet<i32> = request.lines.iter().map(|line| line.sku_id).collect();
    let locked = inventory::lock_skus(txn, &sku_ids).await?;
    *stage = CheckoutStage::Locked;

    let plan = stock::plan_decrement(&request.lines, &locked)?;
    let total = snapshot::order_total(&request.lines, &locked)?;
    let plants = snapshot::fetch_plants(txn, &locked).await?;
    *stage = CheckoutStage::Validated;

    stock::apply_decrement(txn, &plan).await?;
    *stage = CheckoutStage::Decremented;

    let now = Utc::now();
    let header = order::ActiveModel {
        user_id: Set(request.user_id),
        total_amount_cents: Set(total),
        pay_amount_cents: Set(total),
        status: Set(Status::Created),
        receiver_name: Set(request.address.receiver.clone()),
        receiver_phone: Set(request.address.phone.clone()),
        receiver_address: Set(request.address.full_address()),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    };
    let order = snapshot::insert_order_header(txn, header, next_sn).await?;
    *stage = CheckoutStage::OrderWritten;

    let items = snapshot::build_order_items(order.id, &request.lines, &locked, &plants, now)?;
    let line_count = items.len();
    snapshot::insert_order_items(txn, items).await?;
    *stage = CheckoutStage::LineItemsWritten;

    Ok(PlacedOrder {
        order_id: order.id,
        order_sn: order.order_sn,
        total_amount_cents: order.total_amount_cents,
        pay_amount_cents: order.pay_amount_cents,
        line_count,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{order_item, plant, plant_sku, setup_schema, user};
    use sea_orm::{
        ActiveModelTrait, ConnectOptions, ConnectionTrait, Database, EntityTrait, PaginatorTrait,
    };
    use std::time::Duration;

    async fn seeded() -> DatabaseConnection {
        seeded_at("sqlite::memory:", 1).await
    }

    async fn seeded_at(url: &str, max_connections: u32) -> DatabaseConnection {
        let mut options = ConnectOptions::new(url.to_owned());
        options.max_connections(max_connections).sqlx_logging(false);
        let db = Database::connect(options).await.unwrap();
        setup_schema(&db).await.unwrap();

        user::ActiveModel {
            id: Set(7),
            username: Set("ann".into()),
            email: Set("ann@example.com".into()),
            phone: Set("13800000000".into()),
            password: Set("x".into()),
        }
        .insert(&db)
        .await
        .unwrap();
        plant::ActiveModel {
            id: Set(1),
            name: Set("Fern".into()),
            latin_name: Set("Nephrolepis exaltata".into()),
            main_img_url: Set("plants/fern.jpg".into()),
            min_price_cents: Set(500),
            is_on_sale: Set(true),
        }
        .insert(&db)
        .await
        .unwrap();
        for (id, size, stock, price) in [(1, "S", 5, 500), (2, "L", 2, 1_500)] {
            plant_sku::ActiveModel {
                id: Set(id),
                plant_id: Set(1),
                size: Set(size.into()),
                stock: Set(stock),
                price_cents: Set(price),
                sort: Set(id),
            }
            .insert(&db)
            .await
            .unwrap();
        }
        db
    }

    fn request(lines: Vec<CartLine>) -> CheckoutRequest {
        CheckoutRequest {
            user_id: 7,
            lines,
            address: ShippingAddress {
                receiver: "Ann".into(),
                phone: "13800000000".into(),
                province: "Zhejiang".into(),
                city: "Hangzhou".into(),
                area: "Xihu".into(),
                detail: "1 Garden Rd".into(),
            },
        }
    }

    fn line(sku_id: i32, quantity: i32) -> CartLine {
        CartLine {
            product_id: 1,
            sku_id,
            quantity,
        }
    }

    async fn stock_of(db: &DatabaseConnection, id: i32) -> i32 {
        plant_sku::Entity::find_by_id(id)
            .one(db)
            .await
            .unwrap()
            .unwrap()
            .stock
    }

    #[test]
    fn address_is_joined_in_order() {
        assert_eq!(
            request(vec![]).address.full_address(),
            "ZhejiangHangzhouXihu1 Garden Rd"
        );
    }

    #[tokio::test]
    async fn successful_checkout_commits_everything() {
        let db = seeded().await;

        let placed = place_order(&db, &request(vec![line(1, 2), line(2, 1)]))
            .await
            .unwrap();

        assert_eq!(placed.total_amount_cents, 2_500);
        assert_eq!(placed.pay_amount_cents, 2_500);
        assert_eq!(placed.line_count, 2);
        assert_eq!(placed.order_sn.len(), 26);
        assert_eq!(stock_of(&db, 1).await, 3);
        assert_eq!(stock_of(&db, 2).await, 1);

        let saved = order::Entity::find_by_id(placed.order_id)
            .one(&db)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(saved.status, Status::Created);
        assert_eq!(saved.receiver_address, "ZhejiangHangzhouXihu1 Garden Rd");
        assert_eq!(order_item::Entity::find().count(&db).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn failure_after_decrement_leaves_no_trace() {
        let db = seeded().await;

        place_order_with(&db, &request(vec![line(1, 1)]), || "SN-1".to_string())
            .await
            .unwrap();

        // every candidate collides with the order written above
        let err = place_order_with(&db, &request(vec![line(1, 2)]), || "SN-1".to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, CheckoutError::OrderSnExhausted { .. }));
        assert_eq!(err.kind(), ErrorKind::Infrastructure);
        assert_eq!(stock_of(&db, 1).await, 4);
        assert_eq!(order::Entity::find().count(&db).await.unwrap(), 1);
        assert_eq!(order_item::Entity::find().count(&db).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn default_order_numbers_do_not_collide() {
        let db = seeded().await;

        let first = place_order(&db, &request(vec![line(1, 1)])).await.unwrap();
        let second = place_order(&db, &request(vec![line(1, 1)])).await.unwrap();

        assert_ne!(first.order_sn, second.order_sn);
        assert_eq!(stock_of(&db, 1).await, 3);
    }

    #[tokio::test]
    async fn cancelled_checkout_is_rolled_back() {
        let path = std::env::temp_dir().join(format!(
            "plant-store-cancel-{}-{}.db",
            std::process::id(),
            Utc::now().timestamp_nanos_opt().unwrap_or_default()
        ));
        let db = seeded_at(&format!("sqlite://{}?mode=rwc", path.display()), 2).await;

        // a second connection holds the write lock, so the decrement blocks
        let holder = db.begin().await.unwrap();
        holder
            .execute_unprepared("UPDATE plants SET name = name")
            .await
            .unwrap();

        let abandoned = tokio::time::timeout(
            Duration::from_millis(500),
            place_order(&db, &request(vec![line(1, 2)])),
        )
        .await;
        assert!(abandoned.is_err(), "checkout should still be waiting on the lock");

        holder.rollback().await.unwrap();

        assert_eq!(stock_of(&db, 1).await, 5);
        assert_eq!(order::Entity::find().count(&db).await.unwrap(), 0);
        assert_eq!(order_item::Entity::find().count(&db).await.unwrap(), 0);

        let placed = place_order(&db, &request(vec![line(1, 2)])).await.unwrap();
        assert_eq!(placed.line_count, 1);
        assert_eq!(stock_of(&db, 1).await, 3);
        assert_eq!(order::Entity::find().count(&db).await.unwrap(), 1);

        db.close().await.unwrap();
        for suffix in ["", "-wal", "-shm"] {
            let _ = std::fs::remove_file(format!("{}{suffix}", path.display()));
        }
    }

    #[tokio::test]
    async fn rejected_checkout_changes_nothing() {
        let db = seeded().await;

        let err = place_order(&db, &request(vec![line(1, 1), line(2, 3)]))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(stock_of(&db, 1).await, 5);
        assert_eq!(stock_of(&db, 2).await, 2);
        assert_eq!(order::Entity::find().count(&db).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn empty_cart_never_opens_a_transaction() {
        let db = seeded().await;
        let err = place_order(&db, &request(vec![])).await.unwrap_err();

        assert!(matches!(err, CheckoutError::EmptyCart));
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn large_carts_are_written_in_batches() {
        let db = seeded().await;
        plant_sku::ActiveModel {
            id: Set(3),
            plant_id: Set(1),
            size: Set("XL".into()),
            stock: Set(1_000),
            price_cents: Set(1),
            sort: Set(3),
        }
        .insert(&db)
        .await
        .unwrap();

        let lines = vec![line(3, 1); snapshot::ORDER_ITEM_BATCH * 2 + 5];
        let placed = place_order(&db, &request(lines)).await.unwrap();

        assert_eq!(placed.line_count, 205);
        assert_eq!(placed.total_amount_cents, 205);
        assert_eq!(stock_of(&db, 3).await, 795);
        assert_eq!(order_item::Entity::find().count(&db).await.unwrap(), 205);
    }
}
