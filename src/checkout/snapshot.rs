use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Local, TimeZone, Utc};
use rand::Rng;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseTransaction, DbErr, EntityTrait, QueryFilter, Set,
    SqlErr, TransactionTrait,
};

use super::{inventory::LockedSkus, CartLine, CheckoutError};
use crate::entities::{
    order,
    order_item::{self, Entity as OrderItem},
    plant::{self, Entity as Plant},
};

/// Rows per `INSERT` when writing order lines.
pub const ORDER_ITEM_BATCH: usize = 100;
/// Order numbers are random; a unique-key clash is retried this many times.
pub const MAX_ORDER_SN_ATTEMPTS: u32 = 3;

/// `YYYYMMDDHHMMSS` + 6 random digits + the last 6 digits of the user id.
pub fn format_order_sn<Tz: TimeZone>(at: &DateTime<Tz>, nonce: u32, user_id: i32) -> String
where
    Tz::Offset: std::fmt::Display,
{
    format!(
        "{}{:06}{:06}",
        at.format("%Y%m%d%H%M%S"),
        nonce % 1_000_000,
        user_id.unsigned_abs() % 1_000_000
    )
}

pub fn generate_order_sn(user_id: i32) -> String {
    let nonce = rand::thread_rng().gen_range(100_000..1_000_000);
    format_order_sn(&Local::now(), nonce, user_id)
}

/// Sum of locked unit price times quantity over all lines.
pub fn order_total(lines: &[CartLine], locked: &LockedSkus) -> Result<i64, CheckoutError> {
    lines.iter().try_fold(0i64, |total, line| {
        let sku = locked.get(&line.sku_id).ok_or(CheckoutError::UnknownSku {
            sku_id: line.sku_id,
        })?;
        sku.price_cents
            .checked_mul(i64::from(line.quantity))
            .and_then(|amount| total.checked_add(amount))
            .ok_or(CheckoutError::AmountOverflow)
    })
}

/// Loads the display fields of every plant the locked SKUs belong to.
pub async fn fetch_plants(
    txn: &DatabaseTransaction,
    locked: &LockedSkus,
) -> Result<HashMap<i32, plant::Model>, CheckoutError> {
    let plant_ids: BTreeSet<i32> = locked.values().map(|sku| sku.plant_id).collect();
    let plants: HashMap<i32, plant::Model> = Plant::find()
        .filter(plant::Column::Id.is_in(plant_ids.iter().copied()))
        .all(txn)
        .await
        .map_err(CheckoutError::db("loading plants"))?
        .into_iter()
        .map(|plant| (plant.id, plant))
        .collect();

    if let Some(&missing) = plant_ids.iter().find(|id| !plants.contains_key(id)) {
        return Err(CheckoutError::UnknownProduct {
            product_id: missing,
        });
    }
    Ok(plants)
}

/// Inserts the order header, drawing a new order number from `next_sn`
/// whenever the previous one collides with an existing order.
///
/// Every attempt runs in its own savepoint so a rejected insert leaves the
/// surrounding transaction usable on every backend.
pub async fn insert_order_header<F>(
    txn: &DatabaseTransaction,
    header: order::ActiveModel,
    mut next_sn: F,
) -> Result<order::Model, CheckoutError>
where
    F: FnMut() -> String,
{
    for attempt in 1..=MAX_ORDER_SN_ATTEMPTS {
        let order_sn = next_sn();
        let mut candidate = header.clone();
        candidate.order_sn = Set(order_sn.clone());

        let savepoint = txn
            .begin()
            .await
            .map_err(CheckoutError::db("opening savepoint"))?;

        match candidate.insert(&savepoint).await {
            Ok(model) => {
                savepoint
                    .commit()
                    .await
                    .map_err(CheckoutError::db("releasing savepoint"))?;
                return Ok(model);
            }
            Err(err) if is_unique_violation(&err) => {
                tracing::warn!(%order_sn, attempt, "order number already taken, regenerating");
                savepoint
                    .rollback()
                    .await
                    .map_err(CheckoutError::db("rolling back savepoint"))?;
            }
            Err(err) => {
                if let Err(rollback_err) = savepoint.rollback().await {
                    tracing::error!(error = %rollback_err, "savepoint rollback failed");
                }
                return Err(CheckoutError::Database {
                    step: "inserting order",
                    source: err,
                });
            }
        }
    }

    Err(CheckoutError::OrderSnExhausted {
        attempts: MAX_ORDER_SN_ATTEMPTS,
    })
}

fn is_unique_violation(err: &DbErr) -> bool {
    matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_)))
}

/// One snapshot row per cart line, copying price, size and plant display
/// fields as they are right now.
pub fn build_order_items(
    order_id: i32,
    lines: &[CartLine],
    locked: &LockedSkus,
    plants: &HashMap<i32, plant::Model>,
    created_at: DateTime<Utc>,
) -> Result<Vec<order_item::ActiveModel>, CheckoutError> {
    lines
        .iter()
        .map(|line| {
            let sku = locked.get(&line.sku_id).ok_or(CheckoutError::UnknownSku {
                sku_id: line.sku_id,
            })?;
            let plant = plants
                .get(&sku.plant_id)
                .ok_or(CheckoutError::UnknownProduct {
                    product_id: sku.plant_id,
                })?;

            Ok(order_item::ActiveModel {
                order_id: Set(order_id),
                plant_id: Set(sku.plant_id),
                sku_id: Set(sku.id),
                plant_name: Set(plant.name.clone()),
                plant_latin_name: Set(plant.latin_name.clone()),
                sku_size: Set(sku.size.clone()),
                main_img_url: Set(plant.main_img_url.clone()),
                price_cents: Set(sku.price_cents),
                quantity: Set(line.quantity),
                created_at: Set(created_at),
                ..Default::default()
            })
        })
        .collect()
}

pub async fn insert_order_items(
    txn: &DatabaseTransaction,
    items: Vec<order_item::ActiveModel>,
) -> Result<(), CheckoutError> {
    for chunk in items.chunks(ORDER_ITEM_BATCH) {
        OrderItem::insert_many(chunk.to_vec())
            .exec(txn)
            .await
            .map_err(CheckoutError::db("inserting order items"))?;
    }
    Ok(())
}
