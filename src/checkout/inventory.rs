use std::collections::{BTreeSet, HashMap};

use sea_orm::{
    ColumnTrait, DatabaseTransaction, EntityTrait, QueryFilter, QueryOrder, QuerySelect, Select,
};

use super::CheckoutError;
use crate::entities::plant_sku::{self, Entity as PlantSku};

/// SKU rows held under an exclusive lock for the rest of the transaction.
pub type LockedSkus = HashMap<i32, plant_sku::Model>;

/// `SELECT .. FOR UPDATE` over the given ids. Rows are locked in id order so
/// overlapping checkouts queue up instead of deadlocking.
pub(crate) fn lock_query(sku_ids: &BTreeSet<i32>) -> Select<PlantSku> {
    PlantSku::find()
        .filter(plant_sku::Column::Id.is_in(sku_ids.iter().copied()))
        .order_by_asc(plant_sku::Column::Id)
        .lock_exclusive()
}

pub async fn lock_skus(
    txn: &DatabaseTransaction,
    sku_ids: &BTreeSet<i32>,
) -> Result<LockedSkus, CheckoutError> {
    let rows = lock_query(sku_ids)
        .all(txn)
        .await
        .map_err(CheckoutError::db("locking SKU rows"))?;

    tracing::debug!(requested = sku_ids.len(), locked = rows.len(), "SKU rows locked");
    Ok(rows.into_iter().map(|sku| (sku.id, sku)).collect())
}
