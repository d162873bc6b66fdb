use std::collections::BTreeMap;

use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, DatabaseTransaction, EntityTrait, QueryFilter, UpdateMany};

use super::{inventory::LockedSkus, CartLine, CheckoutError};
use crate::entities::plant_sku::{self, Entity as PlantSku};

/// Validated quantities to take off each locked SKU.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecrementPlan {
    per_sku: BTreeMap<i32, i64>,
}

impl DecrementPlan {
    #[cfg(test)]
    fn quantity(&self, sku_id: i32) -> Option<i64> {
        self.per_sku.get(&sku_id).copied()
    }

    /// Number of distinct SKUs the plan touches.
    pub(crate) fn len(&self) -> usize {
        self.per_sku.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.per_sku.is_empty()
    }
}

/// Checks every cart line against the locked rows, in request order, and
/// stops at the first problem. Lines naming the same SKU draw on the same stock.
pub fn plan_decrement(
    lines: &[CartLine],
    locked: &LockedSkus,
) -> Result<DecrementPlan, CheckoutError> {
    if lines.is_empty() {
        return Err(CheckoutError::EmptyCart);
    }

    let mut per_sku: BTreeMap<i32, i64> = BTreeMap::new();
    for line in lines {
        let sku = locked
            .get(&line.sku_id)
            .ok_or(CheckoutError::UnknownSku {
                sku_id: line.sku_id,
            })?;
        if line.quantity <= 0 {
            return Err(CheckoutError::NonPositiveQuantity {
                sku_id: line.sku_id,
                quantity: line.quantity,
            });
        }
        if sku.plant_id != line.product_id {
            return Err(CheckoutError::SkuProductMismatch {
                sku_id: line.sku_id,
                product_id: line.product_id,
            });
        }

        let requested = per_sku.entry(sku.id).or_insert(0);
        *requested += i64::from(line.quantity);
        if *requested > i64::from(sku.stock) {
            return Err(CheckoutError::InsufficientStock {
                sku_id: sku.id,
                requested: *requested,
                available: sku.stock,
            });
        }
    }

    Ok(DecrementPlan { per_sku })
}

/// One `UPDATE .. SET stock = CASE WHEN id = ? THEN stock - ? .. ELSE stock END
/// WHERE id IN (..)` covering the whole plan.
pub(crate) fn decrement_statement(plan: &DecrementPlan) -> Option<UpdateMany<PlantSku>> {
    let mut branches = plan.per_sku.iter();
    let (&first_id, &first_qty) = branches.next()?;

    let stock = || Expr::col(plant_sku::Column::Stock);
    let mut case = Expr::case(plant_sku::Column::Id.eq(first_id), stock().sub(first_qty));
    for (&sku_id, &quantity) in branches {
        case = case.case(plant_sku::Column::Id.eq(sku_id), stock().sub(quantity));
    }

    Some(
        PlantSku::update_many()
            .col_expr(plant_sku::Column::Stock, case.finally(stock()).into())
            .filter(plant_sku::Column::Id.is_in(plan.per_sku.keys().copied())),
    )
}

/// Applies the plan. Must run on the transaction that holds the row locks.
pub async fn apply_decrement(
    txn: &DatabaseTransaction,
    plan: &DecrementPlan,
) -> Result<(), CheckoutError> {
    if plan.is_empty() {
        return Err(CheckoutError::EmptyCart);
    }
    let statement = decrement_statement(plan).ok_or(CheckoutError::EmptyCart)?;
    let result = statement
        .exec(txn)
        .await
        .map_err(CheckoutError::db("decrementing stock"))?;

    let expected = plan.len() as u64;
    if result.rows_affected != expected {
        return Err(CheckoutError::StockUpdateMismatch {
            expected,
            actual: result.rows_affected,
        });
    }
    Ok(())
}
