use sea_orm::entity::prelude::*;
use serde::Serialize;

/// Write-once copy of what the customer bought. Display fields are copied
/// from the plant and SKU at checkout and never re-read from them.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize)]
#[sea_orm(table_name = "order_items")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    #[sea_orm(indexed)]
    pub order_id: i32,
    pub plant_id: i32,
    pub sku_id: i32,
    pub plant_name: String,
    pub plant_latin_name: String,
    pub sku_size: String,
    pub main_img_url: String,
    pub price_cents: i64,
    pub quantity: i32,
    pub created_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::order::Entity",
        from = "Column::OrderId",
        to = "super::order::Column::Id",
        on_delete = "Cascade"
    )]
    Order,
}

impl Related<super::order::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Order.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
