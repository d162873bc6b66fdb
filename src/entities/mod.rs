pub mod cart;
pub mod order;
pub mod order_item;
pub mod plant;
pub mod plant_image;
pub mod plant_sku;
pub mod user;

use sea_orm::{ConnectionTrait, DbErr, EntityTrait, Schema};

/// Creates every table (and its secondary indexes) the store needs.
/// Safe to run on every start: existing tables are left alone.
pub async fn setup_schema<C: ConnectionTrait>(db: &C) -> Result<(), DbErr> {
    let schema = Schema::new(db.get_database_backend());

    create_table(db, &schema, user::Entity).await?;
    create_table(db, &schema, plant::Entity).await?;
    create_table(db, &schema, plant_sku::Entity).await?;
    create_table(db, &schema, plant_image::Entity).await?;
    create_table(db, &schema, cart::Entity).await?;
    create_table(db, &schema, order::Entity).await?;
    create_table(db, &schema, order_item::Entity).await?;

    Ok(())
}

async fn create_table<C, E>(db: &C, schema: &Schema, entity: E) -> Result<(), DbErr>
where
    C: ConnectionTrait,
    E: EntityTrait,
{
    let backend = db.get_database_backend();

    let mut table = schema.create_table_from_entity(entity);
    table.if_not_exists();
    db.execute(backend.build(&table)).await?;

    for mut index in schema.create_index_from_entity(entity) {
        index.if_not_exists();
        db.execute(backend.build(&index)).await?;
    }

    tracing::debug!(table = %entity.table_name(), "table ready");
    Ok(())
}
