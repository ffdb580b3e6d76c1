//! Partial unique indexes over live rows.
//!
//! - one active basket line per (user, product)
//! - one `delivering` order per courier
//!
//! Soft-deleted rows keep their keys, so both indexes only cover rows with
//! `deleted_at IS NULL`.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let db = manager.get_connection();

        db.execute_unprepared(
            r#"
            CREATE UNIQUE INDEX IF NOT EXISTS uq_basket_lines_active_user_product
                ON basket_lines (user_id, product_id)
                WHERE deleted_at IS NULL;
            "#,
        )
        .await?;

        db.execute_unprepared(
            r#"
            CREATE UNIQUE INDEX IF NOT EXISTS uq_orders_courier_delivering
                ON orders (courier_id)
                WHERE status = 'delivering' AND deleted_at IS NULL;
            "#,
        )
        .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let db = manager.get_connection();

        db.execute_unprepared("DROP INDEX IF EXISTS uq_orders_courier_delivering;")
            .await?;
        db.execute_unprepared("DROP INDEX IF EXISTS uq_basket_lines_active_user_product;")
            .await?;

        Ok(())
    }
}
