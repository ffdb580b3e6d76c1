//! Basket lines awaiting checkout.
//!
//! At most one active line per (user, product); the partial unique index is
//! added in `m20260315_000001_add_active_uniqueness`.

use sea_orm_migration::prelude::*;

use crate::m20260301_000001_create_products::Products;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(BasketLines::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(BasketLines::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(BasketLines::UserId).uuid().not_null())
                    .col(ColumnDef::new(BasketLines::ProductId).uuid().not_null())
                    .col(ColumnDef::new(BasketLines::Quantity).integer().not_null())
                    .col(ColumnDef::new(BasketLines::DeletedAt).timestamp_with_time_zone())
                    .col(
                        ColumnDef::new(BasketLines::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_basket_lines_product")
                            .from(BasketLines::Table, BasketLines::ProductId)
                            .to(Products::Table, Products::Id),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_basket_lines_user_product")
                    .table(BasketLines::Table)
                    .col(BasketLines::UserId)
                    .col(BasketLines::ProductId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(BasketLines::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum BasketLines {
    Table,
    Id,
    UserId,
    ProductId,
    Quantity,
    DeletedAt,
    CreatedAt,
}
