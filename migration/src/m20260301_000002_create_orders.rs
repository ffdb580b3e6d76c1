//! Orders table.
//!
//! Client contact and delivery fields are a snapshot taken at checkout time.
//! `order_number` is the human-facing sequence, independent of the uuid key.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Orders::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Orders::Id).uuid().not_null().primary_key())
                    .col(
                        ColumnDef::new(Orders::OrderNumber)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .unique_key(),
                    )
                    .col(ColumnDef::new(Orders::UserId).uuid().not_null())
                    .col(
                        ColumnDef::new(Orders::Status)
                            .string()
                            .not_null()
                            .default("in_process"),
                    )
                    .col(
                        ColumnDef::new(Orders::PaymentType)
                            .string()
                            .not_null()
                            .check(Expr::col(Orders::PaymentType).is_in(["card", "cash"])),
                    )
                    .col(ColumnDef::new(Orders::CardType).string())
                    .col(ColumnDef::new(Orders::ClientName).string().not_null())
                    .col(ColumnDef::new(Orders::ClientPhone).string().not_null())
                    .col(ColumnDef::new(Orders::Comment).text())
                    .col(ColumnDef::new(Orders::DeliveryType).string().not_null())
                    .col(ColumnDef::new(Orders::Latitude).double().not_null())
                    .col(ColumnDef::new(Orders::Longitude).double().not_null())
                    .col(ColumnDef::new(Orders::AddressName).string())
                    .col(ColumnDef::new(Orders::PickerId).uuid())
                    .col(ColumnDef::new(Orders::PickedAt).timestamp_with_time_zone())
                    .col(ColumnDef::new(Orders::CourierId).uuid())
                    .col(ColumnDef::new(Orders::DeliveringAt).timestamp_with_time_zone())
                    .col(ColumnDef::new(Orders::DeliveredAt).timestamp_with_time_zone())
                    .col(
                        ColumnDef::new(Orders::TotalPrice)
                            .decimal_len(14, 2)
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(Orders::DeletedAt).timestamp_with_time_zone())
                    .col(
                        ColumnDef::new(Orders::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Orders::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        // Status group listings
        manager
            .create_index(
                Index::create()
                    .name("idx_orders_status")
                    .table(Orders::Table)
                    .col(Orders::Status)
                    .to_owned(),
            )
            .await?;

        // Per-courier active/finished lists and the one-active-delivery check
        manager
            .create_index(
                Index::create()
                    .name("idx_orders_courier_status")
                    .table(Orders::Table)
                    .col(Orders::CourierId)
                    .col(Orders::Status)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Orders::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub(crate) enum Orders {
    Table,
    Id,
    OrderNumber,
    UserId,
    Status,
    PaymentType,
    CardType,
    ClientName,
    ClientPhone,
    Comment,
    DeliveryType,
    Latitude,
    Longitude,
    AddressName,
    PickerId,
    PickedAt,
    CourierId,
    DeliveringAt,
    DeliveredAt,
    TotalPrice,
    DeletedAt,
    CreatedAt,
    UpdatedAt,
}
