//! SeaORM Entity for orders table

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "orders")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(unique)]
    pub order_number: i64,
    pub user_id: Uuid,
    pub status: String,
    pub payment_type: String,
    pub card_type: Option<String>,
    pub client_name: String,
    pub client_phone: String,
    #[sea_orm(column_type = "Text", nullable)]
    pub comment: Option<String>,
    pub delivery_type: String,
    pub latitude: f64,
    pub longitude: f64,
    pub address_name: Option<String>,
    pub picker_id: Option<Uuid>,
    pub picked_at: Option<DateTimeUtc>,
    pub courier_id: Option<Uuid>,
    pub delivering_at: Option<DateTimeUtc>,
    pub delivered_at: Option<DateTimeUtc>,
    #[sea_orm(column_type = "Decimal(Some((14, 2)))")]
    pub total_price: Decimal,
    pub deleted_at: Option<DateTimeUtc>,
    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::order_lines::Entity")]
    OrderLines,
}

impl Related<super::order_lines::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::OrderLines.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
