use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Catalogue record as seen by checkout: live stock and current price
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: Uuid,
    pub name: String,
    pub price: Decimal,
    /// Units in stock
    pub quantity: i32,
    /// Media storage key, resolved to a URL for display only
    pub image_key: Option<String>,
}
