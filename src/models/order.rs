//! Order types, status enums and the request/response shapes of the order API
//!
//! Status progresses: in_process → picked → delivering → finished
//!                        ↘ canceled (staff, from in_process only)

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Order lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// Created by checkout, waiting for a picker
    InProcess,
    /// Assembled by a picker, waiting for a courier
    Picked,
    /// Carried by a courier
    Delivering,
    /// Handed over (or closed by staff)
    Finished,
    /// Closed by staff without fulfilment
    Canceled,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 5] = [
        OrderStatus::InProcess,
        OrderStatus::Picked,
        OrderStatus::Delivering,
        OrderStatus::Finished,
        OrderStatus::Canceled,
    ];

    /// Display-only ordering index for clients. Carries no transition logic.
    pub fn rank(self) -> u8 {
        match self {
            OrderStatus::InProcess => 1,
            OrderStatus::Picked => 2,
            OrderStatus::Delivering => 3,
            OrderStatus::Finished => 4,
            OrderStatus::Canceled => 5,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::InProcess => "in_process",
            OrderStatus::Picked => "picked",
            OrderStatus::Delivering => "delivering",
            OrderStatus::Finished => "finished",
            OrderStatus::Canceled => "canceled",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "in_process" => Ok(OrderStatus::InProcess),
            "picked" => Ok(OrderStatus::Picked),
            "delivering" => Ok(OrderStatus::Delivering),
            "finished" => Ok(OrderStatus::Finished),
            "canceled" => Ok(OrderStatus::Canceled),
            _ => Err(format!("Unknown order status: {}", s)),
        }
    }
}

/// Accepted payment labels. Payment itself is not processed here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentType {
    Card,
    Cash,
}

impl PaymentType {
    pub fn as_str(self) -> &'static str {
        match self {
            PaymentType::Card => "card",
            PaymentType::Cash => "cash",
        }
    }
}

impl std::fmt::Display for PaymentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PaymentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "card" => Ok(PaymentType::Card),
            "cash" => Ok(PaymentType::Cash),
            _ => Err(format!("Unknown payment type: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryType {
    Delivery,
    Pickup,
}

impl std::fmt::Display for DeliveryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeliveryType::Delivery => write!(f, "delivery"),
            DeliveryType::Pickup => write!(f, "pickup"),
        }
    }
}

impl std::str::FromStr for DeliveryType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "delivery" => Ok(DeliveryType::Delivery),
            "pickup" => Ok(DeliveryType::Pickup),
            _ => Err(format!("Unknown delivery type: {}", s)),
        }
    }
}

/// Listing buckets used by staff dashboards
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusGroup {
    New,
    InProgress,
    Completed,
    Canceled,
}

impl StatusGroup {
    pub fn statuses(self) -> &'static [OrderStatus] {
        match self {
            StatusGroup::New => &[OrderStatus::InProcess],
            StatusGroup::InProgress => &[OrderStatus::Picked, OrderStatus::Delivering],
            StatusGroup::Completed => &[OrderStatus::Finished],
            StatusGroup::Canceled => &[OrderStatus::Canceled],
        }
    }
}

/// Persisted order row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub order_number: i64,
    pub user_id: Uuid,
    pub status: OrderStatus,
    pub payment_type: PaymentType,
    pub card_type: Option<String>,
    pub client_name: String,
    pub client_phone: String,
    pub comment: Option<String>,
    pub delivery_type: DeliveryType,
    pub latitude: f64,
    pub longitude: f64,
    pub address_name: Option<String>,
    pub picker_id: Option<Uuid>,
    pub picked_at: Option<DateTime<Utc>>,
    pub courier_id: Option<Uuid>,
    pub delivering_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub total_price: Decimal,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// Persisted order line. `price` is the product price frozen at checkout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderLine {
    pub id: Uuid,
    pub order_id: Uuid,
    pub product_id: Uuid,
    pub quantity: i32,
    pub price: Decimal,
    pub total_price: Decimal,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Order row as handed to the store by checkout
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub id: Uuid,
    pub user_id: Uuid,
    pub payment_type: PaymentType,
    pub card_type: Option<String>,
    pub client_name: String,
    pub client_phone: String,
    pub comment: Option<String>,
    pub delivery_type: DeliveryType,
    pub latitude: f64,
    pub longitude: f64,
    pub address_name: Option<String>,
    pub total_price: Decimal,
}

#[derive(Debug, Clone)]
pub struct NewOrderLine {
    pub order_id: Uuid,
    pub product_id: Uuid,
    pub quantity: i32,
    pub price: Decimal,
}

impl NewOrderLine {
    pub fn total_price(&self) -> Decimal {
        self.price * Decimal::from(self.quantity)
    }
}

/// Order line joined with the catalogue fields needed for display
#[derive(Debug, Clone)]
pub struct OrderLineDetail {
    pub line: OrderLine,
    pub product_name: String,
    pub image_key: Option<String>,
}

/// Order with its live lines, as read back from the store
#[derive(Debug, Clone)]
pub struct OrderDetails {
    pub order: Order,
    pub lines: Vec<OrderLineDetail>,
}

/// POST /api/orders body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutRequest {
    pub client_name: String,
    pub phone: String,
    pub comment: Option<String>,
    /// Kept as a raw string so an unknown label maps to a typed
    /// validation error instead of a body rejection.
    pub payment_type: String,
    pub card_type: Option<String>,
    pub delivery_type: DeliveryType,
    pub latitude: f64,
    pub longitude: f64,
    pub address_name: Option<String>,
}

/// POST /api/orders/{id}/status body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusChangeRequest {
    pub status: OrderStatus,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatusGroupQuery {
    pub group: StatusGroup,
}

/// Order line as shown to clients
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderLineView {
    pub id: Uuid,
    pub product_id: Uuid,
    pub product_name: String,
    pub image_url: Option<String>,
    pub quantity: i32,
    pub price: Decimal,
    pub total_price: Decimal,
}

/// Order as shown to clients, decorated with derived fields
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderView {
    pub id: Uuid,
    pub order_number: i64,
    pub status: OrderStatus,
    pub status_index: u8,
    pub payment_type: PaymentType,
    pub card_type: Option<String>,
    pub client_name: String,
    pub client_phone: String,
    pub comment: Option<String>,
    pub delivery_type: DeliveryType,
    pub latitude: f64,
    pub longitude: f64,
    pub address_name: Option<String>,
    pub picker_id: Option<Uuid>,
    pub picked_at: Option<DateTime<Utc>>,
    pub courier_id: Option<Uuid>,
    pub delivering_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub total_price: Decimal,
    pub created_at: DateTime<Utc>,
    pub lines: Vec<OrderLineView>,
    /// Only set for courier viewers
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_mine: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderListResponse {
    pub orders: Vec<OrderView>,
    pub total_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trips_through_display() {
        for status in OrderStatus::ALL {
            let parsed: OrderStatus = status.to_string().parse().unwrap();
            assert_eq!(parsed, status);
        }
    }

    #[test]
    fn test_status_serializes_snake_case() {
        let json = serde_json::to_string(&OrderStatus::InProcess).unwrap();
        assert_eq!(json, "\"in_process\"");
    }

    #[test]
    fn test_ranks_are_distinct_and_ordered() {
        let ranks: Vec<u8> = OrderStatus::ALL.iter().map(|s| s.rank()).collect();
        assert_eq!(ranks, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_payment_type_parse() {
        assert_eq!("cash".parse::<PaymentType>().unwrap(), PaymentType::Cash);
        assert_eq!(" Card ".parse::<PaymentType>().unwrap(), PaymentType::Card);
        assert!("crypto".parse::<PaymentType>().is_err());
        assert!("".parse::<PaymentType>().is_err());
    }

    #[test]
    fn test_status_groups_cover_every_status_once() {
        let groups = [
            StatusGroup::New,
            StatusGroup::InProgress,
            StatusGroup::Completed,
            StatusGroup::Canceled,
        ];
        for status in OrderStatus::ALL {
            let hits = groups
                .iter()
                .filter(|g| g.statuses().contains(&status))
                .count();
            assert_eq!(hits, 1, "{status} should belong to exactly one group");
        }
    }

    #[test]
    fn test_line_total_uses_frozen_price() {
        let line = NewOrderLine {
            order_id: Uuid::new_v4(),
            product_id: Uuid::new_v4(),
            quantity: 3,
            price: Decimal::new(1250, 2),
        };
        assert_eq!(line.total_price(), Decimal::new(3750, 2));
    }
}
