//! Storage adapter contract for the checkout and fulfilment core
//!
//! Every status write is conditional on the caller's view of the current
//! status; a write that matches no live row fails with
//! [`StoreError::StaleStatus`](crate::error::StoreError::StaleStatus).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::future::Future;
use std::time::Duration;
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};
use crate::models::basket::BasketLine;
use crate::models::order::{NewOrder, NewOrderLine, Order, OrderDetails, OrderLine, OrderStatus};
use crate::models::product::Product;

pub mod memory;
pub mod postgres;

pub use memory::MemoryOrderStore;
pub use postgres::PgOrderStore;

/// Filter for order listings
#[derive(Debug, Clone, Default)]
pub struct OrderFilter {
    pub statuses: Vec<OrderStatus>,
    /// Only orders assigned to this courier
    pub courier_id: Option<Uuid>,
    /// Only orders with no courier assigned yet
    pub unassigned: bool,
}

impl OrderFilter {
    pub fn statuses(statuses: &[OrderStatus]) -> Self {
        Self {
            statuses: statuses.to_vec(),
            ..Default::default()
        }
    }

    pub fn for_courier(mut self, courier_id: Uuid) -> Self {
        self.courier_id = Some(courier_id);
        self
    }

    pub fn unassigned(mut self) -> Self {
        self.unassigned = true;
        self
    }

    pub fn matches(&self, order: &Order) -> bool {
        if order.is_deleted() || !self.statuses.contains(&order.status) {
            return false;
        }
        if let Some(courier_id) = self.courier_id {
            if order.courier_id != Some(courier_id) {
                return false;
            }
        }
        !(self.unassigned && order.courier_id.is_some())
    }
}

#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Insert a new order with status `in_process`
    async fn create_order(&self, order: NewOrder) -> StoreResult<Order>;

    /// Record the order total once its lines are committed
    async fn set_total_price(&self, order_id: Uuid, total: Decimal) -> StoreResult<()>;

    /// Soft-delete an order and its lines
    async fn delete_order(&self, order_id: Uuid) -> StoreResult<()>;

    async fn change_status(
        &self,
        order_id: Uuid,
        from: OrderStatus,
        to: OrderStatus,
    ) -> StoreResult<()>;

    /// Live (not soft-deleted) order with its live lines
    async fn get_order_by_id(&self, order_id: Uuid) -> StoreResult<Option<OrderDetails>>;

    /// Newest first
    async fn get_orders(&self, filter: OrderFilter) -> StoreResult<Vec<OrderDetails>>;

    async fn mark_picked(
        &self,
        order_id: Uuid,
        from: OrderStatus,
        picker_id: Uuid,
        at: DateTime<Utc>,
    ) -> StoreResult<()>;

    /// Fails with `CourierBusy` when the courier already has an order in
    /// `delivering`; the check and the write are one atomic step
    async fn mark_delivering(
        &self,
        order_id: Uuid,
        from: OrderStatus,
        courier_id: Uuid,
        at: DateTime<Utc>,
    ) -> StoreResult<()>;

    async fn mark_delivered(
        &self,
        order_id: Uuid,
        from: OrderStatus,
        at: DateTime<Utc>,
    ) -> StoreResult<()>;

    /// Orders currently `delivering` with this courier assigned
    async fn count_active_deliveries(&self, courier_id: Uuid) -> StoreResult<u64>;

    /// Active basket lines of a user, oldest first
    async fn get_basket_lines(&self, user_id: Uuid) -> StoreResult<Vec<BasketLine>>;

    /// Fails with `Conflict` when the user already has an active line for the product
    async fn add_basket_line(
        &self,
        user_id: Uuid,
        product_id: Uuid,
        quantity: i32,
    ) -> StoreResult<BasketLine>;

    async fn delete_basket_line(&self, line_id: Uuid) -> StoreResult<()>;

    async fn get_product_by_id(&self, product_id: Uuid) -> StoreResult<Option<Product>>;

    /// Insert all lines or none
    async fn create_order_lines(&self, lines: Vec<NewOrderLine>) -> StoreResult<Vec<OrderLine>>;
}

/// Run a storage call under a deadline; an expired deadline is [`StoreError::Timeout`]
pub async fn with_deadline<T, F>(deadline: Duration, call: F) -> StoreResult<T>
where
    F: Future<Output = StoreResult<T>>,
{
    tokio::time::timeout(deadline, call)
        .await
        .unwrap_or(Err(StoreError::Timeout))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_deadline_expiry_is_timeout() {
        let slow = async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok::<_, StoreError>(1)
        };
        let result = with_deadline(Duration::from_millis(10), slow).await;
        assert_eq!(result, Err(StoreError::Timeout));
    }

    #[tokio::test]
    async fn test_deadline_passes_result_through() {
        let result = with_deadline(Duration::from_secs(1), async { Ok::<_, StoreError>(7) }).await;
        assert_eq!(result, Ok(7));
    }
}
