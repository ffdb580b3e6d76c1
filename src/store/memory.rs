//! In-process [`OrderStore`] backed by `parking_lot` locked tables
//!
//! Used for local runs (`STORE_BACKEND=memory`) and as the store behind the
//! test suites. Locks are never held across an await point.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use uuid::Uuid;

use super::{OrderFilter, OrderStore};
use crate::error::{StoreError, StoreResult};
use crate::models::basket::BasketLine;
use crate::models::order::{
    NewOrder, NewOrderLine, Order, OrderDetails, OrderLine, OrderLineDetail, OrderStatus,
};
use crate::models::product::Product;

#[derive(Default)]
struct Tables {
    products: HashMap<Uuid, Product>,
    orders: HashMap<Uuid, Order>,
    order_lines: Vec<OrderLine>,
    basket_lines: Vec<BasketLine>,
    last_order_number: i64,
}

impl Tables {
    fn details(&self, order: &Order) -> OrderDetails {
        let lines = self
            .order_lines
            .iter()
            .filter(|l| l.order_id == order.id && l.deleted_at.is_none())
            .map(|line| {
                let product = self.products.get(&line.product_id);
                OrderLineDetail {
                    line: line.clone(),
                    product_name: product.map(|p| p.name.clone()).unwrap_or_default(),
                    image_key: product.and_then(|p| p.image_key.clone()),
                }
            })
            .collect();

        OrderDetails {
            order: order.clone(),
            lines,
        }
    }

    /// Apply `update` to a live order whose status is still `from`
    fn update_order(
        &mut self,
        order_id: Uuid,
        from: OrderStatus,
        update: impl FnOnce(&mut Order),
    ) -> StoreResult<()> {
        let order = self
            .orders
            .get_mut(&order_id)
            .filter(|o| !o.is_deleted())
            .ok_or(StoreError::NotFound)?;

        if order.status != from {
            return Err(StoreError::StaleStatus);
        }

        update(&mut *order);
        order.updated_at = Utc::now();
        Ok(())
    }

    fn active_deliveries(&self, courier_id: Uuid) -> usize {
        let filter = OrderFilter::statuses(&[OrderStatus::Delivering]).for_courier(courier_id);
        self.orders.values().filter(|o| filter.matches(o)).count()
    }
}

#[derive(Default)]
pub struct MemoryOrderStore {
    tables: RwLock<Tables>,
    fail_line_insert: AtomicBool,
}

impl MemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed or replace a catalogue product
    pub fn upsert_product(&self, product: Product) {
        self.tables.write().products.insert(product.id, product);
    }

    /// Change a product's live price, as the catalogue service would
    pub fn set_product_price(&self, product_id: Uuid, price: Decimal) {
        if let Some(product) = self.tables.write().products.get_mut(&product_id) {
            product.price = price;
        }
    }

    /// Make the next `create_order_lines` call fail with a backend error
    pub fn fail_next_line_insert(&self) {
        self.fail_line_insert.store(true, Ordering::SeqCst);
    }

    /// Every order row, soft-deleted ones included
    pub fn orders_snapshot(&self) -> Vec<Order> {
        let mut orders: Vec<Order> = self.tables.read().orders.values().cloned().collect();
        orders.sort_by_key(|o| o.order_number);
        orders
    }

    /// Every order line row, soft-deleted ones included
    pub fn order_lines_snapshot(&self) -> Vec<OrderLine> {
        self.tables.read().order_lines.clone()
    }

    /// Every basket line row, soft-deleted ones included
    pub fn basket_snapshot(&self) -> Vec<BasketLine> {
        self.tables.read().basket_lines.clone()
    }
}

#[async_trait]
impl OrderStore for MemoryOrderStore {
    async fn create_order(&self, new: NewOrder) -> StoreResult<Order> {
        let mut tables = self.tables.write();
        if tables.orders.contains_key(&new.id) {
            return Err(StoreError::Conflict(format!("order {} already exists", new.id)));
        }

        tables.last_order_number += 1;
        let now = Utc::now();
        let order = Order {
            id: new.id,
            order_number: tables.last_order_number,
            user_id: new.user_id,
            status: OrderStatus::InProcess,
            payment_type: new.payment_type,
            card_type: new.card_type,
            client_name: new.client_name,
            client_phone: new.client_phone,
            comment: new.comment,
            delivery_type: new.delivery_type,
            latitude: new.latitude,
            longitude: new.longitude,
            address_name: new.address_name,
            picker_id: None,
            picked_at: None,
            courier_id: None,
            delivering_at: None,
            delivered_at: None,
            total_price: new.total_price,
            deleted_at: None,
            created_at: now,
            updated_at: now,
        };

        tables.orders.insert(order.id, order.clone());
        Ok(order)
    }

    async fn set_total_price(&self, order_id: Uuid, total: Decimal) -> StoreResult<()> {
        let mut tables = self.tables.write();
        let order = tables
            .orders
            .get_mut(&order_id)
            .filter(|o| !o.is_deleted())
            .ok_or(StoreError::NotFound)?;
        order.total_price = total;
        order.updated_at = Utc::now();
        Ok(())
    }

    async fn delete_order(&self, order_id: Uuid) -> StoreResult<()> {
        let mut tables = self.tables.write();
        let now = Utc::now();

        let order = tables
            .orders
            .get_mut(&order_id)
            .filter(|o| !o.is_deleted())
            .ok_or(StoreError::NotFound)?;
        order.deleted_at = Some(now);
        order.updated_at = now;

        for line in tables
            .order_lines
            .iter_mut()
            .filter(|l| l.order_id == order_id && l.deleted_at.is_none())
        {
            line.deleted_at = Some(now);
        }

        Ok(())
    }

    async fn change_status(
        &self,
        order_id: Uuid,
        from: OrderStatus,
        to: OrderStatus,
    ) -> StoreResult<()> {
        self.tables
            .write()
            .update_order(order_id, from, |order| order.status = to)
    }

    async fn get_order_by_id(&self, order_id: Uuid) -> StoreResult<Option<OrderDetails>> {
        let tables = self.tables.read();
        Ok(tables
            .orders
            .get(&order_id)
            .filter(|o| !o.is_deleted())
            .map(|o| tables.details(o)))
    }

    async fn get_orders(&self, filter: OrderFilter) -> StoreResult<Vec<OrderDetails>> {
        let tables = self.tables.read();
        let mut orders: Vec<&Order> = tables.orders.values().filter(|o| filter.matches(o)).collect();
        orders.sort_by(|a, b| b.order_number.cmp(&a.order_number));
        Ok(orders.into_iter().map(|o| tables.details(o)).collect())
    }

    async fn mark_picked(
        &self,
        order_id: Uuid,
        from: OrderStatus,
        picker_id: Uuid,
        at: DateTime<Utc>,
    ) -> StoreResult<()> {
        self.tables.write().update_order(order_id, from, |order| {
            order.status = OrderStatus::Picked;
            order.picker_id = Some(picker_id);
            order.picked_at = Some(at);
        })
    }

    async fn mark_delivering(
        &self,
        order_id: Uuid,
        from: OrderStatus,
        courier_id: Uuid,
        at: DateTime<Utc>,
    ) -> StoreResult<()> {
        let mut tables = self.tables.write();
        let live_in_from = tables
            .orders
            .get(&order_id)
            .is_some_and(|o| !o.is_deleted() && o.status == from);
        if live_in_from && tables.active_deliveries(courier_id) > 0 {
            return Err(StoreError::CourierBusy);
        }

        tables.update_order(order_id, from, |order| {
            order.status = OrderStatus::Delivering;
            order.courier_id = Some(courier_id);
            order.delivering_at = Some(at);
        })
    }

    async fn mark_delivered(
        &self,
        order_id: Uuid,
        from: OrderStatus,
        at: DateTime<Utc>,
    ) -> StoreResult<()> {
        self.tables.write().update_order(order_id, from, |order| {
            order.status = OrderStatus::Finished;
            order.delivered_at = Some(at);
        })
    }

    async fn count_active_deliveries(&self, courier_id: Uuid) -> StoreResult<u64> {
        Ok(self.tables.read().active_deliveries(courier_id) as u64)
    }

    async fn get_basket_lines(&self, user_id: Uuid) -> StoreResult<Vec<BasketLine>> {
        Ok(self
            .tables
            .read()
            .basket_lines
            .iter()
            .filter(|l| l.user_id == user_id && l.deleted_at.is_none())
            .cloned()
            .collect())
    }

    async fn add_basket_line(
        &self,
        user_id: Uuid,
        product_id: Uuid,
        quantity: i32,
    ) -> StoreResult<BasketLine> {
        let mut tables = self.tables.write();

        if !tables.products.contains_key(&product_id) {
            return Err(StoreError::Conflict(format!("product {} does not exist", product_id)));
        }

        let exists = tables.basket_lines.iter().any(|l| {
            l.user_id == user_id && l.product_id == product_id && l.deleted_at.is_none()
        });
        if exists {
            return Err(StoreError::Conflict(format!(
                "basket line for product {} already exists",
                product_id
            )));
        }

        let line = BasketLine {
            id: Uuid::new_v4(),
            user_id,
            product_id,
            quantity,
            deleted_at: None,
        };
        tables.basket_lines.push(line.clone());
        Ok(line)
    }

    async fn delete_basket_line(&self, line_id: Uuid) -> StoreResult<()> {
        let mut tables = self.tables.write();
        let line = tables
            .basket_lines
            .iter_mut()
            .find(|l| l.id == line_id && l.deleted_at.is_none())
            .ok_or(StoreError::NotFound)?;
        line.deleted_at = Some(Utc::now());
        Ok(())
    }

    async fn get_product_by_id(&self, product_id: Uuid) -> StoreResult<Option<Product>> {
        Ok(self.tables.read().products.get(&product_id).cloned())
    }

    async fn create_order_lines(&self, lines: Vec<NewOrderLine>) -> StoreResult<Vec<OrderLine>> {
        if self.fail_line_insert.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Backend("order_lines insert failed".into()));
        }

        let mut tables = self.tables.write();
        if let Some(missing) = lines.iter().find(|l| !tables.orders.contains_key(&l.order_id)) {
            return Err(StoreError::Conflict(format!(
                "order {} does not exist",
                missing.order_id
            )));
        }

        let created: Vec<OrderLine> = lines
            .into_iter()
            .map(|l| OrderLine {
                id: Uuid::new_v4(),
                order_id: l.order_id,
                product_id: l.product_id,
                quantity: l.quantity,
                total_price: l.total_price(),
                price: l.price,
                deleted_at: None,
            })
            .collect();

        tables.order_lines.extend(created.iter().cloned());
        Ok(created)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::order::{DeliveryType, PaymentType};

    fn new_order(user_id: Uuid) -> NewOrder {
        NewOrder {
            id: Uuid::new_v4(),
            user_id,
            payment_type: PaymentType::Cash,
            card_type: None,
            client_name: "Alice".into(),
            client_phone: "+998901234567".into(),
            comment: None,
            delivery_type: DeliveryType::Delivery,
            latitude: 41.3,
            longitude: 69.2,
            address_name: None,
            total_price: Decimal::ZERO,
        }
    }

    #[tokio::test]
    async fn test_order_numbers_are_sequential() {
        let store = MemoryOrderStore::new();
        let a = store.create_order(new_order(Uuid::new_v4())).await.unwrap();
        let b = store.create_order(new_order(Uuid::new_v4())).await.unwrap();
        assert_eq!(a.order_number + 1, b.order_number);
        assert_eq!(a.status, OrderStatus::InProcess);
    }

    #[tokio::test]
    async fn test_conditional_write_rejects_stale_status() {
        let store = MemoryOrderStore::new();
        let order = store.create_order(new_order(Uuid::new_v4())).await.unwrap();

        let result = store
            .change_status(order.id, OrderStatus::Picked, OrderStatus::Finished)
            .await;
        assert_eq!(result, Err(StoreError::StaleStatus));

        store
            .change_status(order.id, OrderStatus::InProcess, OrderStatus::Finished)
            .await
            .unwrap();
        let details = store.get_order_by_id(order.id).await.unwrap().unwrap();
        assert_eq!(details.order.status, OrderStatus::Finished);
    }

    #[tokio::test]
    async fn test_deleted_orders_are_invisible() {
        let store = MemoryOrderStore::new();
        let order = store.create_order(new_order(Uuid::new_v4())).await.unwrap();
        store.delete_order(order.id).await.unwrap();

        assert!(store.get_order_by_id(order.id).await.unwrap().is_none());
        assert_eq!(
            store.mark_picked(order.id, OrderStatus::InProcess, Uuid::new_v4(), Utc::now()).await,
            Err(StoreError::NotFound)
        );
        assert_eq!(store.orders_snapshot().len(), 1);
    }

    #[tokio::test]
    async fn test_delete_order_takes_its_lines_along() {
        let store = MemoryOrderStore::new();
        let order = store.create_order(new_order(Uuid::new_v4())).await.unwrap();
        store
            .create_order_lines(vec![NewOrderLine {
                order_id: order.id,
                product_id: Uuid::new_v4(),
                quantity: 2,
                price: Decimal::new(150, 2),
            }])
            .await
            .unwrap();

        store.delete_order(order.id).await.unwrap();

        assert!(store
            .order_lines_snapshot()
            .iter()
            .all(|l| l.deleted_at.is_some()));
        assert_eq!(store.delete_order(order.id).await, Err(StoreError::NotFound));
    }

    #[tokio::test]
    async fn test_busy_courier_cannot_start_second_delivery() {
        let store = MemoryOrderStore::new();
        let courier = Uuid::new_v4();
        let first = store.create_order(new_order(Uuid::new_v4())).await.unwrap();
        let second = store.create_order(new_order(Uuid::new_v4())).await.unwrap();
        for id in [first.id, second.id] {
            store
                .mark_picked(id, OrderStatus::InProcess, Uuid::new_v4(), Utc::now())
                .await
                .unwrap();
        }

        store
            .mark_delivering(first.id, OrderStatus::Picked, courier, Utc::now())
            .await
            .unwrap();
        assert_eq!(
            store
                .mark_delivering(second.id, OrderStatus::Picked, courier, Utc::now())
                .await,
            Err(StoreError::CourierBusy)
        );

        // A stale status still wins over the busy check
        assert_eq!(
            store
                .mark_delivering(second.id, OrderStatus::InProcess, courier, Utc::now())
                .await,
            Err(StoreError::StaleStatus)
        );
        assert_eq!(store.count_active_deliveries(courier).await, Ok(1));
    }

    #[tokio::test]
    async fn test_duplicate_basket_line_conflicts() {
        let store = MemoryOrderStore::new();
        let product_id = Uuid::new_v4();
        store.upsert_product(Product {
            id: product_id,
            name: "Tea".into(),
            price: Decimal::new(300, 2),
            quantity: 10,
            image_key: None,
        });
        let user_id = Uuid::new_v4();

        let line = store.add_basket_line(user_id, product_id, 1).await.unwrap();
        assert!(matches!(
            store.add_basket_line(user_id, product_id, 2).await,
            Err(StoreError::Conflict(_))
        ));

        // Re-adding is allowed once the old line is consumed
        store.delete_basket_line(line.id).await.unwrap();
        assert!(store.add_basket_line(user_id, product_id, 2).await.is_ok());
    }
}
