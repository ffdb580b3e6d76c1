//! Checkout: basket → order + order lines
//!
//! The order row is written before its lines, with no transaction spanning
//! both. Any failure after the order insert soft-deletes the order again, so
//! a call ends either fully committed or rolled back.
//!
//! Stock is compared against the live product quantity and nothing is
//! reserved. Two concurrent checkouts of the last unit can both pass.

use lazy_static::lazy_static;
use regex::Regex;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::auth::Caller;
use crate::error::{OrderError, StoreError};
use crate::models::order::{
    CheckoutRequest, NewOrder, NewOrderLine, OrderDetails, OrderLineDetail, PaymentType,
};
use crate::models::product::Product;
use crate::services::basket::BasketSnapshot;
use crate::services::dispatch::{CourierDispatchBroadcaster, CourierEvent};
use crate::services::media::MediaUrlResolver;
use crate::services::order_query::order_view;
use crate::store::{with_deadline, OrderStore};

lazy_static! {
    static ref PHONE_RE: Regex = Regex::new(r"^\+?[1-9][0-9]{7,14}$").unwrap();
}

/// Strip common separators and check the result is an E.164-style number
pub fn normalize_phone(raw: &str) -> Option<String> {
    let compact: String = raw
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '(' | ')'))
        .collect();
    PHONE_RE.is_match(&compact).then_some(compact)
}

#[derive(Clone)]
pub struct CheckoutTransactionManager {
    store: Arc<dyn OrderStore>,
    dispatcher: CourierDispatchBroadcaster,
    media: MediaUrlResolver,
    timeout: Duration,
}

impl CheckoutTransactionManager {
    pub fn new(
        store: Arc<dyn OrderStore>,
        dispatcher: CourierDispatchBroadcaster,
        media: MediaUrlResolver,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            dispatcher,
            media,
            timeout,
        }
    }

    pub async fn create_order(
        &self,
        caller: &Caller,
        request: CheckoutRequest,
    ) -> Result<OrderDetails, OrderError> {
        // 1. Input validation, before any write
        let phone = normalize_phone(&request.phone).ok_or(OrderError::InvalidPhone)?;
        let payment_type: PaymentType = request
            .payment_type
            .parse()
            .map_err(|_| OrderError::PaymentTypeInvalid)?;

        // 2. Basket
        let basket = BasketSnapshot::load(self.store.as_ref(), caller.user_id, self.timeout).await?;
        if basket.is_empty() {
            return Err(OrderError::BasketEmpty);
        }

        // 3. Order row
        let new_order = NewOrder {
            id: Uuid::new_v4(),
            user_id: caller.user_id,
            payment_type,
            card_type: request.card_type.filter(|c| !c.trim().is_empty()),
            client_name: request.client_name.trim().to_string(),
            client_phone: phone,
            comment: request.comment,
            delivery_type: request.delivery_type,
            latitude: request.latitude,
            longitude: request.longitude,
            address_name: request.address_name,
            total_price: Decimal::ZERO,
        };
        let mut order = with_deadline(self.timeout, self.store.create_order(new_order))
            .await
            .map_err(|e| match e {
                StoreError::Conflict(msg) if msg.contains("payment_type") => {
                    OrderError::PaymentTypeInvalid
                }
                other => OrderError::Internal(other),
            })?;
        debug!(order_id = %order.id, order_number = order.order_number, "Order row created");

        // 4-5. Stock check and lines; 6. roll back on any failure
        let (lines, total) = match self.commit_lines(order.id, &basket).await {
            Ok(committed) => committed,
            Err(e) => {
                self.roll_back(order.id).await;
                return Err(e);
            }
        };
        order.total_price = total;

        // 7. Clear the consumed basket lines, then notify couriers
        for line in basket.lines() {
            if let Err(e) =
                with_deadline(self.timeout, self.store.delete_basket_line(line.id)).await
            {
                warn!(order_id = %order.id, basket_line_id = %line.id, error = %e, "Failed to clear basket line");
            }
        }

        info!(
            order_id = %order.id,
            order_number = order.order_number,
            user_id = %caller.user_id,
            lines = lines.len(),
            total = %order.total_price,
            "Order checked out"
        );

        self.spawn_broadcast(order.id);

        Ok(OrderDetails { order, lines })
    }

    async fn commit_lines(
        &self,
        order_id: Uuid,
        basket: &BasketSnapshot,
    ) -> Result<(Vec<OrderLineDetail>, Decimal), OrderError> {
        let mut pending = Vec::with_capacity(basket.lines().len());
        let mut products: Vec<Product> = Vec::with_capacity(basket.lines().len());

        for line in basket.lines() {
            let product = with_deadline(self.timeout, self.store.get_product_by_id(line.product_id))
                .await?
                .ok_or(OrderError::NotFound)?;

            if line.quantity > product.quantity {
                info!(
                    order_id = %order_id,
                    product_id = %product.id,
                    requested = line.quantity,
                    in_stock = product.quantity,
                    "Insufficient stock, aborting checkout"
                );
                return Err(OrderError::QuantityTooMany {
                    product_id: product.id,
                });
            }

            pending.push(NewOrderLine {
                order_id,
                product_id: product.id,
                quantity: line.quantity,
                price: product.price,
            });
            products.push(product);
        }

        let total: Decimal = pending.iter().map(NewOrderLine::total_price).sum();
        let created = with_deadline(self.timeout, self.store.create_order_lines(pending)).await?;
        with_deadline(self.timeout, self.store.set_total_price(order_id, total)).await?;

        let details = created
            .into_iter()
            .map(|line| {
                let product = products.iter().find(|p| p.id == line.product_id);
                OrderLineDetail {
                    product_name: product.map(|p| p.name.clone()).unwrap_or_default(),
                    image_key: product.and_then(|p| p.image_key.clone()),
                    line,
                }
            })
            .collect();

        Ok((details, total))
    }

    /// Compensating delete. Its own failure is logged, never returned.
    async fn roll_back(&self, order_id: Uuid) {
        match with_deadline(self.timeout, self.store.delete_order(order_id)).await {
            Ok(()) => info!(order_id = %order_id, "Checkout rolled back"),
            Err(e) => {
                error!(order_id = %order_id, error = %e, "Failed to roll back order after checkout failure")
            }
        }
    }

    /// Look the order up again and hand it to the dispatcher, off the request path
    fn spawn_broadcast(&self, order_id: Uuid) {
        let store = self.store.clone();
        let dispatcher = self.dispatcher.clone();
        let media = self.media.clone();
        let timeout = self.timeout;

        tokio::spawn(async move {
            match with_deadline(timeout, store.get_order_by_id(order_id)).await {
                Ok(Some(details)) => {
                    let order = order_view(&details, &media, None);
                    dispatcher.enqueue(CourierEvent::OrderCreated { order });
                }
                Ok(None) => warn!(order_id = %order_id, "Checked-out order vanished before broadcast"),
                Err(e) => warn!(order_id = %order_id, error = %e, "Order lookup for broadcast failed"),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Role;
    use crate::models::order::{DeliveryType, OrderStatus};
    use crate::store::MemoryOrderStore;
    use rust_decimal_macros::dec;
    use tokio::sync::mpsc::{unbounded_channel, UnboundedSender};

    use crate::services::dispatch::{CourierConnection, SendError};

    struct Harness {
        store: Arc<MemoryOrderStore>,
        checkout: CheckoutTransactionManager,
        dispatcher: CourierDispatchBroadcaster,
        caller: Caller,
    }

    fn harness() -> Harness {
        let store = Arc::new(MemoryOrderStore::new());
        let (dispatcher, worker) = CourierDispatchBroadcaster::new(1, Duration::from_secs(1));
        tokio::spawn(worker.run());
        let checkout = CheckoutTransactionManager::new(
            store.clone(),
            dispatcher.clone(),
            MediaUrlResolver::new("http://media.test"),
            Duration::from_secs(1),
        );
        Harness {
            store,
            checkout,
            dispatcher,
            caller: Caller::new(Uuid::new_v4(), Role::Client),
        }
    }

    fn product(h: &Harness, price: Decimal, stock: i32) -> Uuid {
        let id = Uuid::new_v4();
        h.store.upsert_product(Product {
            id,
            name: format!("product-{}", &id.to_string()[..8]),
            price,
            quantity: stock,
            image_key: None,
        });
        id
    }

    async fn add_to_basket(h: &Harness, product_id: Uuid, quantity: i32) {
        h.store
            .add_basket_line(h.caller.user_id, product_id, quantity)
            .await
            .unwrap();
    }

    fn request(payment_type: &str) -> CheckoutRequest {
        CheckoutRequest {
            client_name: "Ann Lee".into(),
            phone: "+1 (555) 010-2030".into(),
            comment: Some("ring twice".into()),
            payment_type: payment_type.into(),
            card_type: None,
            delivery_type: DeliveryType::Delivery,
            latitude: 41.31,
            longitude: 69.24,
            address_name: Some("Main st 1".into()),
        }
    }

    fn active_basket(h: &Harness) -> usize {
        h.store
            .basket_snapshot()
            .iter()
            .filter(|l| l.deleted_at.is_none())
            .count()
    }

    fn live_orders(h: &Harness) -> usize {
        h.store
            .orders_snapshot()
            .iter()
            .filter(|o| !o.is_deleted())
            .count()
    }

    #[test]
    fn test_phone_normalization() {
        assert_eq!(normalize_phone("+1 (555) 010-2030").as_deref(), Some("+15550102030"));
        assert_eq!(normalize_phone("998901234567").as_deref(), Some("998901234567"));
        assert_eq!(normalize_phone("12345"), None);
        assert_eq!(normalize_phone("+0123456789"), None);
        assert_eq!(normalize_phone("call me"), None);
    }

    #[tokio::test]
    async fn test_checkout_commits_order_and_clears_basket() {
        let h = harness();
        let apple = product(&h, dec!(2.50), 5);
        add_to_basket(&h, apple, 2).await;

        let details = h.checkout.create_order(&h.caller, request("cash")).await.unwrap();

        assert_eq!(details.order.status, OrderStatus::InProcess);
        assert_eq!(details.order.payment_type, PaymentType::Cash);
        assert_eq!(details.order.client_phone, "+15550102030");
        assert_eq!(details.order.total_price, dec!(5.00));
        assert_eq!(details.lines.len(), 1);
        assert_eq!(details.lines[0].line.quantity, 2);
        assert_eq!(details.lines[0].line.price, dec!(2.50));

        assert_eq!(active_basket(&h), 0);
        let orders = h.store.orders_snapshot();
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].total_price, dec!(5.00));
    }

    #[tokio::test]
    async fn test_empty_basket_creates_nothing() {
        let h = harness();
        let result = h.checkout.create_order(&h.caller, request("cash")).await;

        assert!(matches!(result, Err(OrderError::BasketEmpty)));
        assert!(h.store.orders_snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_insufficient_stock_rolls_back_everything() {
        let h = harness();
        let plenty = product(&h, dec!(1.00), 10);
        let scarce = product(&h, dec!(3.00), 1);
        add_to_basket(&h, plenty, 1).await;
        add_to_basket(&h, scarce, 2).await;

        let result = h.checkout.create_order(&h.caller, request("card")).await;

        match result {
            Err(e @ OrderError::QuantityTooMany { product_id }) => {
                assert_eq!(product_id, scarce);
                assert_eq!(e.to_string(), "quantity too many");
            }
            other => panic!("expected quantity too many, got {other:?}"),
        }
        assert_eq!(live_orders(&h), 0);
        assert!(h
            .store
            .order_lines_snapshot()
            .iter()
            .all(|l| l.deleted_at.is_some()));
        assert_eq!(active_basket(&h), 2);
    }

    #[tokio::test]
    async fn test_line_insert_failure_rolls_back_order() {
        let h = harness();
        let apple = product(&h, dec!(1.25), 4);
        add_to_basket(&h, apple, 1).await;
        h.store.fail_next_line_insert();

        let result = h.checkout.create_order(&h.caller, request("cash")).await;

        assert!(matches!(result, Err(OrderError::Internal(_))));
        let orders = h.store.orders_snapshot();
        assert_eq!(orders.len(), 1);
        assert!(orders[0].is_deleted());
        assert!(h.store.order_lines_snapshot().is_empty());
        assert_eq!(active_basket(&h), 1);
    }

    #[tokio::test]
    async fn test_validation_fails_before_any_write() {
        let h = harness();
        let apple = product(&h, dec!(1.00), 4);
        add_to_basket(&h, apple, 1).await;

        let mut bad_phone = request("cash");
        bad_phone.phone = "12".into();
        assert!(matches!(
            h.checkout.create_order(&h.caller, bad_phone).await,
            Err(OrderError::InvalidPhone)
        ));
        assert!(matches!(
            h.checkout.create_order(&h.caller, request("bitcoin")).await,
            Err(OrderError::PaymentTypeInvalid)
        ));

        assert!(h.store.orders_snapshot().is_empty());
        assert_eq!(active_basket(&h), 1);
    }

    #[tokio::test]
    async fn test_line_price_is_frozen_at_checkout() {
        let h = harness();
        let apple = product(&h, dec!(2.00), 5);
        add_to_basket(&h, apple, 3).await;

        let details = h.checkout.create_order(&h.caller, request("cash")).await.unwrap();
        h.store.set_product_price(apple, dec!(9.99));

        let stored = h
            .store
            .get_order_by_id(details.order.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.lines[0].line.price, dec!(2.00));
        assert_eq!(stored.lines[0].line.total_price, dec!(6.00));
        assert_eq!(stored.order.total_price, dec!(6.00));
    }

    struct ChannelConnection(UnboundedSender<String>);

    #[async_trait::async_trait]
    impl CourierConnection for ChannelConnection {
        async fn send_text(&mut self, text: String) -> Result<(), SendError> {
            self.0.send(text)?;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_successful_checkout_is_broadcast_to_couriers() {
        let h = harness();
        let (tx, mut rx) = unbounded_channel();
        h.dispatcher
            .register(Role::Courier, Box::new(ChannelConnection(tx)));
        let apple = product(&h, dec!(1.00), 5);
        add_to_basket(&h, apple, 1).await;

        let details = h.checkout.create_order(&h.caller, request("cash")).await.unwrap();

        let frame = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        let json: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(json["type"], "order_created");
        assert_eq!(json["order"]["id"], details.order.id.to_string());
        assert_eq!(json["order"]["status"], "in_process");
    }
}
