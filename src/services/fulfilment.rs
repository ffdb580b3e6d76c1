use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

use crate::auth::{Caller, Role};
use crate::error::{OrderError, StoreError};
use crate::models::order::{OrderStatus, OrderView};
use crate::services::dispatch::{CourierDispatchBroadcaster, CourierEvent};
use crate::services::media::MediaUrlResolver;
use crate::services::order_query::order_view;
use crate::services::status_transition::{StatusTransitionEngine, Transition, TransitionGuard};
use crate::store::{with_deadline, OrderStore};

/// Status changes requested by staff, pickers and couriers
#[derive(Clone)]
pub struct FulfilmentService {
    store: Arc<dyn OrderStore>,
    engine: StatusTransitionEngine,
    dispatcher: CourierDispatchBroadcaster,
    media: MediaUrlResolver,
    timeout: Duration,
}

impl FulfilmentService {
    pub fn new(
        store: Arc<dyn OrderStore>,
        engine: StatusTransitionEngine,
        dispatcher: CourierDispatchBroadcaster,
        media: MediaUrlResolver,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            engine,
            dispatcher,
            media,
            timeout,
        }
    }

    /// Staff-only shortcut to `finished`
    pub async fn finish(&self, caller: &Caller, order_id: Uuid) -> Result<OrderView, OrderError> {
        require_staff(caller)?;
        self.change_status(caller, order_id, OrderStatus::Finished).await
    }

    /// Staff-only shortcut to `canceled`
    pub async fn cancel(&self, caller: &Caller, order_id: Uuid) -> Result<OrderView, OrderError> {
        require_staff(caller)?;
        self.change_status(caller, order_id, OrderStatus::Canceled).await
    }

    pub async fn change_status(
        &self,
        caller: &Caller,
        order_id: Uuid,
        requested: OrderStatus,
    ) -> Result<OrderView, OrderError> {
        let details = with_deadline(self.timeout, self.store.get_order_by_id(order_id))
            .await?
            .ok_or(OrderError::NotFound)?;
        let current = details.order.status;

        let courier_active_deliveries =
            if caller.role == Role::Courier && requested == OrderStatus::Delivering {
                with_deadline(
                    self.timeout,
                    self.store.count_active_deliveries(caller.user_id),
                )
                .await?
            } else {
                0
            };

        let guard = TransitionGuard {
            deleted: details.order.is_deleted(),
            courier_active_deliveries,
            assigned_to_caller: details.order.courier_id == Some(caller.user_id),
        };

        let transition = self
            .engine
            .can_transition(current, requested, caller.role, guard)
            .inspect_err(|e| {
                info!(
                    order_id = %order_id,
                    user_id = %caller.user_id,
                    role = %caller.role,
                    %current,
                    %requested,
                    reason = %e,
                    "Status change refused"
                )
            })?;

        self.apply(order_id, current, transition, caller.user_id)
            .await
            .map_err(|e| match e {
                // Someone else moved the order between our read and write
                StoreError::StaleStatus => OrderError::NotChangeable,
                // Another delivery started between the count and the write
                StoreError::CourierBusy => OrderError::OrderNotFinished,
                StoreError::NotFound => OrderError::NotFound,
                other => OrderError::Internal(other),
            })?;

        info!(
            order_id = %order_id,
            user_id = %caller.user_id,
            from = %current,
            to = %transition.target(),
            "Order status changed"
        );

        let updated = with_deadline(self.timeout, self.store.get_order_by_id(order_id))
            .await?
            .ok_or(OrderError::NotFound)?;

        let event = order_view(&updated, &self.media, None);
        if !self.dispatcher.enqueue(CourierEvent::OrderUpdated { order: event }) {
            warn!(order_id = %order_id, "Order update not broadcast");
        }

        Ok(order_view(&updated, &self.media, Some(caller)))
    }

    async fn apply(
        &self,
        order_id: Uuid,
        current: OrderStatus,
        transition: Transition,
        actor_id: Uuid,
    ) -> Result<(), StoreError> {
        let now = Utc::now();
        let write = async {
            match transition {
                Transition::StaffFinish | Transition::StaffCancel => {
                    self.store
                        .change_status(order_id, current, transition.target())
                        .await
                }
                Transition::MarkPicked => {
                    self.store.mark_picked(order_id, current, actor_id, now).await
                }
                Transition::MarkDelivering => {
                    self.store
                        .mark_delivering(order_id, current, actor_id, now)
                        .await
                }
                Transition::MarkDelivered => self.store.mark_delivered(order_id, current, now).await,
            }
        };
        with_deadline(self.timeout, write).await
    }
}

fn require_staff(caller: &Caller) -> Result<(), OrderError> {
    if caller.role == Role::Staff {
        Ok(())
    } else {
        Err(OrderError::Forbidden)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreResult;
    use crate::models::basket::BasketLine;
    use crate::models::order::{
        DeliveryType, NewOrder, NewOrderLine, Order, OrderDetails, OrderLine, PaymentType,
    };
    use crate::models::product::Product;
    use crate::store::{MemoryOrderStore, OrderFilter};
    use async_trait::async_trait;
    use chrono::DateTime;
    use rust_decimal::Decimal;

    struct Harness {
        store: Arc<MemoryOrderStore>,
        fulfilment: FulfilmentService,
    }

    fn harness() -> Harness {
        let store = Arc::new(MemoryOrderStore::new());
        let fulfilment = service_over(store.clone());
        Harness { store, fulfilment }
    }

    fn service_over(store: Arc<dyn OrderStore>) -> FulfilmentService {
        let (dispatcher, worker) = CourierDispatchBroadcaster::new(1, Duration::from_secs(1));
        tokio::spawn(worker.run());
        FulfilmentService::new(
            store,
            StatusTransitionEngine::default(),
            dispatcher,
            MediaUrlResolver::new("http://media.test"),
            Duration::from_secs(1),
        )
    }

    /// Memory store whose delivery count answers, then yields before
    /// returning, like a database round-trip would
    struct SlowCountStore(Arc<MemoryOrderStore>);

    #[async_trait]
    impl OrderStore for SlowCountStore {
        async fn create_order(&self, order: NewOrder) -> StoreResult<Order> {
            self.0.create_order(order).await
        }
        async fn set_total_price(&self, order_id: Uuid, total: Decimal) -> StoreResult<()> {
            self.0.set_total_price(order_id, total).await
        }
        async fn delete_order(&self, order_id: Uuid) -> StoreResult<()> {
            self.0.delete_order(order_id).await
        }
        async fn change_status(
            &self,
            order_id: Uuid,
            from: OrderStatus,
            to: OrderStatus,
        ) -> StoreResult<()> {
            self.0.change_status(order_id, from, to).await
        }
        async fn get_order_by_id(&self, order_id: Uuid) -> StoreResult<Option<OrderDetails>> {
            self.0.get_order_by_id(order_id).await
        }
        async fn get_orders(&self, filter: OrderFilter) -> StoreResult<Vec<OrderDetails>> {
            self.0.get_orders(filter).await
        }
        async fn mark_picked(
            &self,
            order_id: Uuid,
            from: OrderStatus,
            picker_id: Uuid,
            at: DateTime<Utc>,
        ) -> StoreResult<()> {
            self.0.mark_picked(order_id, from, picker_id, at).await
        }
        async fn mark_delivering(
            &self,
            order_id: Uuid,
            from: OrderStatus,
            courier_id: Uuid,
            at: DateTime<Utc>,
        ) -> StoreResult<()> {
            self.0.mark_delivering(order_id, from, courier_id, at).await
        }
        async fn mark_delivered(
            &self,
            order_id: Uuid,
            from: OrderStatus,
            at: DateTime<Utc>,
        ) -> StoreResult<()> {
            self.0.mark_delivered(order_id, from, at).await
        }
        async fn count_active_deliveries(&self, courier_id: Uuid) -> StoreResult<u64> {
            let count = self.0.count_active_deliveries(courier_id).await;
            tokio::task::yield_now().await;
            count
        }
        async fn get_basket_lines(&self, user_id: Uuid) -> StoreResult<Vec<BasketLine>> {
            self.0.get_basket_lines(user_id).await
        }
        async fn add_basket_line(
            &self,
            user_id: Uuid,
            product_id: Uuid,
            quantity: i32,
        ) -> StoreResult<BasketLine> {
            self.0.add_basket_line(user_id, product_id, quantity).await
        }
        async fn delete_basket_line(&self, line_id: Uuid) -> StoreResult<()> {
            self.0.delete_basket_line(line_id).await
        }
        async fn get_product_by_id(&self, product_id: Uuid) -> StoreResult<Option<Product>> {
            self.0.get_product_by_id(product_id).await
        }
        async fn create_order_lines(
            &self,
            lines: Vec<NewOrderLine>,
        ) -> StoreResult<Vec<OrderLine>> {
            self.0.create_order_lines(lines).await
        }
    }

    async fn new_order(h: &Harness) -> Uuid {
        h.store
            .create_order(NewOrder {
                id: Uuid::new_v4(),
                user_id: Uuid::new_v4(),
                payment_type: PaymentType::Card,
                card_type: Some("visa".into()),
                client_name: "Bo".into(),
                client_phone: "+15550009999".into(),
                comment: None,
                delivery_type: DeliveryType::Delivery,
                latitude: 1.0,
                longitude: 2.0,
                address_name: None,
                total_price: Decimal::new(1000, 2),
            })
            .await
            .unwrap()
            .id
    }

    fn caller(role: Role) -> Caller {
        Caller::new(Uuid::new_v4(), role)
    }

    #[tokio::test]
    async fn test_full_delivery_flow_records_assignments() {
        let h = harness();
        let order_id = new_order(&h).await;
        let picker = caller(Role::Picker);
        let courier = caller(Role::Courier);

        let view = h
            .fulfilment
            .change_status(&picker, order_id, OrderStatus::Picked)
            .await
            .unwrap();
        assert_eq!(view.picker_id, Some(picker.user_id));
        assert!(view.picked_at.is_some());

        let view = h
            .fulfilment
            .change_status(&courier, order_id, OrderStatus::Delivering)
            .await
            .unwrap();
        assert_eq!(view.courier_id, Some(courier.user_id));
        assert_eq!(view.is_mine, Some(true));

        let view = h
            .fulfilment
            .change_status(&courier, order_id, OrderStatus::Finished)
            .await
            .unwrap();
        assert_eq!(view.status, OrderStatus::Finished);
        assert_eq!(view.status_index, 4);
        assert!(view.delivered_at.is_some());
    }

    #[tokio::test]
    async fn test_courier_with_active_delivery_is_refused() {
        let h = harness();
        let first = new_order(&h).await;
        let second = new_order(&h).await;
        let picker = caller(Role::Picker);
        let courier = caller(Role::Courier);

        for id in [first, second] {
            h.fulfilment
                .change_status(&picker, id, OrderStatus::Picked)
                .await
                .unwrap();
        }
        h.fulfilment
            .change_status(&courier, first, OrderStatus::Delivering)
            .await
            .unwrap();

        let result = h
            .fulfilment
            .change_status(&courier, second, OrderStatus::Delivering)
            .await;
        match result {
            Err(e @ OrderError::OrderNotFinished) => assert_eq!(e.to_string(), "order not finished"),
            other => panic!("expected order not finished, got {other:?}"),
        }

        // Once the first one is delivered the courier is free again
        h.fulfilment
            .change_status(&courier, first, OrderStatus::Finished)
            .await
            .unwrap();
        h.fulfilment
            .change_status(&courier, second, OrderStatus::Delivering)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_concurrent_pickups_leave_one_delivery_per_courier() {
        let h = harness();
        let first = new_order(&h).await;
        let second = new_order(&h).await;
        let picker = caller(Role::Picker);
        for id in [first, second] {
            h.fulfilment
                .change_status(&picker, id, OrderStatus::Picked)
                .await
                .unwrap();
        }

        let racing = service_over(Arc::new(SlowCountStore(h.store.clone())));
        let courier = caller(Role::Courier);
        let (a, b) = tokio::join!(
            racing.change_status(&courier, first, OrderStatus::Delivering),
            racing.change_status(&courier, second, OrderStatus::Delivering),
        );

        assert_eq!(a.is_ok() as u8 + b.is_ok() as u8, 1, "a={a:?} b={b:?}");
        let refused = if a.is_err() { a } else { b };
        assert!(matches!(refused, Err(OrderError::OrderNotFinished)));
        assert_eq!(
            h.store.count_active_deliveries(courier.user_id).await.unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn test_staff_shortcuts_only_from_in_process() {
        let h = harness();
        let staff = caller(Role::Staff);
        let order_id = new_order(&h).await;

        let view = h.fulfilment.cancel(&staff, order_id).await.unwrap();
        assert_eq!(view.status, OrderStatus::Canceled);

        let again = h.fulfilment.finish(&staff, order_id).await;
        assert!(matches!(again, Err(OrderError::NotChangeable)));
    }

    #[tokio::test]
    async fn test_shortcuts_refuse_non_staff() {
        let h = harness();
        let order_id = new_order(&h).await;
        let result = h.fulfilment.finish(&caller(Role::Courier), order_id).await;
        assert!(matches!(result, Err(OrderError::Forbidden)));
    }

    #[tokio::test]
    async fn test_deleted_or_missing_orders_are_not_found() {
        let h = harness();
        let order_id = new_order(&h).await;
        h.store.delete_order(order_id).await.unwrap();

        let staff = caller(Role::Staff);
        assert!(matches!(
            h.fulfilment.finish(&staff, order_id).await,
            Err(OrderError::NotFound)
        ));
        assert!(matches!(
            h.fulfilment.finish(&staff, Uuid::new_v4()).await,
            Err(OrderError::NotFound)
        ));
    }
}
