//! Read paths over orders, decorated for display
//!
//! Each view carries the status rank, resolved image URLs and, for courier
//! viewers, whether the viewer is the assigned courier.

use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

use crate::auth::{Caller, Role};
use crate::error::OrderError;
use crate::models::order::{
    OrderDetails, OrderLineView, OrderListResponse, OrderStatus, OrderView, StatusGroup,
};
use crate::services::media::MediaUrlResolver;
use crate::store::{with_deadline, OrderFilter, OrderStore};

/// Build the client-facing view of an order
///
/// `viewer` only matters for couriers, who get `is_mine` filled in.
pub fn order_view(
    details: &OrderDetails,
    media: &MediaUrlResolver,
    viewer: Option<&Caller>,
) -> OrderView {
    let order = &details.order;
    let is_mine = viewer
        .filter(|c| c.is_courier())
        .map(|c| order.courier_id == Some(c.user_id));

    OrderView {
        id: order.id,
        order_number: order.order_number,
        status: order.status,
        status_index: order.status.rank(),
        payment_type: order.payment_type,
        card_type: order.card_type.clone(),
        client_name: order.client_name.clone(),
        client_phone: order.client_phone.clone(),
        comment: order.comment.clone(),
        delivery_type: order.delivery_type,
        latitude: order.latitude,
        longitude: order.longitude,
        address_name: order.address_name.clone(),
        picker_id: order.picker_id,
        picked_at: order.picked_at,
        courier_id: order.courier_id,
        delivering_at: order.delivering_at,
        delivered_at: order.delivered_at,
        total_price: order.total_price,
        created_at: order.created_at,
        lines: details
            .lines
            .iter()
            .map(|detail| OrderLineView {
                id: detail.line.id,
                product_id: detail.line.product_id,
                product_name: detail.product_name.clone(),
                image_url: media.resolve_opt(detail.image_key.as_deref()),
                quantity: detail.line.quantity,
                price: detail.line.price,
                total_price: detail.line.total_price,
            })
            .collect(),
        is_mine,
    }
}

#[derive(Clone)]
pub struct OrderQueryService {
    store: Arc<dyn OrderStore>,
    media: MediaUrlResolver,
    timeout: Duration,
}

impl OrderQueryService {
    pub fn new(store: Arc<dyn OrderStore>, media: MediaUrlResolver, timeout: Duration) -> Self {
        Self {
            store,
            media,
            timeout,
        }
    }

    pub fn media(&self) -> &MediaUrlResolver {
        &self.media
    }

    /// Clients only see their own orders; operators see any
    pub async fn get_order(&self, caller: &Caller, order_id: Uuid) -> Result<OrderView, OrderError> {
        let details = with_deadline(self.timeout, self.store.get_order_by_id(order_id))
            .await?
            .filter(|d| caller.is_operator() || d.order.user_id == caller.user_id)
            .ok_or(OrderError::NotFound)?;

        Ok(order_view(&details, &self.media, Some(caller)))
    }

    pub async fn list_by_group(
        &self,
        caller: &Caller,
        group: StatusGroup,
    ) -> Result<OrderListResponse, OrderError> {
        require_operator(caller)?;
        self.list(caller, OrderFilter::statuses(group.statuses())).await
    }

    /// New work for the caller
    ///
    /// Staff and pickers get orders waiting to be picked. Couriers get picked
    /// orders nobody has taken yet, or their own active deliveries when there
    /// are none.
    pub async fn new_list(&self, caller: &Caller) -> Result<OrderListResponse, OrderError> {
        require_operator(caller)?;

        if !caller.is_courier() {
            return self
                .list(caller, OrderFilter::statuses(StatusGroup::New.statuses()))
                .await;
        }

        let open = self
            .list(caller, OrderFilter::statuses(&[OrderStatus::Picked]).unassigned())
            .await?;
        if !open.orders.is_empty() {
            return Ok(open);
        }

        debug!(courier_id = %caller.user_id, "No open orders, falling back to active deliveries");
        self.courier_active(caller).await
    }

    pub async fn courier_active(&self, caller: &Caller) -> Result<OrderListResponse, OrderError> {
        require_courier(caller)?;
        self.list(
            caller,
            OrderFilter::statuses(&[OrderStatus::Delivering]).for_courier(caller.user_id),
        )
        .await
    }

    pub async fn courier_finished(&self, caller: &Caller) -> Result<OrderListResponse, OrderError> {
        require_courier(caller)?;
        self.list(
            caller,
            OrderFilter::statuses(&[OrderStatus::Finished]).for_courier(caller.user_id),
        )
        .await
    }

    async fn list(
        &self,
        caller: &Caller,
        filter: OrderFilter,
    ) -> Result<OrderListResponse, OrderError> {
        let orders: Vec<OrderView> = with_deadline(self.timeout, self.store.get_orders(filter))
            .await?
            .iter()
            .map(|d| order_view(d, &self.media, Some(caller)))
            .collect();

        Ok(OrderListResponse {
            total_count: orders.len(),
            orders,
        })
    }
}

fn require_operator(caller: &Caller) -> Result<(), OrderError> {
    if caller.is_operator() {
        Ok(())
    } else {
        Err(OrderError::Forbidden)
    }
}

fn require_courier(caller: &Caller) -> Result<(), OrderError> {
    if caller.role == Role::Courier {
        Ok(())
    } else {
        Err(OrderError::Forbidden)
    }
}
