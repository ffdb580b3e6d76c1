use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use uuid::Uuid;

use crate::auth::Caller;
use crate::error::OrderError;
use crate::models::order::{
    CheckoutRequest, OrderListResponse, OrderView, StatusChangeRequest, StatusGroupQuery,
};
use crate::services::order_query::order_view;
use crate::AppState;

/// POST /api/orders - Check out the caller's basket
pub async fn checkout(
    State(state): State<AppState>,
    caller: Caller,
    Json(payload): Json<CheckoutRequest>,
) -> Result<(StatusCode, Json<OrderView>), OrderError> {
    let details = state.checkout.create_order(&caller, payload).await?;
    let view = order_view(&details, state.queries.media(), Some(&caller));
    Ok((StatusCode::CREATED, Json(view)))
}

/// GET /api/orders/{id}
pub async fn get_order(
    State(state): State<AppState>,
    caller: Caller,
    Path(order_id): Path<Uuid>,
) -> Result<Json<OrderView>, OrderError> {
    Ok(Json(state.queries.get_order(&caller, order_id).await?))
}

/// GET /api/orders?group=new|in_progress|completed|canceled
pub async fn list_orders(
    State(state): State<AppState>,
    caller: Caller,
    Query(query): Query<StatusGroupQuery>,
) -> Result<Json<OrderListResponse>, OrderError> {
    Ok(Json(state.queries.list_by_group(&caller, query.group).await?))
}

/// GET /api/orders/new
pub async fn new_orders(
    State(state): State<AppState>,
    caller: Caller,
) -> Result<Json<OrderListResponse>, OrderError> {
    Ok(Json(state.queries.new_list(&caller).await?))
}

/// GET /api/orders/courier/active
pub async fn courier_active(
    State(state): State<AppState>,
    caller: Caller,
) -> Result<Json<OrderListResponse>, OrderError> {
    Ok(Json(state.queries.courier_active(&caller).await?))
}

/// GET /api/orders/courier/finished
pub async fn courier_finished(
    State(state): State<AppState>,
    caller: Caller,
) -> Result<Json<OrderListResponse>, OrderError> {
    Ok(Json(state.queries.courier_finished(&caller).await?))
}

/// POST /api/orders/{id}/status
pub async fn change_status(
    State(state): State<AppState>,
    caller: Caller,
    Path(order_id): Path<Uuid>,
    Json(payload): Json<StatusChangeRequest>,
) -> Result<Json<OrderView>, OrderError> {
    let view = state
        .fulfilment
        .change_status(&caller, order_id, payload.status)
        .await?;
    Ok(Json(view))
}

/// POST /api/orders/{id}/finish
pub async fn finish_order(
    State(state): State<AppState>,
    caller: Caller,
    Path(order_id): Path<Uuid>,
) -> Result<Json<OrderView>, OrderError> {
    Ok(Json(state.fulfilment.finish(&caller, order_id).await?))
}

/// POST /api/orders/{id}/cancel
pub async fn cancel_order(
    State(state): State<AppState>,
    caller: Caller,
    Path(order_id): Path<Uuid>,
) -> Result<Json<OrderView>, OrderError> {
    Ok(Json(state.fulfilment.cancel(&caller, order_id).await?))
}
