use axum::{extract::State, http::StatusCode, Json};

use crate::auth::Caller;
use crate::error::OrderError;
use crate::models::basket::{AddBasketLineRequest, BasketLine, BasketResponse};
use crate::AppState;

/// POST /api/basket - 409 when the product is already in the basket
pub async fn add_line(
    State(state): State<AppState>,
    caller: Caller,
    Json(payload): Json<AddBasketLineRequest>,
) -> Result<(StatusCode, Json<BasketLine>), OrderError> {
    let line = state
        .baskets
        .add_line(caller.user_id, payload.product_id, payload.quantity)
        .await?;
    Ok((StatusCode::CREATED, Json(line)))
}

/// GET /api/basket
pub async fn get_basket(
    State(state): State<AppState>,
    caller: Caller,
) -> Result<Json<BasketResponse>, OrderError> {
    let lines = state.baskets.list(caller.user_id).await?;
    Ok(Json(BasketResponse { lines }))
}
