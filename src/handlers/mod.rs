use axum::{
    routing::{get, post},
    Router,
};

use crate::AppState;

pub mod basket;
pub mod courier_ws;
pub mod health;
pub mod orders;

/// Every route, without middleware or state
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health::health))
        // Basket
        .route("/api/basket", get(basket::get_basket).post(basket::add_line))
        // Checkout and order reads
        .route("/api/orders", get(orders::list_orders).post(orders::checkout))
        .route("/api/orders/new", get(orders::new_orders))
        .route("/api/orders/courier/active", get(orders::courier_active))
        .route("/api/orders/courier/finished", get(orders::courier_finished))
        .route("/api/orders/{id}", get(orders::get_order))
        // Status transitions
        .route("/api/orders/{id}/status", post(orders::change_status))
        .route("/api/orders/{id}/finish", post(orders::finish_order))
        .route("/api/orders/{id}/cancel", post(orders::cancel_order))
        // Courier push channel
        .route("/ws/courier", get(courier_ws::courier_websocket))
}
