// src/lib.rs

use axum::Router;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::config::Config;
use crate::services::{
    basket::BasketService,
    checkout::CheckoutTransactionManager,
    dispatch::{CourierDispatchBroadcaster, DispatchWorker},
    fulfilment::FulfilmentService,
    media::MediaUrlResolver,
    order_query::OrderQueryService,
    status_transition::{RolePermissions, StatusTransitionEngine},
};
use crate::store::OrderStore;

#[derive(Clone)]
pub struct AppState {
    pub baskets: BasketService,
    pub checkout: CheckoutTransactionManager,
    pub fulfilment: FulfilmentService,
    pub queries: OrderQueryService,
    pub dispatcher: CourierDispatchBroadcaster,
}

impl AppState {
    /// Wire services over `store`. The returned worker must be spawned for
    /// courier pushes to go out.
    pub fn new(store: Arc<dyn OrderStore>, config: &Config) -> (Self, DispatchWorker) {
        let timeout = config.request_timeout();
        let media = MediaUrlResolver::new(config.media_base_url.clone());
        let engine = StatusTransitionEngine::new(Arc::new(RolePermissions::standard()));
        let (dispatcher, worker) = CourierDispatchBroadcaster::new(
            config.dispatch_queue_capacity,
            config.dispatch_write_timeout(),
        );

        let state = Self {
            baskets: BasketService::new(store.clone(), timeout),
            checkout: CheckoutTransactionManager::new(
                store.clone(),
                dispatcher.clone(),
                media.clone(),
                timeout,
            ),
            fulfilment: FulfilmentService::new(
                store.clone(),
                engine,
                dispatcher.clone(),
                media.clone(),
                timeout,
            ),
            queries: OrderQueryService::new(store, media, timeout),
            dispatcher,
        };

        (state, worker)
    }
}

/// Full application: routes, tower-http layers and state
pub fn router(state: AppState) -> Router {
    handlers::routes()
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub mod entities {
    pub mod prelude;
    pub mod basket_lines;
    pub mod order_lines;
    pub mod orders;
    pub mod products;
}

pub mod services {
    pub mod basket;
    pub mod checkout;
    pub mod dispatch;
    pub mod fulfilment;
    pub mod media;
    pub mod order_query;
    pub mod status_transition;
}

pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod models;
pub mod store;
