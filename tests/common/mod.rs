#![allow(dead_code)]

use axum::{
    body::Body,
    http::{header, Method, Request, Response},
    Router,
};
use http_body_util::BodyExt;
use rust_decimal::Decimal;
use serde_json::Value;
use shop_backend::auth::{Caller, Role, USER_ID_HEADER, USER_ROLE_HEADER};
use shop_backend::config::Config;
use shop_backend::models::product::Product;
use shop_backend::store::MemoryOrderStore;
use shop_backend::{router, AppState};
use std::sync::Arc;
use uuid::Uuid;

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub store: Arc<MemoryOrderStore>,
}

/// App over a fresh in-memory store with the dispatch worker running.
/// Must be called from inside a tokio runtime.
pub fn test_app() -> TestApp {
    let store = Arc::new(MemoryOrderStore::new());
    let config = Config {
        media_base_url: "https://media.test".into(),
        ..Config::default()
    };
    let (state, worker) = AppState::new(store.clone(), &config);
    tokio::spawn(worker.run());

    TestApp {
        router: router(state.clone()),
        state,
        store,
    }
}

pub fn seed_product(store: &MemoryOrderStore, name: &str, price: Decimal, stock: i32) -> Uuid {
    let id = Uuid::new_v4();
    store.upsert_product(Product {
        id,
        name: name.to_string(),
        price,
        quantity: stock,
        image_key: Some(format!("products/{}.png", name.to_lowercase())),
    });
    id
}

pub fn caller(role: Role) -> Caller {
    Caller::new(Uuid::new_v4(), role)
}

pub fn request(method: Method, uri: &str, caller: &Caller, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(USER_ID_HEADER, caller.user_id.to_string())
        .header(USER_ROLE_HEADER, caller.role.to_string());

    match body {
        Some(json) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

pub async fn body_json(response: Response<Body>) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

pub fn checkout_body(payment_type: &str) -> Value {
    serde_json::json!({
        "client_name": "Ann Lee",
        "phone": "+15550102030",
        "comment": null,
        "payment_type": payment_type,
        "card_type": null,
        "delivery_type": "delivery",
        "latitude": 41.31,
        "longitude": 69.24,
        "address_name": "Main st 1"
    })
}
