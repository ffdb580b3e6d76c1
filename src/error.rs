//! Error taxonomy for the checkout and fulfilment paths
//!
//! - [`StoreError`]: what the storage adapter reports
//! - [`TransitionError`]: why the status engine refused a transition
//! - [`OrderError`]: what a caller sees; maps onto HTTP responses

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use sea_orm::{DbErr, SqlErr};
use tracing::error;
use uuid::Uuid;

use crate::models::ErrorResponse;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("record not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),

    /// Conditional write matched no row: the status moved underneath us
    #[error("order status changed concurrently")]
    StaleStatus,

    /// Courier already has another order in `delivering`
    #[error("courier already has an active delivery")]
    CourierBusy,

    #[error("storage call timed out")]
    Timeout,

    #[error("storage error: {0}")]
    Backend(String),
}

impl From<DbErr> for StoreError {
    fn from(err: DbErr) -> Self {
        match err.sql_err() {
            Some(SqlErr::UniqueConstraintViolation(msg)) => return StoreError::Conflict(msg),
            Some(SqlErr::ForeignKeyConstraintViolation(msg)) => return StoreError::Conflict(msg),
            _ => {}
        }

        match err {
            DbErr::RecordNotFound(_) => StoreError::NotFound,
            other => {
                let msg = other.to_string();
                if msg.contains("check constraint") {
                    StoreError::Conflict(msg)
                } else {
                    StoreError::Backend(msg)
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    #[error("order not found")]
    NotFound,

    #[error("order status is not changeable")]
    NotChangeable,

    /// Courier already carries an active delivery
    #[error("order not finished")]
    CourierBusy,

    #[error("role may not request this status")]
    Forbidden,
}

#[derive(Debug, thiserror::Error)]
pub enum OrderError {
    #[error("invalid phone number")]
    InvalidPhone,

    #[error("payment type invalid")]
    PaymentTypeInvalid,

    #[error("quantity must be positive")]
    InvalidQuantity,

    #[error("basket empty")]
    BasketEmpty,

    #[error("quantity too many")]
    QuantityTooMany { product_id: Uuid },

    #[error("basket line already exists")]
    BasketLineExists,

    #[error("not found")]
    NotFound,

    #[error("not changeable")]
    NotChangeable,

    #[error("order not finished")]
    OrderNotFinished,

    #[error("permission denied")]
    Forbidden,

    #[error("authentication required")]
    Unauthorized,

    #[error("internal error: {0}")]
    Internal(#[from] StoreError),
}

impl From<TransitionError> for OrderError {
    fn from(err: TransitionError) -> Self {
        match err {
            TransitionError::NotFound => OrderError::NotFound,
            TransitionError::NotChangeable => OrderError::NotChangeable,
            TransitionError::CourierBusy => OrderError::OrderNotFinished,
            TransitionError::Forbidden => OrderError::Forbidden,
        }
    }
}

impl OrderError {
    /// Stable machine-readable code for clients
    pub fn code(&self) -> &'static str {
        match self {
            OrderError::InvalidPhone => "INVALID_PHONE",
            OrderError::PaymentTypeInvalid => "PAYMENT_TYPE_INVALID",
            OrderError::InvalidQuantity => "INVALID_QUANTITY",
            OrderError::BasketEmpty => "BASKET_EMPTY",
            OrderError::QuantityTooMany { .. } => "QUANTITY_TOO_MANY",
            OrderError::BasketLineExists => "BASKET_LINE_EXISTS",
            OrderError::NotFound => "NOT_FOUND",
            OrderError::NotChangeable => "NOT_CHANGEABLE",
            OrderError::OrderNotFinished => "ORDER_NOT_FINISHED",
            OrderError::Forbidden => "FORBIDDEN",
            OrderError::Unauthorized => "UNAUTHORIZED",
            OrderError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            OrderError::InvalidPhone
            | OrderError::PaymentTypeInvalid
            | OrderError::InvalidQuantity => StatusCode::BAD_REQUEST,
            OrderError::Unauthorized => StatusCode::UNAUTHORIZED,
            OrderError::Forbidden => StatusCode::FORBIDDEN,
            OrderError::NotFound => StatusCode::NOT_FOUND,
            OrderError::BasketLineExists => StatusCode::CONFLICT,
            OrderError::BasketEmpty
            | OrderError::QuantityTooMany { .. }
            | OrderError::NotChangeable
            | OrderError::OrderNotFinished => StatusCode::UNPROCESSABLE_ENTITY,
            OrderError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for OrderError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = match &self {
            OrderError::Internal(e) => {
                error!(target: "storage", error = %e, "Internal error reached the API boundary");
                "internal server error".to_string()
            }
            other => other.to_string(),
        };

        (
            status,
            Json(ErrorResponse {
                error: message,
                code: self.code().to_string(),
            }),
        )
            .into_response()
    }
}
