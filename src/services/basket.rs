//! Basket reads and writes
//!
//! Checkout only ever sees a [`BasketSnapshot`]: the user's active lines as
//! read at one point in time.

use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

use crate::error::{OrderError, StoreError};
use crate::models::basket::BasketLine;
use crate::store::{with_deadline, OrderStore};

/// Read-only view of a user's active basket lines
#[derive(Debug, Clone)]
pub struct BasketSnapshot {
    lines: Vec<BasketLine>,
}

impl BasketSnapshot {
    pub async fn load(
        store: &dyn OrderStore,
        user_id: Uuid,
        deadline: Duration,
    ) -> Result<Self, StoreError> {
        let lines = with_deadline(deadline, store.get_basket_lines(user_id)).await?;
        Ok(Self {
            lines: lines.into_iter().filter(|l| l.deleted_at.is_none()).collect(),
        })
    }

    pub fn lines(&self) -> &[BasketLine] {
        &self.lines
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn into_lines(self) -> Vec<BasketLine> {
        self.lines
    }
}

#[derive(Clone)]
pub struct BasketService {
    store: Arc<dyn OrderStore>,
    timeout: Duration,
}

impl BasketService {
    pub fn new(store: Arc<dyn OrderStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    pub async fn list(&self, user_id: Uuid) -> Result<Vec<BasketLine>, OrderError> {
        let snapshot = BasketSnapshot::load(self.store.as_ref(), user_id, self.timeout).await?;
        Ok(snapshot.into_lines())
    }

    /// Add a product to the basket. An existing line for it is a conflict, not a merge.
    pub async fn add_line(
        &self,
        user_id: Uuid,
        product_id: Uuid,
        quantity: i32,
    ) -> Result<BasketLine, OrderError> {
        if quantity <= 0 {
            return Err(OrderError::InvalidQuantity);
        }

        with_deadline(self.timeout, self.store.get_product_by_id(product_id))
            .await?
            .ok_or(OrderError::NotFound)?;

        let line = with_deadline(
            self.timeout,
            self.store.add_basket_line(user_id, product_id, quantity),
        )
        .await
        .map_err(|e| match e {
            StoreError::Conflict(_) => OrderError::BasketLineExists,
            other => OrderError::Internal(other),
        })?;

        info!(user_id = %user_id, product_id = %product_id, quantity, "Basket line added");
        Ok(line)
    }
}
