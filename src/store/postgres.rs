//! [`OrderStore`] over PostgreSQL via SeaORM
//!
//! Schema is owned by the `migration` crate. Soft-deleted rows carry a
//! non-null `deleted_at` and are filtered out of every read.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::sea_query::{Expr, SimpleExpr};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait, Value,
};
use std::collections::HashMap;
use uuid::Uuid;

use super::{OrderFilter, OrderStore};
use crate::entities::{basket_lines, order_lines, orders, prelude::*, products};
use crate::error::{StoreError, StoreResult};
use crate::models::basket::BasketLine;
use crate::models::order::{
    NewOrder, NewOrderLine, Order, OrderDetails, OrderLine, OrderLineDetail, OrderStatus,
};
use crate::models::product::Product;

#[derive(Clone)]
pub struct PgOrderStore {
    db: DatabaseConnection,
}

impl PgOrderStore {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Conditional update of a live order still in `from`.
    ///
    /// `guard` is an extra row condition evaluated in the same statement,
    /// paired with the error to report when only the guard failed.
    async fn update_where_status(
        &self,
        order_id: Uuid,
        from: OrderStatus,
        columns: Vec<(orders::Column, SimpleExpr)>,
        guard: Option<(SimpleExpr, StoreError)>,
    ) -> StoreResult<()> {
        let mut update = Orders::update_many()
            .col_expr(orders::Column::UpdatedAt, Expr::value(Utc::now()));
        for (column, value) in columns {
            update = update.col_expr(column, value);
        }

        let mut update = update
            .filter(orders::Column::Id.eq(order_id))
            .filter(orders::Column::Status.eq(from.as_str()))
            .filter(orders::Column::DeletedAt.is_null());
        let guard_error = match guard {
            Some((condition, error)) => {
                update = update.filter(condition);
                Some(error)
            }
            None => None,
        };

        let result = update.exec(&self.db).await?;

        if result.rows_affected == 0 {
            // Distinguish a missing order, a moved status and a failed guard
            let current = Orders::find_by_id(order_id)
                .filter(orders::Column::DeletedAt.is_null())
                .one(&self.db)
                .await?;
            return Err(match (current, guard_error) {
                (None, _) => StoreError::NotFound,
                (Some(model), Some(error)) if model.status == from.as_str() => error,
                (Some(_), _) => StoreError::StaleStatus,
            });
        }

        Ok(())
    }

    /// Attach live lines (with catalogue name and image key) to each order
    async fn with_lines(&self, models: Vec<orders::Model>) -> StoreResult<Vec<OrderDetails>> {
        if models.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<Uuid> = models.iter().map(|m| m.id).collect();
        let rows = OrderLines::find()
            .filter(order_lines::Column::OrderId.is_in(ids))
            .filter(order_lines::Column::DeletedAt.is_null())
            .order_by_asc(order_lines::Column::CreatedAt)
            .find_also_related(Products)
            .all(&self.db)
            .await?;

        let mut by_order: HashMap<Uuid, Vec<OrderLineDetail>> = HashMap::new();
        for (line, product) in rows {
            by_order
                .entry(line.order_id)
                .or_default()
                .push(OrderLineDetail {
                    product_name: product.as_ref().map(|p| p.name.clone()).unwrap_or_default(),
                    image_key: product.and_then(|p| p.image_key),
                    line: line_from_model(line),
                });
        }

        models
            .into_iter()
            .map(|model| {
                let lines = by_order.remove(&model.id).unwrap_or_default();
                Ok(OrderDetails {
                    order: order_from_model(model)?,
                    lines,
                })
            })
            .collect()
    }
}

fn order_from_model(model: orders::Model) -> StoreResult<Order> {
    let corrupt = |field: &str, value: &str| {
        StoreError::Backend(format!("order {} has invalid {}: {}", model.id, field, value))
    };

    Ok(Order {
        status: model
            .status
            .parse()
            .map_err(|_| corrupt("status", &model.status))?,
        payment_type: model
            .payment_type
            .parse()
            .map_err(|_| corrupt("payment_type", &model.payment_type))?,
        delivery_type: model
            .delivery_type
            .parse()
            .map_err(|_| corrupt("delivery_type", &model.delivery_type))?,
        id: model.id,
        order_number: model.order_number,
        user_id: model.user_id,
        card_type: model.card_type,
        client_name: model.client_name,
        client_phone: model.client_phone,
        comment: model.comment,
        latitude: model.latitude,
        longitude: model.longitude,
        address_name: model.address_name,
        picker_id: model.picker_id,
        picked_at: model.picked_at,
        courier_id: model.courier_id,
        delivering_at: model.delivering_at,
        delivered_at: model.delivered_at,
        total_price: model.total_price,
        deleted_at: model.deleted_at,
        created_at: model.created_at,
        updated_at: model.updated_at,
    })
}

fn line_from_model(model: order_lines::Model) -> OrderLine {
    OrderLine {
        id: model.id,
        order_id: model.order_id,
        product_id: model.product_id,
        quantity: model.quantity,
        price: model.price,
        total_price: model.total_price,
        deleted_at: model.deleted_at,
    }
}

fn basket_from_model(model: basket_lines::Model) -> BasketLine {
    BasketLine {
        id: model.id,
        user_id: model.user_id,
        product_id: model.product_id,
        quantity: model.quantity,
        deleted_at: model.deleted_at,
    }
}

#[async_trait]
impl OrderStore for PgOrderStore {
    async fn create_order(&self, new: NewOrder) -> StoreResult<Order> {
        let now = Utc::now();
        let active = orders::ActiveModel {
            id: Set(new.id),
            user_id: Set(new.user_id),
            status: Set(OrderStatus::InProcess.to_string()),
            payment_type: Set(new.payment_type.to_string()),
            card_type: Set(new.card_type),
            client_name: Set(new.client_name),
            client_phone: Set(new.client_phone),
            comment: Set(new.comment),
            delivery_type: Set(new.delivery_type.to_string()),
            latitude: Set(new.latitude),
            longitude: Set(new.longitude),
            address_name: Set(new.address_name),
            picker_id: Set(None),
            picked_at: Set(None),
            courier_id: Set(None),
            delivering_at: Set(None),
            delivered_at: Set(None),
            total_price: Set(new.total_price),
            deleted_at: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        };

        let model = active.insert(&self.db).await?;
        order_from_model(model)
    }

    async fn set_total_price(&self, order_id: Uuid, total: Decimal) -> StoreResult<()> {
        let result = Orders::update_many()
            .col_expr(orders::Column::TotalPrice, Expr::value(total))
            .col_expr(orders::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(orders::Column::Id.eq(order_id))
            .filter(orders::Column::DeletedAt.is_null())
            .exec(&self.db)
            .await?;

        if result.rows_affected == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn delete_order(&self, order_id: Uuid) -> StoreResult<()> {
        let now = Utc::now();
        // Dropping the transaction without commit rolls it back
        let txn = self.db.begin().await?;

        let result = Orders::update_many()
            .col_expr(orders::Column::DeletedAt, Expr::value(now))
            .col_expr(orders::Column::UpdatedAt, Expr::value(now))
            .filter(orders::Column::Id.eq(order_id))
            .filter(orders::Column::DeletedAt.is_null())
            .exec(&txn)
            .await?;

        if result.rows_affected == 0 {
            return Err(StoreError::NotFound);
        }

        OrderLines::update_many()
            .col_expr(order_lines::Column::DeletedAt, Expr::value(now))
            .filter(order_lines::Column::OrderId.eq(order_id))
            .filter(order_lines::Column::DeletedAt.is_null())
            .exec(&txn)
            .await?;

        txn.commit().await?;
        Ok(())
    }

    async fn change_status(
        &self,
        order_id: Uuid,
        from: OrderStatus,
        to: OrderStatus,
    ) -> StoreResult<()> {
        self.update_where_status(
            order_id,
            from,
            vec![(orders::Column::Status, Expr::value(to.as_str()))],
            None,
        )
        .await
    }

    async fn get_order_by_id(&self, order_id: Uuid) -> StoreResult<Option<OrderDetails>> {
        let model = Orders::find_by_id(order_id)
            .filter(orders::Column::DeletedAt.is_null())
            .one(&self.db)
            .await?;

        match model {
            Some(model) => Ok(self.with_lines(vec![model]).await?.pop()),
            None => Ok(None),
        }
    }

    async fn get_orders(&self, filter: OrderFilter) -> StoreResult<Vec<OrderDetails>> {
        let statuses: Vec<&str> = filter.statuses.iter().map(|s| s.as_str()).collect();
        let mut query = Orders::find()
            .filter(orders::Column::Status.is_in(statuses))
            .filter(orders::Column::DeletedAt.is_null());

        if let Some(courier_id) = filter.courier_id {
            query = query.filter(orders::Column::CourierId.eq(courier_id));
        }
        if filter.unassigned {
            query = query.filter(orders::Column::CourierId.is_null());
        }

        let models = query
            .order_by_desc(orders::Column::OrderNumber)
            .all(&self.db)
            .await?;

        self.with_lines(models).await
    }

    async fn mark_picked(
        &self,
        order_id: Uuid,
        from: OrderStatus,
        picker_id: Uuid,
        at: DateTime<Utc>,
    ) -> StoreResult<()> {
        self.update_where_status(
            order_id,
            from,
            vec![
                (orders::Column::Status, Expr::value(OrderStatus::Picked.as_str())),
                (orders::Column::PickerId, Expr::value(picker_id)),
                (orders::Column::PickedAt, Expr::value(at)),
            ],
            None,
        )
        .await
    }

    async fn mark_delivering(
        &self,
        order_id: Uuid,
        from: OrderStatus,
        courier_id: Uuid,
        at: DateTime<Utc>,
    ) -> StoreResult<()> {
        let courier_free = Expr::cust_with_values(
            "NOT EXISTS (SELECT 1 FROM orders AS busy \
             WHERE busy.courier_id = $1 AND busy.status = $2 AND busy.deleted_at IS NULL)",
            [
                Value::from(courier_id),
                Value::from(OrderStatus::Delivering.as_str()),
            ],
        );

        self.update_where_status(
            order_id,
            from,
            vec![
                (orders::Column::Status, Expr::value(OrderStatus::Delivering.as_str())),
                (orders::Column::CourierId, Expr::value(courier_id)),
                (orders::Column::DeliveringAt, Expr::value(at)),
            ],
            Some((courier_free, StoreError::CourierBusy)),
        )
        .await
        .map_err(|e| match e {
            // Two writers that both passed NOT EXISTS meet uq_orders_courier_delivering
            StoreError::Conflict(_) => StoreError::CourierBusy,
            other => other,
        })
    }

    async fn mark_delivered(
        &self,
        order_id: Uuid,
        from: OrderStatus,
        at: DateTime<Utc>,
    ) -> StoreResult<()> {
        self.update_where_status(
            order_id,
            from,
            vec![
                (orders::Column::Status, Expr::value(OrderStatus::Finished.as_str())),
                (orders::Column::DeliveredAt, Expr::value(at)),
            ],
            None,
        )
        .await
    }

    async fn count_active_deliveries(&self, courier_id: Uuid) -> StoreResult<u64> {
        let count = Orders::find()
            .filter(orders::Column::CourierId.eq(courier_id))
            .filter(orders::Column::Status.eq(OrderStatus::Delivering.as_str()))
            .filter(orders::Column::DeletedAt.is_null())
            .count(&self.db)
            .await?;
        Ok(count)
    }

    async fn get_basket_lines(&self, user_id: Uuid) -> StoreResult<Vec<BasketLine>> {
        let lines = BasketLines::find()
            .filter(basket_lines::Column::UserId.eq(user_id))
            .filter(basket_lines::Column::DeletedAt.is_null())
            .order_by_asc(basket_lines::Column::CreatedAt)
            .all(&self.db)
            .await?;
        Ok(lines.into_iter().map(basket_from_model).collect())
    }

    async fn add_basket_line(
        &self,
        user_id: Uuid,
        product_id: Uuid,
        quantity: i32,
    ) -> StoreResult<BasketLine> {
        // Fast path; uq_basket_lines_active_user_product settles concurrent adds
        let existing = BasketLines::find()
            .filter(basket_lines::Column::UserId.eq(user_id))
            .filter(basket_lines::Column::ProductId.eq(product_id))
            .filter(basket_lines::Column::DeletedAt.is_null())
            .one(&self.db)
            .await?;

        if existing.is_some() {
            return Err(StoreError::Conflict(format!(
                "basket line for product {} already exists",
                product_id
            )));
        }

        let model = basket_lines::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user_id),
            product_id: Set(product_id),
            quantity: Set(quantity),
            deleted_at: Set(None),
            created_at: Set(Utc::now()),
        }
        .insert(&self.db)
        .await?;

        Ok(basket_from_model(model))
    }

    async fn delete_basket_line(&self, line_id: Uuid) -> StoreResult<()> {
        let result = BasketLines::update_many()
            .col_expr(basket_lines::Column::DeletedAt, Expr::value(Utc::now()))
            .filter(basket_lines::Column::Id.eq(line_id))
            .filter(basket_lines::Column::DeletedAt.is_null())
            .exec(&self.db)
            .await?;

        if result.rows_affected == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn get_product_by_id(&self, product_id: Uuid) -> StoreResult<Option<Product>> {
        let model = Products::find_by_id(product_id)
            .filter(products::Column::DeletedAt.is_null())
            .one(&self.db)
            .await?;

        Ok(model.map(|p| Product {
            id: p.id,
            name: p.name,
            price: p.price,
            quantity: p.quantity,
            image_key: p.image_key,
        }))
    }

    async fn create_order_lines(&self, lines: Vec<NewOrderLine>) -> StoreResult<Vec<OrderLine>> {
        if lines.is_empty() {
            return Ok(Vec::new());
        }

        let now = Utc::now();
        let created: Vec<OrderLine> = lines
            .into_iter()
            .map(|l| OrderLine {
                id: Uuid::new_v4(),
                order_id: l.order_id,
                product_id: l.product_id,
                quantity: l.quantity,
                total_price: l.total_price(),
                price: l.price,
                deleted_at: None,
            })
            .collect();

        let models = created.iter().map(|l| order_lines::ActiveModel {
            id: Set(l.id),
            order_id: Set(l.order_id),
            product_id: Set(l.product_id),
            quantity: Set(l.quantity),
            price: Set(l.price),
            total_price: Set(l.total_price),
            deleted_at: Set(None),
            created_at: Set(now),
        });

        // One multi-row INSERT: all lines land or none do
        OrderLines::insert_many(models).exec(&self.db).await?;

        Ok(created)
    }
}
