use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait,
    IntoActiveModel, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

use crate::{
    entities::{order, order_item, OrderStatus, ProductStatus},
    errors::ServiceError,
    events::{Event, EventSender},
    services::{cascade, products::find_product, require_text},
};

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct NewOrder {
    #[validate(length(min = 1, max = 100))]
    pub customer_name: String,
    #[validate(email)]
    pub customer_email: String,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct NewOrderItem {
    pub product_id: Uuid,
    #[validate(range(min = 1, message = "quantity must be at least 1"))]
    pub quantity: i32,
}

/// Service for orders and their price-synced items
#[derive(Clone)]
pub struct OrderService {
    db_pool: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
}

impl OrderService {
    pub fn new(db_pool: Arc<DatabaseConnection>, event_sender: Arc<EventSender>) -> Self {
        Self {
            db_pool,
            event_sender,
        }
    }

    #[instrument(skip(self, input))]
    pub async fn create_order(&self, input: NewOrder) -> Result<order::Model, ServiceError> {
        input.validate()?;
        let customer_name = require_text("customer_name", &input.customer_name)?;

        let order = order::ActiveModel {
            id: Set(Uuid::new_v4()),
            customer_name: Set(customer_name),
            customer_email: Set(input.customer_email.trim().to_string()),
            status: Set(OrderStatus::Pending),
            prices_frozen: Set(false),
            total_amount: Set(Decimal::ZERO),
            ..Default::default()
        };

        let created = order.insert(&*self.db_pool).await.map_err(|e| {
            error!("Failed to create order: {}", e);
            ServiceError::db_error(e)
        })?;

        info!(order_id = %created.id, "Order created");
        self.event_sender
            .send_or_log(Event::OrderCreated(created.id))
            .await;
        Ok(created)
    }

    /// Adds a product to an open order at the product's current price.
    #[instrument(skip(self))]
    pub async fn add_item(
        &self,
        order_id: Uuid,
        input: NewOrderItem,
    ) -> Result<order_item::Model, ServiceError> {
        input.validate()?;

        let db = &*self.db_pool;
        let txn = db.begin().await?;

        let order = find_order(&txn, order_id).await?;
        if order.prices_frozen {
            return Err(ServiceError::InvalidOperation(format!(
                "Order {} is confirmed and no longer accepts items",
                order_id
            )));
        }

        let product = find_product(&txn, input.product_id).await?;
        if product.status == ProductStatus::Unavailable {
            warn!(product_id = %product.id, "Rejected order item for unavailable product");
            return Err(ServiceError::InvalidOperation(format!(
                "Product '{}' is unavailable",
                product.slug
            )));
        }

        let item = order_item::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(order_id),
            product_id: Set(product.id),
            product_title: Set(product.title.clone()),
            quantity: Set(input.quantity),
            unit_price: Set(product.computed_price),
            total_price: Set(product.computed_price * Decimal::from(input.quantity)),
            ..Default::default()
        };
        let created = item.insert(&txn).await.map_err(|e| {
            error!("Failed to add order item: {}", e);
            ServiceError::db_error(e)
        })?;
        let order = cascade::refresh_order_total(&txn, order_id).await?;

        txn.commit().await?;

        info!(
            order_id = %order_id,
            item_id = %created.id,
            total_amount = %order.total_amount,
            "Order item added"
        );
        self.event_sender
            .send_or_log(Event::OrderItemAdded {
                order_id,
                item_id: created.id,
            })
            .await;
        Ok(created)
    }

    #[instrument(skip(self))]
    pub async fn get_order(&self, order_id: Uuid) -> Result<order::Model, ServiceError> {
        find_order(&*self.db_pool, order_id).await
    }

    #[instrument(skip(self))]
    pub async fn get_order_items(
        &self,
        order_id: Uuid,
    ) -> Result<Vec<order_item::Model>, ServiceError> {
        let db = &*self.db_pool;
        find_order(db, order_id).await?;

        Ok(order_item::Entity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .order_by_asc(order_item::Column::CreatedAt)
            .all(db)
            .await?)
    }

    /// Confirms the order. Its items keep their current prices from now on.
    #[instrument(skip(self))]
    pub async fn freeze_prices(&self, order_id: Uuid) -> Result<order::Model, ServiceError> {
        let db = &*self.db_pool;
        let stored = find_order(db, order_id).await?;
        if stored.prices_frozen {
            return Ok(stored);
        }

        let mut active = stored.into_active_model();
        active.prices_frozen = Set(true);
        active.status = Set(OrderStatus::Confirmed);
        let frozen = active.update(db).await?;

        info!(order_id = %order_id, total_amount = %frozen.total_amount, "Order prices frozen");
        self.event_sender
            .send_or_log(Event::OrderPricesFrozen(order_id))
            .await;
        Ok(frozen)
    }
}

async fn find_order<C>(db: &C, id: Uuid) -> Result<order::Model, ServiceError>
where
    C: ConnectionTrait,
{
    order::Entity::find_by_id(id)
        .one(db)
        .await?
        .ok_or_else(|| ServiceError::not_found("Order", id))
}
