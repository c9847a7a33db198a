use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait,
    IntoActiveModel, PaginatorTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{error, info, instrument};
use uuid::Uuid;
use validator::Validate;

use crate::{
    entities::{
        order_item, product, product_category, product_composition, ProductStatus,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::{
        cascade::{self, ProductRecalc},
        pricing::StatusPolicy,
        protect_delete, require_text, resolve_slug, unique_violation,
    },
};

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct NewProduct {
    pub category_id: Uuid,
    #[validate(length(min = 1, max = 150))]
    pub title: String,
    pub slug: Option<String>,
    #[validate(length(max = 255))]
    pub header_title: Option<String>,
    pub header_description: Option<String>,
    #[serde(default)]
    #[validate(range(min = 0, max = 100))]
    pub discount_percent: i32,
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct ProductUpdate {
    pub category_id: Option<Uuid>,
    #[validate(length(min = 1, max = 150))]
    pub title: Option<String>,
    #[validate(length(max = 255))]
    pub header_title: Option<String>,
    pub header_description: Option<String>,
    #[validate(range(min = 0, max = 100))]
    pub discount_percent: Option<i32>,
}

/// Listing filter for the storefront and the admin
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProductFilter {
    pub status: Option<ProductStatus>,
    pub category_id: Option<Uuid>,
}

/// Service for managing products (bouquets)
#[derive(Clone)]
pub struct ProductService {
    db_pool: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
}

impl ProductService {
    pub fn new(db_pool: Arc<DatabaseConnection>, event_sender: Arc<EventSender>) -> Self {
        Self {
            db_pool,
            event_sender,
        }
    }

    /// Creates a product in review. Its price stays zero until compositions
    /// are added.
    #[instrument(skip(self), fields(title = %input.title))]
    pub async fn create_product(&self, input: NewProduct) -> Result<product::Model, ServiceError> {
        input.validate()?;
        let title = require_text("title", &input.title)?;
        let slug = resolve_slug(input.slug.as_deref(), &title)?;

        let db = &*self.db_pool;
        let txn = db.begin().await?;

        ensure_category(&txn, input.category_id).await?;

        let product = product::ActiveModel {
            id: Set(Uuid::new_v4()),
            category_id: Set(input.category_id),
            title: Set(title),
            slug: Set(slug.clone()),
            header_title: Set(input.header_title),
            header_description: Set(input.header_description),
            base_price: Set(Decimal::ZERO),
            discount_percent: Set(input.discount_percent),
            computed_price: Set(Decimal::ZERO),
            status: Set(ProductStatus::UnderReview),
            ..Default::default()
        };

        let created = product.insert(&txn).await.map_err(|e| {
            error!("Failed to create product: {}", e);
            unique_violation(e, format!("Product slug '{}' is already taken", slug))
        })?;
        let recalc = cascade::on_product_persisted(&txn, created.id).await?;

        txn.commit().await?;

        info!(product_id = %created.id, slug = %created.slug, "Product created");
        self.event_sender
            .send_or_log(Event::ProductCreated(created.id))
            .await;
        Ok(recalc.product)
    }

    /// Updates the product's own fields and reprices it. A changed title or
    /// discount reaches every order item that still follows the product.
    #[instrument(skip(self, update))]
    pub async fn update_product(
        &self,
        id: Uuid,
        update: ProductUpdate,
    ) -> Result<product::Model, ServiceError> {
        update.validate()?;

        let db = &*self.db_pool;
        let txn = db.begin().await?;

        let stored = find_product(&txn, id).await?;
        let mut active = stored.into_active_model();

        if let Some(category_id) = update.category_id {
            ensure_category(&txn, category_id).await?;
            active.category_id = Set(category_id);
        }
        if let Some(title) = update.title.as_deref() {
            active.title = Set(require_text("title", title)?);
        }
        if let Some(header_title) = update.header_title {
            active.header_title = Set(Some(header_title));
        }
        if let Some(header_description) = update.header_description {
            active.header_description = Set(Some(header_description));
        }
        if let Some(discount) = update.discount_percent {
            active.discount_percent = Set(discount);
        }

        active.update(&txn).await.map_err(|e| {
            error!("Failed to update product {}: {}", id, e);
            ServiceError::db_error(e)
        })?;
        let recalc = cascade::on_product_persisted(&txn, id).await?;

        txn.commit().await?;

        info!(product_id = %id, computed_price = %recalc.product.computed_price, "Product updated");
        self.publish(&recalc).await;
        Ok(recalc.product)
    }

    #[instrument(skip(self))]
    pub async fn get_product(&self, id: Uuid) -> Result<product::Model, ServiceError> {
        find_product(&*self.db_pool, id).await
    }

    #[instrument(skip(self))]
    pub async fn get_product_by_slug(&self, slug: &str) -> Result<product::Model, ServiceError> {
        product::Entity::find()
            .filter(product::Column::Slug.eq(slug))
            .one(&*self.db_pool)
            .await?
            .ok_or_else(|| ServiceError::not_found("Product", slug))
    }

    /// Products ordered by status, then title.
    #[instrument(skip(self))]
    pub async fn list_products(
        &self,
        filter: ProductFilter,
    ) -> Result<Vec<product::Model>, ServiceError> {
        let mut query = product::Entity::find();
        if let Some(status) = filter.status {
            query = query.filter(product::Column::Status.eq(status));
        }
        if let Some(category_id) = filter.category_id {
            query = query.filter(product::Column::CategoryId.eq(category_id));
        }

        Ok(query
            .order_by_asc(product::Column::Status)
            .order_by_asc(product::Column::Title)
            .all(&*self.db_pool)
            .await?)
    }

    /// Re-derives price and status from the current compositions.
    #[instrument(skip(self))]
    pub async fn recalculate_product(&self, id: Uuid) -> Result<product::Model, ServiceError> {
        let db = &*self.db_pool;
        let txn = db.begin().await?;

        let recalc = cascade::recalculate_product(&txn, id, StatusPolicy::Derive).await?;

        txn.commit().await?;
        self.publish(&recalc).await;
        Ok(recalc.product)
    }

    /// Deletes a product together with its compositions. Products that were
    /// already ordered cannot be deleted.
    #[instrument(skip(self))]
    pub async fn delete_product(&self, id: Uuid) -> Result<(), ServiceError> {
        let db = &*self.db_pool;
        let txn = db.begin().await?;

        let product = find_product(&txn, id).await?;

        let ordered = order_item::Entity::find()
            .filter(order_item::Column::ProductId.eq(id))
            .count(&txn)
            .await?;
        if ordered > 0 {
            return Err(ServiceError::Conflict(format!(
                "Product '{}' appears on {} order item(s)",
                product.slug, ordered
            )));
        }

        let removed = product_composition::Entity::delete_many()
            .filter(product_composition::Column::ProductId.eq(id))
            .exec(&txn)
            .await?;
        product::Entity::delete_by_id(id)
            .exec(&txn)
            .await
            .map_err(|e| protect_delete(e, format!("Product '{}' is in use", product.slug)))?;

        txn.commit().await?;

        info!(
            product_id = %id,
            compositions = removed.rows_affected,
            "Product deleted"
        );
        self.event_sender
            .send_or_log(Event::ProductDeleted(id))
            .await;
        Ok(())
    }

    async fn publish(&self, recalc: &ProductRecalc) {
        for event in recalc.events() {
            self.event_sender.send_or_log(event).await;
        }
    }
}

pub(crate) async fn find_product<C>(db: &C, id: Uuid) -> Result<product::Model, ServiceError>
where
    C: ConnectionTrait,
{
    product::Entity::find_by_id(id)
        .one(db)
        .await?
        .ok_or_else(|| ServiceError::not_found("Product", id))
}

async fn ensure_category<C>(db: &C, id: Uuid) -> Result<(), ServiceError>
where
    C: ConnectionTrait,
{
    product_category::Entity::find_by_id(id)
        .one(db)
        .await?
        .map(|_| ())
        .ok_or_else(|| ServiceError::not_found("Category", id))
}
