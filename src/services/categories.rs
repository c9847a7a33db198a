use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, Set,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{error, info, instrument};
use uuid::Uuid;
use validator::Validate;

use crate::{
    entities::{product, product_category},
    errors::ServiceError,
    events::{Event, EventSender},
    services::{protect_delete, require_text, resolve_slug, unique_violation},
};

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct NewCategory {
    #[validate(length(min = 1, max = 100))]
    pub title: String,
    pub slug: Option<String>,
}

/// Service for managing product categories
#[derive(Clone)]
pub struct CategoryService {
    db_pool: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
}

impl CategoryService {
    pub fn new(db_pool: Arc<DatabaseConnection>, event_sender: Arc<EventSender>) -> Self {
        Self {
            db_pool,
            event_sender,
        }
    }

    #[instrument(skip(self))]
    pub async fn create_category(
        &self,
        input: NewCategory,
    ) -> Result<product_category::Model, ServiceError> {
        input.validate()?;
        let title = require_text("title", &input.title)?;
        let slug = resolve_slug(input.slug.as_deref(), &title)?;
        let db = &*self.db_pool;

        let category = product_category::ActiveModel {
            id: Set(Uuid::new_v4()),
            title: Set(title),
            slug: Set(slug.clone()),
            ..Default::default()
        };

        let created = category.insert(db).await.map_err(|e| {
            error!("Failed to create category: {}", e);
            unique_violation(e, format!("Category slug '{}' is already taken", slug))
        })?;

        info!(category_id = %created.id, slug = %created.slug, "Category created");
        self.event_sender
            .send_or_log(Event::CategoryCreated(created.id))
            .await;
        Ok(created)
    }

    #[instrument(skip(self))]
    pub async fn get_category(&self, id: Uuid) -> Result<product_category::Model, ServiceError> {
        product_category::Entity::find_by_id(id)
            .one(&*self.db_pool)
            .await?
            .ok_or_else(|| ServiceError::not_found("Category", id))
    }

    #[instrument(skip(self))]
    pub async fn list_categories(&self) -> Result<Vec<product_category::Model>, ServiceError> {
        Ok(product_category::Entity::find()
            .order_by_asc(product_category::Column::Title)
            .all(&*self.db_pool)
            .await?)
    }

    /// Deletes a category. Refused while any product still belongs to it.
    #[instrument(skip(self))]
    pub async fn delete_category(&self, id: Uuid) -> Result<(), ServiceError> {
        let db = &*self.db_pool;
        let category = self.get_category(id).await?;

        let products = product::Entity::find()
            .filter(product::Column::CategoryId.eq(id))
            .count(db)
            .await?;
        if products > 0 {
            return Err(ServiceError::Conflict(format!(
                "Category '{}' still has {} product(s)",
                category.slug, products
            )));
        }

        product_category::Entity::delete_by_id(id)
            .exec(db)
            .await
            .map_err(|e| protect_delete(e, format!("Category '{}' is in use", category.slug)))?;

        info!(category_id = %id, "Category deleted");
        self.event_sender
            .send_or_log(Event::CategoryDeleted(id))
            .await;
        Ok(())
    }
}
