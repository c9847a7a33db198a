use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection,
    EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

use crate::{
    entities::{product_component, product_composition},
    errors::ServiceError,
    events::{Event, EventSender},
    services::{
        cascade::{self, ProductRecalc},
        pricing::{fits_money_scale, fold_restock, MONEY_SCALE},
        protect_delete, require_text, resolve_slug, unique_violation,
    },
};

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct NewComponent {
    #[validate(length(min = 1, max = 150))]
    pub title: String,
    pub slug: Option<String>,
    pub unit_price: Decimal,
    #[serde(default)]
    pub stock_on_hand: i32,
    #[serde(default)]
    pub incoming_restock: i32,
    #[serde(default = "default_true")]
    pub is_available: bool,
    #[serde(default)]
    pub show_in_filter: bool,
}

/// Partial update guarded by the version the caller last read.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct ComponentUpdate {
    pub expected_version: i32,
    #[validate(length(min = 1, max = 150))]
    pub title: Option<String>,
    pub unit_price: Option<Decimal>,
    pub stock_on_hand: Option<i32>,
    pub incoming_restock: Option<i32>,
    pub is_available: Option<bool>,
    pub show_in_filter: Option<bool>,
}

fn default_true() -> bool {
    true
}

fn ensure_unit_price(value: Decimal) -> Result<(), ServiceError> {
    if value.is_sign_negative() && !value.is_zero() {
        return Err(ServiceError::ValidationError(
            "unit_price cannot be negative".to_string(),
        ));
    }
    if !fits_money_scale(value) {
        return Err(ServiceError::ValidationError(format!(
            "unit_price cannot have more than {} decimal places",
            MONEY_SCALE
        )));
    }
    Ok(())
}

fn ensure_non_negative(field: &str, value: i32) -> Result<(), ServiceError> {
    if value < 0 {
        return Err(ServiceError::ValidationError(format!(
            "{} cannot be negative",
            field
        )));
    }
    Ok(())
}

fn ensure_positive(field: &str, value: i32) -> Result<(), ServiceError> {
    if value <= 0 {
        return Err(ServiceError::ValidationError(format!(
            "{} must be greater than zero",
            field
        )));
    }
    Ok(())
}

fn folded_stock(stock_on_hand: i32, incoming_restock: i32) -> Result<i32, ServiceError> {
    fold_restock(stock_on_hand, incoming_restock).ok_or_else(|| {
        ServiceError::ValidationError("stock_on_hand would overflow after restock".to_string())
    })
}

/// Service for components: the priced, stocked raw materials of a bouquet.
///
/// Every write folds pending restock into stock and then reprices every
/// product built from the component inside the same transaction.
#[derive(Clone)]
pub struct ComponentService {
    db_pool: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
}

impl ComponentService {
    pub fn new(db_pool: Arc<DatabaseConnection>, event_sender: Arc<EventSender>) -> Self {
        Self {
            db_pool,
            event_sender,
        }
    }

    #[instrument(skip(self), fields(title = %input.title))]
    pub async fn create_component(
        &self,
        input: NewComponent,
    ) -> Result<product_component::Model, ServiceError> {
        input.validate()?;
        let title = require_text("title", &input.title)?;
        let slug = resolve_slug(input.slug.as_deref(), &title)?;
        ensure_unit_price(input.unit_price)?;
        ensure_non_negative("stock_on_hand", input.stock_on_hand)?;
        ensure_non_negative("incoming_restock", input.incoming_restock)?;
        let stock_on_hand = folded_stock(input.stock_on_hand, input.incoming_restock)?;

        let db = &*self.db_pool;
        let txn = db.begin().await?;

        let component = product_component::ActiveModel {
            id: Set(Uuid::new_v4()),
            title: Set(title),
            slug: Set(slug.clone()),
            unit_price: Set(input.unit_price),
            stock_on_hand: Set(stock_on_hand),
            incoming_restock: Set(0),
            units_sold: Set(0),
            is_available: Set(input.is_available),
            show_in_filter: Set(input.show_in_filter),
            version: Set(1),
            ..Default::default()
        };

        let created = component.insert(&txn).await.map_err(|e| {
            error!("Failed to create component: {}", e);
            unique_violation(e, format!("Component slug '{}' is already taken", slug))
        })?;
        cascade::on_component_persisted(&txn, &created).await?;

        txn.commit().await?;

        info!(component_id = %created.id, stock_on_hand = created.stock_on_hand, "Component created");
        self.event_sender
            .send_or_log(Event::ComponentCreated(created.id))
            .await;
        Ok(created)
    }

    /// Applies a partial update if the stored version still matches
    /// `expected_version`, then reprices dependent products.
    #[instrument(skip(self, update), fields(expected_version = update.expected_version))]
    pub async fn update_component(
        &self,
        id: Uuid,
        update: ComponentUpdate,
    ) -> Result<product_component::Model, ServiceError> {
        update.validate()?;
        if let Some(price) = update.unit_price {
            ensure_unit_price(price)?;
        }
        if let Some(stock) = update.stock_on_hand {
            ensure_non_negative("stock_on_hand", stock)?;
        }
        if let Some(incoming) = update.incoming_restock {
            ensure_non_negative("incoming_restock", incoming)?;
        }

        let db = &*self.db_pool;
        let txn = db.begin().await?;

        let stored = find_component(&txn, id).await?;
        if stored.version != update.expected_version {
            warn!(
                component_id = %id,
                stored_version = stored.version,
                "Stale component update rejected"
            );
            return Err(ServiceError::ConcurrentModification(id));
        }

        let stock_on_hand = folded_stock(
            update.stock_on_hand.unwrap_or(stored.stock_on_hand),
            update.incoming_restock.unwrap_or(stored.incoming_restock),
        )?;

        let mut next = stored.clone();
        if let Some(title) = update.title.as_deref() {
            next.title = require_text("title", title)?;
        }
        if let Some(price) = update.unit_price {
            next.unit_price = price;
        }
        if let Some(available) = update.is_available {
            next.is_available = available;
        }
        if let Some(show) = update.show_in_filter {
            next.show_in_filter = show;
        }
        next.stock_on_hand = stock_on_hand;
        next.incoming_restock = 0;
        next.version = stored.version + 1;
        next.updated_at = Utc::now();
        next.validate()?;

        let active = product_component::ActiveModel {
            title: Set(next.title),
            unit_price: Set(next.unit_price),
            stock_on_hand: Set(next.stock_on_hand),
            incoming_restock: Set(next.incoming_restock),
            is_available: Set(next.is_available),
            show_in_filter: Set(next.show_in_filter),
            version: Set(next.version),
            updated_at: Set(next.updated_at),
            ..Default::default()
        };
        let result = product_component::Entity::update_many()
            .set(active)
            .filter(product_component::Column::Id.eq(id))
            .filter(product_component::Column::Version.eq(update.expected_version))
            .exec(&txn)
            .await?;
        if result.rows_affected == 0 {
            return Err(ServiceError::ConcurrentModification(id));
        }

        let (component, recalcs) = self.finish_write(&txn, id).await?;
        txn.commit().await?;

        info!(component_id = %id, version = component.version, "Component updated");
        self.publish(
            Event::ComponentUpdated {
                component_id: id,
                version: component.version,
            },
            &recalcs,
        )
        .await;
        Ok(component)
    }

    /// Records a delivery. The increment is applied in SQL so concurrent
    /// restocks never overwrite each other, and only while the folded stock
    /// still fits an `i32`.
    #[instrument(skip(self))]
    pub async fn restock_component(
        &self,
        id: Uuid,
        quantity: i32,
    ) -> Result<product_component::Model, ServiceError> {
        ensure_positive("quantity", quantity)?;

        let db = &*self.db_pool;
        let txn = db.begin().await?;

        let received = product_component::Entity::update_many()
            .col_expr(
                product_component::Column::IncomingRestock,
                Expr::col(product_component::Column::IncomingRestock).add(quantity),
            )
            .filter(product_component::Column::Id.eq(id))
            .filter(
                Expr::expr(
                    Expr::col(product_component::Column::StockOnHand)
                        .add(Expr::col(product_component::Column::IncomingRestock)),
                )
                .lte(i32::MAX - quantity),
            )
            .exec(&txn)
            .await?;
        if received.rows_affected == 0 {
            let stored = find_component(&txn, id).await?;
            return Err(ServiceError::ValidationError(format!(
                "Restocking {} unit(s) would overflow the stock of component '{}'",
                quantity, stored.slug
            )));
        }

        normalize_stock(&txn, id).await?;

        let (component, recalcs) = self.finish_write(&txn, id).await?;
        txn.commit().await?;

        info!(
            component_id = %id,
            quantity,
            stock_on_hand = component.stock_on_hand,
            "Component restocked"
        );
        self.publish(
            Event::ComponentRestocked {
                component_id: id,
                quantity,
                stock_on_hand: component.stock_on_hand,
            },
            &recalcs,
        )
        .await;
        Ok(component)
    }

    /// Takes `quantity` units out of stock and counts them as sold. The
    /// decrement only applies while enough stock is left.
    #[instrument(skip(self))]
    pub async fn record_sale(
        &self,
        id: Uuid,
        quantity: i32,
    ) -> Result<product_component::Model, ServiceError> {
        ensure_positive("quantity", quantity)?;

        let db = &*self.db_pool;
        let txn = db.begin().await?;

        let sold = product_component::Entity::update_many()
            .col_expr(
                product_component::Column::StockOnHand,
                Expr::col(product_component::Column::StockOnHand).sub(quantity),
            )
            .col_expr(
                product_component::Column::UnitsSold,
                Expr::col(product_component::Column::UnitsSold).add(quantity),
            )
            .col_expr(
                product_component::Column::Version,
                Expr::col(product_component::Column::Version).add(1),
            )
            .col_expr(product_component::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(product_component::Column::Id.eq(id))
            .filter(product_component::Column::StockOnHand.gte(quantity))
            .filter(product_component::Column::UnitsSold.lte(i32::MAX - quantity))
            .exec(&txn)
            .await?;

        if sold.rows_affected == 0 {
            let stored = find_component(&txn, id).await?;
            if stored.stock_on_hand >= quantity {
                return Err(ServiceError::ValidationError(format!(
                    "Selling {} unit(s) would overflow units_sold of component '{}'",
                    quantity, stored.slug
                )));
            }
            return Err(ServiceError::InsufficientStock(format!(
                "Component '{}' has {} unit(s) left, {} requested",
                stored.slug, stored.stock_on_hand, quantity
            )));
        }

        let (component, recalcs) = self.finish_write(&txn, id).await?;
        txn.commit().await?;

        info!(
            component_id = %id,
            quantity,
            stock_on_hand = component.stock_on_hand,
            "Component sale recorded"
        );
        self.publish(
            Event::ComponentSold {
                component_id: id,
                quantity,
                stock_on_hand: component.stock_on_hand,
            },
            &recalcs,
        )
        .await;
        Ok(component)
    }

    #[instrument(skip(self))]
    pub async fn get_component(&self, id: Uuid) -> Result<product_component::Model, ServiceError> {
        find_component(&*self.db_pool, id).await
    }

    /// All components, least sold first.
    #[instrument(skip(self))]
    pub async fn list_components(&self) -> Result<Vec<product_component::Model>, ServiceError> {
        Ok(product_component::Entity::find()
            .order_by_asc(product_component::Column::UnitsSold)
            .order_by_asc(product_component::Column::Title)
            .all(&*self.db_pool)
            .await?)
    }

    /// Components offered as storefront filters.
    #[instrument(skip(self))]
    pub async fn list_filter_components(
        &self,
    ) -> Result<Vec<product_component::Model>, ServiceError> {
        Ok(product_component::Entity::find()
            .filter(product_component::Column::ShowInFilter.eq(true))
            .order_by_asc(product_component::Column::Title)
            .all(&*self.db_pool)
            .await?)
    }

    /// Deletes a component that no composition uses any more.
    #[instrument(skip(self))]
    pub async fn delete_component(&self, id: Uuid) -> Result<(), ServiceError> {
        let db = &*self.db_pool;
        let component = find_component(db, id).await?;

        let references = product_composition::Entity::find()
            .filter(product_composition::Column::ComponentId.eq(id))
            .count(db)
            .await?;
        if references > 0 {
            return Err(ServiceError::Conflict(format!(
                "Component '{}' is used by {} composition(s)",
                component.slug, references
            )));
        }

        product_component::Entity::delete_by_id(id)
            .exec(db)
            .await
            .map_err(|e| protect_delete(e, format!("Component '{}' is in use", component.slug)))?;

        info!(component_id = %id, "Component deleted");
        self.event_sender
            .send_or_log(Event::ComponentDeleted(id))
            .await;
        Ok(())
    }

    async fn finish_write<C>(
        &self,
        db: &C,
        id: Uuid,
    ) -> Result<(product_component::Model, Vec<ProductRecalc>), ServiceError>
    where
        C: ConnectionTrait,
    {
        let component = find_component(db, id).await?;
        let recalcs = cascade::on_component_persisted(db, &component).await?;
        Ok((component, recalcs))
    }

    async fn publish(&self, event: Event, recalcs: &[ProductRecalc]) {
        self.event_sender.send_or_log(event).await;
        for recalc in recalcs {
            for event in recalc.events() {
                self.event_sender.send_or_log(event).await;
            }
        }
    }
}

async fn find_component<C>(db: &C, id: Uuid) -> Result<product_component::Model, ServiceError>
where
    C: ConnectionTrait,
{
    product_component::Entity::find_by_id(id)
        .one(db)
        .await?
        .ok_or_else(|| ServiceError::not_found("Component", id))
}

/// Moves pending restock into `stock_on_hand` and bumps the version.
async fn normalize_stock<C>(db: &C, id: Uuid) -> Result<(), ServiceError>
where
    C: ConnectionTrait,
{
    product_component::Entity::update_many()
        .col_expr(
            product_component::Column::StockOnHand,
            Expr::col(product_component::Column::StockOnHand)
                .add(Expr::col(product_component::Column::IncomingRestock)),
        )
        .col_expr(product_component::Column::IncomingRestock, Expr::value(0))
        .col_expr(
            product_component::Column::Version,
            Expr::col(product_component::Column::Version).add(1),
        )
        .col_expr(product_component::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(product_component::Column::Id.eq(id))
        .exec(db)
        .await?;
    Ok(())
}
