//! Keeps derived catalog data consistent after a write.
//!
//! A component write reprices every composition that uses it, a composition
//! write reprices its product, and a product write re-syncs the order items
//! that still follow the product's price. Every function takes the open
//! transaction of the triggering write, so a failure anywhere rolls the whole
//! chain back.

use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, IntoActiveModel, QueryFilter,
    QueryOrder, Set,
};
use std::collections::BTreeSet;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::{
    entities::{order, order_item, product, product_component, product_composition},
    errors::ServiceError,
    events::Event,
    services::pricing::{self, CompositionLine, StatusPolicy},
};

/// Result of recalculating one product.
#[derive(Debug, Clone)]
pub struct ProductRecalc {
    pub product: product::Model,
    pub changed: bool,
    pub resynced_items: usize,
}

impl ProductRecalc {
    /// Events worth publishing once the transaction has committed.
    pub fn events(&self) -> Vec<Event> {
        let mut events = Vec::new();
        if self.changed {
            events.push(Event::ProductRepriced {
                product_id: self.product.id,
                base_price: self.product.base_price,
                computed_price: self.product.computed_price,
                status: self.product.status,
            });
        }
        if self.resynced_items > 0 {
            events.push(Event::OrderItemsResynced {
                product_id: self.product.id,
                items: self.resynced_items,
            });
        }
        events
    }
}

/// Reprices every composition that references `component`, then every
/// product those compositions belong to.
#[instrument(skip(db, component), fields(component_id = %component.id))]
pub async fn on_component_persisted<C>(
    db: &C,
    component: &product_component::Model,
) -> Result<Vec<ProductRecalc>, ServiceError>
where
    C: ConnectionTrait,
{
    let compositions = product_composition::Entity::find()
        .filter(product_composition::Column::ComponentId.eq(component.id))
        .all(db)
        .await?;

    let mut product_ids = BTreeSet::new();
    for composition in compositions {
        product_ids.insert(composition.product_id);
        refresh_line_cost(db, composition, component.unit_price).await?;
    }

    let mut recalcs = Vec::with_capacity(product_ids.len());
    for product_id in product_ids {
        recalcs.push(recalculate_product(db, product_id, StatusPolicy::Derive).await?);
    }

    debug!(products = recalcs.len(), "Component change propagated");
    Ok(recalcs)
}

/// Refreshes the line cost of `composition` and reprices its product.
#[instrument(skip(db, composition), fields(composition_id = %composition.id))]
pub async fn on_composition_persisted<C>(
    db: &C,
    composition: product_composition::Model,
) -> Result<ProductRecalc, ServiceError>
where
    C: ConnectionTrait,
{
    let component = product_component::Entity::find_by_id(composition.component_id)
        .one(db)
        .await?
        .ok_or_else(|| ServiceError::not_found("Component", composition.component_id))?;

    let product_id = composition.product_id;
    refresh_line_cost(db, composition, component.unit_price).await?;
    recalculate_product(db, product_id, StatusPolicy::Derive).await
}

/// Reprices a product from the compositions that remain after a delete.
#[instrument(skip(db))]
pub async fn on_composition_deleted<C>(
    db: &C,
    product_id: Uuid,
) -> Result<ProductRecalc, ServiceError>
where
    C: ConnectionTrait,
{
    recalculate_product(db, product_id, StatusPolicy::Derive).await
}

/// Recomputes the price of a product whose own fields changed. The stored
/// status is kept unless a composed component is unavailable.
#[instrument(skip(db))]
pub async fn on_product_persisted<C>(
    db: &C,
    product_id: Uuid,
) -> Result<ProductRecalc, ServiceError>
where
    C: ConnectionTrait,
{
    recalculate_product(db, product_id, StatusPolicy::Keep).await
}

/// Loads a product's compositions joined with their components.
pub async fn load_lines<C>(db: &C, product_id: Uuid) -> Result<Vec<CompositionLine>, ServiceError>
where
    C: ConnectionTrait,
{
    let rows = product_composition::Entity::find()
        .filter(product_composition::Column::ProductId.eq(product_id))
        .order_by_asc(product_composition::Column::Id)
        .find_also_related(product_component::Entity)
        .all(db)
        .await?;

    rows.into_iter()
        .map(|(composition, component)| {
            let component = component.ok_or_else(|| {
                ServiceError::InternalError(format!(
                    "Composition {} references missing component {}",
                    composition.id, composition.component_id
                ))
            })?;
            Ok(CompositionLine {
                quantity_per_product: composition.quantity_per_product,
                unit_price: component.unit_price,
                stock_on_hand: component.stock_on_hand,
                component_available: component.is_available,
            })
        })
        .collect()
}

/// Re-derives base price, computed price and status of a product, persists
/// them when they differ, then re-syncs dependent order items.
#[instrument(skip(db))]
pub async fn recalculate_product<C>(
    db: &C,
    product_id: Uuid,
    policy: StatusPolicy,
) -> Result<ProductRecalc, ServiceError>
where
    C: ConnectionTrait,
{
    let stored = product::Entity::find_by_id(product_id)
        .one(db)
        .await?
        .ok_or_else(|| ServiceError::not_found("Product", product_id))?;

    let lines = load_lines(db, product_id).await?;
    let pricing =
        pricing::price_product(stored.status, stored.discount_percent, &lines, policy);

    let changed = stored.base_price != pricing.base_price
        || stored.computed_price != pricing.computed_price
        || stored.status != pricing.status;

    let product = if changed {
        let mut active = stored.into_active_model();
        active.base_price = Set(pricing.base_price);
        active.computed_price = Set(pricing.computed_price);
        active.status = Set(pricing.status);
        let updated = active.update(db).await?;
        info!(
            product_id = %updated.id,
            base_price = %updated.base_price,
            computed_price = %updated.computed_price,
            status = ?updated.status,
            "Product repriced"
        );
        updated
    } else {
        stored
    };

    let resynced_items = resync_order_items(db, &product).await?;

    Ok(ProductRecalc {
        product,
        changed,
        resynced_items,
    })
}

/// Copies the product's title and price onto every order item whose order
/// has not frozen its prices, then refreshes those orders' totals.
/// Returns the number of items rewritten.
pub async fn resync_order_items<C>(db: &C, product: &product::Model) -> Result<usize, ServiceError>
where
    C: ConnectionTrait,
{
    let rows = order_item::Entity::find()
        .filter(order_item::Column::ProductId.eq(product.id))
        .find_also_related(order::Entity)
        .all(db)
        .await?;

    let mut touched_orders = BTreeSet::new();
    let mut rewritten = 0;

    for (item, parent) in rows {
        if parent.map(|o| o.prices_frozen).unwrap_or(true) {
            continue;
        }

        let total_price = product.computed_price * Decimal::from(item.quantity);
        if item.unit_price == product.computed_price
            && item.total_price == total_price
            && item.product_title == product.title
        {
            continue;
        }

        touched_orders.insert(item.order_id);
        let mut active = item.into_active_model();
        active.product_title = Set(product.title.clone());
        active.unit_price = Set(product.computed_price);
        active.total_price = Set(total_price);
        active.update(db).await?;
        rewritten += 1;
    }

    for order_id in touched_orders {
        refresh_order_total(db, order_id).await?;
    }

    if rewritten > 0 {
        debug!(product_id = %product.id, items = rewritten, "Order items resynced");
    }
    Ok(rewritten)
}

/// Sets an order's total to the sum of its items.
pub async fn refresh_order_total<C>(db: &C, order_id: Uuid) -> Result<order::Model, ServiceError>
where
    C: ConnectionTrait,
{
    let stored = order::Entity::find_by_id(order_id)
        .one(db)
        .await?
        .ok_or_else(|| ServiceError::not_found("Order", order_id))?;

    let total: Decimal = order_item::Entity::find()
        .filter(order_item::Column::OrderId.eq(order_id))
        .all(db)
        .await?
        .iter()
        .map(|item| item.total_price)
        .sum();

    if stored.total_amount == total {
        return Ok(stored);
    }

    let mut active = stored.into_active_model();
    active.total_amount = Set(total);
    Ok(active.update(db).await?)
}

async fn refresh_line_cost<C>(
    db: &C,
    composition: product_composition::Model,
    unit_price: Decimal,
) -> Result<(), ServiceError>
where
    C: ConnectionTrait,
{
    let cost = pricing::line_cost(composition.quantity_per_product, unit_price);
    if composition.line_cost != cost {
        let mut active = composition.into_active_model();
        active.line_cost = Set(cost);
        active.update(db).await?;
    }
    Ok(())
}
