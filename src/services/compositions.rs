use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait,
    IntoActiveModel, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, instrument};
use uuid::Uuid;
use validator::Validate;

use crate::{
    entities::{product, product_component, product_composition},
    errors::ServiceError,
    events::{Event, EventSender},
    services::{
        cascade::{self, ProductRecalc},
        products::find_product,
    },
};

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct NewComposition {
    pub product_id: Uuid,
    pub component_id: Uuid,
    #[validate(range(min = 0, message = "quantity_per_product cannot be negative"))]
    pub quantity_per_product: i32,
}

/// A composition after a write, with the product it repriced.
#[derive(Debug, Clone, Serialize)]
pub struct CompositionChange {
    pub composition: product_composition::Model,
    pub product: product::Model,
}

fn ensure_quantity(quantity: i32) -> Result<(), ServiceError> {
    if quantity < 0 {
        return Err(ServiceError::ValidationError(
            "quantity_per_product cannot be negative".to_string(),
        ));
    }
    Ok(())
}

/// Service for the recipe lines that tie components to products
#[derive(Clone)]
pub struct CompositionService {
    db_pool: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
}

impl CompositionService {
    pub fn new(db_pool: Arc<DatabaseConnection>, event_sender: Arc<EventSender>) -> Self {
        Self {
            db_pool,
            event_sender,
        }
    }

    #[instrument(skip(self))]
    pub async fn add_composition(
        &self,
        input: NewComposition,
    ) -> Result<CompositionChange, ServiceError> {
        input.validate()?;

        let db = &*self.db_pool;
        let txn = db.begin().await?;

        find_product(&txn, input.product_id).await?;
        product_component::Entity::find_by_id(input.component_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::not_found("Component", input.component_id))?;

        let composition = product_composition::ActiveModel {
            id: Set(Uuid::new_v4()),
            product_id: Set(input.product_id),
            component_id: Set(input.component_id),
            quantity_per_product: Set(input.quantity_per_product),
            // priced by the cascade below
            line_cost: Set(Decimal::ZERO),
        };
        let created = composition.insert(&txn).await.map_err(|e| {
            error!("Failed to add composition: {}", e);
            ServiceError::db_error(e)
        })?;

        let (change, recalc) = self.settle(&txn, created).await?;
        txn.commit().await?;

        info!(
            composition_id = %change.composition.id,
            product_id = %change.product.id,
            line_cost = %change.composition.line_cost,
            "Composition added"
        );
        self.publish(&change, &recalc).await;
        Ok(change)
    }

    #[instrument(skip(self))]
    pub async fn update_composition(
        &self,
        id: Uuid,
        quantity_per_product: i32,
    ) -> Result<CompositionChange, ServiceError> {
        ensure_quantity(quantity_per_product)?;

        let db = &*self.db_pool;
        let txn = db.begin().await?;

        let stored = find_composition(&txn, id).await?;
        let mut active = stored.into_active_model();
        active.quantity_per_product = Set(quantity_per_product);
        let updated = active.update(&txn).await?;

        let (change, recalc) = self.settle(&txn, updated).await?;
        txn.commit().await?;

        info!(composition_id = %id, quantity_per_product, "Composition updated");
        self.publish(&change, &recalc).await;
        Ok(change)
    }

    /// Removes a composition and reprices its product from what remains.
    #[instrument(skip(self))]
    pub async fn remove_composition(&self, id: Uuid) -> Result<product::Model, ServiceError> {
        let db = &*self.db_pool;
        let txn = db.begin().await?;

        let stored = find_composition(&txn, id).await?;
        let product_id = stored.product_id;
        product_composition::Entity::delete_by_id(id)
            .exec(&txn)
            .await?;
        let recalc = cascade::on_composition_deleted(&txn, product_id).await?;

        txn.commit().await?;

        info!(composition_id = %id, product_id = %product_id, "Composition removed");
        self.event_sender
            .send_or_log(Event::CompositionRemoved {
                product_id,
                composition_id: id,
            })
            .await;
        self.publish_recalc(&recalc).await;
        Ok(recalc.product)
    }

    #[instrument(skip(self))]
    pub async fn list_compositions(
        &self,
        product_id: Uuid,
    ) -> Result<Vec<product_composition::Model>, ServiceError> {
        let db = &*self.db_pool;
        find_product(db, product_id).await?;

        Ok(product_composition::Entity::find()
            .filter(product_composition::Column::ProductId.eq(product_id))
            .order_by_asc(product_composition::Column::Id)
            .all(db)
            .await?)
    }

    async fn settle<C>(
        &self,
        db: &C,
        composition: product_composition::Model,
    ) -> Result<(CompositionChange, ProductRecalc), ServiceError>
    where
        C: ConnectionTrait,
    {
        let id = composition.id;
        let recalc = cascade::on_composition_persisted(db, composition).await?;
        let composition = find_composition(db, id).await?;
        let change = CompositionChange {
            composition,
            product: recalc.product.clone(),
        };
        Ok((change, recalc))
    }

    async fn publish(&self, change: &CompositionChange, recalc: &ProductRecalc) {
        self.event_sender
            .send_or_log(Event::CompositionChanged {
                product_id: change.product.id,
                composition_id: change.composition.id,
            })
            .await;
        self.publish_recalc(recalc).await;
    }

    async fn publish_recalc(&self, recalc: &ProductRecalc) {
        for event in recalc.events() {
            self.event_sender.send_or_log(event).await;
        }
    }
}

async fn find_composition<C>(db: &C, id: Uuid) -> Result<product_composition::Model, ServiceError>
where
    C: ConnectionTrait,
{
    product_composition::Entity::find_by_id(id)
        .one(db)
        .await?
        .ok_or_else(|| ServiceError::not_found("Composition", id))
}
