use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use sea_orm::Set;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

/// A raw material a bouquet is assembled from (one kind of flower, a ribbon,
/// a basket). Carries its own price and stock.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize, Validate)]
#[sea_orm(table_name = "product_components")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    #[validate(length(
        min = 1,
        max = 150,
        message = "Component title must be between 1 and 150 characters"
    ))]
    pub title: String,

    #[sea_orm(unique)]
    pub slug: String,

    #[sea_orm(column_type = "Decimal(Some((10, 2)))")]
    pub unit_price: Decimal,

    /// Units physically available
    #[validate(range(min = 0, message = "Stock on hand cannot be negative"))]
    pub stock_on_hand: i32,

    /// Delivered units not yet counted into `stock_on_hand`
    #[validate(range(min = 0, message = "Incoming restock cannot be negative"))]
    pub incoming_restock: i32,

    #[validate(range(min = 0, message = "Units sold cannot be negative"))]
    pub units_sold: i32,

    pub is_available: bool,
    pub show_in_filter: bool,

    /// Optimistic concurrency token, bumped on every persist
    pub version: i32,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::product_composition::Entity")]
    Compositions,
}

impl Related<super::product_composition::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Compositions.def()
    }
}

#[async_trait::async_trait]
impl ActiveModelBehavior for ActiveModel {
    async fn before_save<C>(self, _db: &C, insert: bool) -> Result<Self, DbErr>
    where
        C: ConnectionTrait,
    {
        let mut active_model = self;
        let now = Utc::now();

        if insert {
            active_model.created_at = Set(now);
        }
        active_model.updated_at = Set(now);

        let model: Model = active_model.clone().try_into().map_err(|_| {
            DbErr::Custom("Failed to convert ActiveModel to Model for validation".to_string())
        })?;

        if let Err(err) = model.validate() {
            return Err(DbErr::Custom(format!("Validation error: {}", err)));
        }

        Ok(active_model)
    }
}
