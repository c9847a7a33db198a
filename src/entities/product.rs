use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use sea_orm::Set;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

/// Availability of a product as shown on the storefront.
///
/// Stored as the numeric codes the catalog has always used so listings can be
/// ordered by status directly.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "i32", db_type = "Integer")]
#[serde(rename_all = "snake_case")]
pub enum ProductStatus {
    #[sea_orm(num_value = 1)]
    UnderReview,
    #[sea_orm(num_value = 2)]
    Available,
    #[sea_orm(num_value = 3)]
    OrderOnly,
    #[sea_orm(num_value = 4)]
    Unavailable,
}

/// Sellable bundle (a bouquet). Price and status are derived from its
/// compositions and are never written directly by callers.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize, Validate)]
#[sea_orm(table_name = "products")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub category_id: Uuid,

    #[validate(length(
        min = 1,
        max = 150,
        message = "Product title must be between 1 and 150 characters"
    ))]
    pub title: String,

    #[sea_orm(unique)]
    pub slug: String,

    /// SEO heading shown on the product page
    pub header_title: Option<String>,
    pub header_description: Option<String>,

    /// Sum of composition line costs
    #[sea_orm(column_type = "Decimal(Some((10, 2)))")]
    pub base_price: Decimal,

    #[validate(range(min = 0, max = 100, message = "Discount must be between 0 and 100"))]
    pub discount_percent: i32,

    /// Price after discount
    #[sea_orm(column_type = "Decimal(Some((10, 2)))")]
    pub computed_price: Decimal,

    pub status: ProductStatus,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::product_category::Entity",
        from = "Column::CategoryId",
        to = "super::product_category::Column::Id",
        on_delete = "Restrict"
    )]
    Category,
    #[sea_orm(has_many = "super::product_composition::Entity")]
    Compositions,
    #[sea_orm(has_many = "super::order_item::Entity")]
    OrderItems,
}

impl Related<super::product_category::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Category.def()
    }
}

impl Related<super::product_composition::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Compositions.def()
    }
}

impl Related<super::order_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::OrderItems.def()
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
