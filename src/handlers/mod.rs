pub mod categories;
pub mod common;
pub mod components;
pub mod orders;
pub mod products;

use crate::db::DbPool;
use crate::events::EventSender;
use crate::services::{
    categories::CategoryService, components::ComponentService, compositions::CompositionService,
    orders::OrderService, products::ProductService,
};
use std::sync::Arc;

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub categories: Arc<CategoryService>,
    pub components: Arc<ComponentService>,
    pub products: Arc<ProductService>,
    pub compositions: Arc<CompositionService>,
    pub orders: Arc<OrderService>,
}

impl AppServices {
    pub fn new(db_pool: Arc<DbPool>, event_sender: Arc<EventSender>) -> Self {
        Self {
            categories: Arc::new(CategoryService::new(
                db_pool.clone(),
                event_sender.clone(),
            )),
            components: Arc::new(ComponentService::new(
                db_pool.clone(),
                event_sender.clone(),
            )),
            products: Arc::new(ProductService::new(db_pool.clone(), event_sender.clone())),
            compositions: Arc::new(CompositionService::new(
                db_pool.clone(),
                event_sender.clone(),
            )),
            orders: Arc::new(OrderService::new(db_pool, event_sender)),
        }
    }
}
