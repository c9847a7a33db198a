//! sea-orm entities for the flower shop catalog and orders.

pub mod order;
pub mod order_item;
pub mod product;
pub mod product_category;
pub mod product_component;
pub mod product_composition;

pub use order::OrderStatus;
pub use product::ProductStatus;
