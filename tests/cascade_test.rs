mod common;

use assert_matches::assert_matches;
use common::TestApp;
use flowershop_api::{
    entities::ProductStatus,
    events::Event,
    errors::ServiceError,
    services::{components::ComponentUpdate, products::ProductUpdate},
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sea_orm::{ConnectionTrait, Statement};

#[tokio::test]
async fn composing_a_product_prices_it_from_its_components() {
    let app = TestApp::new().await;
    let category = app.seed_category("Bouquets").await;
    let rose = app.seed_component("Red Rose", dec!(5), 10).await;
    let product = app.seed_product(category.id, "Rose Trio").await;

    assert_eq!(product.status, ProductStatus::UnderReview);
    assert_eq!(product.base_price, Decimal::ZERO);

    let change = app.compose(product.id, rose.id, 2).await;
    assert_eq!(change.composition.line_cost, dec!(10));
    assert_eq!(change.product.base_price, dec!(10));
    assert_eq!(change.product.computed_price, dec!(10));
    assert_eq!(change.product.status, ProductStatus::Available);
}

#[tokio::test]
async fn selling_out_a_component_makes_the_product_order_only() {
    let app = TestApp::new().await;
    let category = app.seed_category("Bouquets").await;
    let rose = app.seed_component("Red Rose", dec!(5), 10).await;
    let product = app.seed_product(category.id, "Rose Trio").await;
    app.compose(product.id, rose.id, 2).await;

    let rose = app
        .services()
        .components
        .update_component(
            rose.id,
            ComponentUpdate {
                expected_version: rose.version,
                stock_on_hand: Some(0),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(rose.stock_on_hand, 0);

    let product = app.product(product.id).await;
    assert_eq!(product.status, ProductStatus::OrderOnly);
    assert_eq!(product.base_price, dec!(10));
}

#[tokio::test]
async fn unavailable_component_overrides_product_status() {
    let app = TestApp::new().await;
    let category = app.seed_category("Bouquets").await;
    let rose = app.seed_component("Red Rose", dec!(5), 10).await;
    let product = app.seed_product(category.id, "Rose Trio").await;
    app.compose(product.id, rose.id, 2).await;

    let rose = app
        .services()
        .components
        .update_component(
            rose.id,
            ComponentUpdate {
                expected_version: rose.version,
                stock_on_hand: Some(0),
                is_available: Some(false),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(
        app.product(product.id).await.status,
        ProductStatus::Unavailable
    );

    // A product edit that does not touch compositions keeps the override.
    let edited = app
        .services()
        .products
        .update_product(
            product.id,
            ProductUpdate {
                title: Some("Rose Duo".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(edited.status, ProductStatus::Unavailable);

    app.services()
        .components
        .update_component(
            rose.id,
            ComponentUpdate {
                expected_version: rose.version,
                is_available: Some(true),
                stock_on_hand: Some(4),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(
        app.product(product.id).await.status,
        ProductStatus::Available
    );
}

#[tokio::test]
async fn discount_is_applied_to_the_base_price() {
    let app = TestApp::new().await;
    let category = app.seed_category("Baskets").await;
    let basket = app.seed_component("Wicker Basket", dec!(100), 3).await;
    let product = app.seed_product(category.id, "Spring Basket").await;
    app.compose(product.id, basket.id, 1).await;

    let product = app
        .services()
        .products
        .update_product(
            product.id,
            ProductUpdate {
                discount_percent: Some(20),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(product.base_price, dec!(100));
    assert_eq!(product.computed_price, dec!(80));
    assert_eq!(product.status, ProductStatus::Available);
}

#[tokio::test]
async fn discount_above_one_hundred_is_rejected() {
    let app = TestApp::new().await;
    let category = app.seed_category("Baskets").await;
    let product = app.seed_product(category.id, "Spring Basket").await;

    let result = app
        .services()
        .products
        .update_product(
            product.id,
            ProductUpdate {
                discount_percent: Some(120),
                ..Default::default()
            },
        )
        .await;
    assert_matches!(result, Err(ServiceError::ValidationError(_)));
    assert_eq!(app.product(product.id).await.discount_percent, 0);
}

#[tokio::test]
async fn removing_the_only_composition_zeroes_the_price() {
    let app = TestApp::new().await;
    let category = app.seed_category("Bouquets").await;
    let tulip = app.seed_component("Tulip", dec!(5), 10).await;
    let product = app.seed_product(category.id, "Tulip Pair").await;
    let change = app.compose(product.id, tulip.id, 2).await;

    let product = app
        .services()
        .compositions
        .remove_composition(change.composition.id)
        .await
        .unwrap();

    assert_eq!(product.base_price, Decimal::ZERO);
    assert_eq!(product.computed_price, Decimal::ZERO);
    assert_eq!(product.status, ProductStatus::OrderOnly);
}

#[tokio::test]
async fn component_price_change_reaches_every_product_using_it() {
    let app = TestApp::new().await;
    let category = app.seed_category("Bouquets").await;
    let peony = app.seed_component("Peony", dec!(5), 40).await;
    let ribbon = app.seed_component("Ribbon", dec!(1), 40).await;

    let small = app.seed_product(category.id, "Peony Single").await;
    let large = app.seed_product(category.id, "Peony Armful").await;
    app.compose(small.id, peony.id, 1).await;
    app.compose(large.id, peony.id, 5).await;
    app.compose(large.id, ribbon.id, 2).await;

    assert_eq!(app.product(large.id).await.base_price, dec!(27));

    app.services()
        .components
        .update_component(
            peony.id,
            ComponentUpdate {
                expected_version: peony.version,
                unit_price: Some(dec!(10)),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(app.product(small.id).await.base_price, dec!(10));
    assert_eq!(app.product(large.id).await.base_price, dec!(52));

    let lines = app
        .services()
        .compositions
        .list_compositions(large.id)
        .await
        .unwrap();
    let total: Decimal = lines.iter().map(|line| line.line_cost).sum();
    assert_eq!(total, dec!(52));
}

#[tokio::test]
async fn changing_composition_quantity_updates_availability() {
    let app = TestApp::new().await;
    let category = app.seed_category("Bouquets").await;
    let lily = app.seed_component("White Lily", dec!(5), 3).await;
    let product = app.seed_product(category.id, "Lily Bunch").await;
    let change = app.compose(product.id, lily.id, 3).await;
    assert_eq!(change.product.status, ProductStatus::Available);

    let change = app
        .services()
        .compositions
        .update_composition(change.composition.id, 4)
        .await
        .unwrap();
    assert_eq!(change.composition.line_cost, dec!(20));
    assert_eq!(change.product.base_price, dec!(20));
    assert_eq!(change.product.status, ProductStatus::OrderOnly);
}

#[tokio::test]
async fn zero_quantity_composition_does_not_make_a_product_available() {
    let app = TestApp::new().await;
    let category = app.seed_category("Bouquets").await;
    let fern = app.seed_component("Fern", dec!(5), 100).await;
    let product = app.seed_product(category.id, "Greenery").await;

    let change = app.compose(product.id, fern.id, 0).await;
    assert_eq!(change.product.base_price, Decimal::ZERO);
    assert_eq!(change.product.status, ProductStatus::OrderOnly);
}

#[tokio::test]
async fn recalculation_is_idempotent() {
    let app = TestApp::new().await;
    let category = app.seed_category("Bouquets").await;
    let rose = app.seed_component("Red Rose", dec!(5), 10).await;
    let ribbon = app.seed_component("Ribbon", dec!(1), 2).await;
    let product = app.seed_discounted_product(category.id, "Rose Trio", 50).await;
    app.compose(product.id, rose.id, 3).await;
    app.compose(product.id, ribbon.id, 1).await;

    let first = app
        .services()
        .products
        .recalculate_product(product.id)
        .await
        .unwrap();
    let second = app
        .services()
        .products
        .recalculate_product(product.id)
        .await
        .unwrap();

    assert_eq!(first.base_price, dec!(16));
    assert_eq!(first.computed_price, dec!(8));
    assert_eq!(first.base_price, second.base_price);
    assert_eq!(first.computed_price, second.computed_price);
    assert_eq!(first.status, second.status);
    assert_eq!(first.updated_at, second.updated_at);
}

#[tokio::test]
async fn failing_cascade_rolls_back_the_component_write() {
    let app = TestApp::new().await;
    let category = app.seed_category("Bouquets").await;
    let rose = app.seed_component("Red Rose", dec!(5), 10).await;
    let product = app.seed_product(category.id, "Rose Trio").await;
    app.compose(product.id, rose.id, 2).await;

    // Break the last cascade step: order item re-sync.
    let backend = app.state.db.get_database_backend();
    app.state
        .db
        .execute(Statement::from_string(
            backend,
            "DROP TABLE order_items".to_string(),
        ))
        .await
        .unwrap();

    let result = app
        .services()
        .components
        .update_component(
            rose.id,
            ComponentUpdate {
                expected_version: rose.version,
                unit_price: Some(dec!(12.5)),
                ..Default::default()
            },
        )
        .await;
    assert_matches!(result, Err(ServiceError::DatabaseError(_)));

    let rose_after = app.component(rose.id).await;
    assert_eq!(rose_after.unit_price, dec!(5));
    assert_eq!(rose_after.version, rose.version);

    let product = app.product(product.id).await;
    assert_eq!(product.base_price, dec!(10));
}

#[tokio::test]
async fn repricing_is_published_after_commit() {
    let app = TestApp::new().await;
    let category = app.seed_category("Bouquets").await;
    let rose = app.seed_component("Red Rose", dec!(5), 10).await;
    let product = app.seed_product(category.id, "Rose Trio").await;
    let change = app.compose(product.id, rose.id, 2).await;

    app.wait_for_event(|e| {
        *e == Event::CompositionChanged {
            product_id: product.id,
            composition_id: change.composition.id,
        }
    })
    .await;
    let repriced = app
        .wait_for_event(|e| matches!(e, Event::ProductRepriced { product_id, .. } if *product_id == product.id))
        .await;
    assert_eq!(
        repriced,
        Event::ProductRepriced {
            product_id: product.id,
            base_price: dec!(10),
            computed_price: dec!(10),
            status: ProductStatus::Available,
        }
    );
}

#[tokio::test]
async fn rolled_back_writes_publish_nothing() {
    let app = TestApp::new().await;
    let rose = app.seed_component("Red Rose", dec!(5), 10).await;
    app.wait_for_event(|e| *e == Event::ComponentCreated(rose.id))
        .await;

    let result = app.services().components.record_sale(rose.id, 11).await;
    assert_matches!(result, Err(ServiceError::InsufficientStock(_)));

    // A later write is published, the failed sale never is.
    app.services()
        .components
        .restock_component(rose.id, 1)
        .await
        .unwrap();
    app.wait_for_event(|e| matches!(e, Event::ComponentRestocked { .. }))
        .await;
    assert!(!app
        .events()
        .await
        .iter()
        .any(|e| matches!(e, Event::ComponentSold { .. })));
}
