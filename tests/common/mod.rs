#![allow(dead_code)]

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;

use axum::{
    body::{to_bytes, Body},
    http::{Method, Request, StatusCode},
    Router,
};
use flowershop_api::{
    config::AppConfig,
    db::{self, DbConfig},
    entities::{product, product_category, product_component},
    events::{self, Event, EventHandler, EventSender},
    handlers::AppServices,
    middleware_helpers::request_id_middleware,
    services::{
        categories::NewCategory,
        components::NewComponent,
        compositions::{CompositionChange, NewComposition},
        products::NewProduct,
    },
    AppState,
};
use rust_decimal::Decimal;
use serde_json::Value;
use tokio::sync::{mpsc, Mutex};
use tower::ServiceExt;
use uuid::Uuid;

/// Keeps every published event for assertions.
#[derive(Default)]
pub struct EventLog {
    events: Mutex<Vec<Event>>,
}

#[async_trait]
impl EventHandler for EventLog {
    async fn handle_event(&self, event: Event) -> Result<(), String> {
        self.events.lock().await.push(event);
        Ok(())
    }
}

/// Application state backed by a private in-memory SQLite database.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    event_log: Arc<EventLog>,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    pub async fn new() -> Self {
        let cfg = AppConfig::new(
            "sqlite::memory:".to_string(),
            "127.0.0.1".to_string(),
            18_080,
            "test".to_string(),
        );

        // A single connection keeps the in-memory database alive and shared.
        let pool = db::establish_connection_with_config(&DbConfig {
            url: cfg.database_url.clone(),
            max_connections: 1,
            min_connections: 1,
            ..Default::default()
        })
        .await
        .expect("failed to open test database");
        db::ensure_schema(&pool)
            .await
            .expect("failed to create schema");

        let (tx, rx) = mpsc::channel(256);
        let event_log = Arc::new(EventLog::default());
        let event_task = tokio::spawn(events::process_events_with_handlers(
            rx,
            vec![event_log.clone() as Arc<dyn EventHandler>],
        ));
        let event_sender = Arc::new(EventSender::new(tx));

        let state = AppState::new(Arc::new(pool), cfg, event_sender);
        let router = flowershop_api::app_router(state.clone())
            .layer(axum::middleware::from_fn(request_id_middleware));

        Self {
            router,
            state,
            event_log,
            _event_task: event_task,
        }
    }

    /// Waits until an event matching `pred` has been handled.
    pub async fn wait_for_event<F>(&self, pred: F) -> Event
    where
        F: Fn(&Event) -> bool,
    {
        for _ in 0..100 {
            if let Some(event) = self.event_log.events.lock().await.iter().find(|e| pred(*e)) {
                return event.clone();
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("no matching event was published");
    }

    /// Events handled so far.
    pub async fn events(&self) -> Vec<Event> {
        self.event_log.events.lock().await.clone()
    }

    pub fn services(&self) -> &AppServices {
        &self.state.services
    }

    pub async fn seed_category(&self, title: &str) -> product_category::Model {
        self.services()
            .categories
            .create_category(NewCategory {
                title: title.to_string(),
                slug: None,
            })
            .await
            .expect("seed category")
    }

    pub async fn seed_component(
        &self,
        title: &str,
        unit_price: Decimal,
        stock_on_hand: i32,
    ) -> product_component::Model {
        self.services()
            .components
            .create_component(NewComponent {
                title: title.to_string(),
                slug: None,
                unit_price,
                stock_on_hand,
                incoming_restock: 0,
                is_available: true,
                show_in_filter: false,
            })
            .await
            .expect("seed component")
    }

    pub async fn seed_product(&self, category_id: Uuid, title: &str) -> product::Model {
        self.seed_discounted_product(category_id, title, 0).await
    }

    pub async fn seed_discounted_product(
        &self,
        category_id: Uuid,
        title: &str,
        discount_percent: i32,
    ) -> product::Model {
        self.services()
            .products
            .create_product(NewProduct {
                category_id,
                title: title.to_string(),
                slug: None,
                header_title: None,
                header_description: None,
                discount_percent,
            })
            .await
            .expect("seed product")
    }

    pub async fn compose(
        &self,
        product_id: Uuid,
        component_id: Uuid,
        quantity_per_product: i32,
    ) -> CompositionChange {
        self.services()
            .compositions
            .add_composition(NewComposition {
                product_id,
                component_id,
                quantity_per_product,
            })
            .await
            .expect("seed composition")
    }

    pub async fn product(&self, id: Uuid) -> product::Model {
        self.services()
            .products
            .get_product(id)
            .await
            .expect("product exists")
    }

    pub async fn component(&self, id: Uuid) -> product_component::Model {
        self.services()
            .components
            .get_component(id)
            .await
            .expect("component exists")
    }

    /// Sends a request through the router and returns status and JSON body.
    pub async fn request_json(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        self.request_with_id(method, uri, body, None).await
    }

    pub async fn request_with_id(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        request_id: Option<&str>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(id) = request_id {
            builder = builder.header("x-request-id", id);
        }
        let request = match body {
            Some(json) => builder
                .header("content-type", "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }
}

/// Reads a decimal that serde rendered as a JSON string.
pub fn decimal_field(value: &Value) -> Decimal {
    value
        .as_str()
        .expect("decimal serialized as string")
        .parse()
        .expect("valid decimal")
}
