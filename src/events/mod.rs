use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::entities::ProductStatus;

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Sends an event after a commit. The write already succeeded, so a closed
    /// channel is only logged.
    pub async fn send_or_log(&self, event: Event) {
        if let Err(e) = self.send(event).await {
            warn!(error = %e, "Dropping catalog event");
        }
    }
}

// Catalog and order events emitted after a write has been committed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    // Category events
    CategoryCreated(Uuid),
    CategoryDeleted(Uuid),

    // Component events
    ComponentCreated(Uuid),
    ComponentUpdated {
        component_id: Uuid,
        version: i32,
    },
    ComponentRestocked {
        component_id: Uuid,
        quantity: i32,
        stock_on_hand: i32,
    },
    ComponentSold {
        component_id: Uuid,
        quantity: i32,
        stock_on_hand: i32,
    },
    ComponentDeleted(Uuid),

    // Composition events
    CompositionChanged {
        product_id: Uuid,
        composition_id: Uuid,
    },
    CompositionRemoved {
        product_id: Uuid,
        composition_id: Uuid,
    },

    // Product events
    ProductCreated(Uuid),
    ProductRepriced {
        product_id: Uuid,
        base_price: Decimal,
        computed_price: Decimal,
        status: ProductStatus,
    },
    ProductDeleted(Uuid),

    // Order events
    OrderCreated(Uuid),
    OrderItemAdded {
        order_id: Uuid,
        item_id: Uuid,
    },
    OrderItemsResynced {
        product_id: Uuid,
        items: usize,
    },
    OrderPricesFrozen(Uuid),
}

// Define a trait for handling events. Handlers implementing this trait will process events asynchronously.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle_event(&self, event: Event) -> Result<(), String>;
}

/// Consumes the event channel and logs every event.
pub async fn process_events(rx: mpsc::Receiver<Event>) {
    process_events_with_handlers(rx, Vec::new()).await
}

/// Consumes the event channel, logging each event and fanning it out to
/// `handlers`. A failing handler is logged and does not stop the loop.
pub async fn process_events_with_handlers(
    mut rx: mpsc::Receiver<Event>,
    handlers: Vec<Arc<dyn EventHandler>>,
) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match &event {
            Event::ProductRepriced {
                product_id,
                base_price,
                computed_price,
                status,
            } => {
                info!(
                    product_id = %product_id,
                    base_price = %base_price,
                    computed_price = %computed_price,
                    status = ?status,
                    "Product repriced"
                );
            }
            Event::ComponentSold {
                component_id,
                quantity,
                stock_on_hand,
            } => {
                info!(component_id = %component_id, quantity, stock_on_hand, "Component sold");
                if *stock_on_hand == 0 {
                    warn!(component_id = %component_id, "Component is out of stock");
                }
            }
            Event::OrderItemsResynced { product_id, items } => {
                info!(product_id = %product_id, items, "Order items resynced");
            }
            _ => {
                info!("Received event: {:?}", event);
            }
        }

        for handler in &handlers {
            if let Err(e) = handler.handle_event(event.clone()).await {
                error!("Event handler failed for {:?}: {}", event, e);
            }
        }
    }

    warn!("Event processing loop has ended");
}
