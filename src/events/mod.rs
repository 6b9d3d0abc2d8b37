use std::sync::Arc;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::entities::order::PaymentStatus;
use crate::services::notifications::Notifier;

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
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
}

/// Domain events emitted by the order and payment services.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    OrderCreated {
        order_id: String,
        email: Option<String>,
        total: Decimal,
    },
    OrderCancelled {
        order_id: String,
    },
    PaymentStatusChanged {
        order_id: String,
        from: PaymentStatus,
        to: PaymentStatus,
    },
}

impl Event {
    pub fn order_id(&self) -> &str {
        match self {
            Event::OrderCreated { order_id, .. }
            | Event::OrderCancelled { order_id }
            | Event::PaymentStatusChanged { order_id, .. } => order_id,
        }
    }
}

/// Drains the event channel, handing each event to `notifier`.
/// Notification failures are logged and never stop the loop.
pub async fn process_events(mut rx: mpsc::Receiver<Event>, notifier: Arc<dyn Notifier>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        debug!(?event, "Received event");
        if let Err(e) = notifier.notify(&event).await {
            error!(order_id = %event.order_id(), error = %e, "Failed to dispatch notification");
        }
    }

    info!("Event channel closed, stopping event processing loop");
}
