use async_trait::async_trait;
use tracing::info;

use crate::events::Event;

/// Outbound customer notifications. Delivery is best effort; callers log
/// failures and carry on.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, event: &Event) -> Result<(), String>;
}

/// Writes notifications to the log instead of a mail or SMS provider.
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, event: &Event) -> Result<(), String> {
        match event {
            Event::OrderCreated {
                order_id,
                email,
                total,
            } => {
                info!(
                    order_id = %order_id,
                    email = email.as_deref().unwrap_or("-"),
                    total = %total,
                    "order confirmation dispatched"
                );
            }
            Event::OrderCancelled { order_id } => {
                info!(order_id = %order_id, "order cancellation notice dispatched");
            }
            Event::PaymentStatusChanged {
                order_id,
                from,
                to,
            } => {
                info!(order_id = %order_id, from = %from, to = %to, "payment status notice dispatched");
            }
        }
        Ok(())
    }
}
