use async_trait::async_trait;

use crate::models::TicketPurchasedEvent;

// ============================================================================
// Messaging - Redpanda (Kafka API) producer and confirmation subscription
// ============================================================================

mod consumer;
mod redpanda;

pub use consumer::ConfirmationSubscription;
pub use redpanda::RedpandaClient;

/// Best-effort outbound notification after a purchase settles as SUCCESS.
/// Callers publish from a spawned task and only log failures; a notification
/// never undoes or delays a sale.
#[async_trait]
pub trait PurchaseNotifier: Send + Sync {
    async fn ticket_purchased(&self, event: &TicketPurchasedEvent) -> anyhow::Result<()>;
}
