use uuid::Uuid;

use crate::gateway::GatewayError;
use crate::store::StoreError;

// ============================================================================
// Purchase Errors
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum PurchaseError {
    #[error("Invalid purchase request: {0}")]
    Validation(String),

    #[error("Ticket {0} not found")]
    TicketNotFound(Uuid),

    #[error("User {0} not found")]
    PayerNotFound(Uuid),

    #[error("Insufficient stock for ticket {ticket_id}: requested {requested}")]
    InsufficientStock { ticket_id: Uuid, requested: i32 },

    #[error("Payment initiation failed for transaction {transaction_id}: {source}")]
    GatewayInitiation {
        transaction_id: Uuid,
        #[source]
        source: GatewayError,
    },

    #[error(transparent)]
    Store(StoreError),
}

impl PurchaseError {
    /// Stable label for metrics and API error bodies
    pub fn kind(&self) -> &'static str {
        match self {
            PurchaseError::Validation(_) => "invalid",
            PurchaseError::TicketNotFound(_) | PurchaseError::PayerNotFound(_) => "not_found",
            PurchaseError::InsufficientStock { .. } => "insufficient_stock",
            PurchaseError::GatewayInitiation { .. } => "gateway_failed",
            PurchaseError::Store(_) => "store_error",
        }
    }
}

impl From<StoreError> for PurchaseError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::InsufficientStock { ticket_id, requested } => {
                PurchaseError::InsufficientStock { ticket_id, requested }
            }
            StoreError::NotFound { entity: "ticket", id } => PurchaseError::TicketNotFound(id),
            other => PurchaseError::Store(other),
        }
    }
}
