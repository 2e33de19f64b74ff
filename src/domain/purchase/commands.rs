use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::transaction::TransactionStatus;

// ============================================================================
// Purchase Intent - request and receipt
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PurchaseRequest {
    pub user_id: Uuid,
    pub ticket_id: Uuid,
    pub quantity: i32,
}

/// What the buyer gets back synchronously: a pending transaction, not a ticket
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PurchaseReceipt {
    pub transaction_id: Uuid,
    pub status: TransactionStatus,
}
