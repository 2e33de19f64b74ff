use uuid::Uuid;

use super::value_objects::TransactionStatus;

// ============================================================================
// Transaction Lifecycle Errors
// ============================================================================

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TransitionError {
    #[error("{0} is not a settlement status")]
    NotASettlementStatus(TransactionStatus),

    #[error("Transaction {transaction_id} is already {current}, refusing {requested}")]
    TerminalConflict {
        transaction_id: Uuid,
        current: TransactionStatus,
        requested: TransactionStatus,
    },
}
