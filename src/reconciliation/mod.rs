use uuid::Uuid;

use crate::domain::transaction::{TransactionStatus, TransitionError};
use crate::store::StoreError;
use crate::utils::IsTransient;

// ============================================================================
// Payment Reconciliation
// ============================================================================
//
// - confirmation: parse gateway callbacks, resolve correlation, map outcome
// - processor:    per-message state machine and delivery disposition
// - sweep:        fail PENDING transactions nobody confirmed, retry lost releases
//
// ============================================================================

mod confirmation;
mod processor;
mod sweep;

#[cfg(test)]
mod tests;

pub use confirmation::{PaymentConfirmation, SettlementOutcome};
pub use processor::ConfirmationProcessor;
pub use sweep::{PendingSweep, SweepReport};

#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("Malformed confirmation: {0}")]
    Malformed(String),

    #[error("No transaction matches confirmation ({0})")]
    UnknownCorrelation(String),

    #[error(transparent)]
    TerminalConflict(TransitionError),

    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for ReconcileError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Transition(conflict) => ReconcileError::TerminalConflict(conflict),
            other => ReconcileError::Store(other),
        }
    }
}

impl IsTransient for ReconcileError {
    fn is_transient(&self) -> bool {
        match self {
            ReconcileError::Store(e) => e.is_transient(),
            _ => false,
        }
    }
}

impl ReconcileError {
    /// Needs a human: the message cannot be reconciled automatically
    pub fn is_anomaly(&self) -> bool {
        !matches!(self, ReconcileError::Store(_))
    }

    /// Stable label for metrics and the parked-message table
    pub fn kind(&self) -> &'static str {
        match self {
            ReconcileError::Malformed(_) => "malformed",
            ReconcileError::UnknownCorrelation(_) => "unknown_correlation",
            ReconcileError::TerminalConflict(_) => "terminal_conflict",
            ReconcileError::Store(e) if e.is_transient() => "store_unavailable",
            ReconcileError::Store(_) => "store_error",
        }
    }
}

/// What processing one confirmation did
#[derive(Debug, Clone, PartialEq)]
pub enum Reconciliation {
    /// This delivery moved the transaction out of PENDING
    Settled {
        transaction_id: Uuid,
        status: TransactionStatus,
        attendee_id: Option<Uuid>,
    },
    /// The transaction already carried this status; nothing was re-applied
    Duplicate {
        transaction_id: Uuid,
        status: TransactionStatus,
    },
}

/// What the consumer does with the broker message
#[derive(Debug, Clone, PartialEq)]
pub enum Disposition {
    /// Commit the offset
    Ack(Reconciliation),
    /// Store for manual reconciliation, then commit the offset
    Park(ParkReason),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParkReason {
    pub kind: &'static str,
    pub message: String,
    pub attempts: u32,
}
