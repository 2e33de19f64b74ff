use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::transaction::{CorrelationRef, Transaction, TransactionStatus, TransitionError};
use crate::models::{Attendee, Payer, Ticket};
use crate::utils::IsTransient;

// ============================================================================
// Storage Seams
// ============================================================================
//
// Ownership:
// - InventoryLedger is the only writer of `quantity_remaining` and of a
//   transaction's `stock_released_at`; a reservation is written together
//   with its PENDING transaction and released at most once
// - TransactionStore is the only writer of transaction `status`
// - AttendeeStore creates at most one attendee per transaction
//
// `postgres` is the production implementation; `memory` backs the tests.
//
// ============================================================================

mod postgres;
#[cfg(test)]
pub(crate) mod memory;

pub use postgres::PgStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Store query failed: {0}")]
    Query(String),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: Uuid },

    #[error("Insufficient stock for ticket {ticket_id}: requested {requested}")]
    InsufficientStock { ticket_id: Uuid, requested: i32 },

    #[error(transparent)]
    Transition(#[from] TransitionError),
}

impl IsTransient for StoreError {
    fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

/// Result of `TransactionStore::transition_to_terminal`
#[derive(Debug, Clone)]
pub enum TransitionOutcome {
    /// This call moved the transaction out of PENDING
    Applied(Transaction),
    /// The same terminal status was already recorded; nothing changed
    AlreadyTerminal(Transaction),
}

impl TransitionOutcome {
    pub fn was_applied(&self) -> bool {
        matches!(self, TransitionOutcome::Applied(_))
    }
}

/// Result of `InventoryLedger::release`
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ReleaseOutcome {
    /// This call gave the reservation back
    Released { ticket_id: Uuid, remaining: i32 },
    /// Already released, or the transaction is not FAILED/CANCELLED
    NothingHeld,
}

/// Attendee row produced by `AttendeeStore::create_for_transaction`
#[derive(Debug, Clone)]
pub struct AttendeeRecord {
    pub attendee: Attendee,
    /// False when the attendee already existed for the transaction
    pub created: bool,
}

#[derive(Debug, Clone)]
pub struct NewAttendee {
    pub transaction_id: Uuid,
    pub user_id: Uuid,
    pub event_id: Uuid,
    pub ticket_id: Uuid,
    pub quantity: i32,
}

/// Read access to users, events and tickets. Deleted records are never returned.
#[async_trait]
pub trait CatalogReader: Send + Sync {
    async fn active_ticket(&self, ticket_id: Uuid) -> Result<Option<Ticket>, StoreError>;
    async fn active_payer(&self, user_id: Uuid) -> Result<Option<Payer>, StoreError>;
}

#[async_trait]
pub trait InventoryLedger: Send + Sync {
    /// Check `quantity_remaining >= quantity`, decrement, and record the
    /// PENDING `transaction` in one atomic write. Returns the remaining stock.
    async fn reserve(&self, transaction: &Transaction) -> Result<i32, StoreError>;

    /// Give a FAILED/CANCELLED transaction's reservation back and stamp
    /// `stock_released_at` in one atomic write. Safe to repeat.
    async fn release(&self, transaction_id: Uuid) -> Result<ReleaseOutcome, StoreError>;
}

#[async_trait]
pub trait TransactionStore: Send + Sync {
    async fn find_by_correlation(
        &self,
        correlation: &CorrelationRef,
    ) -> Result<Option<Transaction>, StoreError>;

    /// Record the gateway's own identifiers once initiation is acknowledged
    async fn record_gateway_references(
        &self,
        transaction_id: Uuid,
        checkout_reference: Option<&str>,
        merchant_reference: Option<&str>,
    ) -> Result<(), StoreError>;

    /// Move a PENDING transaction to `target`. Same-status repeats return
    /// `AlreadyTerminal`; a different terminal status is a
    /// `TransitionError::TerminalConflict`.
    async fn transition_to_terminal(
        &self,
        transaction_id: Uuid,
        target: TransactionStatus,
        provider_response: Option<serde_json::Value>,
        failure_reason: Option<String>,
    ) -> Result<TransitionOutcome, StoreError>;

    /// PENDING transactions created before `created_before`, oldest first
    async fn find_stale_pending(
        &self,
        created_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Transaction>, StoreError>;

    /// FAILED/CANCELLED transactions whose stock was never given back,
    /// least recently updated first
    async fn find_unreleased(&self, limit: i64) -> Result<Vec<Transaction>, StoreError>;
}

#[async_trait]
pub trait AttendeeStore: Send + Sync {
    /// Idempotent on `transaction_id`
    async fn create_for_transaction(&self, attendee: NewAttendee) -> Result<AttendeeRecord, StoreError>;
}

pub(crate) fn require_settlement_status(target: TransactionStatus) -> Result<(), StoreError> {
    match target {
        TransactionStatus::Success | TransactionStatus::Failed | TransactionStatus::Cancelled => Ok(()),
        other => Err(TransitionError::NotASettlementStatus(other).into()),
    }
}
