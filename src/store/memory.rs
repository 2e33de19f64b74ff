use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use uuid::Uuid;

use super::{
    require_settlement_status, AttendeeRecord, AttendeeStore, CatalogReader, InventoryLedger,
    NewAttendee, ReleaseOutcome, StoreError, TransactionStore, TransitionOutcome,
};
use crate::domain::transaction::{CorrelationRef, Transaction, TransactionStatus, TransitionPlan};
use crate::models::{Attendee, Payer, RecordState, Ticket};

/// In-memory implementation of every storage trait. One mutex guards all
/// state, so each trait call is atomic with respect to the others.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
    unavailable_lookups: AtomicU32,
    unavailable_releases: AtomicU32,
}

#[derive(Default)]
struct State {
    tickets: HashMap<Uuid, Ticket>,
    payers: HashMap<Uuid, Payer>,
    transactions: HashMap<Uuid, Transaction>,
    attendees: HashMap<Uuid, Attendee>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_ticket(&self, price: Decimal, quantity_remaining: i32) -> Ticket {
        let ticket = Ticket {
            id: Uuid::new_v4(),
            event_id: Uuid::new_v4(),
            price,
            quantity_remaining,
            state: RecordState::Active,
        };
        self.state.lock().unwrap().tickets.insert(ticket.id, ticket.clone());
        ticket
    }

    pub fn delete_ticket(&self, ticket_id: Uuid) {
        if let Some(ticket) = self.state.lock().unwrap().tickets.get_mut(&ticket_id) {
            ticket.state = RecordState::Deleted { at: Utc::now() };
        }
    }

    pub fn add_payer(&self) -> Payer {
        let payer = Payer {
            user_id: Uuid::new_v4(),
            phone_number: "254700000001".to_string(),
        };
        self.state.lock().unwrap().payers.insert(payer.user_id, payer.clone());
        payer
    }

    pub fn remaining(&self, ticket_id: Uuid) -> i32 {
        self.state.lock().unwrap().tickets[&ticket_id].quantity_remaining
    }

    pub fn transaction(&self, transaction_id: Uuid) -> Transaction {
        self.state.lock().unwrap().transactions[&transaction_id].clone()
    }

    pub fn transactions(&self) -> Vec<Transaction> {
        self.state.lock().unwrap().transactions.values().cloned().collect()
    }

    pub fn attendee_count(&self) -> usize {
        self.state.lock().unwrap().attendees.len()
    }

    /// Shift a transaction's creation time into the past
    pub fn age_transaction(&self, transaction_id: Uuid, by: chrono::Duration) {
        if let Some(txn) = self.state.lock().unwrap().transactions.get_mut(&transaction_id) {
            txn.created_at -= by;
        }
    }

    /// Make the next `count` correlation lookups fail as if the database were down
    pub fn fail_lookups(&self, count: u32) {
        self.unavailable_lookups.store(count, Ordering::SeqCst);
    }

    /// Make the next `count` releases fail before anything is written
    pub fn fail_releases(&self, count: u32) {
        self.unavailable_releases.store(count, Ordering::SeqCst);
    }
}

fn take_failure(counter: &AtomicU32) -> Result<(), StoreError> {
    let pending_failures = counter.load(Ordering::SeqCst);
    if pending_failures > 0 {
        counter.store(pending_failures - 1, Ordering::SeqCst);
        return Err(StoreError::Unavailable("connection refused".to_string()));
    }
    Ok(())
}

#[async_trait]
impl CatalogReader for MemoryStore {
    async fn active_ticket(&self, ticket_id: Uuid) -> Result<Option<Ticket>, StoreError> {
        let state = self.state.lock().unwrap();
        Ok(state.tickets.get(&ticket_id).filter(|t| t.state.is_active()).cloned())
    }

    async fn active_payer(&self, user_id: Uuid) -> Result<Option<Payer>, StoreError> {
        Ok(self.state.lock().unwrap().payers.get(&user_id).cloned())
    }
}

#[async_trait]
impl InventoryLedger for MemoryStore {
    async fn reserve(&self, transaction: &Transaction) -> Result<i32, StoreError> {
        let ticket_id = transaction.ticket_id.ok_or_else(|| {
            StoreError::Query(format!("transaction {} has no ticket to reserve", transaction.id))
        })?;
        let quantity = transaction.quantity;

        let mut state = self.state.lock().unwrap();
        let ticket = state
            .tickets
            .get_mut(&ticket_id)
            .filter(|t| t.state.is_active())
            .ok_or(StoreError::NotFound { entity: "ticket", id: ticket_id })?;

        if ticket.quantity_remaining < quantity {
            return Err(StoreError::InsufficientStock { ticket_id, requested: quantity });
        }
        ticket.quantity_remaining -= quantity;
        let remaining = ticket.quantity_remaining;

        state.transactions.insert(transaction.id, transaction.clone());
        Ok(remaining)
    }

    async fn release(&self, transaction_id: Uuid) -> Result<ReleaseOutcome, StoreError> {
        take_failure(&self.unavailable_releases)?;

        let mut state = self.state.lock().unwrap();
        let state = &mut *state;
        let txn = state
            .transactions
            .get_mut(&transaction_id)
            .ok_or(StoreError::NotFound { entity: "transaction", id: transaction_id })?;

        let Some(ticket_id) = txn.ticket_id.filter(|_| txn.awaits_release()) else {
            return Ok(ReleaseOutcome::NothingHeld);
        };
        let ticket = state
            .tickets
            .get_mut(&ticket_id)
            .ok_or(StoreError::NotFound { entity: "ticket", id: ticket_id })?;

        ticket.quantity_remaining += txn.quantity;
        txn.stock_released_at = Some(Utc::now());
        Ok(ReleaseOutcome::Released { ticket_id, remaining: ticket.quantity_remaining })
    }
}

#[async_trait]
impl TransactionStore for MemoryStore {
    async fn find_by_correlation(
        &self,
        correlation: &CorrelationRef,
    ) -> Result<Option<Transaction>, StoreError> {
        take_failure(&self.unavailable_lookups)?;

        let state = self.state.lock().unwrap();
        let found = state.transactions.values().find(|txn| match correlation {
            CorrelationRef::RequestId(id) => txn.request_id == *id,
            CorrelationRef::CheckoutReference(r) => txn.checkout_reference.as_deref() == Some(r.as_str()),
            CorrelationRef::MerchantReference(r) => txn.merchant_reference.as_deref() == Some(r.as_str()),
        });
        Ok(found.cloned())
    }

    async fn record_gateway_references(
        &self,
        transaction_id: Uuid,
        checkout_reference: Option<&str>,
        merchant_reference: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        let txn = state
            .transactions
            .get_mut(&transaction_id)
            .ok_or(StoreError::NotFound { entity: "transaction", id: transaction_id })?;
        if let Some(r) = checkout_reference {
            txn.checkout_reference = Some(r.to_string());
        }
        if let Some(r) = merchant_reference {
            txn.merchant_reference = Some(r.to_string());
        }
        Ok(())
    }

    async fn transition_to_terminal(
        &self,
        transaction_id: Uuid,
        target: TransactionStatus,
        provider_response: Option<serde_json::Value>,
        failure_reason: Option<String>,
    ) -> Result<TransitionOutcome, StoreError> {
        require_settlement_status(target)?;

        let mut state = self.state.lock().unwrap();
        let txn = state
            .transactions
            .get_mut(&transaction_id)
            .ok_or(StoreError::NotFound { entity: "transaction", id: transaction_id })?;

        match txn.settle(target, provider_response, failure_reason)? {
            TransitionPlan::Apply => Ok(TransitionOutcome::Applied(txn.clone())),
            TransitionPlan::AlreadyApplied => Ok(TransitionOutcome::AlreadyTerminal(txn.clone())),
        }
    }

    async fn find_stale_pending(
        &self,
        created_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Transaction>, StoreError> {
        let state = self.state.lock().unwrap();
        let mut stale: Vec<Transaction> = state
            .transactions
            .values()
            .filter(|t| t.status == TransactionStatus::Pending && t.created_at < created_before)
            .cloned()
            .collect();
        stale.sort_by_key(|t| t.created_at);
        stale.truncate(limit.max(0) as usize);
        Ok(stale)
    }

    async fn find_unreleased(&self, limit: i64) -> Result<Vec<Transaction>, StoreError> {
        let state = self.state.lock().unwrap();
        let mut unreleased: Vec<Transaction> = state
            .transactions
            .values()
            .filter(|t| t.awaits_release())
            .cloned()
            .collect();
        unreleased.sort_by_key(|t| t.updated_at);
        unreleased.truncate(limit.max(0) as usize);
        Ok(unreleased)
    }
}

#[async_trait]
impl AttendeeStore for MemoryStore {
    async fn create_for_transaction(&self, attendee: NewAttendee) -> Result<AttendeeRecord, StoreError> {
        let mut state = self.state.lock().unwrap();

        if let Some(existing) = state.attendees.get(&attendee.transaction_id) {
            return Ok(AttendeeRecord { attendee: existing.clone(), created: false });
        }

        let created = Attendee {
            id: Uuid::new_v4(),
            transaction_id: attendee.transaction_id,
            user_id: attendee.user_id,
            event_id: attendee.event_id,
            ticket_id: attendee.ticket_id,
            quantity: attendee.quantity,
            state: RecordState::Active,
            created_at: Utc::now(),
        };
        state.attendees.insert(created.transaction_id, created.clone());
        Ok(AttendeeRecord { attendee: created, created: true })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn pending(store: &MemoryStore, ticket: &Ticket, quantity: i32) -> Transaction {
        Transaction::pending_for_ticket(store.add_payer().user_id, ticket, quantity, "KES")
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_reservations_never_oversell() {
        let store = Arc::new(MemoryStore::new());
        let ticket = store.add_ticket(Decimal::new(100, 0), 10);

        let handles: Vec<_> = (0..25)
            .map(|_| {
                let store = store.clone();
                let txn = pending(&store, &ticket, 1);
                tokio::spawn(async move { store.reserve(&txn).await })
            })
            .collect();

        let mut granted = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                granted += 1;
            }
        }

        assert_eq!(granted, 10);
        assert_eq!(store.remaining(ticket.id), 0);
        assert_eq!(store.transactions().len(), 10);
    }

    #[tokio::test]
    async fn test_deleted_ticket_is_hidden_and_not_reservable() {
        let store = MemoryStore::new();
        let ticket = store.add_ticket(Decimal::new(100, 0), 5);
        store.delete_ticket(ticket.id);

        assert!(store.active_ticket(ticket.id).await.unwrap().is_none());
        assert!(matches!(
            store.reserve(&pending(&store, &ticket, 1)).await,
            Err(StoreError::NotFound { .. })
        ));
        assert!(store.transactions().is_empty());
    }

    #[tokio::test]
    async fn test_release_gives_stock_back_once() {
        let store = MemoryStore::new();
        let ticket = store.add_ticket(Decimal::new(100, 0), 10);
        let txn = pending(&store, &ticket, 3);
        store.reserve(&txn).await.unwrap();

        // Still PENDING: nothing to give back yet
        assert_eq!(store.release(txn.id).await.unwrap(), ReleaseOutcome::NothingHeld);

        store
            .transition_to_terminal(txn.id, TransactionStatus::Cancelled, None, None)
            .await
            .unwrap();
        assert_eq!(store.find_unreleased(10).await.unwrap().len(), 1);

        assert_eq!(
            store.release(txn.id).await.unwrap(),
            ReleaseOutcome::Released { ticket_id: ticket.id, remaining: 10 }
        );
        assert_eq!(store.release(txn.id).await.unwrap(), ReleaseOutcome::NothingHeld);
        assert_eq!(store.remaining(ticket.id), 10);
        assert!(store.find_unreleased(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_release_leaves_marker_unset() {
        let store = MemoryStore::new();
        let ticket = store.add_ticket(Decimal::new(100, 0), 10);
        let txn = pending(&store, &ticket, 2);
        store.reserve(&txn).await.unwrap();
        store
            .transition_to_terminal(txn.id, TransactionStatus::Failed, None, None)
            .await
            .unwrap();

        store.fail_releases(1);

        assert!(matches!(store.release(txn.id).await, Err(StoreError::Unavailable(_))));
        assert_eq!(store.remaining(ticket.id), 8);
        assert!(store.transaction(txn.id).stock_released_at.is_none());

        assert!(matches!(
            store.release(txn.id).await.unwrap(),
            ReleaseOutcome::Released { remaining: 10, .. }
        ));
    }
}
