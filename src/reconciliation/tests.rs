use chrono::Utc;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Barrier;
use uuid::Uuid;

use super::sweep::TIMEOUT_REASON;
use super::*;
use crate::domain::purchase::{PurchaseError, PurchaseIntentHandler, PurchaseReceipt, PurchaseRequest};
use crate::domain::transaction::Transaction;
use crate::gateway::scripted::ScriptedGateway;
use crate::messaging::recording::RecordingNotifier;
use crate::metrics::Metrics;
use crate::models::TicketPurchasedEvent;
use crate::store::memory::MemoryStore;
use crate::store::TransactionStore;

struct Harness {
    store: Arc<MemoryStore>,
    notifier: Arc<RecordingNotifier>,
    handler: PurchaseIntentHandler,
    processor: ConfirmationProcessor,
    sweep: PendingSweep,
}

impl Harness {
    fn new() -> Self {
        Self::build(RecordingNotifier::new(), ScriptedGateway::new())
    }

    fn with_notifier(notifier: RecordingNotifier) -> Self {
        Self::build(notifier, ScriptedGateway::new())
    }

    fn with_gateway(gateway: ScriptedGateway) -> Self {
        Self::build(RecordingNotifier::new(), gateway)
    }

    fn build(notifier: RecordingNotifier, gateway: ScriptedGateway) -> Self {
        let store = Arc::new(MemoryStore::new());
        let notifier = Arc::new(notifier);
        let metrics = Arc::new(Metrics::new().unwrap());

        let handler = PurchaseIntentHandler::new(
            store.clone(),
            store.clone(),
            store.clone(),
            Arc::new(gateway),
            "KES",
            metrics.clone(),
        );
        let processor =
            ConfirmationProcessor::new(store.clone(), store.clone(), store.clone(), metrics.clone(), 2)
                .with_notifier(notifier.clone())
                .with_backoff(Duration::from_millis(1), Duration::from_millis(5));
        let sweep = PendingSweep::new(
            store.clone(),
            store.clone(),
            metrics,
            chrono::Duration::seconds(300),
            100,
        );

        Self { store, notifier, handler, processor, sweep }
    }

    async fn buy(&self, ticket_id: Uuid, quantity: i32) -> Result<PurchaseReceipt, PurchaseError> {
        let payer = self.store.add_payer();
        self.handler
            .handle(PurchaseRequest { user_id: payer.user_id, ticket_id, quantity })
            .await
    }

    async fn pending(&self, ticket_id: Uuid, quantity: i32) -> Transaction {
        let receipt = self.buy(ticket_id, quantity).await.unwrap();
        self.store.transaction(receipt.transaction_id)
    }

    /// Notifications go out from a spawned task; wait for `expected` of them
    async fn published(&self, expected: usize) -> Vec<TicketPurchasedEvent> {
        for _ in 0..200 {
            let events = self.notifier.events();
            if events.len() >= expected {
                return events;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        self.notifier.events()
    }
}

fn confirmation(txn: &Transaction, success: bool, message: &str, metadata: Value) -> Vec<u8> {
    json!({
        "correlation_id": txn.request_id.to_string(),
        "success": success,
        "message": message,
        "metadata": metadata,
    })
    .to_string()
    .into_bytes()
}

fn paid(txn: &Transaction) -> Vec<u8> {
    confirmation(txn, true, "The service request is processed successfully.", json!({ "ResultCode": 0 }))
}

// ============================================================================
// Reservation
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_two_concurrent_purchases_of_three_from_five() {
    let h = Arc::new(Harness::new());
    let ticket_id = h.store.add_ticket(Decimal::new(500, 0), 5).id;
    let start = Arc::new(Barrier::new(2));

    let buyers: Vec<_> = (0..2)
        .map(|_| {
            let h = h.clone();
            let start = start.clone();
            tokio::spawn(async move {
                start.wait().await;
                h.buy(ticket_id, 3).await
            })
        })
        .collect();

    let mut results = Vec::new();
    for buyer in buyers {
        results.push(buyer.await.unwrap());
    }
    let accepted = results.iter().filter(|r| r.is_ok()).count();
    let rejected = results
        .iter()
        .filter(|r| matches!(r, Err(PurchaseError::InsufficientStock { .. })))
        .count();

    assert_eq!(accepted, 1);
    assert_eq!(rejected, 1);
    assert_eq!(h.store.remaining(ticket_id), 2);
    assert_eq!(h.store.transactions().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_stock_never_goes_negative_under_concurrent_purchases() {
    let h = Arc::new(Harness::new());
    let ticket_id = h.store.add_ticket(Decimal::new(100, 0), 25).id;

    let tasks: Vec<_> = (0..30)
        .map(|i| {
            let h = h.clone();
            let quantity = (i % 3) + 1;
            tokio::spawn(async move { h.buy(ticket_id, quantity).await.map(|_| quantity) })
        })
        .collect();

    let mut reserved = 0;
    for task in tasks {
        if let Ok(quantity) = task.await.unwrap() {
            reserved += quantity;
        }
    }

    let remaining = h.store.remaining(ticket_id);
    assert!(remaining >= 0);
    assert_eq!(remaining, 25 - reserved);
}

// ============================================================================
// Settlement
// ============================================================================

#[tokio::test]
async fn test_success_creates_one_attendee_and_keeps_stock_reserved() {
    let h = Harness::new();
    let ticket = h.store.add_ticket(Decimal::new(1000, 0), 10);
    let txn = h.pending(ticket.id, 2).await;

    let disposition = h.processor.process_delivery(&paid(&txn)).await;

    assert!(matches!(
        disposition,
        Disposition::Ack(Reconciliation::Settled {
            status: TransactionStatus::Success,
            attendee_id: Some(_),
            ..
        })
    ));
    let settled = h.store.transaction(txn.id);
    assert_eq!(settled.status, TransactionStatus::Success);
    assert!(settled.provider_response.is_some());
    assert_eq!(h.store.attendee_count(), 1);
    assert_eq!(h.store.remaining(ticket.id), 8);

    let events = h.published(1).await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].transaction_id, txn.id);
    assert_eq!(events[0].quantity, 2);
}

#[tokio::test]
async fn test_redelivered_success_is_acknowledged_without_side_effects() {
    let h = Harness::new();
    let ticket = h.store.add_ticket(Decimal::new(1000, 0), 10);
    let txn = h.pending(ticket.id, 2).await;
    let payload = paid(&txn);

    h.processor.process_delivery(&payload).await;
    h.published(1).await;
    let again = h.processor.process_delivery(&payload).await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(
        again,
        Disposition::Ack(Reconciliation::Duplicate {
            transaction_id: txn.id,
            status: TransactionStatus::Success,
        })
    );
    assert_eq!(h.store.attendee_count(), 1);
    assert_eq!(h.store.remaining(ticket.id), 8);
    assert_eq!(h.notifier.events().len(), 1);
}

#[tokio::test]
async fn test_same_confirmation_delivered_many_times_matches_single_delivery() {
    let h = Harness::new();
    let ticket = h.store.add_ticket(Decimal::new(1000, 0), 10);
    let txn = h.pending(ticket.id, 3).await;
    let payload = paid(&txn);

    h.processor.process_delivery(&payload).await;
    let once = h.store.transaction(txn.id);

    for _ in 0..5 {
        h.processor.process_delivery(&payload).await;
    }
    let many = h.store.transaction(txn.id);

    assert_eq!(many.status, once.status);
    assert_eq!(many.updated_at, once.updated_at);
    assert_eq!(h.store.attendee_count(), 1);
    assert_eq!(h.store.remaining(ticket.id), 7);
}

#[tokio::test]
async fn test_cancellation_releases_reservation_without_attendee() {
    let h = Harness::new();
    let ticket = h.store.add_ticket(Decimal::new(1000, 0), 10);
    let txn = h.pending(ticket.id, 4).await;
    assert_eq!(h.store.remaining(ticket.id), 6);

    let payload = confirmation(&txn, false, "Request cancelled by user", json!({ "ResultCode": 1032 }));
    let disposition = h.processor.process_delivery(&payload).await;

    assert!(matches!(
        disposition,
        Disposition::Ack(Reconciliation::Settled { status: TransactionStatus::Cancelled, attendee_id: None, .. })
    ));
    assert_eq!(h.store.transaction(txn.id).status, TransactionStatus::Cancelled);
    assert_eq!(h.store.remaining(ticket.id), 10);
    assert_eq!(h.store.attendee_count(), 0);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(h.notifier.events().is_empty());
}

#[tokio::test]
async fn test_failure_releases_reservation_and_records_reason() {
    let h = Harness::new();
    let ticket = h.store.add_ticket(Decimal::new(1000, 0), 10);
    let txn = h.pending(ticket.id, 1).await;

    let payload = confirmation(&txn, false, "Insufficient balance", json!({ "ResultCode": 1 }));
    h.processor.process_delivery(&payload).await;
    // A duplicate failure must not release a second time
    h.processor.process_delivery(&payload).await;

    let failed = h.store.transaction(txn.id);
    assert_eq!(failed.status, TransactionStatus::Failed);
    assert_eq!(failed.failure_reason.as_deref(), Some("Insufficient balance"));
    assert_eq!(h.store.remaining(ticket.id), 10);
}

#[tokio::test]
async fn test_confirmation_resolves_by_checkout_reference() {
    let h = Harness::new();
    let ticket = h.store.add_ticket(Decimal::new(1000, 0), 10);
    let txn = h.pending(ticket.id, 1).await;
    let checkout = txn.checkout_reference.clone().unwrap();

    let payload = json!({
        "success": true,
        "message": "",
        "metadata": { "Body": { "stkCallback": { "CheckoutRequestID": checkout, "ResultCode": 0 } } }
    })
    .to_string();
    let disposition = h.processor.process_delivery(payload.as_bytes()).await;

    assert!(matches!(disposition, Disposition::Ack(Reconciliation::Settled { .. })));
    assert_eq!(h.store.transaction(txn.id).status, TransactionStatus::Success);
}

#[tokio::test]
async fn test_notification_failure_does_not_affect_settlement() {
    let h = Harness::with_notifier(RecordingNotifier::failing());
    let ticket = h.store.add_ticket(Decimal::new(1000, 0), 10);
    let txn = h.pending(ticket.id, 1).await;

    let disposition = h.processor.process_delivery(&paid(&txn)).await;

    assert!(matches!(disposition, Disposition::Ack(Reconciliation::Settled { .. })));
    assert_eq!(h.store.attendee_count(), 1);
}

#[tokio::test]
async fn test_stalled_notifier_does_not_hold_up_settlement() {
    let h = Harness::with_notifier(RecordingNotifier::stalled());
    let ticket = h.store.add_ticket(Decimal::new(1000, 0), 10);
    let txn = h.pending(ticket.id, 1).await;

    let disposition = tokio::time::timeout(Duration::from_secs(1), h.processor.process_delivery(&paid(&txn)))
        .await
        .expect("settlement waited on the notifier");

    assert!(matches!(disposition, Disposition::Ack(Reconciliation::Settled { .. })));
    assert_eq!(h.store.attendee_count(), 1);
    assert!(h.notifier.events().is_empty());
}

#[tokio::test]
async fn test_redelivery_repairs_missing_attendee() {
    let h = Harness::new();
    let ticket = h.store.add_ticket(Decimal::new(1000, 0), 10);
    let txn = h.pending(ticket.id, 2).await;
    // Transition written, then the process died before the attendee insert
    h.store
        .transition_to_terminal(txn.id, TransactionStatus::Success, None, None)
        .await
        .unwrap();

    let disposition = h.processor.process_delivery(&paid(&txn)).await;

    assert!(matches!(disposition, Disposition::Ack(Reconciliation::Duplicate { .. })));
    assert_eq!(h.store.attendee_count(), 1);
    assert_eq!(h.store.remaining(ticket.id), 8);
}

// ============================================================================
// Lost releases
// ============================================================================

#[tokio::test]
async fn test_release_lost_during_settlement_is_redone_on_redelivery() {
    let h = Harness::new();
    let ticket = h.store.add_ticket(Decimal::new(1000, 0), 10);
    let txn = h.pending(ticket.id, 3).await;
    let payload = confirmation(&txn, false, "Insufficient balance", json!({ "ResultCode": 1 }));
    h.store.fail_releases(2);

    let first = h.processor.process_delivery(&payload).await;

    let Disposition::Park(reason) = first else {
        panic!("expected the delivery to be parked, got {first:?}");
    };
    assert_eq!(reason.kind, "store_unavailable");
    assert_eq!(reason.attempts, 2);
    assert_eq!(h.store.transaction(txn.id).status, TransactionStatus::Failed);
    assert_eq!(h.store.remaining(ticket.id), 7);

    // The parked copy never made it to the table; the broker delivers again
    let again = h.processor.process_delivery(&payload).await;

    assert_eq!(
        again,
        Disposition::Ack(Reconciliation::Duplicate {
            transaction_id: txn.id,
            status: TransactionStatus::Failed,
        })
    );
    assert_eq!(h.store.remaining(ticket.id), 10);
    assert!(h.store.transaction(txn.id).stock_released_at.is_some());

    h.processor.process_delivery(&payload).await;
    assert_eq!(h.store.remaining(ticket.id), 10);
}

#[tokio::test]
async fn test_sweep_retries_release_until_it_succeeds() {
    let h = Harness::new();
    let ticket = h.store.add_ticket(Decimal::new(1000, 0), 10);
    let txn = h.pending(ticket.id, 2).await;
    h.store.age_transaction(txn.id, chrono::Duration::seconds(301));
    // Both the expiry release and the same run's retry fail
    h.store.fail_releases(2);

    let first = h.sweep.run_once(Utc::now()).await.unwrap();

    assert_eq!(first.expired, 1);
    assert_eq!(first.released, 0);
    assert_eq!(first.recovered, 0);
    assert_eq!(h.store.remaining(ticket.id), 8);

    let second = h.sweep.run_once(Utc::now()).await.unwrap();

    assert_eq!(second, SweepReport { recovered: 1, ..SweepReport::default() });
    assert_eq!(h.store.remaining(ticket.id), 10);

    let third = h.sweep.run_once(Utc::now()).await.unwrap();
    assert_eq!(third, SweepReport::default());
    assert_eq!(h.store.remaining(ticket.id), 10);
}

#[tokio::test]
async fn test_sweep_recovers_release_lost_during_purchase_rollback() {
    let h = Harness::with_gateway(ScriptedGateway::failing());
    let ticket = h.store.add_ticket(Decimal::new(1000, 0), 10);
    h.store.fail_releases(1);

    let err = h.buy(ticket.id, 4).await.unwrap_err();

    assert!(matches!(err, PurchaseError::GatewayInitiation { .. }));
    assert_eq!(h.store.remaining(ticket.id), 6);

    let report = h.sweep.run_once(Utc::now()).await.unwrap();

    assert_eq!(report.recovered, 1);
    assert_eq!(h.store.remaining(ticket.id), 10);
}

// ============================================================================
// Expiry sweep
// ============================================================================

#[tokio::test]
async fn test_timeout_sweep_fails_and_releases_unconfirmed_purchase() {
    let h = Harness::new();
    let ticket = h.store.add_ticket(Decimal::new(1000, 0), 10);
    let txn = h.pending(ticket.id, 2).await;
    assert_eq!(h.store.remaining(ticket.id), 8);

    h.store.age_transaction(txn.id, chrono::Duration::seconds(301));
    let report = h.sweep.run_once(Utc::now()).await.unwrap();

    assert_eq!(report.expired, 1);
    assert_eq!(report.released, 1);
    let expired = h.store.transaction(txn.id);
    assert_eq!(expired.status, TransactionStatus::Failed);
    assert_eq!(expired.failure_reason.as_deref(), Some(TIMEOUT_REASON));
    assert_eq!(h.store.remaining(ticket.id), 10);
}

#[tokio::test]
async fn test_sweep_leaves_fresh_and_settled_transactions_alone() {
    let h = Harness::new();
    let ticket = h.store.add_ticket(Decimal::new(1000, 0), 10);
    let fresh = h.pending(ticket.id, 1).await;
    let settled = h.pending(ticket.id, 1).await;
    h.processor.process_delivery(&paid(&settled)).await;
    h.store.age_transaction(settled.id, chrono::Duration::seconds(600));

    let report = h.sweep.run_once(Utc::now()).await.unwrap();

    assert_eq!(report, SweepReport::default());
    assert_eq!(h.store.transaction(fresh.id).status, TransactionStatus::Pending);
    assert_eq!(h.store.transaction(settled.id).status, TransactionStatus::Success);
    assert_eq!(h.store.remaining(ticket.id), 8);
}

#[tokio::test]
async fn test_success_after_timeout_is_parked_as_conflict() {
    let h = Harness::new();
    let ticket = h.store.add_ticket(Decimal::new(1000, 0), 10);
    let txn = h.pending(ticket.id, 2).await;
    h.store.age_transaction(txn.id, chrono::Duration::seconds(301));
    h.sweep.run_once(Utc::now()).await.unwrap();

    let disposition = h.processor.process_delivery(&paid(&txn)).await;

    let Disposition::Park(reason) = disposition else {
        panic!("expected the late success to be parked, got {disposition:?}");
    };
    assert_eq!(reason.kind, "terminal_conflict");
    assert_eq!(reason.attempts, 1);
    assert_eq!(h.store.transaction(txn.id).status, TransactionStatus::Failed);
    assert_eq!(h.store.attendee_count(), 0);
    assert_eq!(h.store.remaining(ticket.id), 10);
}

// ============================================================================
// Conservation
// ============================================================================

#[tokio::test]
async fn test_stock_is_conserved_once_everything_settles() {
    let h = Harness::new();
    let initial = 20;
    let ticket = h.store.add_ticket(Decimal::new(250, 0), initial);

    let succeeded = h.pending(ticket.id, 3).await;
    let failed = h.pending(ticket.id, 2).await;
    let cancelled = h.pending(ticket.id, 4).await;
    let abandoned = h.pending(ticket.id, 1).await;
    let also_succeeded = h.pending(ticket.id, 5).await;

    h.processor.process_delivery(&paid(&succeeded)).await;
    h.processor.process_delivery(&paid(&also_succeeded)).await;
    h.processor
        .process_delivery(&confirmation(&failed, false, "Declined", json!({})))
        .await;
    h.processor
        .process_delivery(&confirmation(&cancelled, false, "", json!({ "status": "Cancelled" })))
        .await;
    h.store.age_transaction(abandoned.id, chrono::Duration::seconds(900));
    h.sweep.run_once(Utc::now()).await.unwrap();
    // Late redeliveries change nothing
    h.processor.process_delivery(&paid(&succeeded)).await;

    let transactions = h.store.transactions();
    assert!(transactions.iter().all(|t| t.is_terminal()));
    let sold: i32 = transactions
        .iter()
        .filter(|t| t.status == TransactionStatus::Success)
        .map(|t| t.quantity)
        .sum();

    assert_eq!(sold, 8);
    assert_eq!(initial, h.store.remaining(ticket.id) + sold);
    assert_eq!(h.store.attendee_count(), 2);
}

// ============================================================================
// Delivery policy
// ============================================================================

#[tokio::test]
async fn test_unknown_correlation_is_parked_without_retry() {
    let h = Harness::new();
    let payload = json!({ "correlation_id": Uuid::new_v4().to_string(), "success": true }).to_string();

    let disposition = h.processor.process_delivery(payload.as_bytes()).await;

    let Disposition::Park(reason) = disposition else {
        panic!("expected park, got {disposition:?}");
    };
    assert_eq!(reason.kind, "unknown_correlation");
    assert_eq!(reason.attempts, 1);
}

#[tokio::test]
async fn test_poison_payload_is_parked() {
    let h = Harness::new();

    let garbage = h.processor.process_delivery(b"{not json").await;
    let uncorrelated = h
        .processor
        .process_delivery(br#"{"success": true, "message": "ok"}"#)
        .await;

    assert!(matches!(garbage, Disposition::Park(ParkReason { kind: "malformed", .. })));
    assert!(matches!(uncorrelated, Disposition::Park(ParkReason { kind: "malformed", .. })));
}

#[tokio::test]
async fn test_transient_failure_is_redelivered_once_then_processed() {
    let h = Harness::new();
    let ticket = h.store.add_ticket(Decimal::new(1000, 0), 10);
    let txn = h.pending(ticket.id, 1).await;
    h.store.fail_lookups(1);

    let disposition = h.processor.process_delivery(&paid(&txn)).await;

    assert!(matches!(disposition, Disposition::Ack(Reconciliation::Settled { .. })));
    assert_eq!(h.store.transaction(txn.id).status, TransactionStatus::Success);
}

#[tokio::test]
async fn test_persistent_transient_failure_is_parked_after_second_attempt() {
    let h = Harness::new();
    let ticket = h.store.add_ticket(Decimal::new(1000, 0), 10);
    let txn = h.pending(ticket.id, 1).await;
    h.store.fail_lookups(5);

    let disposition = h.processor.process_delivery(&paid(&txn)).await;

    assert_eq!(
        disposition,
        Disposition::Park(ParkReason {
            kind: "store_unavailable",
            message: "Store unavailable: connection refused".to_string(),
            attempts: 2,
        })
    );
    assert_eq!(h.store.transaction(txn.id).status, TransactionStatus::Pending);
    assert_eq!(h.store.remaining(ticket.id), 9);
}
