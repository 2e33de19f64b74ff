use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;

use super::confirmation::{PaymentConfirmation, SettlementOutcome};
use super::{Disposition, ParkReason, ReconcileError, Reconciliation};
use crate::domain::transaction::{Transaction, TransactionStatus};
use crate::messaging::PurchaseNotifier;
use crate::metrics::Metrics;
use crate::models::TicketPurchasedEvent;
use crate::store::{
    AttendeeRecord, AttendeeStore, InventoryLedger, NewAttendee, ReleaseOutcome, TransactionStore,
    TransitionOutcome,
};
use crate::utils::{retry_on_transient, RetryConfig, RetryResult};

// ============================================================================
// Confirmation Processor - per-message reconciliation state machine
// ============================================================================
//
// parse -> resolve transaction -> already terminal?
//   yes: same status -> duplicate (repair attendee or release), else conflict
//   no:  transition_to_terminal
//        Applied SUCCESS          -> create attendee, notify
//        Applied FAILED/CANCELLED -> release reservation
//
// The processor holds no state of its own. Every decision is derived from
// the transaction as read from the store, which makes redelivery safe. A
// release that fails is a transient store error: the delivery is retried
// and the duplicate path releases while `stock_released_at` is unset.
//
// ============================================================================

pub struct ConfirmationProcessor {
    transactions: Arc<dyn TransactionStore>,
    ledger: Arc<dyn InventoryLedger>,
    attendees: Arc<dyn AttendeeStore>,
    notifier: Option<Arc<dyn PurchaseNotifier>>,
    metrics: Arc<Metrics>,
    redelivery: RetryConfig,
}

impl ConfirmationProcessor {
    pub fn new(
        transactions: Arc<dyn TransactionStore>,
        ledger: Arc<dyn InventoryLedger>,
        attendees: Arc<dyn AttendeeStore>,
        metrics: Arc<Metrics>,
        max_delivery_attempts: u32,
    ) -> Self {
        Self {
            transactions,
            ledger,
            attendees,
            notifier: None,
            metrics,
            redelivery: RetryConfig::redelivery(max_delivery_attempts),
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn PurchaseNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Override backoff timings; the attempt budget is kept
    pub fn with_backoff(mut self, initial: std::time::Duration, max: std::time::Duration) -> Self {
        self.redelivery.initial_delay = initial;
        self.redelivery.max_delay = max;
        self
    }

    /// Process one broker delivery under the redelivery budget and decide
    /// whether the message is acknowledged or parked.
    pub async fn process_delivery(&self, payload: &[u8]) -> Disposition {
        let started = Instant::now();
        let mut attempts = 0;

        let result = retry_on_transient(self.redelivery.clone(), |attempt| {
            attempts = attempt;
            if attempt > 1 {
                self.metrics.record_retry_attempt("confirmation", attempt);
            }
            self.process(payload)
        })
        .await;

        let elapsed = started.elapsed().as_secs_f64();

        match result {
            RetryResult::Success(reconciliation) => {
                let outcome = match &reconciliation {
                    Reconciliation::Settled { status, .. } => status.as_str().to_ascii_lowercase(),
                    Reconciliation::Duplicate { .. } => "duplicate".to_string(),
                };
                self.metrics.record_confirmation(&outcome, "ack", elapsed);
                Disposition::Ack(reconciliation)
            }
            RetryResult::Failed(error) | RetryResult::PermanentFailure(error) => {
                let kind = error.kind();
                if error.is_anomaly() {
                    self.metrics.record_anomaly(kind);
                    tracing::error!(kind = kind, error = %error, "Reconciliation anomaly, parking confirmation for manual review");
                } else {
                    tracing::error!(
                        kind = kind,
                        attempts = attempts,
                        error = %error,
                        "Confirmation still failing after redelivery, parking it"
                    );
                }
                self.metrics.record_confirmation(kind, "park", elapsed);

                Disposition::Park(ParkReason {
                    kind,
                    message: error.to_string(),
                    attempts,
                })
            }
        }
    }

    /// Reconcile a single confirmation payload (one attempt)
    pub async fn process(&self, payload: &[u8]) -> Result<Reconciliation, ReconcileError> {
        let confirmation = PaymentConfirmation::parse(payload)?;
        let transaction = self.resolve(&confirmation).await?;
        let outcome = confirmation.outcome();

        if transaction.is_terminal() {
            return self.absorb_duplicate(&transaction, &outcome).await;
        }

        let transition = self
            .transactions
            .transition_to_terminal(
                transaction.id,
                outcome.status,
                Some(confirmation.raw.clone()),
                outcome.failure_reason.clone(),
            )
            .await?;

        match transition {
            TransitionOutcome::Applied(settled) => self.apply_settlement(settled).await,
            // Another delivery got there between our read and the update
            TransitionOutcome::AlreadyTerminal(current) => self.absorb_duplicate(&current, &outcome).await,
        }
    }

    async fn resolve(&self, confirmation: &PaymentConfirmation) -> Result<Transaction, ReconcileError> {
        let candidates = confirmation.correlations();
        if candidates.is_empty() {
            return Err(ReconcileError::Malformed(
                "no correlation identifier in confirmation".to_string(),
            ));
        }

        for correlation in &candidates {
            if let Some(transaction) = self.transactions.find_by_correlation(correlation).await? {
                tracing::debug!(
                    transaction_id = %transaction.id,
                    correlation = %correlation,
                    "Resolved confirmation to transaction"
                );
                return Ok(transaction);
            }
        }

        let tried: Vec<String> = candidates.iter().map(ToString::to_string).collect();
        Err(ReconcileError::UnknownCorrelation(tried.join(", ")))
    }

    async fn absorb_duplicate(
        &self,
        transaction: &Transaction,
        outcome: &SettlementOutcome,
    ) -> Result<Reconciliation, ReconcileError> {
        transaction
            .plan_terminal(outcome.status)
            .map_err(ReconcileError::TerminalConflict)?;

        tracing::warn!(
            transaction_id = %transaction.id,
            status = %transaction.status,
            "Duplicate confirmation, transaction already settled"
        );

        // Idempotent; fills the gap if a previous delivery died after the transition
        if transaction.status == TransactionStatus::Success {
            let record = self.ensure_attendee(transaction).await?;
            if record.created {
                tracing::warn!(
                    transaction_id = %transaction.id,
                    attendee_id = %record.attendee.id,
                    "Created missing attendee for settled transaction"
                );
                self.notify(transaction, &record);
            }
        }

        // A previous delivery failed the transaction but lost the release
        if transaction.awaits_release() {
            tracing::warn!(
                transaction_id = %transaction.id,
                "Releasing reservation left behind by an earlier delivery"
            );
            self.release(transaction).await?;
        }

        Ok(Reconciliation::Duplicate {
            transaction_id: transaction.id,
            status: transaction.status,
        })
    }

    async fn apply_settlement(&self, settled: Transaction) -> Result<Reconciliation, ReconcileError> {
        tracing::info!(
            transaction_id = %settled.id,
            status = %settled.status,
            reason = ?settled.failure_reason,
            "Transaction settled"
        );

        let attendee_id = match settled.status {
            TransactionStatus::Success => {
                let record = self.ensure_attendee(&settled).await?;
                self.notify(&settled, &record);
                Some(record.attendee.id)
            }
            status if status.releases_stock() => {
                self.release(&settled).await?;
                None
            }
            _ => None,
        };

        Ok(Reconciliation::Settled {
            transaction_id: settled.id,
            status: settled.status,
            attendee_id,
        })
    }

    async fn ensure_attendee(&self, transaction: &Transaction) -> Result<AttendeeRecord, ReconcileError> {
        let (Some(ticket_id), Some(event_id)) = (transaction.ticket_id, transaction.event_id) else {
            return Err(ReconcileError::Malformed(format!(
                "transaction {} has no ticket to issue",
                transaction.id
            )));
        };

        let record = self
            .attendees
            .create_for_transaction(NewAttendee {
                transaction_id: transaction.id,
                user_id: transaction.user_id,
                event_id,
                ticket_id,
                quantity: transaction.quantity,
            })
            .await?;

        if record.created {
            tracing::info!(
                transaction_id = %transaction.id,
                attendee_id = %record.attendee.id,
                quantity = transaction.quantity,
                "Attendee created"
            );
        }

        Ok(record)
    }

    async fn release(&self, transaction: &Transaction) -> Result<(), ReconcileError> {
        match self.ledger.release(transaction.id).await? {
            ReleaseOutcome::Released { ticket_id, remaining } => {
                self.metrics.record_inventory_mutation("release");
                tracing::info!(
                    transaction_id = %transaction.id,
                    ticket_id = %ticket_id,
                    remaining = remaining,
                    "Released reservation"
                );
            }
            ReleaseOutcome::NothingHeld => {
                tracing::debug!(transaction_id = %transaction.id, "Reservation already released");
            }
        }
        Ok(())
    }

    /// Publish in the background; a slow or failing broker never holds up
    /// the delivery that created the attendee.
    fn notify(&self, transaction: &Transaction, record: &AttendeeRecord) {
        let Some(notifier) = self.notifier.clone() else {
            return;
        };

        let event = TicketPurchasedEvent {
            transaction_id: transaction.id,
            attendee_id: record.attendee.id,
            user_id: transaction.user_id,
            event_id: record.attendee.event_id,
            ticket_id: record.attendee.ticket_id,
            quantity: transaction.quantity,
            amount: transaction.amount,
            currency: transaction.currency.clone(),
            timestamp: Utc::now(),
        };

        tokio::spawn(async move {
            if let Err(e) = notifier.ticket_purchased(&event).await {
                tracing::warn!(
                    transaction_id = %event.transaction_id,
                    error = %e,
                    "Failed to publish purchase notification"
                );
            }
        });
    }
}
