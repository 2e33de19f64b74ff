use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::domain::transaction::{Transaction, TransactionStatus};
use crate::metrics::Metrics;
use crate::store::{InventoryLedger, ReleaseOutcome, StoreError, TransactionStore, TransitionOutcome};

pub const TIMEOUT_REASON: &str = "payment confirmation timed out";

/// Fails PENDING transactions whose confirmation never arrived and gives
/// their stock back. A confirmation that settled the transaction first wins.
/// Each run also retries releases that were lost after a FAILED/CANCELLED
/// transition, found through the unset `stock_released_at` marker.
pub struct PendingSweep {
    transactions: Arc<dyn TransactionStore>,
    ledger: Arc<dyn InventoryLedger>,
    metrics: Arc<Metrics>,
    pending_timeout: chrono::Duration,
    batch_size: i64,
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct SweepReport {
    pub examined: usize,
    pub expired: usize,
    pub released: usize,
    /// Settled by someone else while the sweep ran, or failed to update
    pub skipped: usize,
    /// Earlier FAILED/CANCELLED transactions whose lost release this run redid
    pub recovered: usize,
}

impl PendingSweep {
    pub fn new(
        transactions: Arc<dyn TransactionStore>,
        ledger: Arc<dyn InventoryLedger>,
        metrics: Arc<Metrics>,
        pending_timeout: chrono::Duration,
        batch_size: i64,
    ) -> Self {
        Self {
            transactions,
            ledger,
            metrics,
            pending_timeout,
            batch_size,
        }
    }

    pub async fn run_once(&self, now: DateTime<Utc>) -> Result<SweepReport, StoreError> {
        let cutoff = now - self.pending_timeout;
        let stale = self
            .transactions
            .find_stale_pending(cutoff, self.batch_size)
            .await?;

        let mut report = SweepReport {
            examined: stale.len(),
            ..SweepReport::default()
        };

        for transaction in stale {
            let outcome = self
                .transactions
                .transition_to_terminal(
                    transaction.id,
                    TransactionStatus::Failed,
                    None,
                    Some(TIMEOUT_REASON.to_string()),
                )
                .await;

            let expired = match outcome {
                Ok(TransitionOutcome::Applied(expired)) => expired,
                Ok(TransitionOutcome::AlreadyTerminal(_)) | Err(StoreError::Transition(_)) => {
                    tracing::debug!(transaction_id = %transaction.id, "Transaction settled before expiry");
                    report.skipped += 1;
                    continue;
                }
                Err(e) => {
                    tracing::warn!(transaction_id = %transaction.id, error = %e, "Failed to expire transaction");
                    report.skipped += 1;
                    continue;
                }
            };

            report.expired += 1;
            tracing::warn!(
                transaction_id = %expired.id,
                created_at = %expired.created_at,
                "Pending transaction expired without confirmation"
            );

            if self.release(&expired).await {
                report.released += 1;
            }
        }

        let unreleased = match self.transactions.find_unreleased(self.batch_size).await {
            Ok(unreleased) => unreleased,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to look up unreleased reservations");
                Vec::new()
            }
        };
        for transaction in unreleased {
            if self.release(&transaction).await {
                report.recovered += 1;
                tracing::warn!(
                    transaction_id = %transaction.id,
                    status = %transaction.status,
                    "Recovered reservation from an earlier failed release"
                );
            }
        }

        self.metrics.record_expired(report.expired as u64);
        if report != SweepReport::default() {
            tracing::info!(
                examined = report.examined,
                expired = report.expired,
                released = report.released,
                skipped = report.skipped,
                recovered = report.recovered,
                "Pending sweep finished"
            );
        }

        Ok(report)
    }

    /// True when this call gave stock back. A failure leaves the marker
    /// unset, so the next run picks the transaction up again.
    async fn release(&self, transaction: &Transaction) -> bool {
        match self.ledger.release(transaction.id).await {
            Ok(ReleaseOutcome::Released { ticket_id, remaining }) => {
                self.metrics.record_inventory_mutation("release");
                tracing::info!(ticket_id = %ticket_id, remaining = remaining, "Released reservation");
                true
            }
            Ok(ReleaseOutcome::NothingHeld) => false,
            Err(e) => {
                tracing::error!(
                    transaction_id = %transaction.id,
                    quantity = transaction.quantity,
                    error = %e,
                    "Failed to release reservation, retrying on the next sweep"
                );
                false
            }
        }
    }
}
