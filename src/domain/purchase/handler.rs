use std::sync::Arc;

use super::commands::{PurchaseReceipt, PurchaseRequest};
use super::errors::PurchaseError;
use crate::domain::transaction::{Transaction, TransactionStatus};
use crate::gateway::{InitiatePayment, PaymentGateway};
use crate::metrics::Metrics;
use crate::store::{CatalogReader, InventoryLedger, ReleaseOutcome, TransactionStore};

// ============================================================================
// Purchase Intent Handler
// ============================================================================
//
// validate -> look up ticket & payer -> reserve stock -> PENDING transaction
// -> gateway initiate -> receipt
//
// The reservation and the PENDING row commit together. Stock is held until
// a FAILED or CANCELLED transition; the release stamps the transaction, so
// repeating it is harmless and the sweep retries any release that was lost.
//
// ============================================================================

pub struct PurchaseIntentHandler {
    catalog: Arc<dyn CatalogReader>,
    ledger: Arc<dyn InventoryLedger>,
    transactions: Arc<dyn TransactionStore>,
    gateway: Arc<dyn PaymentGateway>,
    currency: String,
    metrics: Arc<Metrics>,
}

impl PurchaseIntentHandler {
    pub fn new(
        catalog: Arc<dyn CatalogReader>,
        ledger: Arc<dyn InventoryLedger>,
        transactions: Arc<dyn TransactionStore>,
        gateway: Arc<dyn PaymentGateway>,
        currency: impl Into<String>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            catalog,
            ledger,
            transactions,
            gateway,
            currency: currency.into(),
            metrics,
        }
    }

    pub async fn handle(&self, request: PurchaseRequest) -> Result<PurchaseReceipt, PurchaseError> {
        let result = self.purchase(&request).await;
        self.metrics.record_purchase(outcome_label(&result));
        result
    }

    async fn purchase(&self, request: &PurchaseRequest) -> Result<PurchaseReceipt, PurchaseError> {
        if request.quantity < 1 {
            return Err(PurchaseError::Validation(format!(
                "quantity must be at least 1, got {}",
                request.quantity
            )));
        }

        let ticket = self
            .catalog
            .active_ticket(request.ticket_id)
            .await?
            .ok_or(PurchaseError::TicketNotFound(request.ticket_id))?;

        let payer = self
            .catalog
            .active_payer(request.user_id)
            .await?
            .ok_or(PurchaseError::PayerNotFound(request.user_id))?;

        // Cheap early rejection; reserve() below is the authoritative check
        if ticket.quantity_remaining < request.quantity {
            return Err(PurchaseError::InsufficientStock {
                ticket_id: ticket.id,
                requested: request.quantity,
            });
        }

        let transaction =
            Transaction::pending_for_ticket(payer.user_id, &ticket, request.quantity, &self.currency);

        let remaining = self.ledger.reserve(&transaction).await?;
        self.metrics.record_inventory_mutation("reserve");
        tracing::info!(
            transaction_id = %transaction.id,
            ticket_id = %ticket.id,
            quantity = request.quantity,
            remaining = remaining,
            "Reserved ticket stock"
        );

        let initiation = InitiatePayment {
            request_id: transaction.request_id,
            amount: transaction.amount,
            currency: transaction.currency.clone(),
            phone_number: payer.phone_number.clone(),
            account_reference: ticket.id.to_string(),
            description: format!("{} ticket(s) for event {}", request.quantity, ticket.event_id),
        };

        let ack = match self.gateway.initiate(&initiation).await {
            Ok(ack) => ack,
            Err(e) => {
                tracing::error!(
                    transaction_id = %transaction.id,
                    error = %e,
                    "Payment initiation failed, rolling back reservation"
                );
                self.roll_back(&transaction, &e.to_string()).await;
                return Err(PurchaseError::GatewayInitiation {
                    transaction_id: transaction.id,
                    source: e,
                });
            }
        };

        // The request id already correlates; missing references only cost a fallback path
        if let Err(e) = self
            .transactions
            .record_gateway_references(
                transaction.id,
                ack.checkout_reference.as_deref(),
                ack.merchant_reference.as_deref(),
            )
            .await
        {
            tracing::warn!(transaction_id = %transaction.id, error = %e, "Failed to record gateway references");
        }

        tracing::info!(
            transaction_id = %transaction.id,
            request_id = %transaction.request_id,
            amount = %transaction.amount,
            "Purchase intent accepted, awaiting payment confirmation"
        );

        Ok(PurchaseReceipt {
            transaction_id: transaction.id,
            status: TransactionStatus::Pending,
        })
    }

    /// Fail the transaction, then release its stock. If either write is lost
    /// the expiry sweep finishes the job later.
    async fn roll_back(&self, transaction: &Transaction, reason: &str) {
        let outcome = self
            .transactions
            .transition_to_terminal(
                transaction.id,
                TransactionStatus::Failed,
                None,
                Some(format!("payment initiation failed: {}", reason)),
            )
            .await;

        match outcome {
            Ok(outcome) => {
                if !outcome.was_applied() {
                    tracing::warn!(transaction_id = %transaction.id, "Transaction already settled during rollback");
                }
                self.release(transaction).await;
            }
            Err(e) => {
                tracing::error!(
                    transaction_id = %transaction.id,
                    error = %e,
                    "Could not fail transaction, leaving it to the expiry sweep"
                );
            }
        }
    }

    async fn release(&self, transaction: &Transaction) {
        match self.ledger.release(transaction.id).await {
            Ok(ReleaseOutcome::Released { ticket_id, remaining }) => {
                self.metrics.record_inventory_mutation("release");
                tracing::info!(ticket_id = %ticket_id, remaining = remaining, "Released ticket stock");
            }
            Ok(ReleaseOutcome::NothingHeld) => {}
            Err(e) => {
                tracing::error!(
                    transaction_id = %transaction.id,
                    quantity = transaction.quantity,
                    error = %e,
                    "Failed to release reservation, leaving it to the expiry sweep"
                );
            }
        }
    }
}

fn outcome_label(result: &Result<PurchaseReceipt, PurchaseError>) -> &'static str {
    match result {
        Ok(_) => "accepted",
        Err(e) => e.kind(),
    }
}
