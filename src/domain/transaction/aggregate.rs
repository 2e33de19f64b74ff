use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::errors::TransitionError;
use super::value_objects::{PaymentMethod, TransactionStatus};
use crate::models::Ticket;

// ============================================================================
// Transaction - lifecycle record of one purchase attempt
// ============================================================================
//
// PENDING is written once by the purchase handler. Exactly one terminal
// transition follows (SUCCESS, FAILED or CANCELLED). Re-applying the same
// terminal status is a no-op; switching between terminal statuses is refused.
//
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Uuid,
    /// Correlation id sent to the gateway and echoed in confirmations
    pub request_id: Uuid,
    pub user_id: Uuid,
    pub ticket_id: Option<Uuid>,
    pub event_id: Option<Uuid>,
    pub quantity: i32,
    pub amount: Decimal,
    pub currency: String,
    pub payment_method: PaymentMethod,
    pub status: TransactionStatus,
    pub checkout_reference: Option<String>,
    pub merchant_reference: Option<String>,
    /// Raw gateway payload, kept for audit
    pub provider_response: Option<serde_json::Value>,
    pub failure_reason: Option<String>,
    /// Set in the same write that gives the reserved stock back
    pub stock_released_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// What a terminal transition request amounts to for a given current status
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TransitionPlan {
    /// Current status is PENDING; the transition should be written
    Apply,
    /// The requested status is already in place (duplicate delivery)
    AlreadyApplied,
}

impl Transaction {
    /// New PENDING mobile-money transaction for `quantity` units of `ticket`
    pub fn pending_for_ticket(user_id: Uuid, ticket: &Ticket, quantity: i32, currency: &str) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            request_id: Uuid::new_v4(),
            user_id,
            ticket_id: Some(ticket.id),
            event_id: Some(ticket.event_id),
            quantity,
            amount: ticket.price * Decimal::from(quantity),
            currency: currency.to_string(),
            payment_method: PaymentMethod::MobileMoney,
            status: TransactionStatus::Pending,
            checkout_reference: None,
            merchant_reference: None,
            provider_response: None,
            failure_reason: None,
            stock_released_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// FAILED or CANCELLED with a reservation that has not gone back yet
    pub fn awaits_release(&self) -> bool {
        self.status.releases_stock() && self.ticket_id.is_some() && self.stock_released_at.is_none()
    }

    /// Decide how a request to move to `target` relates to the current status.
    pub fn plan_terminal(&self, target: TransactionStatus) -> Result<TransitionPlan, TransitionError> {
        match target {
            TransactionStatus::Success | TransactionStatus::Failed | TransactionStatus::Cancelled => {}
            other => return Err(TransitionError::NotASettlementStatus(other)),
        }

        match self.status {
            TransactionStatus::Pending => Ok(TransitionPlan::Apply),
            current if current == target => Ok(TransitionPlan::AlreadyApplied),
            // A reversal happens after success; a late success echo changes nothing
            TransactionStatus::Reversed if target == TransactionStatus::Success => {
                Ok(TransitionPlan::AlreadyApplied)
            }
            current => Err(TransitionError::TerminalConflict {
                transaction_id: self.id,
                current,
                requested: target,
            }),
        }
    }

    /// Apply a planned terminal transition in memory.
    pub fn settle(
        &mut self,
        target: TransactionStatus,
        provider_response: Option<serde_json::Value>,
        failure_reason: Option<String>,
    ) -> Result<TransitionPlan, TransitionError> {
        let plan = self.plan_terminal(target)?;
        if plan == TransitionPlan::Apply {
            self.status = target;
            if provider_response.is_some() {
                self.provider_response = provider_response;
            }
            self.failure_reason = failure_reason;
            self.updated_at = Utc::now();
        }
        Ok(plan)
    }
}
