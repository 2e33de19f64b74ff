use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use super::ReconcileError;
use crate::domain::transaction::{CorrelationRef, TransactionStatus};

/// Result code the gateway uses when the payer dismisses the payment prompt
const RESULT_CODE_CANCELLED_BY_USER: i64 = 1032;

/// Inbound gateway callback as published on the confirmation topic.
///
/// ```json
/// { "correlation_id": "<request uuid>", "success": false, "message": "...",
///   "metadata": { "CheckoutRequestID": "...", "ResultCode": 1032 } }
/// ```
///
/// Metadata may also be the raw M-Pesa callback (`Body.stkCallback.*`).
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentConfirmation {
    #[serde(default)]
    pub correlation_id: Option<String>,
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub metadata: Value,
    /// Whole envelope as received, stored for audit
    #[serde(skip)]
    pub raw: Value,
}

/// Terminal status a confirmation asks for
#[derive(Debug, Clone, PartialEq)]
pub struct SettlementOutcome {
    pub status: TransactionStatus,
    pub failure_reason: Option<String>,
}

impl PaymentConfirmation {
    pub fn parse(payload: &[u8]) -> Result<Self, ReconcileError> {
        let raw: Value = serde_json::from_slice(payload)
            .map_err(|e| ReconcileError::Malformed(format!("not JSON: {}", e)))?;

        let mut confirmation: PaymentConfirmation = serde_json::from_value(raw.clone())
            .map_err(|e| ReconcileError::Malformed(e.to_string()))?;
        confirmation.raw = raw;

        Ok(confirmation)
    }

    /// Look a key up in the metadata, then in a nested `Body.stkCallback`
    pub fn metadata_field(&self, key: &str) -> Option<&Value> {
        self.metadata.get(key).or_else(|| {
            self.metadata
                .get("Body")
                .and_then(|body| body.get("stkCallback"))
                .and_then(|callback| callback.get(key))
        })
    }

    fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata_field(key)
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
    }

    fn result_code(&self) -> Option<i64> {
        match self.metadata_field("ResultCode")? {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Candidate correlation identifiers, most specific first
    pub fn correlations(&self) -> Vec<CorrelationRef> {
        let mut candidates = Vec::with_capacity(3);

        if let Some(id) = self.correlation_id.as_deref() {
            match Uuid::parse_str(id.trim()) {
                Ok(request_id) => candidates.push(CorrelationRef::RequestId(request_id)),
                Err(_) => tracing::debug!(correlation_id = %id, "correlation_id is not a request id"),
            }
        }
        if let Some(checkout) = self.metadata_str("CheckoutRequestID") {
            candidates.push(CorrelationRef::CheckoutReference(checkout.to_string()));
        }
        if let Some(merchant) = self.metadata_str("MerchantRequestID") {
            candidates.push(CorrelationRef::MerchantReference(merchant.to_string()));
        }

        candidates
    }

    fn is_cancellation(&self) -> bool {
        self.result_code() == Some(RESULT_CODE_CANCELLED_BY_USER)
            || self
                .metadata_str("status")
                .is_some_and(|status| status.eq_ignore_ascii_case("cancelled"))
    }

    fn reason(&self) -> Option<String> {
        self.message
            .as_deref()
            .filter(|m| !m.trim().is_empty())
            .or_else(|| self.metadata_str("ResultDesc"))
            .map(str::to_string)
    }

    /// Map the callback onto a terminal status
    pub fn outcome(&self) -> SettlementOutcome {
        if self.success {
            return SettlementOutcome {
                status: TransactionStatus::Success,
                failure_reason: None,
            };
        }

        let status = if self.is_cancellation() {
            TransactionStatus::Cancelled
        } else {
            TransactionStatus::Failed
        };

        SettlementOutcome {
            status,
            failure_reason: Some(self.reason().unwrap_or_else(|| "payment failed".to_string())),
        }
    }
}
