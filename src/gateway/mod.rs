use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::utils::IsTransient;

// ============================================================================
// Payment Gateway Seam
// ============================================================================
//
// The purchase handler asks the gateway to start a mobile-money payment. The
// outcome arrives later as a confirmation on the broker; initiation only
// tells us the request was accepted and which identifiers the gateway uses.
//
// ============================================================================

mod http;

pub use http::HttpGateway;

#[derive(Debug, Clone, Serialize)]
pub struct InitiatePayment {
    /// Correlation id; also the idempotency key, so retries are safe
    pub request_id: Uuid,
    pub amount: Decimal,
    pub currency: String,
    pub phone_number: String,
    pub account_reference: String,
    pub description: String,
}

/// Gateway acknowledgement of an initiation request
#[derive(Debug, Clone, Default)]
pub struct InitiationAck {
    pub checkout_reference: Option<String>,
    pub merchant_reference: Option<String>,
    pub raw: Value,
}

impl InitiationAck {
    /// Accepts both snake_case and M-Pesa style identifier names
    pub fn from_response(raw: Value) -> Self {
        let pick = |keys: &[&str]| {
            keys.iter()
                .find_map(|key| raw.get(*key).and_then(Value::as_str))
                .map(str::to_string)
        };

        Self {
            checkout_reference: pick(&["checkout_reference", "CheckoutRequestID"]),
            merchant_reference: pick(&["merchant_reference", "MerchantRequestID"]),
            raw,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Gateway unreachable: {0}")]
    Transport(String),

    #[error("Gateway rejected initiation with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("Gateway circuit breaker is open")]
    CircuitOpen,

    #[error("Gateway returned an unreadable response: {0}")]
    InvalidResponse(String),
}

impl IsTransient for GatewayError {
    fn is_transient(&self) -> bool {
        match self {
            GatewayError::Transport(_) => true,
            GatewayError::Rejected { status, .. } => *status >= 500,
            GatewayError::CircuitOpen | GatewayError::InvalidResponse(_) => false,
        }
    }
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn initiate(&self, request: &InitiatePayment) -> Result<InitiationAck, GatewayError>;
}
