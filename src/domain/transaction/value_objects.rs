use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

// ============================================================================
// Transaction Value Objects
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    Pending,
    Success,
    Failed,
    Cancelled,
    /// Only reachable from Success through the reversal flow
    Reversed,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "PENDING",
            TransactionStatus::Success => "SUCCESS",
            TransactionStatus::Failed => "FAILED",
            TransactionStatus::Cancelled => "CANCELLED",
            TransactionStatus::Reversed => "REVERSED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransactionStatus::Pending)
    }

    /// Whether a reservation held for this status has to be given back
    pub fn releases_stock(&self) -> bool {
        matches!(self, TransactionStatus::Failed | TransactionStatus::Cancelled)
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(TransactionStatus::Pending),
            "SUCCESS" => Ok(TransactionStatus::Success),
            "FAILED" => Ok(TransactionStatus::Failed),
            "CANCELLED" => Ok(TransactionStatus::Cancelled),
            "REVERSED" => Ok(TransactionStatus::Reversed),
            other => Err(format!("unknown transaction status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMethod {
    MobileMoney,
    Card,
    Bank,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::MobileMoney => "MOBILE_MONEY",
            PaymentMethod::Card => "CARD",
            PaymentMethod::Bank => "BANK",
        }
    }
}

impl FromStr for PaymentMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "MOBILE_MONEY" => Ok(PaymentMethod::MobileMoney),
            "CARD" => Ok(PaymentMethod::Card),
            "BANK" => Ok(PaymentMethod::Bank),
            other => Err(format!("unknown payment method: {}", other)),
        }
    }
}

/// Identifier echoed back by the gateway, used to find the originating transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CorrelationRef {
    /// The request id generated at purchase time
    RequestId(Uuid),
    CheckoutReference(String),
    MerchantReference(String),
}

impl fmt::Display for CorrelationRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CorrelationRef::RequestId(id) => write!(f, "request_id={}", id),
            CorrelationRef::CheckoutReference(r) => write!(f, "checkout_reference={}", r),
            CorrelationRef::MerchantReference(r) => write!(f, "merchant_reference={}", r),
        }
    }
}
