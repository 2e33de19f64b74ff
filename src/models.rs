use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Catalog & Attendee Models
// ============================================================================

/// Lifecycle of a soft-deletable record. Reads filter on this explicitly.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RecordState {
    Active,
    Deleted { at: DateTime<Utc> },
}

impl RecordState {
    pub fn from_deleted_at(deleted_at: Option<DateTime<Utc>>) -> Self {
        match deleted_at {
            Some(at) => RecordState::Deleted { at },
            None => RecordState::Active,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, RecordState::Active)
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Ticket {
    pub id: Uuid,
    pub event_id: Uuid,
    pub price: Decimal,
    /// Saleable stock; never negative
    pub quantity_remaining: i32,
    pub state: RecordState,
}

/// The paying side of a purchase, read from the user record
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Payer {
    pub user_id: Uuid,
    pub phone_number: String,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Attendee {
    pub id: Uuid,
    pub transaction_id: Uuid,
    pub user_id: Uuid,
    pub event_id: Uuid,
    pub ticket_id: Uuid,
    pub quantity: i32,
    pub state: RecordState,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// Outbound Notifications
// ============================================================================

/// Base trait for events published to the notification topic
pub trait DomainEvent {
    fn event_type(&self) -> &str;
    fn aggregate_id(&self) -> Uuid;
    fn timestamp(&self) -> DateTime<Utc>;
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct TicketPurchasedEvent {
    pub transaction_id: Uuid,
    pub attendee_id: Uuid,
    pub user_id: Uuid,
    pub event_id: Uuid,
    pub ticket_id: Uuid,
    pub quantity: i32,
    pub amount: Decimal,
    pub currency: String,
    pub timestamp: DateTime<Utc>,
}

impl DomainEvent for TicketPurchasedEvent {
    fn event_type(&self) -> &str {
        "TicketPurchased"
    }

    fn aggregate_id(&self) -> Uuid {
        self.transaction_id
    }

    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}
