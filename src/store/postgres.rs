use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgRow};
use sqlx::types::Json;
use sqlx::Row;
use uuid::Uuid;

use super::{
    require_settlement_status, AttendeeRecord, AttendeeStore, CatalogReader, InventoryLedger,
    NewAttendee, ReleaseOutcome, StoreError, TransactionStore, TransitionOutcome,
};
use crate::domain::transaction::{CorrelationRef, Transaction, TransactionStatus, TransitionPlan};
use crate::models::{Attendee, Payer, RecordState, Ticket};

// ============================================================================
// Postgres Store
// ============================================================================
//
// Stock is only ever changed by conditional UPDATE statements, so concurrent
// reservations on one ticket serialize on the row lock and the
// `quantity_remaining >= $n` guard is re-checked after the lock is taken.
// Terminal transitions use the same pattern with `status = 'PENDING'`.
//
// Reserve and release each run in one database transaction: the decrement
// commits with the PENDING insert, the increment with `stock_released_at`.
//
// ============================================================================

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS users (
        id UUID PRIMARY KEY,
        phone_number TEXT NOT NULL,
        deleted_at TIMESTAMPTZ
    )",
    "CREATE TABLE IF NOT EXISTS events (
        id UUID PRIMARY KEY,
        name TEXT NOT NULL,
        deleted_at TIMESTAMPTZ
    )",
    "CREATE TABLE IF NOT EXISTS tickets (
        id UUID PRIMARY KEY,
        event_id UUID NOT NULL REFERENCES events(id),
        price NUMERIC(12, 2) NOT NULL,
        quantity_remaining INTEGER NOT NULL CHECK (quantity_remaining >= 0),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        deleted_at TIMESTAMPTZ
    )",
    "CREATE TABLE IF NOT EXISTS transactions (
        id UUID PRIMARY KEY,
        request_id UUID NOT NULL UNIQUE,
        user_id UUID NOT NULL,
        ticket_id UUID,
        event_id UUID,
        quantity INTEGER NOT NULL CHECK (quantity > 0),
        amount NUMERIC(12, 2) NOT NULL,
        currency TEXT NOT NULL,
        payment_method TEXT NOT NULL,
        status TEXT NOT NULL,
        checkout_reference TEXT,
        merchant_reference TEXT,
        provider_response JSONB,
        failure_reason TEXT,
        stock_released_at TIMESTAMPTZ,
        created_at TIMESTAMPTZ NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL
    )",
    "ALTER TABLE transactions ADD COLUMN IF NOT EXISTS stock_released_at TIMESTAMPTZ",
    "CREATE INDEX IF NOT EXISTS transactions_checkout_reference_idx
        ON transactions (checkout_reference)",
    "CREATE INDEX IF NOT EXISTS transactions_merchant_reference_idx
        ON transactions (merchant_reference)",
    "CREATE INDEX IF NOT EXISTS transactions_pending_idx
        ON transactions (created_at) WHERE status = 'PENDING'",
    "CREATE INDEX IF NOT EXISTS transactions_unreleased_idx
        ON transactions (updated_at)
        WHERE status IN ('FAILED', 'CANCELLED') AND stock_released_at IS NULL",
    "CREATE TABLE IF NOT EXISTS attendees (
        id UUID PRIMARY KEY,
        transaction_id UUID NOT NULL UNIQUE REFERENCES transactions(id),
        user_id UUID NOT NULL,
        event_id UUID NOT NULL,
        ticket_id UUID NOT NULL,
        quantity INTEGER NOT NULL,
        created_at TIMESTAMPTZ NOT NULL,
        deleted_at TIMESTAMPTZ
    )",
    "CREATE TABLE IF NOT EXISTS parked_confirmations (
        id UUID PRIMARY KEY,
        topic TEXT NOT NULL,
        kafka_partition INTEGER NOT NULL,
        kafka_offset BIGINT NOT NULL,
        payload TEXT NOT NULL,
        error_kind TEXT NOT NULL,
        error_message TEXT NOT NULL,
        attempts INTEGER NOT NULL,
        parked_at TIMESTAMPTZ NOT NULL
    )",
];

const TRANSACTION_COLUMNS: &str = "id, request_id, user_id, ticket_id, event_id, quantity, amount, \
     currency, payment_method, status, checkout_reference, merchant_reference, \
     provider_response, failure_reason, stock_released_at, created_at, updated_at";

const ATTENDEE_COLUMNS: &str =
    "id, transaction_id, user_id, event_id, ticket_id, quantity, created_at, deleted_at";

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::WorkerCrashed => StoreError::Unavailable(e.to_string()),
            other => StoreError::Query(other.to_string()),
        }
    }
}

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create tables and indexes that do not exist yet
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        for statement in SCHEMA {
            sqlx::query(*statement).execute(&self.pool).await?;
        }
        tracing::info!(statements = SCHEMA.len(), "Database schema ensured");
        Ok(())
    }

    async fn transaction_by_id(&self, transaction_id: Uuid) -> Result<Option<Transaction>, StoreError> {
        let sql = format!("SELECT {} FROM transactions WHERE id = $1", TRANSACTION_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(transaction_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(transaction_from_row).transpose()
    }
}

fn transaction_from_row(row: &PgRow) -> Result<Transaction, StoreError> {
    let status: String = row.try_get("status")?;
    let payment_method: String = row.try_get("payment_method")?;
    let provider_response: Option<Json<serde_json::Value>> = row.try_get("provider_response")?;

    Ok(Transaction {
        id: row.try_get("id")?,
        request_id: row.try_get("request_id")?,
        user_id: row.try_get("user_id")?,
        ticket_id: row.try_get("ticket_id")?,
        event_id: row.try_get("event_id")?,
        quantity: row.try_get("quantity")?,
        amount: row.try_get("amount")?,
        currency: row.try_get("currency")?,
        payment_method: payment_method.parse().map_err(StoreError::Query)?,
        status: status.parse().map_err(StoreError::Query)?,
        checkout_reference: row.try_get("checkout_reference")?,
        merchant_reference: row.try_get("merchant_reference")?,
        provider_response: provider_response.map(|json| json.0),
        failure_reason: row.try_get("failure_reason")?,
        stock_released_at: row.try_get("stock_released_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn attendee_from_row(row: &PgRow) -> Result<Attendee, StoreError> {
    let deleted_at: Option<DateTime<Utc>> = row.try_get("deleted_at")?;
    Ok(Attendee {
        id: row.try_get("id")?,
        transaction_id: row.try_get("transaction_id")?,
        user_id: row.try_get("user_id")?,
        event_id: row.try_get("event_id")?,
        ticket_id: row.try_get("ticket_id")?,
        quantity: row.try_get("quantity")?,
        state: RecordState::from_deleted_at(deleted_at),
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl CatalogReader for PgStore {
    async fn active_ticket(&self, ticket_id: Uuid) -> Result<Option<Ticket>, StoreError> {
        let row = sqlx::query(
            "SELECT t.id, t.event_id, t.price, t.quantity_remaining
             FROM tickets t
             JOIN events e ON e.id = t.event_id
             WHERE t.id = $1 AND t.deleted_at IS NULL AND e.deleted_at IS NULL",
        )
        .bind(ticket_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| -> Result<Ticket, StoreError> {
            Ok(Ticket {
                id: row.try_get("id")?,
                event_id: row.try_get("event_id")?,
                price: row.try_get("price")?,
                quantity_remaining: row.try_get("quantity_remaining")?,
                state: RecordState::Active,
            })
        })
        .transpose()
    }

    async fn active_payer(&self, user_id: Uuid) -> Result<Option<Payer>, StoreError> {
        let row: Option<(Uuid, String)> = sqlx::query_as(
            "SELECT id, phone_number FROM users WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(user_id, phone_number)| Payer { user_id, phone_number }))
    }
}

#[async_trait]
impl InventoryLedger for PgStore {
    async fn reserve(&self, transaction: &Transaction) -> Result<i32, StoreError> {
        let ticket_id = transaction.ticket_id.ok_or_else(|| {
            StoreError::Query(format!("transaction {} has no ticket to reserve", transaction.id))
        })?;
        let quantity = transaction.quantity;

        // Dropping `tx` without commit rolls the decrement back
        let mut tx = self.pool.begin().await?;

        let remaining: Option<(i32,)> = sqlx::query_as(
            "UPDATE tickets
             SET quantity_remaining = quantity_remaining - $2, updated_at = NOW()
             WHERE id = $1 AND deleted_at IS NULL AND quantity_remaining >= $2
             RETURNING quantity_remaining",
        )
        .bind(ticket_id)
        .bind(quantity)
        .fetch_optional(&mut *tx)
        .await?;

        let Some((remaining,)) = remaining else {
            let (exists,): (bool,) = sqlx::query_as(
                "SELECT EXISTS(SELECT 1 FROM tickets WHERE id = $1 AND deleted_at IS NULL)",
            )
            .bind(ticket_id)
            .fetch_one(&mut *tx)
            .await?;

            return Err(if exists {
                StoreError::InsufficientStock { ticket_id, requested: quantity }
            } else {
                StoreError::NotFound { entity: "ticket", id: ticket_id }
            });
        };

        sqlx::query(
            "INSERT INTO transactions (
                id, request_id, user_id, ticket_id, event_id, quantity, amount, currency,
                payment_method, status, checkout_reference, merchant_reference,
                provider_response, failure_reason, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)",
        )
        .bind(transaction.id)
        .bind(transaction.request_id)
        .bind(transaction.user_id)
        .bind(transaction.ticket_id)
        .bind(transaction.event_id)
        .bind(transaction.quantity)
        .bind(transaction.amount)
        .bind(&transaction.currency)
        .bind(transaction.payment_method.as_str())
        .bind(transaction.status.as_str())
        .bind(&transaction.checkout_reference)
        .bind(&transaction.merchant_reference)
        .bind(transaction.provider_response.clone().map(Json))
        .bind(&transaction.failure_reason)
        .bind(transaction.created_at)
        .bind(transaction.updated_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::debug!(
            transaction_id = %transaction.id,
            ticket_id = %ticket_id,
            quantity,
            remaining,
            "Reserved stock"
        );
        Ok(remaining)
    }

    async fn release(&self, transaction_id: Uuid) -> Result<ReleaseOutcome, StoreError> {
        let mut tx = self.pool.begin().await?;

        let claimed: Option<(Option<Uuid>, i32)> = sqlx::query_as(
            "UPDATE transactions
             SET stock_released_at = NOW()
             WHERE id = $1
               AND status IN ('FAILED', 'CANCELLED')
               AND ticket_id IS NOT NULL
               AND stock_released_at IS NULL
             RETURNING ticket_id, quantity",
        )
        .bind(transaction_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some((Some(ticket_id), quantity)) = claimed else {
            return Ok(ReleaseOutcome::NothingHeld);
        };

        // Soft-deleted tickets still get their stock back
        let remaining: Option<(i32,)> = sqlx::query_as(
            "UPDATE tickets
             SET quantity_remaining = quantity_remaining + $2, updated_at = NOW()
             WHERE id = $1
             RETURNING quantity_remaining",
        )
        .bind(ticket_id)
        .bind(quantity)
        .fetch_optional(&mut *tx)
        .await?;

        let Some((remaining,)) = remaining else {
            return Err(StoreError::NotFound { entity: "ticket", id: ticket_id });
        };

        tx.commit().await?;

        tracing::debug!(
            transaction_id = %transaction_id,
            ticket_id = %ticket_id,
            quantity,
            remaining,
            "Released stock"
        );
        Ok(ReleaseOutcome::Released { ticket_id, remaining })
    }
}

#[async_trait]
impl TransactionStore for PgStore {
    async fn find_by_correlation(
        &self,
        correlation: &CorrelationRef,
    ) -> Result<Option<Transaction>, StoreError> {
        let select_by = |column: &str| {
            format!("SELECT {} FROM transactions WHERE {} = $1 LIMIT 1", TRANSACTION_COLUMNS, column)
        };

        let row = match correlation {
            CorrelationRef::RequestId(request_id) => {
                let sql = select_by("request_id");
                sqlx::query(&sql).bind(*request_id).fetch_optional(&self.pool).await?
            }
            CorrelationRef::CheckoutReference(reference) => {
                let sql = select_by("checkout_reference");
                sqlx::query(&sql).bind(reference.as_str()).fetch_optional(&self.pool).await?
            }
            CorrelationRef::MerchantReference(reference) => {
                let sql = select_by("merchant_reference");
                sqlx::query(&sql).bind(reference.as_str()).fetch_optional(&self.pool).await?
            }
        };

        row.as_ref().map(transaction_from_row).transpose()
    }

    async fn record_gateway_references(
        &self,
        transaction_id: Uuid,
        checkout_reference: Option<&str>,
        merchant_reference: Option<&str>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE transactions
             SET checkout_reference = COALESCE($2, checkout_reference),
                 merchant_reference = COALESCE($3, merchant_reference),
                 updated_at = NOW()
             WHERE id = $1",
        )
        .bind(transaction_id)
        .bind(checkout_reference)
        .bind(merchant_reference)
        .execute(&self.pool)
        .await?;

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

        let sql = format!(
            "UPDATE transactions
             SET status = $2,
                 provider_response = COALESCE($3, provider_response),
                 failure_reason = $4,
                 updated_at = NOW()
             WHERE id = $1 AND status = 'PENDING'
             RETURNING {}",
            TRANSACTION_COLUMNS
        );

        let updated = sqlx::query(&sql)
            .bind(transaction_id)
            .bind(target.as_str())
            .bind(provider_response.map(Json))
            .bind(failure_reason)
            .fetch_optional(&self.pool)
            .await?;

        if let Some(row) = updated {
            return Ok(TransitionOutcome::Applied(transaction_from_row(&row)?));
        }

        let current = self
            .transaction_by_id(transaction_id)
            .await?
            .ok_or(StoreError::NotFound { entity: "transaction", id: transaction_id })?;

        match current.plan_terminal(target)? {
            TransitionPlan::AlreadyApplied => Ok(TransitionOutcome::AlreadyTerminal(current)),
            TransitionPlan::Apply => Err(StoreError::Query(format!(
                "transaction {} still pending after conditional update",
                transaction_id
            ))),
        }
    }

    async fn find_stale_pending(
        &self,
        created_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Transaction>, StoreError> {
        let sql = format!(
            "SELECT {} FROM transactions
             WHERE status = 'PENDING' AND created_at < $1
             ORDER BY created_at ASC
             LIMIT $2",
            TRANSACTION_COLUMNS
        );

        let rows = sqlx::query(&sql)
            .bind(created_before)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(transaction_from_row).collect()
    }

    async fn find_unreleased(&self, limit: i64) -> Result<Vec<Transaction>, StoreError> {
        let sql = format!(
            "SELECT {} FROM transactions
             WHERE status IN ('FAILED', 'CANCELLED')
               AND ticket_id IS NOT NULL
               AND stock_released_at IS NULL
             ORDER BY updated_at ASC
             LIMIT $1",
            TRANSACTION_COLUMNS
        );

        let rows = sqlx::query(&sql).bind(limit).fetch_all(&self.pool).await?;

        rows.iter().map(transaction_from_row).collect()
    }
}

#[async_trait]
impl AttendeeStore for PgStore {
    async fn create_for_transaction(&self, attendee: NewAttendee) -> Result<AttendeeRecord, StoreError> {
        let insert = format!(
            "INSERT INTO attendees (id, transaction_id, user_id, event_id, ticket_id, quantity, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, NOW())
             ON CONFLICT (transaction_id) DO NOTHING
             RETURNING {}",
            ATTENDEE_COLUMNS
        );

        let inserted = sqlx::query(&insert)
            .bind(Uuid::new_v4())
            .bind(attendee.transaction_id)
            .bind(attendee.user_id)
            .bind(attendee.event_id)
            .bind(attendee.ticket_id)
            .bind(attendee.quantity)
            .fetch_optional(&self.pool)
            .await?;

        if let Some(row) = inserted {
            return Ok(AttendeeRecord { attendee: attendee_from_row(&row)?, created: true });
        }

        let existing = format!("SELECT {} FROM attendees WHERE transaction_id = $1", ATTENDEE_COLUMNS);
        let row = sqlx::query(&existing)
            .bind(attendee.transaction_id)
            .fetch_one(&self.pool)
            .await?;

        Ok(AttendeeRecord { attendee: attendee_from_row(&row)?, created: false })
    }
}
