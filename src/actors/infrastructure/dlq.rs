use actix::prelude::*;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::metrics::Metrics;

// ============================================================================
// Dead Letter Queue Actor - parked payment confirmations
// ============================================================================
//
// Confirmations that cannot be reconciled automatically (anomalies, poison
// payloads, transient failures that outlived the redelivery budget) are
// stored in `parked_confirmations` for manual reconciliation. The consumer
// commits the broker offset only after the insert succeeded.
//
// ============================================================================

pub struct DlqActor {
    pool: PgPool,
    metrics: Arc<Metrics>,
}

impl DlqActor {
    pub fn new(pool: PgPool, metrics: Arc<Metrics>) -> Self {
        Self { pool, metrics }
    }
}

impl Actor for DlqActor {
    type Context = Context<Self>;

    fn started(&mut self, _ctx: &mut Self::Context) {
        tracing::info!("DlqActor started - parked confirmations ready");
    }
}

// ============================================================================
// Messages
// ============================================================================

#[derive(Message, Debug, Clone)]
#[rtype(result = "Result<Uuid, String>")]
pub struct ParkConfirmation {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub payload: String,
    pub kind: &'static str,
    pub error_message: String,
    pub attempts: u32,
}

#[derive(Message)]
#[rtype(result = "Result<Vec<ParkedConfirmation>, String>")]
pub struct GetParkedConfirmations {
    pub limit: i64,
}

#[derive(Message)]
#[rtype(result = "Result<DlqStats, String>")]
pub struct GetDlqStats;

#[derive(Debug, Clone, Serialize)]
pub struct ParkedConfirmation {
    pub id: Uuid,
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub payload: String,
    pub kind: String,
    pub error_message: String,
    pub attempts: i32,
    pub parked_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DlqStats {
    pub total_messages: i64,
    pub by_kind: HashMap<String, i64>,
}

// ============================================================================
// Handlers
// ============================================================================

impl Handler<ParkConfirmation> for DlqActor {
    type Result = ResponseFuture<Result<Uuid, String>>;

    fn handle(&mut self, msg: ParkConfirmation, _: &mut Self::Context) -> Self::Result {
        let pool = self.pool.clone();
        let metrics = self.metrics.clone();
        let id = Uuid::now_v7();

        tracing::error!(
            parked_id = %id,
            kind = msg.kind,
            partition = msg.partition,
            offset = msg.offset,
            attempts = msg.attempts,
            error = %msg.error_message,
            "💀 Parking payment confirmation for manual reconciliation"
        );

        Box::pin(async move {
            sqlx::query(
                "INSERT INTO parked_confirmations (
                    id, topic, kafka_partition, kafka_offset, payload,
                    error_kind, error_message, attempts, parked_at
                ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
            )
            .bind(id)
            .bind(&msg.topic)
            .bind(msg.partition)
            .bind(msg.offset)
            .bind(&msg.payload)
            .bind(msg.kind)
            .bind(&msg.error_message)
            .bind(msg.attempts as i32)
            .bind(Utc::now())
            .execute(&pool)
            .await
            .map_err(|e| format!("Failed to park confirmation: {}", e))?;

            metrics.record_parked(msg.kind);
            tracing::info!(parked_id = %id, "Confirmation stored in parked_confirmations");

            Ok(id)
        })
    }
}

impl Handler<GetParkedConfirmations> for DlqActor {
    type Result = ResponseFuture<Result<Vec<ParkedConfirmation>, String>>;

    fn handle(&mut self, msg: GetParkedConfirmations, _: &mut Self::Context) -> Self::Result {
        let pool = self.pool.clone();

        Box::pin(async move {
            let rows = sqlx::query(
                "SELECT id, topic, kafka_partition, kafka_offset, payload,
                        error_kind, error_message, attempts, parked_at
                 FROM parked_confirmations
                 ORDER BY parked_at DESC
                 LIMIT $1",
            )
            .bind(msg.limit)
            .fetch_all(&pool)
            .await
            .map_err(|e| format!("Failed to query parked confirmations: {}", e))?;

            rows.iter()
                .map(|row| -> Result<ParkedConfirmation, sqlx::Error> {
                    Ok(ParkedConfirmation {
                        id: row.try_get("id")?,
                        topic: row.try_get("topic")?,
                        partition: row.try_get("kafka_partition")?,
                        offset: row.try_get("kafka_offset")?,
                        payload: row.try_get("payload")?,
                        kind: row.try_get("error_kind")?,
                        error_message: row.try_get("error_message")?,
                        attempts: row.try_get("attempts")?,
                        parked_at: row.try_get("parked_at")?,
                    })
                })
                .collect::<Result<Vec<_>, sqlx::Error>>()
                .map_err(|e| format!("Failed to parse parked confirmation: {}", e))
        })
    }
}

impl Handler<GetDlqStats> for DlqActor {
    type Result = ResponseFuture<Result<DlqStats, String>>;

    fn handle(&mut self, _msg: GetDlqStats, _: &mut Self::Context) -> Self::Result {
        let pool = self.pool.clone();

        Box::pin(async move {
            let rows = sqlx::query(
                "SELECT error_kind, COUNT(*) AS parked FROM parked_confirmations GROUP BY error_kind",
            )
            .fetch_all(&pool)
            .await
            .map_err(|e| format!("Failed to count parked confirmations: {}", e))?;

            let mut stats = DlqStats::default();
            for row in rows {
                let kind: String = row.try_get("error_kind").map_err(|e| e.to_string())?;
                let parked: i64 = row.try_get("parked").map_err(|e| e.to_string())?;
                stats.total_messages += parked;
                stats.by_kind.insert(kind, parked);
            }

            Ok(stats)
        })
    }
}
