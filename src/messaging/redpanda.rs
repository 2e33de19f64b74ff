use anyhow::{Context, Result};
use async_trait::async_trait;
use rdkafka::{
    config::ClientConfig,
    producer::{FutureProducer, FutureRecord},
};
use std::time::Duration;

use super::PurchaseNotifier;
use crate::config::BrokerConfig;
use crate::models::{DomainEvent, TicketPurchasedEvent};
use crate::utils::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError};

pub struct RedpandaClient {
    producer: FutureProducer,
    circuit_breaker: CircuitBreaker,
    notification_topic: String,
}

impl RedpandaClient {
    pub fn new(config: &BrokerConfig) -> Result<Self> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("message.timeout.ms", "5000")
            .create()
            .context("Failed to create Redpanda producer")?;

        // Configure circuit breaker for Redpanda
        let cb_config = CircuitBreakerConfig {
            failure_threshold: 5,                // Open after 5 failures
            open_for: Duration::from_secs(30),   // Wait 30s before probing
            success_threshold: 3,                // Need 3 successes to close
        };

        Ok(Self {
            producer,
            circuit_breaker: CircuitBreaker::new("redpanda_producer", cb_config),
            notification_topic: config.notification_topic.clone(),
        })
    }

    pub async fn publish(&self, topic: &str, key: &str, payload: &str) -> Result<()> {
        // Use circuit breaker to protect against Redpanda failures
        let result = self
            .circuit_breaker
            .call(async {
                let record = FutureRecord::to(topic).key(key).payload(payload);

                self.producer
                    .send(record, rdkafka::util::Timeout::After(Duration::from_secs(5)))
                    .await
                    .map_err(|(e, _)| anyhow::anyhow!("Kafka send error: {}", e))?;

                Ok::<(), anyhow::Error>(())
            })
            .await;

        match result {
            Ok(_) => {
                tracing::info!(topic = %topic, key = %key, "Published to Redpanda");
                Ok(())
            }
            Err(CircuitBreakerError::CircuitOpen) => {
                tracing::error!(topic = %topic, "Circuit breaker open - Redpanda unavailable");
                Err(anyhow::anyhow!("Circuit breaker open for Redpanda"))
            }
            Err(CircuitBreakerError::OperationFailed(e)) => {
                tracing::error!(error = %e, topic = %topic, "Failed to publish to Redpanda");
                Err(e)
            }
        }
    }

    pub fn circuit_breaker(&self) -> CircuitBreaker {
        self.circuit_breaker.clone()
    }
}

#[async_trait]
impl PurchaseNotifier for RedpandaClient {
    async fn ticket_purchased(&self, event: &TicketPurchasedEvent) -> Result<()> {
        let envelope = serde_json::json!({
            "event_type": event.event_type(),
            "aggregate_id": event.aggregate_id(),
            "timestamp": event.timestamp(),
            "payload": event,
        });
        let payload = serde_json::to_string(&envelope)?;

        self.publish(
            &self.notification_topic,
            &event.aggregate_id().to_string(),
            &payload,
        )
        .await
    }
}
