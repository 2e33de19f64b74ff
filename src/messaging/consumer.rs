use anyhow::{Context, Result};
use futures_util::StreamExt;
use rdkafka::{
    config::ClientConfig,
    consumer::{CommitMode, Consumer, StreamConsumer},
    message::OwnedMessage,
    Message,
};
use std::future::Future;

use crate::config::BrokerConfig;

/// Subscription to the payment confirmation topic with manual offset commits.
///
/// An offset is committed only after the handler returns `Ok`, i.e. once the
/// message was either reconciled or parked. If the handler fails the loop
/// stops without committing; a fresh subscription resumes from the last
/// committed offset and the message is delivered again.
pub struct ConfirmationSubscription {
    consumer: StreamConsumer,
    topic: String,
}

impl ConfirmationSubscription {
    pub fn connect(config: &BrokerConfig) -> Result<Self> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("group.id", &config.consumer_group)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "earliest")
            .set("session.timeout.ms", "6000")
            .set("enable.partition.eof", "false")
            .create()
            .context("Failed to create confirmation consumer")?;

        consumer
            .subscribe(&[config.confirmation_topic.as_str()])
            .with_context(|| format!("Failed to subscribe to {}", config.confirmation_topic))?;

        tracing::info!(
            topic = %config.confirmation_topic,
            group = %config.consumer_group,
            "Subscribed to payment confirmations (manual commit)"
        );

        Ok(Self {
            consumer,
            topic: config.confirmation_topic.clone(),
        })
    }

    /// Drive the subscription until the stream ends or `on_message` fails.
    pub async fn run<F, Fut>(&self, mut on_message: F) -> Result<()>
    where
        F: FnMut(OwnedMessage) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let mut stream = self.consumer.stream();

        while let Some(received) = stream.next().await {
            let message = match received {
                Ok(message) => message,
                Err(e) => {
                    tracing::error!(topic = %self.topic, error = %e, "Failed to receive confirmation");
                    continue;
                }
            };

            let (partition, offset) = (message.partition(), message.offset());
            tracing::debug!(partition = partition, offset = offset, "Received payment confirmation");

            on_message(message.detach()).await.with_context(|| {
                format!("Confirmation at {}/{}:{} left uncommitted", self.topic, partition, offset)
            })?;

            if let Err(e) = self.consumer.commit_message(&message, CommitMode::Async) {
                tracing::warn!(
                    partition = partition,
                    offset = offset,
                    error = %e,
                    "Failed to commit offset (message may be redelivered)"
                );
            }
        }

        Ok(())
    }
}
