use actix::prelude::*;
use anyhow::Context as _;
use rdkafka::{message::OwnedMessage, Message as _};
use std::sync::Arc;
use std::time::Duration;

use super::dlq::{DlqActor, ParkConfirmation};
use super::health_monitor::{HealthMonitorActor, UpdateHealth};
use crate::actors::core::{ComponentHealth, HealthCheckable, HealthStatus};
use crate::config::BrokerConfig;
use crate::messaging::ConfirmationSubscription;
use crate::reconciliation::{ConfirmationProcessor, Disposition};

// ============================================================================
// Confirmation Consumer Actor
// ============================================================================
//
// Owns the broker subscription for payment confirmations. Each message is
// handed to the ConfirmationProcessor; parked messages go to the DlqActor
// before the offset is committed.
//
// If the loop stops (broker error, DLQ unavailable) the actor reports itself
// unhealthy and reconnects after a delay. Reconnecting resumes from the last
// committed offset, so the message that broke the loop is seen again.
//
// ============================================================================

const COMPONENT: &str = "confirmation_consumer";
const RESTART_DELAY: Duration = Duration::from_secs(5);

pub struct ConfirmationConsumer {
    broker: BrokerConfig,
    processor: Arc<ConfirmationProcessor>,
    dlq: Addr<DlqActor>,
    health_monitor: Addr<HealthMonitorActor>,
    loop_handle: Option<SpawnHandle>,
    restarts: u32,
    status: HealthStatus,
}

impl ConfirmationConsumer {
    pub fn new(
        broker: BrokerConfig,
        processor: Arc<ConfirmationProcessor>,
        dlq: Addr<DlqActor>,
        health_monitor: Addr<HealthMonitorActor>,
    ) -> Self {
        Self {
            broker,
            processor,
            dlq,
            health_monitor,
            loop_handle: None,
            restarts: 0,
            status: HealthStatus::Degraded("starting".to_string()),
        }
    }

    fn start_loop(&mut self, ctx: &mut Context<Self>) {
        let broker = self.broker.clone();
        let processor = self.processor.clone();
        let dlq = self.dlq.clone();

        let consume = async move {
            let subscription = ConfirmationSubscription::connect(&broker)?;
            subscription
                .run(|message| {
                    let processor = processor.clone();
                    let dlq = dlq.clone();
                    async move { handle_delivery(&processor, &dlq, message).await }
                })
                .await
        };

        let handle = ctx.spawn(consume.into_actor(self).map(|result, act, ctx| {
            act.loop_handle = None;
            act.restarts += 1;

            let reason = match result {
                Ok(()) => "confirmation stream ended".to_string(),
                Err(e) => format!("{:#}", e),
            };
            tracing::error!(
                error = %reason,
                restarts = act.restarts,
                restart_in_secs = RESTART_DELAY.as_secs(),
                "Confirmation consumer loop stopped"
            );
            act.status = HealthStatus::Unhealthy(reason);
            act.report_health();

            ctx.run_later(RESTART_DELAY, |act, ctx| act.start_loop(ctx));
        }));

        self.loop_handle = Some(handle);
        self.status = HealthStatus::Healthy;
        self.report_health();
    }

    fn report_health(&self) {
        self.health_monitor.do_send(UpdateHealth(self.check_health()));
    }
}

async fn handle_delivery(
    processor: &ConfirmationProcessor,
    dlq: &Addr<DlqActor>,
    message: OwnedMessage,
) -> anyhow::Result<()> {
    let payload = message.payload().unwrap_or_default();

    match processor.process_delivery(payload).await {
        Disposition::Ack(reconciliation) => {
            tracing::debug!(offset = message.offset(), ?reconciliation, "Confirmation reconciled");
            Ok(())
        }
        Disposition::Park(reason) => {
            let parked_id = dlq
                .send(ParkConfirmation {
                    topic: message.topic().to_string(),
                    partition: message.partition(),
                    offset: message.offset(),
                    payload: String::from_utf8_lossy(payload).into_owned(),
                    kind: reason.kind,
                    error_message: reason.message,
                    attempts: reason.attempts,
                })
                .await
                .context("DLQ actor unavailable")?
                .map_err(anyhow::Error::msg)?;

            tracing::warn!(offset = message.offset(), parked_id = %parked_id, "Confirmation parked");
            Ok(())
        }
    }
}

impl HealthCheckable for ConfirmationConsumer {
    fn check_health(&self) -> ComponentHealth {
        ComponentHealth::new(COMPONENT, self.status.clone())
            .with_details(format!("topic {}, restarts {}", self.broker.confirmation_topic, self.restarts))
    }

    fn component_name(&self) -> &str {
        COMPONENT
    }
}

impl Actor for ConfirmationConsumer {
    type Context = Context<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        tracing::info!(topic = %self.broker.confirmation_topic, "ConfirmationConsumer started");
        self.start_loop(ctx);
    }

    fn stopped(&mut self, _: &mut Self::Context) {
        tracing::info!(component = self.component_name(), "ConfirmationConsumer stopped");
    }
}

/// Stop consuming; offsets of in-flight messages stay uncommitted
#[derive(Message)]
#[rtype(result = "()")]
pub struct StopConsumer;

impl Handler<StopConsumer> for ConfirmationConsumer {
    type Result = ();

    fn handle(&mut self, _: StopConsumer, ctx: &mut Self::Context) {
        tracing::info!("ConfirmationConsumer received stop signal");
        if let Some(handle) = self.loop_handle.take() {
            ctx.cancel_future(handle);
        }
        ctx.stop();
    }
}
