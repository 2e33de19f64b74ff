use actix::prelude::*;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;

use super::confirmation_consumer::{ConfirmationConsumer, StopConsumer};
use super::{
    DlqActor, GetSystemHealth, HealthMonitorActor, PendingSweeper, SweepNow,
};
use crate::actors::core::HealthStatus;
use crate::config::BrokerConfig;
use crate::metrics::Metrics;
use crate::reconciliation::{ConfirmationProcessor, PendingSweep};
use crate::utils::CircuitBreaker;

// ============================================================================
// Coordinator Actor - Orchestrates all system actors
// ============================================================================
//
// Responsibilities:
// - Starts the child actors and hands their addresses to the HTTP layer
// - Logs aggregate system health periodically
// - Coordinates graceful shutdown
//
// Actor Hierarchy:
//   CoordinatorActor
//   ├── HealthMonitorActor
//   ├── DlqActor
//   ├── ConfirmationConsumer
//   └── PendingSweeper
//
// ============================================================================

const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(30);

/// Everything the child actors need, built in main
pub struct Services {
    pub pool: PgPool,
    pub broker: BrokerConfig,
    pub processor: Arc<ConfirmationProcessor>,
    pub sweep: Arc<PendingSweep>,
    pub sweep_interval: Duration,
    pub metrics: Arc<Metrics>,
    /// Breakers checked by the health monitor
    pub breakers: Vec<CircuitBreaker>,
}

/// Child addresses the HTTP layer talks to
#[derive(Clone)]
pub struct ServiceHandles {
    pub health_monitor: Addr<HealthMonitorActor>,
    pub dlq: Addr<DlqActor>,
}

pub struct CoordinatorActor {
    services: Services,
    handles: Option<ServiceHandles>,
    consumer: Option<Addr<ConfirmationConsumer>>,
    sweeper: Option<Addr<PendingSweeper>>,
}

impl CoordinatorActor {
    pub fn new(services: Services) -> Self {
        Self {
            services,
            handles: None,
            consumer: None,
            sweeper: None,
        }
    }

    fn start_child_actors(&mut self, _ctx: &mut Context<Self>) {
        tracing::info!("Starting child actors");

        let health_monitor = HealthMonitorActor::new(
            self.services.breakers.clone(),
            self.services.metrics.clone(),
        )
        .start();

        let dlq = DlqActor::new(self.services.pool.clone(), self.services.metrics.clone()).start();

        let consumer = ConfirmationConsumer::new(
            self.services.broker.clone(),
            self.services.processor.clone(),
            dlq.clone(),
            health_monitor.clone(),
        )
        .start();

        let sweeper = PendingSweeper::new(
            self.services.sweep.clone(),
            self.services.sweep_interval,
            health_monitor.clone(),
        )
        .start();
        // Catch up on anything left PENDING by a previous run
        sweeper.do_send(SweepNow);

        self.handles = Some(ServiceHandles { health_monitor, dlq });
        self.consumer = Some(consumer);
        self.sweeper = Some(sweeper);

        tracing::info!("✅ All child actors started");
    }
}

impl Actor for CoordinatorActor {
    type Context = Context<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        tracing::info!("🎯 CoordinatorActor started - ticket settlement");
        self.start_child_actors(ctx);

        // Schedule periodic health checks
        ctx.run_interval(HEALTH_LOG_INTERVAL, |act, _ctx| {
            if let Some(handles) = &act.handles {
                let health_monitor = handles.health_monitor.clone();
                actix::spawn(async move {
                    match health_monitor.send(GetSystemHealth).await {
                        Ok(health) => match health.overall_status {
                            HealthStatus::Healthy => {
                                tracing::debug!("System health check: Healthy");
                            }
                            HealthStatus::Degraded(ref msg) => {
                                tracing::warn!("System health check: Degraded - {}", msg);
                            }
                            HealthStatus::Unhealthy(ref msg) => {
                                tracing::error!("System health check: Unhealthy - {}", msg);
                            }
                        },
                        Err(e) => {
                            tracing::error!("Failed to get system health: {}", e);
                        }
                    }
                });
            }
        });
    }

    fn stopping(&mut self, _: &mut Self::Context) -> Running {
        tracing::info!("🛑 CoordinatorActor stopping - initiating graceful shutdown");
        Running::Stop
    }

    fn stopped(&mut self, _: &mut Self::Context) {
        tracing::info!("🛑 CoordinatorActor stopped");
    }
}

// ============================================================================
// Messages
// ============================================================================

#[derive(Message)]
#[rtype(result = "Option<ServiceHandles>")]
pub struct GetHandles;

impl Handler<GetHandles> for CoordinatorActor {
    type Result = Option<ServiceHandles>;

    fn handle(&mut self, _msg: GetHandles, _: &mut Self::Context) -> Self::Result {
        self.handles.clone()
    }
}

#[derive(Message)]
#[rtype(result = "()")]
pub struct Shutdown;

impl Handler<Shutdown> for CoordinatorActor {
    type Result = ();

    fn handle(&mut self, _msg: Shutdown, ctx: &mut Self::Context) {
        tracing::info!("Received shutdown signal");

        // Stop consuming first so nothing new gets parked
        if let Some(consumer) = self.consumer.take() {
            consumer.do_send(StopConsumer);
        }
        if let Some(sweeper) = self.sweeper.take() {
            sweeper.do_send(StopActor);
        }
        if let Some(handles) = self.handles.take() {
            handles.dlq.do_send(StopActor);
            handles.health_monitor.do_send(StopActor);
        }

        ctx.stop();
    }
}

/// Message to gracefully stop an actor
#[derive(Message)]
#[rtype(result = "()")]
struct StopActor;

impl Handler<StopActor> for PendingSweeper {
    type Result = ();

    fn handle(&mut self, _: StopActor, ctx: &mut Self::Context) {
        tracing::info!("PendingSweeper received stop signal");
        ctx.stop();
    }
}

impl Handler<StopActor> for HealthMonitorActor {
    type Result = ();

    fn handle(&mut self, _: StopActor, ctx: &mut Self::Context) {
        tracing::info!("HealthMonitorActor received stop signal");
        ctx.stop();
    }
}

impl Handler<StopActor> for DlqActor {
    type Result = ();

    fn handle(&mut self, _: StopActor, ctx: &mut Self::Context) {
        tracing::info!("DlqActor received stop signal");
        ctx.stop();
    }
}
