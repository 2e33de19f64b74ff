use actix::prelude::*;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

use super::health_monitor::{HealthMonitorActor, UpdateHealth};
use crate::actors::core::{ComponentHealth, HealthCheckable, HealthStatus};
use crate::reconciliation::{PendingSweep, SweepReport};

// ============================================================================
// Pending Sweeper Actor - drives PendingSweep on an interval
// ============================================================================

const COMPONENT: &str = "pending_sweeper";

pub struct PendingSweeper {
    sweep: Arc<PendingSweep>,
    interval: Duration,
    health_monitor: Addr<HealthMonitorActor>,
    in_flight: bool,
    status: HealthStatus,
    last_report: Option<SweepReport>,
}

impl PendingSweeper {
    pub fn new(sweep: Arc<PendingSweep>, interval: Duration, health_monitor: Addr<HealthMonitorActor>) -> Self {
        Self {
            sweep,
            interval,
            health_monitor,
            in_flight: false,
            status: HealthStatus::Healthy,
            last_report: None,
        }
    }

    fn tick(&mut self, ctx: &mut Context<Self>) {
        // A slow sweep must not overlap with the next one
        if self.in_flight {
            tracing::debug!("Previous sweep still running, skipping tick");
            return;
        }
        self.in_flight = true;

        let sweep = self.sweep.clone();
        ctx.spawn(
            async move { sweep.run_once(Utc::now()).await }
                .into_actor(self)
                .map(|result, act, _ctx| {
                    act.in_flight = false;
                    act.status = match result {
                        Ok(report) => {
                            act.last_report = Some(report);
                            HealthStatus::Healthy
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "Pending sweep failed");
                            HealthStatus::Degraded(format!("sweep failed: {}", e))
                        }
                    };
                    act.health_monitor.do_send(UpdateHealth(act.check_health()));
                }),
        );
    }
}

impl HealthCheckable for PendingSweeper {
    fn check_health(&self) -> ComponentHealth {
        let health = ComponentHealth::new(COMPONENT, self.status.clone());
        match &self.last_report {
            Some(report) => health.with_details(format!(
                "last run expired {} of {} stale transactions, recovered {} releases",
                report.expired, report.examined, report.recovered
            )),
            None => health,
        }
    }

    fn component_name(&self) -> &str {
        COMPONENT
    }
}

impl Actor for PendingSweeper {
    type Context = Context<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        tracing::info!(interval_secs = self.interval.as_secs(), "PendingSweeper started");
        ctx.run_interval(self.interval, |act, ctx| act.tick(ctx));
    }

    fn stopped(&mut self, _: &mut Self::Context) {
        tracing::info!(component = self.component_name(), "PendingSweeper stopped");
    }
}

/// Run a sweep now instead of waiting for the next tick
#[derive(Message)]
#[rtype(result = "()")]
pub struct SweepNow;

impl Handler<SweepNow> for PendingSweeper {
    type Result = ();

    fn handle(&mut self, _: SweepNow, ctx: &mut Self::Context) {
        self.tick(ctx);
    }
}
