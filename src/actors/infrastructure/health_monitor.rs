use actix::prelude::*;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::actors::core::{ComponentHealth, HealthStatus};
use crate::metrics::Metrics;
use crate::utils::CircuitBreaker;

// ============================================================================
// Health Monitor Actor - Monitors system health
// ============================================================================
//
// Responsibilities:
// - Track health status reported by every component
// - Check the circuit breakers (gateway, producer) on an interval
// - Aggregate system-wide health for GET /health and the health gauge
//
// ============================================================================

const CHECK_INTERVAL: Duration = Duration::from_secs(10);

// ============================================================================
// Messages
// ============================================================================

#[derive(Message)]
#[rtype(result = "()")]
pub struct UpdateHealth(pub ComponentHealth);

#[derive(Message)]
#[rtype(result = "SystemHealth")]
pub struct GetSystemHealth;

#[derive(Debug, Clone, Serialize)]
pub struct SystemHealth {
    pub overall_status: HealthStatus,
    pub components: HashMap<String, ComponentHealth>,
    pub check_time: DateTime<Utc>,
}

// ============================================================================
// Health Monitor Actor
// ============================================================================

pub struct HealthMonitorActor {
    components: HashMap<String, ComponentHealth>,
    breakers: Vec<CircuitBreaker>,
    metrics: Arc<Metrics>,
}

impl HealthMonitorActor {
    pub fn new(breakers: Vec<CircuitBreaker>, metrics: Arc<Metrics>) -> Self {
        Self {
            components: HashMap::new(),
            breakers,
            metrics,
        }
    }

    fn compute_overall_status(&self) -> HealthStatus {
        let mut has_degraded = false;
        let mut unhealthy_components = Vec::new();

        for (name, health) in &self.components {
            match &health.status {
                HealthStatus::Unhealthy(msg) => {
                    unhealthy_components.push(format!("{}: {}", name, msg));
                }
                HealthStatus::Degraded(_) => {
                    has_degraded = true;
                }
                HealthStatus::Healthy => {}
            }
        }

        if !unhealthy_components.is_empty() {
            unhealthy_components.sort();
            HealthStatus::Unhealthy(unhealthy_components.join(", "))
        } else if has_degraded {
            HealthStatus::Degraded("Some components degraded".to_string())
        } else {
            HealthStatus::Healthy
        }
    }

    fn record(&mut self, health: ComponentHealth) {
        if let Some(previous) = self.components.get(&health.name) {
            if previous.status != health.status {
                tracing::warn!(
                    component = %health.name,
                    from = ?previous.status,
                    to = ?health.status,
                    "Component health changed"
                );
            }
        }

        self.components.insert(health.name.clone(), health);
        self.metrics
            .component_health_status
            .set(self.compute_overall_status().gauge_value());
    }
}

impl Actor for HealthMonitorActor {
    type Context = Context<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        tracing::info!(breakers = self.breakers.len(), "HealthMonitorActor started");

        // Get address before borrowing ctx
        let addr = ctx.address();

        ctx.run_interval(CHECK_INTERVAL, move |act, _ctx| {
            for breaker in act.breakers.clone() {
                let addr = addr.clone();
                let metrics = act.metrics.clone();

                actix::spawn(async move {
                    let state = breaker.get_state().await;
                    metrics.update_circuit_breaker_state(breaker.name(), state.gauge_value());
                    addr.do_send(UpdateHealth(ComponentHealth::new(
                        breaker.name(),
                        HealthStatus::from(state),
                    )));
                });
            }
        });
    }

    fn stopped(&mut self, _: &mut Self::Context) {
        tracing::info!("HealthMonitorActor stopped");
    }
}

// ============================================================================
// Message Handlers
// ============================================================================

impl Handler<UpdateHealth> for HealthMonitorActor {
    type Result = ();

    fn handle(&mut self, msg: UpdateHealth, _: &mut Self::Context) {
        tracing::debug!(
            component = %msg.0.name,
            status = ?msg.0.status,
            "Updated component health"
        );
        self.record(msg.0);
    }
}

impl Handler<GetSystemHealth> for HealthMonitorActor {
    type Result = MessageResult<GetSystemHealth>;

    fn handle(&mut self, _msg: GetSystemHealth, _: &mut Self::Context) -> Self::Result {
        MessageResult(SystemHealth {
            overall_status: self.compute_overall_status(),
            components: self.components.clone(),
            check_time: Utc::now(),
        })
    }
}
