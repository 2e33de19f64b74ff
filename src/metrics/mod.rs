use prometheus::{
    HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry,
};

// ============================================================================
// Metrics Module - Prometheus metrics for observability
// ============================================================================
//
// Provides metrics for:
// - Purchase intents by outcome, reservations and releases
// - Confirmation processing (outcome, latency, anomalies)
// - Retry attempts and parked confirmations
// - Circuit breaker state per breaker
// - Expired (swept) transactions and component health
//
// Everything is registered on one Registry, scraped via GET /metrics.
// ============================================================================

pub struct Metrics {
    registry: Registry,

    // Purchase path
    pub purchases_total: IntCounterVec,
    pub inventory_mutations_total: IntCounterVec,

    // Confirmation path
    pub confirmations_total: IntCounterVec,
    pub confirmation_duration: HistogramVec,
    pub reconciliation_anomalies_total: IntCounterVec,

    // Retry Metrics
    pub retry_attempts_total: IntCounterVec,

    // Parked (dead-letter) confirmations
    pub parked_confirmations_total: IntCounterVec,

    // Circuit Breaker Metrics
    pub circuit_breaker_state: IntGaugeVec,

    // Sweep
    pub expired_transactions_total: IntCounter,

    // Health
    pub component_health_status: IntGauge,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let purchases_total = IntCounterVec::new(
            Opts::new("purchases_total", "Purchase intents by outcome"),
            &["outcome"],
        )?;
        registry.register(Box::new(purchases_total.clone()))?;

        let inventory_mutations_total = IntCounterVec::new(
            Opts::new("inventory_mutations_total", "Ticket stock reservations and releases"),
            &["operation"],
        )?;
        registry.register(Box::new(inventory_mutations_total.clone()))?;

        let confirmations_total = IntCounterVec::new(
            Opts::new("confirmations_total", "Payment confirmations processed by outcome"),
            &["outcome"],
        )?;
        registry.register(Box::new(confirmations_total.clone()))?;

        let confirmation_duration = HistogramVec::new(
            HistogramOpts::new(
                "confirmation_processing_duration_seconds",
                "Payment confirmation processing duration",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
            &["disposition"],
        )?;
        registry.register(Box::new(confirmation_duration.clone()))?;

        let reconciliation_anomalies_total = IntCounterVec::new(
            Opts::new(
                "reconciliation_anomalies_total",
                "Confirmations that need manual reconciliation",
            ),
            &["kind"],
        )?;
        registry.register(Box::new(reconciliation_anomalies_total.clone()))?;

        let retry_attempts_total = IntCounterVec::new(
            Opts::new("retry_attempts_total", "Total retry attempts"),
            &["operation", "attempt"],
        )?;
        registry.register(Box::new(retry_attempts_total.clone()))?;

        let parked_confirmations_total = IntCounterVec::new(
            Opts::new("parked_confirmations_total", "Confirmations parked for manual review"),
            &["kind"],
        )?;
        registry.register(Box::new(parked_confirmations_total.clone()))?;

        let circuit_breaker_state = IntGaugeVec::new(
            Opts::new(
                "circuit_breaker_state",
                "Circuit breaker state (0=Closed, 1=Open, 2=HalfOpen)",
            ),
            &["breaker"],
        )?;
        registry.register(Box::new(circuit_breaker_state.clone()))?;

        let expired_transactions_total = IntCounter::new(
            "expired_transactions_total",
            "Pending transactions failed by the expiry sweep",
        )?;
        registry.register(Box::new(expired_transactions_total.clone()))?;

        let component_health_status = IntGauge::new(
            "component_health_status",
            "Aggregate component health (0=Unhealthy, 1=Degraded, 2=Healthy)",
        )?;
        registry.register(Box::new(component_health_status.clone()))?;

        Ok(Self {
            registry,
            purchases_total,
            inventory_mutations_total,
            confirmations_total,
            confirmation_duration,
            reconciliation_anomalies_total,
            retry_attempts_total,
            parked_confirmations_total,
            circuit_breaker_state,
            expired_transactions_total,
            component_health_status,
        })
    }

    /// Get the Prometheus registry for exposing metrics via HTTP
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn record_purchase(&self, outcome: &str) {
        self.purchases_total.with_label_values(&[outcome]).inc();
    }

    /// `operation` is "reserve" or "release"
    pub fn record_inventory_mutation(&self, operation: &str) {
        self.inventory_mutations_total.with_label_values(&[operation]).inc();
    }

    pub fn record_confirmation(&self, outcome: &str, disposition: &str, duration_secs: f64) {
        self.confirmations_total.with_label_values(&[outcome]).inc();
        self.confirmation_duration
            .with_label_values(&[disposition])
            .observe(duration_secs);
    }

    pub fn record_anomaly(&self, kind: &str) {
        self.reconciliation_anomalies_total.with_label_values(&[kind]).inc();
    }

    /// Helper to record retry attempt
    pub fn record_retry_attempt(&self, operation: &str, attempt: u32) {
        self.retry_attempts_total
            .with_label_values(&[operation, &attempt.to_string()])
            .inc();
    }

    pub fn record_parked(&self, kind: &str) {
        self.parked_confirmations_total.with_label_values(&[kind]).inc();
    }

    /// Helper to update circuit breaker state
    pub fn update_circuit_breaker_state(&self, breaker: &str, state: i64) {
        self.circuit_breaker_state.with_label_values(&[breaker]).set(state);
    }

    pub fn record_expired(&self, count: u64) {
        self.expired_transactions_total.inc_by(count);
    }
}
