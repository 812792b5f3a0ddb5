//! Observability infrastructure for the cooling agent
//!
//! Provides:
//! - Prometheus metrics (step latency, training latency, exploration rate,
//!   failure risk, replay size, action counts)
//! - Structured JSON logging with tracing

use prometheus::{
    register_gauge, register_histogram, register_int_counter, register_int_counter_vec,
    register_int_gauge, Gauge, Histogram, IntCounter, IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Default histogram buckets for latency measurements (in seconds)
const LATENCY_BUCKETS: &[f64] = &[
    0.0001, 0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<AgentMetricsInner> = OnceLock::new();

/// Inner metrics structure that holds the actual Prometheus metrics
struct AgentMetricsInner {
    step_latency_seconds: Histogram,
    training_latency_seconds: Histogram,
    epsilon: Gauge,
    failure_risk: Gauge,
    last_loss: Gauge,
    replay_memory_size: IntGauge,
    thermal_storage_kwh: Gauge,
    energy_kw: Gauge,
    actions_total: IntCounterVec,
    emergency_overrides_total: IntCounter,
    checkpoints_total: IntCounter,
    backend_errors_total: IntCounter,
}

impl AgentMetricsInner {
    fn new() -> Self {
        Self {
            step_latency_seconds: register_histogram!(
                "cooling_agent_step_latency_seconds",
                "Time spent on one act-observe-train cycle",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register step_latency_seconds"),

            training_latency_seconds: register_histogram!(
                "cooling_agent_training_latency_seconds",
                "Time spent on one prioritized training batch",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register training_latency_seconds"),

            epsilon: register_gauge!(
                "cooling_agent_epsilon",
                "Current exploration rate"
            )
            .expect("Failed to register epsilon"),

            failure_risk: register_gauge!(
                "cooling_agent_failure_risk",
                "Current environment failure risk in [0, 1]"
            )
            .expect("Failed to register failure_risk"),

            last_loss: register_gauge!(
                "cooling_agent_last_loss",
                "Loss of the most recent training batch"
            )
            .expect("Failed to register last_loss"),

            replay_memory_size: register_int_gauge!(
                "cooling_agent_replay_memory_size",
                "Number of transitions in the replay memory"
            )
            .expect("Failed to register replay_memory_size"),

            thermal_storage_kwh: register_gauge!(
                "cooling_agent_thermal_storage_kwh",
                "Current thermal storage charge in kWh"
            )
            .expect("Failed to register thermal_storage_kwh"),

            energy_kw: register_gauge!(
                "cooling_agent_energy_kw",
                "Current facility energy draw in kW"
            )
            .expect("Failed to register energy_kw"),

            actions_total: register_int_counter_vec!(
                "cooling_agent_actions_total",
                "Actions applied to the environment",
                &["action"]
            )
            .expect("Failed to register actions_total"),

            emergency_overrides_total: register_int_counter!(
                "cooling_agent_emergency_overrides_total",
                "Times the emergency policy replaced the requested action"
            )
            .expect("Failed to register emergency_overrides_total"),

            checkpoints_total: register_int_counter!(
                "cooling_agent_checkpoints_total",
                "Checkpoints written to durable storage"
            )
            .expect("Failed to register checkpoints_total"),

            backend_errors_total: register_int_counter!(
                "cooling_agent_backend_errors_total",
                "Estimator backend failures caught by the control loop"
            )
            .expect("Failed to register backend_errors_total"),
        }
    }
}

/// Agent metrics for Prometheus exposition
///
/// This is a lightweight handle to the global metrics instance.
/// Multiple clones share the same underlying metrics.
#[derive(Clone)]
pub struct AgentMetrics {
    // This is just a marker - we use the global instance
    _private: (),
}

impl Default for AgentMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentMetrics {
    /// Create a new metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(AgentMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &AgentMetricsInner {
        GLOBAL_METRICS.get().expect("Metrics not initialized")
    }

    /// Record one full control-loop step latency
    pub fn observe_step_latency(&self, duration_secs: f64) {
        self.inner().step_latency_seconds.observe(duration_secs);
    }

    /// Record one training batch latency
    pub fn observe_training_latency(&self, duration_secs: f64) {
        self.inner().training_latency_seconds.observe(duration_secs);
    }

    /// Update the exploration/risk/loss gauges after a step
    pub fn set_step_gauges(&self, epsilon: f64, risk: f64, replay_len: usize) {
        self.inner().epsilon.set(epsilon);
        self.inner().failure_risk.set(risk);
        self.inner().replay_memory_size.set(replay_len as i64);
    }

    pub fn set_last_loss(&self, loss: f64) {
        self.inner().last_loss.set(loss);
    }

    /// Update the physical-state gauges
    pub fn set_environment_gauges(&self, storage_kwh: f64, energy_kw: f64) {
        self.inner().thermal_storage_kwh.set(storage_kwh);
        self.inner().energy_kw.set(energy_kw);
    }

    /// Count one applied action
    pub fn inc_action(&self, action: &str) {
        self.inner().actions_total.with_label_values(&[action]).inc();
    }

    pub fn inc_emergency_overrides(&self) {
        self.inner().emergency_overrides_total.inc();
    }

    pub fn inc_checkpoints(&self) {
        self.inner().checkpoints_total.inc();
    }

    pub fn inc_backend_errors(&self) {
        self.inner().backend_errors_total.inc();
    }
}

/// Structured logger for significant agent events
#[derive(Clone)]
pub struct StructuredLogger {
    agent_id: String,
}

impl StructuredLogger {
    pub fn new(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
        }
    }

    pub fn log_startup(&self, version: &str) {
        info!(
            agent_id = %self.agent_id,
            version,
            event = "startup",
            "Cooling agent starting"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            agent_id = %self.agent_id,
            reason,
            event = "shutdown",
            "Cooling agent shutting down"
        );
    }

    pub fn log_checkpoint(&self, path: &std::path::Path, timestep: u64) {
        info!(
            agent_id = %self.agent_id,
            path = %path.display(),
            timestep,
            event = "checkpoint",
            "Checkpoint written"
        );
    }

    pub fn log_emergency_override(&self, requested: &str, applied: &str, risk: f64) {
        warn!(
            agent_id = %self.agent_id,
            requested,
            applied,
            risk,
            event = "emergency_override",
            "Emergency policy overrode requested action"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_handle_is_cloneable() {
        let metrics = AgentMetrics::new();
        let clone = metrics.clone();

        metrics.observe_step_latency(0.001);
        clone.observe_training_latency(0.002);
        metrics.set_step_gauges(0.5, 0.1, 42);
        clone.inc_action("MAINTAIN");
        metrics.inc_emergency_overrides();
    }

    #[test]
    fn test_gauges_accept_updates() {
        let metrics = AgentMetrics::new();
        metrics.set_environment_gauges(300.0, 20.0);
        metrics.set_last_loss(0.05);
        metrics.inc_checkpoints();
        metrics.inc_backend_errors();
    }
}
