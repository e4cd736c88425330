//! Observability helpers for the beat scheduler
//!
//! Metrics collection via the `metrics` crate plus structured logging
//! helpers for the scheduling-relevant events.

use chrono::{DateTime, Utc};
use metrics::{counter, gauge, histogram, Counter, Gauge, Histogram};
use tracing::{error, info, warn};

/// Metrics collector for the beat scheduler
pub struct MetricsCollector {
    dispatches_total: Counter,
    dispatch_failures_total: Counter,
    claims_denied_total: Counter,
    tick_duration: Histogram,
    active_entries: Gauge,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            dispatches_total: counter!("cronbeat_dispatches_total"),
            dispatch_failures_total: counter!("cronbeat_dispatch_failures_total"),
            claims_denied_total: counter!("cronbeat_claims_denied_total"),
            tick_duration: histogram!("cronbeat_tick_duration_seconds"),
            active_entries: gauge!("cronbeat_active_entries"),
        }
    }

    /// Record one dispatch attempt
    pub fn record_dispatch(&self, success: bool) {
        self.dispatches_total.increment(1);
        if !success {
            self.dispatch_failures_total.increment(1);
        }
    }

    /// Record a denied cross-process claim (expected steady-state event
    /// under a multi-scheduler deployment, not an error)
    pub fn record_claim_denied(&self) {
        self.claims_denied_total.increment(1);
    }

    pub fn record_tick_duration(&self, duration_seconds: f64) {
        self.tick_duration.record(duration_seconds);
    }

    pub fn set_active_entries(&self, count: f64) {
        self.active_entries.set(count);
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

/// Structured logging utilities
pub struct StructuredLogger;

impl StructuredLogger {
    /// Log a successful entry dispatch
    pub fn log_entry_dispatched(
        entry_name: &str,
        sched_id: uuid::Uuid,
        queue: &str,
        is_default_executor: bool,
    ) {
        info!(
            event = "entry_dispatched",
            entry.name = entry_name,
            dispatch.sched_id = %sched_id,
            dispatch.queue = queue,
            dispatch.default_executor = is_default_executor,
            "Entry dispatched to task executor"
        );
    }

    /// Log a job auto-disabled because its deadline run time passed
    pub fn log_job_disabled_by_deadline(
        job_id: i64,
        job_title: &str,
        deadline: Option<DateTime<Utc>>,
    ) {
        warn!(
            event = "job_disabled_by_deadline",
            job.id = job_id,
            job.title = job_title,
            job.deadline_run_time = deadline.map(|d| d.to_rfc3339()),
            "Job reached its deadline run time and was disabled"
        );
    }

    /// Log a system-level error in a named component
    pub fn log_system_error(component: &str, operation: &str, error: &dyn std::fmt::Display) {
        error!(
            event = "system_error",
            component = component,
            operation = operation,
            error = %error,
            "System error occurred"
        );
    }
}
