//! Prometheus metrics for the scheduler.
//!
//! Everything is recorded through the `metrics` facade, so the helpers are
//! free when no recorder is installed. [`init_metrics`] installs a Prometheus
//! recorder whose output is available through [`MetricsRegistry::render`].
//!
//! # Example
//!
//! ```rust,no_run
//! use jobrank_core::telemetry::metrics::SchedulerMetrics;
//!
//! SchedulerMetrics::record_scheduled(10);
//! SchedulerMetrics::set_queue_depth(10, 3);
//! ```

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::OnceLock;
use std::time::Duration;

/// Metric names.
pub mod names {
    pub const JOBS_SCHEDULED: &str = "jobrank_jobs_scheduled_total";
    pub const JOBS_COMPLETED: &str = "jobrank_jobs_completed_total";
    pub const JOB_WAIT: &str = "jobrank_job_wait_seconds";
    pub const PROMOTIONS: &str = "jobrank_promotions_total";
    pub const QUEUE_DEPTH: &str = "jobrank_queue_depth";
    pub const ACTIVE_WORKERS: &str = "jobrank_active_workers";
    pub const SWEEPS: &str = "jobrank_sweeps_total";
    pub const ERRORS: &str = "jobrank_errors_total";
}

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Whether metrics collection is enabled
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,

    /// Histogram buckets for job wait times (in seconds)
    #[serde(default = "default_wait_buckets")]
    pub wait_buckets: Vec<f64>,

    /// Global labels to add to all metrics
    #[serde(default)]
    pub global_labels: HashMap<String, String>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            wait_buckets: default_wait_buckets(),
            global_labels: HashMap::new(),
        }
    }
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_wait_buckets() -> Vec<f64> {
    vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]
}

/// Handle to the installed Prometheus recorder.
pub struct MetricsRegistry {
    prometheus_handle: Option<PrometheusHandle>,
}

impl std::fmt::Debug for MetricsRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsRegistry")
            .field("prometheus_handle", &self.prometheus_handle.is_some())
            .finish()
    }
}

impl MetricsRegistry {
    /// The process-wide registry. Renders nothing until [`init_metrics`] ran.
    pub fn global() -> MetricsRegistry {
        MetricsRegistry {
            prometheus_handle: METRICS_HANDLE.get().cloned(),
        }
    }

    /// Check whether a recorder backs this registry.
    pub fn is_enabled(&self) -> bool {
        self.prometheus_handle.is_some()
    }

    /// Render all metrics in Prometheus text format.
    pub fn render(&self) -> String {
        self.prometheus_handle
            .as_ref()
            .map(|h| h.render())
            .unwrap_or_default()
    }
}

/// Initialize the metrics subsystem.
///
/// Installing a recorder is a process-wide operation; a second call returns
/// the registry created by the first.
///
/// # Errors
///
/// Returns an error if the bucket list is invalid or the recorder cannot be
/// installed.
pub fn init_metrics(config: &MetricsConfig, service_name: &str) -> anyhow::Result<MetricsRegistry> {
    if !config.enabled {
        return Ok(MetricsRegistry {
            prometheus_handle: None,
        });
    }

    if let Some(handle) = METRICS_HANDLE.get() {
        return Ok(MetricsRegistry {
            prometheus_handle: Some(handle.clone()),
        });
    }

    let mut builder = PrometheusBuilder::new();
    for (key, value) in &config.global_labels {
        builder = builder.add_global_label(key, value);
    }
    builder = builder.set_buckets(&config.wait_buckets)?;

    let handle = builder.install_recorder()?;
    describe_metrics();

    let _ = METRICS_HANDLE.set(handle.clone());

    tracing::info!(service_name = %service_name, "Metrics initialized");

    Ok(MetricsRegistry {
        prometheus_handle: Some(handle),
    })
}

/// Register metric descriptions with the installed recorder.
pub fn describe_metrics() {
    describe_counter!(names::JOBS_SCHEDULED, "Total number of jobs scheduled");
    describe_counter!(names::JOBS_COMPLETED, "Total number of jobs executed");
    describe_histogram!(
        names::JOB_WAIT,
        metrics::Unit::Seconds,
        "Time a job spent queued before a worker picked it up"
    );
    describe_counter!(names::PROMOTIONS, "Total number of aging promotions");
    describe_gauge!(names::QUEUE_DEPTH, "Number of jobs waiting per rank");
    describe_gauge!(names::ACTIVE_WORKERS, "Number of running worker loops");
    describe_counter!(names::SWEEPS, "Total number of aging sweeps");
    describe_counter!(names::ERRORS, "Total number of scheduler errors by code");
}

/// Record helpers for scheduler events.
pub struct SchedulerMetrics;

impl SchedulerMetrics {
    /// Record a job entering the queue.
    pub fn record_scheduled(rank: i64) {
        counter!(names::JOBS_SCHEDULED, "rank" => rank.to_string()).increment(1);
    }

    /// Record a finished job and how long it waited.
    pub fn record_completed(original_rank: i64, failed: bool, waited: Duration) {
        counter!(
            names::JOBS_COMPLETED,
            "rank" => original_rank.to_string(),
            "failed" => failed.to_string(),
        )
        .increment(1);

        histogram!(names::JOB_WAIT, "rank" => original_rank.to_string())
            .record(waited.as_secs_f64());
    }

    /// Record a batch of promotions from one rank to the next.
    pub fn record_promotion(from: i64, to: i64, count: usize) {
        counter!(
            names::PROMOTIONS,
            "from" => from.to_string(),
            "to" => to.to_string(),
        )
        .increment(count as u64);
    }

    /// Record one aging sweep.
    pub fn record_sweep() {
        counter!(names::SWEEPS).increment(1);
    }

    /// Set the number of jobs waiting at a rank.
    pub fn set_queue_depth(rank: i64, depth: usize) {
        gauge!(names::QUEUE_DEPTH, "rank" => rank.to_string()).set(depth as f64);
    }

    pub fn worker_started() {
        gauge!(names::ACTIVE_WORKERS).increment(1.0);
    }

    pub fn worker_stopped() {
        gauge!(names::ACTIVE_WORKERS).decrement(1.0);
    }
}
