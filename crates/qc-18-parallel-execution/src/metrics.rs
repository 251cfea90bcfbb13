//! Batch metrics for Parallel Execution
//!
//! `BatchMetrics` is returned with every committed batch. The same numbers are
//! folded into Prometheus collectors following `qc_<subsystem>_<metric>_<unit>`.

use crate::domain::errors::OccError;
use crate::domain::value_objects::Incarnation;
use lazy_static::lazy_static;
use prometheus::{Counter, Encoder, Gauge, Histogram, HistogramOpts, Registry, TextEncoder};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Per-batch execution statistics.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchMetrics {
    pub batch_size: usize,
    /// Parallel execute/validate rounds
    pub rounds: u32,
    /// Business logic invocations, first runs included
    pub executions: u64,
    /// Invocations beyond the first per task
    pub retries: u64,
    /// Executions stopped by an estimate or a resource cap
    pub aborts: u64,
    pub validation_failures: u64,
    pub max_incarnation: Incarnation,
    /// Parallel rounds gave up and the sequential path finished the batch
    pub sequential_fallback: bool,
    /// Executions performed on the sequential path
    pub sequential_executions: u64,
    /// Business logic time per task, index-aligned
    pub task_latencies: Vec<Duration>,
    pub total_duration: Duration,
    /// Keys written to the parent store at commit
    pub keys_written: usize,
}

impl BatchMetrics {
    /// Share of executions that were wasted speculation.
    pub fn retry_ratio(&self) -> f64 {
        if self.executions == 0 {
            return 0.0;
        }
        self.retries as f64 / self.executions as f64
    }
}

lazy_static! {
    /// Registry for the parallel execution collectors
    pub static ref REGISTRY: Registry = Registry::new();

    /// Committed batches
    pub static ref BATCHES_TOTAL: Counter = Counter::new(
        "qc_occ_batches_total",
        "Total number of batches committed by the parallel executor"
    ).expect("metric creation failed");

    /// Rounds per batch
    pub static ref ROUNDS: Histogram = Histogram::with_opts(
        HistogramOpts::new("qc_occ_rounds", "Parallel execute/validate rounds per batch")
            .buckets(vec![0.0, 1.0, 2.0, 3.0, 5.0, 8.0, 13.0, 21.0])
    ).expect("metric creation failed");

    /// Re-executions
    pub static ref RETRIES_TOTAL: Counter = Counter::new(
        "qc_occ_retries_total",
        "Total transaction re-executions caused by conflicts or dependencies"
    ).expect("metric creation failed");

    /// Batches finished by the sequential fallback
    pub static ref SEQUENTIAL_FALLBACKS_TOTAL: Counter = Counter::new(
        "qc_occ_sequential_fallbacks_total",
        "Total batches that escalated to sequential execution"
    ).expect("metric creation failed");

    /// Highest incarnation of the last batch
    pub static ref MAX_INCARNATION: Gauge = Gauge::new(
        "qc_occ_max_incarnation",
        "Highest task incarnation reached in the last committed batch"
    ).expect("metric creation failed");

    /// Business logic time per task
    pub static ref TASK_DURATION: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "qc_occ_task_duration_seconds",
            "Time spent in business logic per transaction, all incarnations"
        ).buckets(vec![
            0.00001, 0.00005, 0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0,
        ])
    ).expect("metric creation failed");
}

/// Register all collectors with `REGISTRY`. Calling it again is a no-op.
pub fn register_metrics() -> Result<(), OccError> {
    let metrics: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(BATCHES_TOTAL.clone()),
        Box::new(ROUNDS.clone()),
        Box::new(RETRIES_TOTAL.clone()),
        Box::new(SEQUENTIAL_FALLBACKS_TOTAL.clone()),
        Box::new(MAX_INCARNATION.clone()),
        Box::new(TASK_DURATION.clone()),
    ];

    for metric in metrics {
        match REGISTRY.register(metric) {
            Ok(()) | Err(prometheus::Error::AlreadyReg) => {}
            Err(e) => return Err(OccError::Metrics(e.to_string())),
        }
    }
    Ok(())
}

/// Fold one committed batch into the collectors.
pub fn record_batch(metrics: &BatchMetrics) {
    BATCHES_TOTAL.inc();
    ROUNDS.observe(f64::from(metrics.rounds));
    RETRIES_TOTAL.inc_by(metrics.retries as f64);
    if metrics.sequential_fallback {
        SEQUENTIAL_FALLBACKS_TOTAL.inc();
    }
    MAX_INCARNATION.set(f64::from(metrics.max_incarnation));
    for latency in &metrics.task_latencies {
        TASK_DURATION.observe(latency.as_secs_f64());
    }
}

/// Encode all collectors as Prometheus text format.
pub fn gather_metrics() -> Result<String, OccError> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| OccError::Metrics(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| OccError::Metrics(e.to_string()))
}
