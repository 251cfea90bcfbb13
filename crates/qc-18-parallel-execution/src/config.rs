//! Configuration for Parallel Execution Subsystem

use crate::domain::errors::OccError;
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;

/// Batches smaller than this run sequentially.
pub const DEFAULT_PARALLEL_THRESHOLD: usize = 4;

/// Execute/validate rounds before the sequential fallback kicks in.
pub const DEFAULT_MAX_ROUNDS: u32 = 10;

/// Parallel execution configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OccConfig {
    /// Size of the worker pool
    pub worker_count: usize,
    /// Rounds before escalating to sequential execution
    pub max_rounds: u32,
    /// Distinct keys one incarnation may read (anti-DoS)
    pub max_readset_size: usize,
    /// Distinct keys one incarnation may write (anti-DoS)
    pub max_writeset_size: usize,
    /// Range scans one incarnation may open (anti-DoS)
    pub max_iterators_per_task: usize,
    /// Minimum batch size worth scheduling in parallel
    pub parallel_threshold: usize,
}

impl Default for OccConfig {
    fn default() -> Self {
        Self {
            worker_count: std::thread::available_parallelism()
                .map(usize::from)
                .unwrap_or(4),
            max_rounds: DEFAULT_MAX_ROUNDS,
            max_readset_size: 65_536,
            max_writeset_size: 16_384,
            max_iterators_per_task: 64,
            parallel_threshold: DEFAULT_PARALLEL_THRESHOLD,
        }
    }
}

impl OccConfig {
    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `QC_OCC_WORKERS`: worker pool size (default: available parallelism)
    /// - `QC_OCC_MAX_ROUNDS`: rounds before sequential fallback (default: 10)
    /// - `QC_OCC_MAX_READSET`: readset cap per incarnation (default: 65536)
    /// - `QC_OCC_MAX_WRITESET`: writeset cap per incarnation (default: 16384)
    /// - `QC_OCC_MAX_ITERATORS`: iterator cap per incarnation (default: 64)
    /// - `QC_OCC_PARALLEL_THRESHOLD`: minimum parallel batch size (default: 4)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            worker_count: env_or("QC_OCC_WORKERS", defaults.worker_count),
            max_rounds: env_or("QC_OCC_MAX_ROUNDS", defaults.max_rounds),
            max_readset_size: env_or("QC_OCC_MAX_READSET", defaults.max_readset_size),
            max_writeset_size: env_or("QC_OCC_MAX_WRITESET", defaults.max_writeset_size),
            max_iterators_per_task: env_or("QC_OCC_MAX_ITERATORS", defaults.max_iterators_per_task),
            parallel_threshold: env_or("QC_OCC_PARALLEL_THRESHOLD", defaults.parallel_threshold),
        }
    }

    /// Single-worker configuration; every batch runs on the sequential path.
    pub fn sequential() -> Self {
        Self {
            worker_count: 1,
            ..Self::default()
        }
    }

    pub fn with_workers(mut self, worker_count: usize) -> Self {
        self.worker_count = worker_count;
        self
    }

    pub fn with_max_rounds(mut self, max_rounds: u32) -> Self {
        self.max_rounds = max_rounds;
        self
    }

    pub fn validate(&self) -> Result<(), OccError> {
        if self.worker_count == 0 {
            return Err(OccError::InvalidConfig("worker_count must be at least 1".into()));
        }
        if self.max_rounds == 0 {
            return Err(OccError::InvalidConfig("max_rounds must be at least 1".into()));
        }
        if self.max_readset_size == 0 || self.max_writeset_size == 0 {
            return Err(OccError::InvalidConfig("readset and writeset caps must be non-zero".into()));
        }
        if self.max_iterators_per_task == 0 {
            return Err(OccError::InvalidConfig("max_iterators_per_task must be non-zero".into()));
        }
        Ok(())
    }

    /// Whether a batch of `len` transactions should use the worker pool.
    pub fn runs_parallel(&self, len: usize) -> bool {
        self.worker_count > 1 && len >= self.parallel_threshold.max(2)
    }
}

fn env_or<T: FromStr + Copy + std::fmt::Display>(name: &str, default: T) -> T {
    match env::var(name) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(variable = name, value = %raw, fallback = %default, "ignoring unparsable setting");
            default
        }),
        Err(_) => default,
    }
}
