//! Parallel Execution Service
//!
//! Main service implementing ParallelExecutionApi.

use super::cancellation::CancellationToken;
use super::scheduler::Scheduler;
use crate::config::OccConfig;
use crate::domain::errors::OccError;
use crate::metrics::{self, BatchMetrics};
use crate::ports::inbound::{BatchOutcome, ParallelExecutionApi};
use crate::ports::outbound::{ParentStore, TransactionExecutor};
use parking_lot::Mutex;
use tracing::{error, warn};

/// Parallel Execution Service
///
/// Wraps a `Scheduler` with:
/// 1. Config validation at construction
/// 2. Prometheus recording of every committed batch
/// 3. The metrics of the last committed batch, for inspection
pub struct ParallelExecutionService<E: TransactionExecutor> {
    scheduler: Scheduler<E>,
    last_metrics: Mutex<Option<BatchMetrics>>,
}

impl<E: TransactionExecutor> ParallelExecutionService<E> {
    /// Create a new service with default config
    pub fn new(executor: E) -> Result<Self, OccError> {
        Self::with_config(executor, OccConfig::default())
    }

    /// Create a new service with custom config
    pub fn with_config(executor: E, config: OccConfig) -> Result<Self, OccError> {
        if let Err(e) = metrics::register_metrics() {
            warn!(error = %e, "prometheus collectors unavailable");
        }
        Ok(Self {
            scheduler: Scheduler::new(executor, config)?,
            last_metrics: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &OccConfig {
        self.scheduler.config()
    }

    pub fn executor(&self) -> &E {
        self.scheduler.executor()
    }

    /// Metrics of the most recent committed batch.
    pub fn last_metrics(&self) -> Option<BatchMetrics> {
        self.last_metrics.lock().clone()
    }
}

impl<E: TransactionExecutor> ParallelExecutionApi for ParallelExecutionService<E> {
    type Transaction = E::Transaction;
    type Output = E::Output;

    fn execute_block<S: ParentStore>(
        &self,
        parent: &mut S,
        transactions: &[Self::Transaction],
    ) -> Result<BatchOutcome<Self::Output>, OccError> {
        match self.scheduler.execute_batch(parent, transactions) {
            Ok(outcome) => {
                metrics::record_batch(&outcome.metrics);
                *self.last_metrics.lock() = Some(outcome.metrics.clone());
                Ok(outcome)
            }
            Err(OccError::Cancelled) => {
                warn!(batch_size = transactions.len(), "batch cancelled");
                Err(OccError::Cancelled)
            }
            Err(e) => {
                error!(batch_size = transactions.len(), error = %e, "batch aborted");
                Err(e)
            }
        }
    }

    fn cancellation_token(&self) -> CancellationToken {
        self.scheduler.cancellation_token()
    }
}
