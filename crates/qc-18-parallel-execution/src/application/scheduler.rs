//! # OCC Scheduler
//!
//! Runs a batch speculatively on a fixed rayon pool and commits a final state
//! equal to executing the batch one transaction at a time, in index order.
//!
//! ## Round Structure
//!
//! 1. **Execute**: every eligible `Pending` task runs against its own
//!    `VersionIndexedStore`. Success publishes the writeset; an abort publishes
//!    estimates and records the blocking index.
//! 2. **Validate**: `Executed` tasks, plus `Validated` tasks above the lowest
//!    index executed in this round, are checked in parallel. Results are
//!    applied lowest index first; failures turn their writes into estimates
//!    and go back to `Pending`.
//!
//! A pending task whose priority dependency is still unresolved sits out one
//! round. The lowest unresolved task never has an unresolved dependency, so
//! every round executes at least one task.
//!
//! ## Escalation
//!
//! After `max_rounds`, or as soon as a task hit a resource cap, the remaining
//! work runs on the sequential path: ascending from the lowest unvalidated
//! index, one task at a time, each validated immediately. Nothing below the
//! current index can change there, so an abort or failed validation on this
//! path is an invariant violation.

use super::cancellation::CancellationToken;
use crate::config::OccConfig;
use crate::domain::entities::{Task, TaskStatus};
use crate::domain::errors::{ExecutionAbort, OccError};
use crate::domain::invariants::is_unresolved;
use crate::domain::value_objects::TxIndex;
use crate::metrics::BatchMetrics;
use crate::multiversion::{MultiVersionStore, StoreLimits, VersionIndexedStore};
use crate::ports::inbound::BatchOutcome;
use crate::ports::outbound::{ParentStore, TransactionExecutor};
use parking_lot::Mutex;
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::{debug, info, trace, warn};

/// Batch scheduler owning the worker pool.
pub struct Scheduler<E: TransactionExecutor> {
    executor: E,
    config: OccConfig,
    pool: ThreadPool,
    cancel: CancellationToken,
}

impl<E: TransactionExecutor> Scheduler<E> {
    pub fn new(executor: E, config: OccConfig) -> Result<Self, OccError> {
        config.validate()?;
        let pool = ThreadPoolBuilder::new()
            .num_threads(config.worker_count)
            .thread_name(|i| format!("qc-occ-worker-{i}"))
            .build()
            .map_err(|e| OccError::WorkerPool(e.to_string()))?;
        Ok(Self {
            executor,
            config,
            pool,
            cancel: CancellationToken::new(),
        })
    }

    /// Use an externally owned cancellation token.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn config(&self) -> &OccConfig {
        &self.config
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Executes `transactions` against `parent` and commits the result.
    ///
    /// On error `parent` is untouched and every speculative version is dropped.
    pub fn execute_batch<S: ParentStore>(
        &self,
        parent: &mut S,
        transactions: &[E::Transaction],
    ) -> Result<BatchOutcome<E::Output>, OccError> {
        let started = Instant::now();
        check_cancelled(&self.cancel)?;

        let batch_size = transactions.len();
        let parallel = self.config.runs_parallel(batch_size);
        info!(batch_size, parallel, workers = self.config.worker_count, "executing batch");

        let multiversion = MultiVersionStore::new();
        let run = BatchRun::new(self, &*parent, &multiversion, transactions);

        let mut rounds = 0;
        let mut sequential_fallback = false;
        if parallel {
            rounds = self.pool.install(|| run.run_parallel())?;
            if !run.all_validated() {
                sequential_fallback = true;
                warn!(
                    batch_size,
                    rounds,
                    sequential_only = run.any_sequential_only(),
                    "escalating batch to sequential execution"
                );
            }
        }
        run.run_sequential()?;
        check_cancelled(&self.cancel)?;

        let (results, mut metrics) = run.finish()?;
        metrics.keys_written = multiversion.write_latest_to_store(parent)?;
        metrics.rounds = rounds;
        metrics.sequential_fallback = sequential_fallback;
        metrics.total_duration = started.elapsed();

        info!(
            batch_size,
            rounds,
            retries = metrics.retries,
            sequential_fallback,
            keys_written = metrics.keys_written,
            elapsed_ms = metrics.total_duration.as_millis() as u64,
            "batch committed"
        );
        Ok(BatchOutcome { results, metrics })
    }
}

fn check_cancelled(cancel: &CancellationToken) -> Result<(), OccError> {
    if cancel.is_cancelled() {
        return Err(OccError::Cancelled);
    }
    Ok(())
}

/// State of one batch in flight.
struct BatchRun<'a, E: TransactionExecutor> {
    executor: &'a E,
    config: &'a OccConfig,
    cancel: &'a CancellationToken,
    parent: &'a dyn ParentStore,
    multiversion: &'a MultiVersionStore,
    transactions: &'a [E::Transaction],
    tasks: Vec<Mutex<Task<E::Output>>>,
    aborts: AtomicU64,
    validation_failures: AtomicU64,
    sequential_executions: AtomicU64,
}

impl<'a, E: TransactionExecutor> BatchRun<'a, E> {
    fn new(
        scheduler: &'a Scheduler<E>,
        parent: &'a dyn ParentStore,
        multiversion: &'a MultiVersionStore,
        transactions: &'a [E::Transaction],
    ) -> Self {
        Self {
            executor: &scheduler.executor,
            config: &scheduler.config,
            cancel: &scheduler.cancel,
            parent,
            multiversion,
            transactions,
            tasks: (0..transactions.len()).map(|i| Mutex::new(Task::new(i))).collect(),
            aborts: AtomicU64::new(0),
            validation_failures: AtomicU64::new(0),
            sequential_executions: AtomicU64::new(0),
        }
    }

    fn status(&self, index: TxIndex) -> TaskStatus {
        self.tasks[index].lock().status()
    }

    fn all_validated(&self) -> bool {
        self.first_unvalidated().is_none()
    }

    fn first_unvalidated(&self) -> Option<TxIndex> {
        (0..self.tasks.len()).find(|&index| self.status(index) != TaskStatus::Validated)
    }

    fn any_sequential_only(&self) -> bool {
        self.tasks.iter().any(|task| task.lock().is_sequential_only())
    }

    // =========================================================================
    // PARALLEL ROUNDS
    // =========================================================================

    /// Runs rounds until every task is validated or escalation is due.
    /// Returns the number of rounds run.
    fn run_parallel(&self) -> Result<u32, OccError> {
        let limits = StoreLimits::parallel(self.config);
        let mut round = 0;

        while !self.all_validated() {
            check_cancelled(self.cancel)?;
            if round >= self.config.max_rounds || self.any_sequential_only() {
                break;
            }
            round += 1;

            let eligible = self.eligible();
            let Some(&lowest) = eligible.first() else {
                break;
            };
            debug!(round, eligible = eligible.len(), lowest, "execute phase");
            eligible
                .par_iter()
                .try_for_each(|&index| self.execute(index, limits).map(|_| ()))?;

            self.validate_round(lowest)?;
            self.requeue_aborted()?;
        }
        Ok(round)
    }

    /// Pending tasks whose priority dependency is resolved, ascending.
    fn eligible(&self) -> Vec<TxIndex> {
        let statuses: Vec<TaskStatus> = (0..self.tasks.len()).map(|i| self.status(i)).collect();
        self.tasks
            .iter()
            .enumerate()
            .filter_map(|(index, task)| {
                let task = task.lock();
                if task.status() != TaskStatus::Pending {
                    return None;
                }
                match task.priority_dependency() {
                    Some(dep) if is_unresolved(statuses[dep]) => None,
                    _ => Some(index),
                }
            })
            .collect()
    }

    fn validate_round(&self, lowest_executed: TxIndex) -> Result<(), OccError> {
        let candidates: Vec<TxIndex> = (0..self.tasks.len())
            .filter(|&index| match self.status(index) {
                TaskStatus::Executed => true,
                TaskStatus::Validated => index > lowest_executed,
                _ => false,
            })
            .collect();

        let checks: Vec<(TxIndex, bool, Vec<TxIndex>)> = candidates
            .par_iter()
            .map(|&index| {
                self.multiversion
                    .validate_transaction_state(index, self.parent)
                    .map(|(valid, conflicts)| (index, valid, conflicts))
            })
            .collect::<Result<_, _>>()?;

        for (index, valid, conflicts) in checks {
            let mut task = self.tasks[index].lock();
            task.begin_validation()?;
            if valid {
                task.mark_validated()?;
                continue;
            }
            self.multiversion.invalidate_writeset(index, task.incarnation())?;
            task.invalidate(&conflicts)?;
            self.validation_failures.fetch_add(1, Ordering::Relaxed);
            debug!(
                tx_index = index,
                ?conflicts,
                priority = ?task.priority_dependency(),
                incarnation = task.incarnation(),
                "validation failed"
            );
        }
        Ok(())
    }

    fn requeue_aborted(&self) -> Result<(), OccError> {
        for task in &self.tasks {
            let mut task = task.lock();
            if task.status() == TaskStatus::Aborted {
                task.requeue()?;
            }
        }
        Ok(())
    }

    /// Runs one incarnation of `index`. Returns the abort, if any, after the
    /// task has been moved to `Aborted` and its estimates published.
    fn execute(&self, index: TxIndex, limits: StoreLimits) -> Result<Option<ExecutionAbort>, OccError> {
        check_cancelled(self.cancel)?;
        let incarnation = self.tasks[index].lock().begin_execution()?;

        let mut store =
            VersionIndexedStore::new(index, incarnation, self.multiversion, self.parent, limits);
        let started = Instant::now();
        let outcome = self.executor.execute(&mut store, &self.transactions[index]);
        let elapsed = started.elapsed();
        let outcome = match (outcome, store.take_abort()) {
            (Ok(_), Some(abort)) => {
                debug!(tx_index = index, incarnation, reason = %abort, "executor dropped an abort");
                Err(abort)
            }
            (outcome, _) => outcome,
        };

        match outcome {
            Ok(output) => {
                store.write_to_multiversion_store()?;
                self.tasks[index].lock().finish_execution(output, elapsed)?;
                trace!(tx_index = index, incarnation, "executed");
                Ok(None)
            }
            Err(ExecutionAbort::Fatal(err)) => Err(err),
            Err(abort) => {
                store.write_estimates_to_multiversion_store()?;
                self.aborts.fetch_add(1, Ordering::Relaxed);
                let mut task = self.tasks[index].lock();
                if let ExecutionAbort::Dependency { blocking_index, .. } = &abort {
                    task.abort(Some(*blocking_index), elapsed)?;
                } else {
                    task.abort(None, elapsed)?;
                    task.mark_sequential_only();
                }
                debug!(tx_index = index, incarnation, reason = %abort, "execution aborted");
                Ok(Some(abort))
            }
        }
    }

    // =========================================================================
    // SEQUENTIAL PATH
    // =========================================================================

    /// Finishes every unvalidated task in index order.
    fn run_sequential(&self) -> Result<(), OccError> {
        let Some(start) = self.first_unvalidated() else {
            return Ok(());
        };
        let limits = StoreLimits::sequential(self.config);

        for index in start..self.tasks.len() {
            check_cancelled(self.cancel)?;
            match self.status(index) {
                TaskStatus::Validated => {
                    if self.revalidate(index)? {
                        continue;
                    }
                }
                TaskStatus::Aborted => self.tasks[index].lock().requeue()?,
                _ => {}
            }
            self.execute_sequential(index, limits)?;
        }
        Ok(())
    }

    /// Re-checks a validated task; a stale one is invalidated for re-execution.
    fn revalidate(&self, index: TxIndex) -> Result<bool, OccError> {
        let (valid, conflicts) = self
            .multiversion
            .validate_transaction_state(index, self.parent)?;
        let mut task = self.tasks[index].lock();
        task.begin_validation()?;
        if valid {
            task.mark_validated()?;
            return Ok(true);
        }
        self.multiversion.invalidate_writeset(index, task.incarnation())?;
        task.invalidate(&conflicts)?;
        self.validation_failures.fetch_add(1, Ordering::Relaxed);
        trace!(tx_index = index, ?conflicts, "stale task re-executes sequentially");
        Ok(false)
    }

    fn execute_sequential(&self, index: TxIndex, limits: StoreLimits) -> Result<(), OccError> {
        match self.execute(index, limits)? {
            None => {}
            Some(ExecutionAbort::Dependency { blocking_index, .. }) => {
                return Err(OccError::UnexpectedAbort {
                    index,
                    blocking_index,
                })
            }
            Some(ExecutionAbort::ResourceLimit { resource, limit }) => {
                return Err(OccError::ResourceBoundExceeded {
                    index,
                    resource,
                    limit,
                })
            }
            Some(ExecutionAbort::Fatal(err)) => return Err(err),
        }
        self.sequential_executions.fetch_add(1, Ordering::Relaxed);

        let (valid, conflicts) = self
            .multiversion
            .validate_transaction_state(index, self.parent)?;
        let mut task = self.tasks[index].lock();
        task.begin_validation()?;
        if !valid {
            return Err(OccError::SequentialValidationFailed { index, conflicts });
        }
        task.mark_validated()
    }

    // =========================================================================
    // RELEASE
    // =========================================================================

    /// Releases outputs in index order. Fails unless every task is validated.
    fn finish(self) -> Result<(Vec<E::Output>, BatchMetrics), OccError> {
        let mut metrics = BatchMetrics {
            batch_size: self.tasks.len(),
            aborts: self.aborts.into_inner(),
            validation_failures: self.validation_failures.into_inner(),
            sequential_executions: self.sequential_executions.into_inner(),
            ..BatchMetrics::default()
        };

        let mut results = Vec::with_capacity(self.tasks.len());
        for task in self.tasks {
            let task = task.into_inner();
            metrics.executions += u64::from(task.executions());
            metrics.max_incarnation = metrics.max_incarnation.max(task.incarnation());
            metrics.task_latencies.push(task.latency());
            results.push(task.into_result()?);
        }
        metrics.retries = metrics.executions.saturating_sub(metrics.batch_size as u64);
        Ok((results, metrics))
    }
}
