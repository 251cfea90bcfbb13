//! Domain entities for Parallel Execution
//!
//! A `Task` is the execution state of one batch transaction. All status changes
//! go through `transition`, which rejects anything outside the state machine in
//! `invariants.rs`.

use super::errors::OccError;
use super::invariants::is_valid_transition;
use super::value_objects::{Incarnation, TxIndex};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;

/// Lifecycle status of a task.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskStatus {
    Pending,
    Executing,
    Executed,
    Aborted,
    Validating,
    Validated,
    Invalidated,
}

/// One transaction's execution attempt state.
#[derive(Debug)]
pub struct Task<O> {
    index: TxIndex,
    incarnation: Incarnation,
    status: TaskStatus,
    /// Lower indices this task was found to depend on
    dependencies: BTreeSet<TxIndex>,
    /// Dependency that gates the next execution
    priority_dependency: Option<TxIndex>,
    /// Speculative output of the latest execution
    result: Option<O>,
    /// Hit a resource cap; only runs on the sequential path
    sequential_only: bool,
    executions: u32,
    latency: Duration,
}

impl<O> Task<O> {
    pub fn new(index: TxIndex) -> Self {
        Self {
            index,
            incarnation: 0,
            status: TaskStatus::Pending,
            dependencies: BTreeSet::new(),
            priority_dependency: None,
            result: None,
            sequential_only: false,
            executions: 0,
            latency: Duration::ZERO,
        }
    }

    pub fn index(&self) -> TxIndex {
        self.index
    }

    pub fn incarnation(&self) -> Incarnation {
        self.incarnation
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    pub fn dependencies(&self) -> &BTreeSet<TxIndex> {
        &self.dependencies
    }

    pub fn priority_dependency(&self) -> Option<TxIndex> {
        self.priority_dependency
    }

    pub fn is_sequential_only(&self) -> bool {
        self.sequential_only
    }

    pub fn executions(&self) -> u32 {
        self.executions
    }

    /// Total time spent inside business logic across incarnations.
    pub fn latency(&self) -> Duration {
        self.latency
    }

    fn transition(&mut self, to: TaskStatus) -> Result<(), OccError> {
        if !is_valid_transition(self.status, to) {
            return Err(OccError::InvalidTransition {
                index: self.index,
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }

    /// Pending → Executing.
    pub fn begin_execution(&mut self) -> Result<Incarnation, OccError> {
        self.transition(TaskStatus::Executing)?;
        self.executions += 1;
        Ok(self.incarnation)
    }

    /// Executing → Executed, holding `result` until validation.
    pub fn finish_execution(&mut self, result: O, elapsed: Duration) -> Result<(), OccError> {
        self.transition(TaskStatus::Executed)?;
        self.latency += elapsed;
        self.result = Some(result);
        Ok(())
    }

    /// Executing → Aborted. Dependencies at or above the task's own index are
    /// ignored: they cannot gate progress.
    pub fn abort(&mut self, dependency: Option<TxIndex>, elapsed: Duration) -> Result<(), OccError> {
        self.transition(TaskStatus::Aborted)?;
        self.latency += elapsed;
        self.result = None;
        let index = self.index;
        if let Some(dep) = dependency.filter(|dep| *dep < index) {
            self.dependencies.insert(dep);
            self.priority_dependency = Some(dep);
        }
        Ok(())
    }

    pub fn mark_sequential_only(&mut self) {
        self.sequential_only = true;
    }

    /// Aborted → Pending with a new incarnation.
    pub fn requeue(&mut self) -> Result<(), OccError> {
        self.transition(TaskStatus::Pending)?;
        self.incarnation += 1;
        Ok(())
    }

    /// Executed | Validated → Validating.
    pub fn begin_validation(&mut self) -> Result<(), OccError> {
        self.transition(TaskStatus::Validating)
    }

    /// Validating → Validated.
    pub fn mark_validated(&mut self) -> Result<(), OccError> {
        self.transition(TaskStatus::Validated)
    }

    /// Validating → Invalidated → Pending with a new incarnation.
    ///
    /// The highest conflicting index becomes the priority dependency: it is the
    /// closest writer below this task, so waiting on it never waits on a task
    /// that still has to wait on something this task does not.
    pub fn invalidate(&mut self, conflicts: &[TxIndex]) -> Result<(), OccError> {
        self.transition(TaskStatus::Invalidated)?;
        self.result = None;
        let index = self.index;
        let lower: Vec<TxIndex> = conflicts.iter().copied().filter(|dep| *dep < index).collect();
        self.priority_dependency = lower.iter().copied().max();
        self.dependencies.extend(lower);
        self.transition(TaskStatus::Pending)?;
        self.incarnation += 1;
        Ok(())
    }

    pub fn result(&self) -> Option<&O> {
        self.result.as_ref()
    }

    /// Releases the output. Only a validated task has one to release.
    pub fn into_result(self) -> Result<O, OccError> {
        match (self.status, self.result) {
            (TaskStatus::Validated, Some(result)) => Ok(result),
            _ => Err(OccError::IncompleteBatch { index: self.index }),
        }
    }
}
