//! Error types for Parallel Execution
//!
//! Only `OccError` ever reaches the caller of a batch. `ExecutionAbort` is the
//! in-band signal business logic propagates with `?` and is consumed by the
//! scheduler.

use super::value_objects::{Incarnation, TxIndex};
use super::entities::TaskStatus;
use thiserror::Error;

/// Fatal errors: the batch is aborted and nothing is written to the parent store.
#[derive(Clone, Debug, Error)]
pub enum OccError {
    /// A key resolved to an estimate when the batch was flushed
    #[error("Key {key} resolves to an estimate at flush (writer {index})")]
    EstimateAtFlush { key: String, index: TxIndex },

    /// A writer tried to install a version older than the one already published
    #[error("Stale incarnation for tx {index}: {incarnation} < published {published}")]
    StaleIncarnation {
        index: TxIndex,
        incarnation: Incarnation,
        published: Incarnation,
    },

    /// Task state machine violation
    #[error("Invalid transition for tx {index}: {from:?} -> {to:?}")]
    InvalidTransition {
        index: TxIndex,
        from: TaskStatus,
        to: TaskStatus,
    },

    /// A dependency abort surfaced while executing sequentially
    #[error("Unexpected abort of tx {index} in sequential mode: blocked by {blocking_index}")]
    UnexpectedAbort {
        index: TxIndex,
        blocking_index: TxIndex,
    },

    /// A sequentially executed task failed its own validation
    #[error("Sequential validation failed for tx {index}: conflicts {conflicts:?}")]
    SequentialValidationFailed {
        index: TxIndex,
        conflicts: Vec<TxIndex>,
    },

    /// Resource bound hit with no sequential fallback left
    #[error("Resource bound exceeded by tx {index}: {resource} > {limit}")]
    ResourceBoundExceeded {
        index: TxIndex,
        resource: ResourceKind,
        limit: usize,
    },

    /// A task finished the batch without a released result
    #[error("Tx {index} has no validated result")]
    IncompleteBatch { index: TxIndex },

    /// Batch was cancelled before commit
    #[error("Batch cancelled")]
    Cancelled,

    /// Configuration rejected by validation
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Worker pool could not be built
    #[error("Worker pool error: {0}")]
    WorkerPool(String),

    /// Prometheus registration or encoding failure
    #[error("Metrics error: {0}")]
    Metrics(String),

    /// Parent store failure
    #[error("Parent store error: {0}")]
    Store(#[from] StoreError),
}

/// Errors raised by a `ParentStore` implementation.
#[derive(Clone, Debug, Error)]
pub enum StoreError {
    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Lock poisoned")]
    LockPoisoned,
}

/// Per-task resources with an explicit cap.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Readset,
    Writeset,
    Iterators,
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ResourceKind::Readset => "readset",
            ResourceKind::Writeset => "writeset",
            ResourceKind::Iterators => "iterators",
        };
        f.write_str(name)
    }
}

/// Why an execution stopped before producing an output.
///
/// Returned through `Result` from every store operation so business logic
/// forwards it with `?` at any call depth.
#[derive(Clone, Debug, Error)]
pub enum ExecutionAbort {
    /// The value for `key` is an estimate published by `blocking_index`
    #[error("Blocked on tx {blocking_index} (key {})", hex::encode(key))]
    Dependency { blocking_index: TxIndex, key: Vec<u8> },

    /// A per-task resource cap was reached
    #[error("Resource limit reached: {resource} (limit {limit})")]
    ResourceLimit { resource: ResourceKind, limit: usize },

    /// Unrecoverable failure underneath the store
    #[error(transparent)]
    Fatal(#[from] OccError),
}

impl From<StoreError> for ExecutionAbort {
    fn from(err: StoreError) -> Self {
        ExecutionAbort::Fatal(OccError::Store(err))
    }
}
