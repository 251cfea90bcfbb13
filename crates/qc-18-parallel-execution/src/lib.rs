//! # QC-18: Parallel Execution Subsystem
//!
//! Optimistic concurrency control for executing the transactions of a block
//! in parallel while committing exactly the state a sequential, in-order run
//! would produce.
//!
//! ## Architecture
//!
//! - **Domain**: Task state machine, versions, read/write sets, iteration trackers
//! - **Multiversion**: MultiVersionStore (shared versions) and VersionIndexedStore (per-task view)
//! - **Ports**: Inbound (ParallelExecutionApi) and Outbound (ParentStore, TransactionExecutor)
//! - **Application**: Scheduler (execute/validate rounds, sequential fallback) and service facade
//! - **Adapters**: In-memory ParentStore
//!
//! ## Example
//!
//! ```
//! use qc_18_parallel_execution::{
//!     ExecutionAbort, MemoryStore, OccConfig, ParallelExecutionApi, ParallelExecutionService,
//!     ParentStore, TransactionExecutor, VersionIndexedStore,
//! };
//!
//! struct Counter;
//!
//! impl TransactionExecutor for Counter {
//!     type Transaction = ();
//!     type Output = ();
//!
//!     fn execute(&self, store: &mut VersionIndexedStore<'_>, _tx: &()) -> Result<(), ExecutionAbort> {
//!         let n = store.get(b"n")?.map_or(0, |v| v[0]);
//!         store.set(b"n".to_vec(), vec![n + 1])
//!     }
//! }
//!
//! let service = ParallelExecutionService::with_config(Counter, OccConfig::default()).unwrap();
//! let mut parent = MemoryStore::new();
//! service.execute_block(&mut parent, &[(); 5]).unwrap();
//! assert_eq!(parent.get(b"n").unwrap(), Some(vec![5]));
//! ```

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod metrics;
pub mod multiversion;
pub mod ports;

pub use adapters::MemoryStore;
pub use application::{CancellationToken, ParallelExecutionService, Scheduler};
pub use config::OccConfig;
pub use domain::entities::*;
pub use domain::errors::{ExecutionAbort, OccError, ResourceKind, StoreError};
pub use domain::value_objects::*;
pub use metrics::BatchMetrics;
pub use multiversion::{MultiVersionStore, StoreLimits, VersionIndexedStore, VersionedIterator};
pub use ports::inbound::{BatchOutcome, ParallelExecutionApi};
pub use ports::outbound::{KvIter, ParentStore, TransactionExecutor};
