//! Ports module for Parallel Execution
//!
//! Defines inbound (API) and outbound (SPI) port traits.

pub mod inbound;
pub mod outbound;

pub use inbound::{BatchOutcome, ParallelExecutionApi};
pub use outbound::{KvIter, ParentStore, TransactionExecutor};
