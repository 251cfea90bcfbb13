//! Inbound Ports (Driving Ports / API)

use crate::application::cancellation::CancellationToken;
use crate::domain::errors::OccError;
use crate::metrics::BatchMetrics;
use crate::ports::outbound::ParentStore;

/// Outcome of a fully committed batch.
#[derive(Debug)]
pub struct BatchOutcome<O> {
    /// One output per input transaction, index-aligned
    pub results: Vec<O>,
    pub metrics: BatchMetrics,
}

/// Primary Parallel Execution API
pub trait ParallelExecutionApi: Send + Sync {
    type Transaction;
    type Output;

    /// Apply `transactions` to `parent` with a final state equal to applying
    /// them one by one in index order.
    ///
    /// Either every result is returned and the batch is committed, or an
    /// error is returned and `parent` is untouched.
    fn execute_block<S: ParentStore>(
        &self,
        parent: &mut S,
        transactions: &[Self::Transaction],
    ) -> Result<BatchOutcome<Self::Output>, OccError>;

    /// Token that cancels in-flight and future batches of this executor.
    fn cancellation_token(&self) -> CancellationToken;
}
