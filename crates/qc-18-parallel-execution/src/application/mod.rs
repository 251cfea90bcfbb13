//! Application layer: batch scheduling and the service facade.

pub mod cancellation;
pub mod scheduler;
pub mod service;

pub use cancellation::CancellationToken;
pub use scheduler::Scheduler;
pub use service::ParallelExecutionService;
