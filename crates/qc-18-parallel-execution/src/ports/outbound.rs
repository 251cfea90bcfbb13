//! Outbound Ports (Driven Ports / SPI)
//!
//! The durable store underneath the engine and the business logic it runs.

use crate::domain::errors::{ExecutionAbort, StoreError};
use crate::domain::value_objects::{Key, Value};
use crate::multiversion::VersionIndexedStore;

/// Ordered key/value iterator handed out by a `ParentStore`.
pub type KvIter<'a> = Box<dyn Iterator<Item = (Key, Value)> + 'a>;

/// Ordered byte-key store the batch is committed into.
///
/// Reads happen concurrently from every worker; writes only happen once, at
/// flush, through an exclusive borrow.
pub trait ParentStore: Send + Sync {
    fn get(&self, key: &[u8]) -> Result<Option<Value>, StoreError>;

    fn set(&mut self, key: Key, value: Value) -> Result<(), StoreError>;

    fn delete(&mut self, key: &[u8]) -> Result<(), StoreError>;

    /// Iterate `[start, end)`; `None` bounds are open.
    fn iterate<'a>(
        &'a self,
        start: Option<&[u8]>,
        end: Option<&[u8]>,
        ascending: bool,
    ) -> Result<KvIter<'a>, StoreError>;
}

/// Business logic applied to each transaction of a batch.
///
/// Implementations must be deterministic: the same transaction against the
/// same visible state must produce the same writes, since every transaction
/// may be executed several times. Failures that belong to the transaction
/// (insufficient funds, exhausted gas, ...) are part of `Output`; only
/// store-level signals travel through `ExecutionAbort`.
pub trait TransactionExecutor: Send + Sync {
    type Transaction: Sync;
    type Output: Send;

    fn execute(
        &self,
        store: &mut VersionIndexedStore<'_>,
        tx: &Self::Transaction,
    ) -> Result<Self::Output, ExecutionAbort>;
}
