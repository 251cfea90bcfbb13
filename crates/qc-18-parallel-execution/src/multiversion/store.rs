//! # Multi-Version Store
//!
//! Authoritative record of every in-flight version of the current batch and
//! the only place conflicts are decided.
//!
//! ## Layout
//!
//! - `values`: key → version chain, sharded by `DashMap` with a per-key
//!   `RwLock`, so writers of unrelated keys never serialize each other.
//! - `writeset_keys`, `readsets`, `iteratesets`: per-index bookkeeping used to
//!   retract stale keys and to replay a task's observations at validation.
//!
//! ## Visibility Rule
//!
//! Transaction `i` sees, for key `k`, the item with the highest index `< i`.
//! An estimate there is a hard dependency on its writer; no item means the
//! parent store value.

use super::iterator::replay_tracker;
use super::value::{MultiVersionValue, ValueItem};
use crate::domain::errors::OccError;
use crate::domain::value_objects::{
    Incarnation, IterationTracker, Key, MvRead, ReadSet, TxIndex, Value, WriteSet,
};
use crate::ports::outbound::ParentStore;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, trace};

type Chain = Arc<RwLock<MultiVersionValue>>;

/// Multi-version store for one batch.
#[derive(Debug, Default)]
pub struct MultiVersionStore {
    values: DashMap<Key, Chain>,
    writeset_keys: DashMap<TxIndex, Vec<Key>>,
    readsets: DashMap<TxIndex, ReadSet>,
    iteratesets: DashMap<TxIndex, Vec<IterationTracker>>,
}

impl MultiVersionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn chain(&self, key: &[u8]) -> Option<Chain> {
        self.values.get(key).map(|entry| Arc::clone(entry.value()))
    }

    fn chain_or_insert(&self, key: &[u8]) -> Chain {
        if let Some(chain) = self.chain(key) {
            return chain;
        }
        Arc::clone(self.values.entry(key.to_vec()).or_default().value())
    }

    // =========================================================================
    // READS
    // =========================================================================

    /// What transaction `index` should see for `key`.
    pub fn get_latest_before_index(&self, index: TxIndex, key: &[u8]) -> MvRead {
        let Some(chain) = self.chain(key) else {
            return MvRead::NotFound;
        };
        let chain = chain.read();
        chain
            .latest_before(index)
            .map_or(MvRead::NotFound, ValueItem::to_read)
    }

    /// Highest-index item for `key`, estimates included.
    pub fn get_latest(&self, key: &[u8]) -> Option<ValueItem> {
        let chain = self.chain(key)?;
        let chain = chain.read();
        chain.latest().cloned()
    }

    /// Whether a live (non-deleted, non-estimate) value is visible to `index`.
    pub fn has(&self, index: TxIndex, key: &[u8]) -> bool {
        matches!(self.get_latest_before_index(index, key), MvRead::Value { .. })
    }

    /// Number of keys with a version chain, including emptied chains.
    pub fn key_count(&self) -> usize {
        self.values.len()
    }

    // =========================================================================
    // WRITESETS
    // =========================================================================

    /// Publishes the writes of `(index, incarnation)`.
    ///
    /// Keys the previous incarnation wrote but this one did not are removed
    /// from their chains.
    pub fn set_writeset(
        &self,
        index: TxIndex,
        incarnation: Incarnation,
        writeset: &WriteSet,
    ) -> Result<(), OccError> {
        let previous = self
            .writeset_keys
            .remove(&index)
            .map(|(_, keys)| keys)
            .unwrap_or_default();
        for key in previous.iter().filter(|key| !writeset.contains_key(*key)) {
            if let Some(chain) = self.chain(key) {
                chain.write().remove(index);
            }
        }

        for (key, value) in writeset {
            let chain = self.chain_or_insert(key);
            let mut chain = chain.write();
            match value {
                Some(value) => chain.set(index, incarnation, value.clone())?,
                None => chain.delete(index, incarnation)?,
            }
        }

        self.writeset_keys
            .insert(index, writeset.keys().cloned().collect());
        trace!(
            tx_index = index,
            incarnation,
            keys = writeset.len(),
            retracted = previous.len().saturating_sub(writeset.len()),
            "writeset published"
        );
        Ok(())
    }

    /// Marks every key `index` would write as an estimate.
    ///
    /// `keys` are the writes of the aborted incarnation; keys still published
    /// by earlier incarnations of `index` are marked too.
    pub fn set_estimated_writeset<I>(
        &self,
        index: TxIndex,
        incarnation: Incarnation,
        keys: I,
    ) -> Result<(), OccError>
    where
        I: IntoIterator<Item = Key>,
    {
        let mut estimated: BTreeSet<Key> = keys.into_iter().collect();
        if let Some(published) = self.writeset_keys.get(&index) {
            estimated.extend(published.iter().cloned());
        }

        for key in &estimated {
            self.chain_or_insert(key)
                .write()
                .set_estimate(index, incarnation)?;
        }

        trace!(tx_index = index, incarnation, keys = estimated.len(), "estimates published");
        self.writeset_keys
            .insert(index, estimated.into_iter().collect());
        Ok(())
    }

    /// Turns every published write of `index` into an estimate and forgets
    /// what it observed.
    pub fn invalidate_writeset(&self, index: TxIndex, incarnation: Incarnation) -> Result<(), OccError> {
        for key in self.writeset_keys(index) {
            if let Some(chain) = self.chain(&key) {
                chain.write().set_estimate(index, incarnation)?;
            }
        }
        self.clear_readset(index);
        self.clear_iterateset(index);
        Ok(())
    }

    /// Keys currently published by `index`, sorted.
    pub fn writeset_keys(&self, index: TxIndex) -> Vec<Key> {
        self.writeset_keys
            .get(&index)
            .map(|keys| keys.value().clone())
            .unwrap_or_default()
    }

    /// Published keys of every index.
    pub fn all_writeset_keys(&self) -> BTreeMap<TxIndex, Vec<Key>> {
        self.writeset_keys
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect()
    }

    /// Sorted union of every key written by indices strictly below `index`.
    pub fn collect_iterator_items(&self, index: TxIndex) -> BTreeSet<Key> {
        let mut keys = BTreeSet::new();
        for entry in self.writeset_keys.iter() {
            if *entry.key() < index {
                keys.extend(entry.value().iter().cloned());
            }
        }
        keys
    }

    // =========================================================================
    // READSETS / ITERATESETS
    // =========================================================================

    pub fn set_readset(&self, index: TxIndex, readset: ReadSet) {
        self.readsets.insert(index, readset);
    }

    pub fn readset(&self, index: TxIndex) -> Option<ReadSet> {
        self.readsets.get(&index).map(|readset| readset.value().clone())
    }

    pub fn clear_readset(&self, index: TxIndex) {
        self.readsets.remove(&index);
    }

    pub fn set_iterateset(&self, index: TxIndex, trackers: Vec<IterationTracker>) {
        self.iteratesets.insert(index, trackers);
    }

    pub fn iterateset(&self, index: TxIndex) -> Option<Vec<IterationTracker>> {
        self.iteratesets.get(&index).map(|trackers| trackers.value().clone())
    }

    pub fn clear_iterateset(&self, index: TxIndex) {
        self.iteratesets.remove(&index);
    }

    // =========================================================================
    // VALIDATION
    // =========================================================================

    /// Re-checks everything `index` observed against the current chains.
    ///
    /// Range scans are replayed first (phantom detection), then every read is
    /// compared by writer identity. Returns the validity and the sorted,
    /// deduplicated indices responsible for any mismatch.
    pub fn validate_transaction_state(
        &self,
        index: TxIndex,
        parent: &dyn ParentStore,
    ) -> Result<(bool, Vec<TxIndex>), OccError> {
        let mut valid = true;
        let mut conflicts = BTreeSet::new();

        if let Some(trackers) = self.iteratesets.get(&index) {
            for tracker in trackers.iter() {
                let check = replay_tracker(self, index, tracker, parent)?;
                if !check.valid {
                    valid = false;
                    conflicts.extend(check.conflicts);
                }
            }
        }

        if let Some(readset) = self.readsets.get(&index) {
            for (key, record) in readset.iter() {
                let latest = self.get_latest_before_index(index, key);
                if !record.is_consistent() {
                    valid = false;
                    conflicts.extend(record.writers());
                    conflicts.extend(latest.version().map(|current| current.index));
                    continue;
                }
                if !latest.is_estimate() && latest.version() == record.version {
                    continue;
                }
                valid = false;
                match (latest.version(), record.version) {
                    (Some(current), _) => conflicts.insert(current.index),
                    (None, Some(observed)) => conflicts.insert(observed.index),
                    (None, None) => false,
                };
            }
        }

        if !valid {
            trace!(tx_index = index, ?conflicts, "validation failed");
        }
        Ok((valid, conflicts.into_iter().collect()))
    }

    // =========================================================================
    // FLUSH
    // =========================================================================

    /// Writes the winning version of every key to `parent`, in key order.
    ///
    /// Every chain is resolved before the first write so that an unsound
    /// chain leaves `parent` untouched. Returns the number of keys written.
    pub fn write_latest_to_store<S>(&self, parent: &mut S) -> Result<usize, OccError>
    where
        S: ParentStore + ?Sized,
    {
        let mut keys: Vec<Key> = self.values.iter().map(|entry| entry.key().clone()).collect();
        keys.sort();

        let mut writes: Vec<(Key, Option<Value>)> = Vec::with_capacity(keys.len());
        for key in keys {
            let Some(chain) = self.chain(&key) else {
                continue;
            };
            let chain = chain.read();
            let Some(latest) = chain.latest() else {
                continue;
            };
            if latest.is_estimate() {
                return Err(OccError::EstimateAtFlush {
                    key: hex::encode(&key),
                    index: latest.index(),
                });
            }
            let value = chain
                .latest_non_estimate()
                .and_then(|item| item.value().cloned());
            writes.push((key, value));
        }

        let written = writes.len();
        for (key, value) in writes {
            match value {
                Some(value) => parent.set(key, value)?,
                None => parent.delete(&key)?,
            }
        }
        debug!(keys = written, "multi-version store flushed");
        Ok(written)
    }
}
