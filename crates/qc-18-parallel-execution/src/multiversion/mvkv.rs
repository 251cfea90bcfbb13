//! # Version-Indexed Store
//!
//! Task-private view over the multi-version store and the parent store.
//!
//! - Reads hit the task's own writes first, then the highest lower-index
//!   version, then the parent store. Every read that leaves the task is
//!   recorded for validation.
//! - Writes are buffered locally and published by the scheduler.
//! - An estimate aborts the read with `ExecutionAbort::Dependency`; nothing
//!   here ever waits on another task.
//! - The first abort is also kept on the store, so an executor that drops the
//!   `Err` still has its incarnation discarded.

use super::iterator::VersionedIterator;
use super::store::MultiVersionStore;
use crate::config::OccConfig;
use crate::domain::errors::{ExecutionAbort, OccError, ResourceKind};
use crate::domain::value_objects::{
    in_range, Incarnation, IterationTracker, Key, MvRead, ReadRecord, ReadSet, TxIndex, Value,
    WriteSet,
};
use crate::ports::outbound::ParentStore;
use std::collections::BTreeSet;

/// Per-incarnation resource caps. `None` lifts a cap.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StoreLimits {
    pub max_readset: Option<usize>,
    pub max_writeset: usize,
    pub max_iterators: Option<usize>,
}

impl StoreLimits {
    /// Caps used while tasks run speculatively.
    pub fn parallel(config: &OccConfig) -> Self {
        Self {
            max_readset: Some(config.max_readset_size),
            max_writeset: config.max_writeset_size,
            max_iterators: Some(config.max_iterators_per_task),
        }
    }

    /// Caps used on the sequential path, where scans and reads cannot race.
    pub fn sequential(config: &OccConfig) -> Self {
        Self {
            max_readset: None,
            max_writeset: config.max_writeset_size,
            max_iterators: None,
        }
    }
}

/// One task's isolated view of state for one incarnation.
pub struct VersionIndexedStore<'a> {
    index: TxIndex,
    incarnation: Incarnation,
    multiversion: &'a MultiVersionStore,
    parent: &'a dyn ParentStore,
    limits: StoreLimits,
    pub(crate) writeset: WriteSet,
    pub(crate) readset: ReadSet,
    pub(crate) trackers: Vec<IterationTracker>,
    aborted: Option<ExecutionAbort>,
}

impl<'a> VersionIndexedStore<'a> {
    pub fn new(
        index: TxIndex,
        incarnation: Incarnation,
        multiversion: &'a MultiVersionStore,
        parent: &'a dyn ParentStore,
        limits: StoreLimits,
    ) -> Self {
        Self {
            index,
            incarnation,
            multiversion,
            parent,
            limits,
            writeset: WriteSet::new(),
            readset: ReadSet::new(),
            trackers: Vec::new(),
            aborted: None,
        }
    }

    pub fn index(&self) -> TxIndex {
        self.index
    }

    pub fn incarnation(&self) -> Incarnation {
        self.incarnation
    }

    pub fn writeset(&self) -> &WriteSet {
        &self.writeset
    }

    pub fn readset(&self) -> &ReadSet {
        &self.readset
    }

    pub fn trackers(&self) -> &[IterationTracker] {
        &self.trackers
    }

    /// First abort raised by this incarnation, whether or not it was propagated.
    pub fn aborted(&self) -> Option<&ExecutionAbort> {
        self.aborted.as_ref()
    }

    pub(crate) fn take_abort(&mut self) -> Option<ExecutionAbort> {
        self.aborted.take()
    }

    fn fail(&mut self, abort: ExecutionAbort) -> ExecutionAbort {
        if self.aborted.is_none() {
            self.aborted = Some(abort.clone());
        }
        abort
    }

    pub fn get(&mut self, key: &[u8]) -> Result<Option<Value>, ExecutionAbort> {
        if let Some(own) = self.writeset.get(key) {
            return Ok(own.clone());
        }
        self.read_through(key)
    }

    pub fn has(&mut self, key: &[u8]) -> Result<bool, ExecutionAbort> {
        Ok(self.get(key)?.is_some())
    }

    pub fn set(&mut self, key: impl Into<Key>, value: impl Into<Value>) -> Result<(), ExecutionAbort> {
        self.write(key.into(), Some(value.into()))
    }

    pub fn delete(&mut self, key: impl Into<Key>) -> Result<(), ExecutionAbort> {
        self.write(key.into(), None)
    }

    /// Ascending scan over `[start, end)`.
    pub fn iterator(
        &mut self,
        start: Option<&[u8]>,
        end: Option<&[u8]>,
    ) -> Result<VersionedIterator<'_, 'a>, ExecutionAbort> {
        self.range(start, end, true)
    }

    /// Descending scan over `[start, end)`.
    pub fn reverse_iterator(
        &mut self,
        start: Option<&[u8]>,
        end: Option<&[u8]>,
    ) -> Result<VersionedIterator<'_, 'a>, ExecutionAbort> {
        self.range(start, end, false)
    }

    /// Opens a tracked scan over `[start, end)`.
    ///
    /// Candidate keys are the lower-index writesets, the task's own writes and
    /// the parent range. Own writes made after this call are not reflected in
    /// the returned iterator.
    pub fn range(
        &mut self,
        start: Option<&[u8]>,
        end: Option<&[u8]>,
        ascending: bool,
    ) -> Result<VersionedIterator<'_, 'a>, ExecutionAbort> {
        if let Some(max) = self.limits.max_iterators {
            if self.trackers.len() >= max {
                return Err(self.fail(ExecutionAbort::ResourceLimit {
                    resource: ResourceKind::Iterators,
                    limit: max,
                }));
            }
        }

        let mut candidates: BTreeSet<Key> = self
            .multiversion
            .collect_iterator_items(self.index)
            .into_iter()
            .filter(|key| in_range(key, start, end))
            .collect();
        let parent_keys = match self.parent.iterate(start, end, true) {
            Ok(iter) => iter.map(|(key, _)| key),
            Err(err) => return Err(self.fail(err.into())),
        };
        candidates.extend(parent_keys);

        let snapshot: WriteSet = self
            .writeset
            .iter()
            .filter(|(key, _)| in_range(key, start, end))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        candidates.extend(snapshot.keys().cloned());
        self.trackers.push(IterationTracker::new(
            start.map(<[u8]>::to_vec),
            end.map(<[u8]>::to_vec),
            ascending,
            snapshot,
        ));
        let tracker = self.trackers.len() - 1;

        let mut keys: Vec<Key> = candidates.into_iter().collect();
        if !ascending {
            keys.reverse();
        }
        Ok(VersionedIterator::new(self, tracker, keys))
    }

    /// Resolves `key` below this task's index and records the read.
    pub(crate) fn read_through(&mut self, key: &[u8]) -> Result<Option<Value>, ExecutionAbort> {
        let (value, version) = match self.multiversion.get_latest_before_index(self.index, key) {
            MvRead::Estimate { version } => {
                tracing::trace!(
                    tx_index = self.index,
                    blocking_index = version.index,
                    "read blocked on estimate"
                );
                return Err(self.fail(ExecutionAbort::Dependency {
                    blocking_index: version.index,
                    key: key.to_vec(),
                }));
            }
            MvRead::Value { value, version } => (Some(value), Some(version)),
            MvRead::Deleted { version } => (None, Some(version)),
            MvRead::NotFound => match self.parent.get(key) {
                Ok(value) => (value, None),
                Err(err) => return Err(self.fail(err.into())),
            },
        };

        if let Some(record) = self.readset.get_mut(key) {
            record.observe(version);
            return Ok(value);
        }
        if let Some(max) = self.limits.max_readset {
            if self.readset.len() >= max {
                return Err(self.fail(ExecutionAbort::ResourceLimit {
                    resource: ResourceKind::Readset,
                    limit: max,
                }));
            }
        }
        self.readset
            .insert(key.to_vec(), ReadRecord::new(value.clone(), version));
        Ok(value)
    }

    fn write(&mut self, key: Key, value: Option<Value>) -> Result<(), ExecutionAbort> {
        let max = self.limits.max_writeset;
        if !self.writeset.contains_key(&key) && self.writeset.len() >= max {
            return Err(self.fail(ExecutionAbort::ResourceLimit {
                resource: ResourceKind::Writeset,
                limit: max,
            }));
        }
        self.writeset.insert(key, value);
        Ok(())
    }

    /// Publishes writes, reads and scans of a completed execution.
    pub(crate) fn write_to_multiversion_store(self) -> Result<(), OccError> {
        self.multiversion
            .set_writeset(self.index, self.incarnation, &self.writeset)?;
        self.multiversion.set_readset(self.index, self.readset);
        self.multiversion.set_iterateset(self.index, self.trackers);
        Ok(())
    }

    /// Publishes the keys of an aborted execution as estimates.
    pub(crate) fn write_estimates_to_multiversion_store(self) -> Result<(), OccError> {
        self.multiversion.set_estimated_writeset(
            self.index,
            self.incarnation,
            self.writeset.into_keys(),
        )?;
        self.multiversion.clear_readset(self.index);
        self.multiversion.clear_iterateset(self.index);
        Ok(())
    }
}
