//! Value objects for Parallel Execution
//!
//! Versions, read/write sets and iteration trackers. All ordered containers are
//! `BTreeMap`/`BTreeSet` so that anything derived from them is deterministic.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Position of a transaction in the batch.
pub type TxIndex = usize;

/// Number of times a task has been (re)started.
pub type Incarnation = u32;

/// Raw store key.
pub type Key = Vec<u8>;

/// Raw store value.
pub type Value = Vec<u8>;

/// Buffered writes of one incarnation. `None` is a tombstone.
pub type WriteSet = BTreeMap<Key, Option<Value>>;

/// Reads observed by one incarnation. The first read of a key is kept.
pub type ReadSet = BTreeMap<Key, ReadRecord>;

/// Identity of one published writeset.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Version {
    pub index: TxIndex,
    pub incarnation: Incarnation,
}

impl Version {
    pub fn new(index: TxIndex, incarnation: Incarnation) -> Self {
        Self { index, incarnation }
    }
}

/// What a task observed for one key.
///
/// `version` is `None` when the value came from the parent store. A later read
/// of the same key that resolved to another writer lands in `conflicting`;
/// such a record never validates.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReadRecord {
    pub value: Option<Value>,
    pub version: Option<Version>,
    pub conflicting: Vec<Option<Version>>,
}

impl ReadRecord {
    pub fn new(value: Option<Value>, version: Option<Version>) -> Self {
        Self {
            value,
            version,
            conflicting: Vec::new(),
        }
    }

    /// Notes a repeated read of the same key.
    pub fn observe(&mut self, version: Option<Version>) {
        if version != self.version && !self.conflicting.contains(&version) {
            self.conflicting.push(version);
        }
    }

    /// Whether every read of the key saw the same writer.
    pub fn is_consistent(&self) -> bool {
        self.conflicting.is_empty()
    }

    /// Indices of every in-batch writer this record observed.
    pub fn writers(&self) -> impl Iterator<Item = TxIndex> + '_ {
        std::iter::once(self.version)
            .chain(self.conflicting.iter().copied())
            .flatten()
            .map(|version| version.index)
    }
}

/// Result of a multi-version lookup below some index.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MvRead {
    /// Latest lower writer stored a value
    Value { value: Value, version: Version },
    /// Latest lower writer deleted the key
    Deleted { version: Version },
    /// Latest lower writer has not finished; the reader depends on it
    Estimate { version: Version },
    /// No lower writer; fall through to the parent store
    NotFound,
}

impl MvRead {
    /// Writer identity, if any writer in the batch was found.
    pub fn version(&self) -> Option<Version> {
        match self {
            MvRead::Value { version, .. }
            | MvRead::Deleted { version }
            | MvRead::Estimate { version } => Some(*version),
            MvRead::NotFound => None,
        }
    }

    pub fn is_estimate(&self) -> bool {
        matches!(self, MvRead::Estimate { .. })
    }
}

/// Snapshot of one range scan, replayed at validation time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IterationTracker {
    pub start: Option<Key>,
    pub end: Option<Key>,
    pub ascending: bool,
    /// Own writes inside `[start, end)` when the iterator was opened
    pub writeset: WriteSet,
    /// Keys handed to business logic, in iteration order
    pub iterated_keys: Vec<Key>,
    /// Whether the scan ran to the end of its range
    pub exhausted: bool,
}

impl IterationTracker {
    pub fn new(start: Option<Key>, end: Option<Key>, ascending: bool, writeset: WriteSet) -> Self {
        Self {
            start,
            end,
            ascending,
            writeset,
            iterated_keys: Vec::new(),
            exhausted: false,
        }
    }

    /// Whether `key` lies in `[start, end)`.
    pub fn contains(&self, key: &[u8]) -> bool {
        in_range(key, self.start.as_deref(), self.end.as_deref())
    }
}

/// Half-open range check with open bounds.
pub fn in_range(key: &[u8], start: Option<&[u8]>, end: Option<&[u8]>) -> bool {
    start.map_or(true, |s| key >= s) && end.map_or(true, |e| key < e)
}
