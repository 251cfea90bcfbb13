//! Tracked range scans and their replay at validation time.

use super::mvkv::VersionIndexedStore;
use super::store::MultiVersionStore;
use crate::domain::errors::{ExecutionAbort, OccError};
use crate::domain::value_objects::{IterationTracker, Key, MvRead, TxIndex, Value};
use crate::ports::outbound::ParentStore;
use std::collections::BTreeSet;
use std::vec;

/// Iterator over the merged view of a `VersionIndexedStore`.
///
/// Yields `Err` once, on the first estimate or resource abort, and then ends.
/// Every yielded key is recorded on the task's tracker; running to the end
/// marks the tracker exhausted.
pub struct VersionedIterator<'s, 'a> {
    store: &'s mut VersionIndexedStore<'a>,
    tracker: usize,
    keys: vec::IntoIter<Key>,
    finished: bool,
}

impl<'s, 'a> VersionedIterator<'s, 'a> {
    pub(crate) fn new(store: &'s mut VersionIndexedStore<'a>, tracker: usize, keys: Vec<Key>) -> Self {
        Self {
            store,
            tracker,
            keys: keys.into_iter(),
            finished: false,
        }
    }
}

impl Iterator for VersionedIterator<'_, '_> {
    type Item = Result<(Key, Value), ExecutionAbort>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        while let Some(key) = self.keys.next() {
            let own = self.store.trackers[self.tracker].writeset.get(&key).cloned();
            let value = match own {
                Some(value) => value,
                None => match self.store.read_through(&key) {
                    Ok(value) => value,
                    Err(abort) => {
                        self.finished = true;
                        return Some(Err(abort));
                    }
                },
            };
            if let Some(value) = value {
                self.store.trackers[self.tracker].iterated_keys.push(key.clone());
                return Some(Ok((key, value)));
            }
        }

        self.store.trackers[self.tracker].exhausted = true;
        self.finished = true;
        None
    }
}

/// Outcome of replaying one tracker.
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct TrackerCheck {
    pub(crate) valid: bool,
    pub(crate) conflicts: Vec<TxIndex>,
}

/// Re-runs a recorded scan against the current chains.
///
/// The scan is valid when it would yield exactly the recorded keys; for a scan
/// that stopped early only the first `iterated_keys.len()` visible keys are
/// compared. Conflicts are the current writers of keys that appeared,
/// disappeared or are estimates.
pub(crate) fn replay_tracker(
    store: &MultiVersionStore,
    index: TxIndex,
    tracker: &IterationTracker,
    parent: &dyn ParentStore,
) -> Result<TrackerCheck, OccError> {
    let start = tracker.start.as_deref();
    let end = tracker.end.as_deref();

    let mut candidates: BTreeSet<Key> = store
        .collect_iterator_items(index)
        .into_iter()
        .filter(|key| tracker.contains(key))
        .collect();
    candidates.extend(tracker.writeset.keys().cloned());
    candidates.extend(parent.iterate(start, end, true)?.map(|(key, _)| key));

    let mut ordered: Vec<Key> = candidates.into_iter().collect();
    if !tracker.ascending {
        ordered.reverse();
    }

    let mut visible = Vec::new();
    let mut conflicts = BTreeSet::new();
    for key in ordered {
        if !tracker.exhausted && visible.len() >= tracker.iterated_keys.len() {
            break;
        }
        let present = match tracker.writeset.get(&key) {
            Some(own) => own.is_some(),
            None => match store.get_latest_before_index(index, &key) {
                MvRead::Estimate { version } => {
                    conflicts.insert(version.index);
                    continue;
                }
                MvRead::Value { .. } => true,
                MvRead::Deleted { .. } => false,
                MvRead::NotFound => parent.get(&key)?.is_some(),
            },
        };
        if present {
            visible.push(key);
        }
    }

    if conflicts.is_empty() && visible == tracker.iterated_keys {
        return Ok(TrackerCheck {
            valid: true,
            conflicts: Vec::new(),
        });
    }

    let now: BTreeSet<&Key> = visible.iter().collect();
    let then: BTreeSet<&Key> = tracker.iterated_keys.iter().collect();
    for key in now.symmetric_difference(&then) {
        if let Some(version) = store.get_latest_before_index(index, key).version() {
            conflicts.insert(version.index);
        }
    }

    Ok(TrackerCheck {
        valid: false,
        conflicts: conflicts.into_iter().collect(),
    })
}
