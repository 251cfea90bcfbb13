//! In-memory parent store
//!
//! Ordered `BTreeMap` backing for tests, benches and embedders that keep state
//! in memory. Iteration is half-open and honours both directions.

use crate::domain::errors::StoreError;
use crate::domain::value_objects::{Key, Value};
use crate::ports::outbound::{KvIter, ParentStore};
use std::collections::BTreeMap;
use std::ops::Bound;

/// In-memory implementation of ParentStore
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MemoryStore {
    entries: BTreeMap<Key, Value>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (Key, Value)>,
    {
        Self {
            entries: entries.into_iter().collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &BTreeMap<Key, Value> {
        &self.entries
    }
}

impl ParentStore for MemoryStore {
    fn get(&self, key: &[u8]) -> Result<Option<Value>, StoreError> {
        Ok(self.entries.get(key).cloned())
    }

    fn set(&mut self, key: Key, value: Value) -> Result<(), StoreError> {
        self.entries.insert(key, value);
        Ok(())
    }

    fn delete(&mut self, key: &[u8]) -> Result<(), StoreError> {
        self.entries.remove(key);
        Ok(())
    }

    fn iterate<'a>(
        &'a self,
        start: Option<&[u8]>,
        end: Option<&[u8]>,
        ascending: bool,
    ) -> Result<KvIter<'a>, StoreError> {
        // BTreeMap::range panics on inverted bounds
        if let (Some(s), Some(e)) = (start, end) {
            if s >= e {
                return Ok(Box::new(std::iter::empty()));
            }
        }
        let lower = start.map_or(Bound::Unbounded, |s| Bound::Included(s.to_vec()));
        let upper = end.map_or(Bound::Unbounded, |e| Bound::Excluded(e.to_vec()));
        let range = self
            .entries
            .range::<Key, _>((lower, upper))
            .map(|(k, v)| (k.clone(), v.clone()));
        if ascending {
            Ok(Box::new(range))
        } else {
            Ok(Box::new(range.rev()))
        }
    }
}
