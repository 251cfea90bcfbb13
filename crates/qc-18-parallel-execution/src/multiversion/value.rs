//! Version chain of a single key.

use crate::domain::errors::OccError;
use crate::domain::value_objects::{Incarnation, MvRead, TxIndex, Value, Version};
use std::collections::BTreeMap;

/// One version of a key written by one transaction index.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValueItem {
    value: Option<Value>,
    version: Version,
    estimate: bool,
}

impl ValueItem {
    pub fn value(&self) -> Option<&Value> {
        self.value.as_ref()
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn index(&self) -> TxIndex {
        self.version.index
    }

    pub fn incarnation(&self) -> Incarnation {
        self.version.incarnation
    }

    pub fn is_deleted(&self) -> bool {
        self.value.is_none()
    }

    pub fn is_estimate(&self) -> bool {
        self.estimate
    }

    /// Lookup result a reader should see for this item.
    pub fn to_read(&self) -> MvRead {
        match (&self.value, self.estimate) {
            (_, true) => MvRead::Estimate {
                version: self.version,
            },
            (Some(value), false) => MvRead::Value {
                value: value.clone(),
                version: self.version,
            },
            (None, false) => MvRead::Deleted {
                version: self.version,
            },
        }
    }
}

/// All versions of one key in the current batch, keyed by writer index.
///
/// Keying by index makes "one live item per slot" structural: a newer
/// incarnation replaces the slot instead of appending to it.
#[derive(Debug, Default)]
pub struct MultiVersionValue {
    items: BTreeMap<TxIndex, ValueItem>,
}

impl MultiVersionValue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Item with the highest index.
    pub fn latest(&self) -> Option<&ValueItem> {
        self.items.values().next_back()
    }

    /// Highest-index item that is not an estimate.
    pub fn latest_non_estimate(&self) -> Option<&ValueItem> {
        self.items.values().rev().find(|item| !item.estimate)
    }

    /// First item strictly below `index`, walking downwards. Estimates are
    /// returned as-is: the caller must treat them as a dependency.
    pub fn latest_before(&self, index: TxIndex) -> Option<&ValueItem> {
        self.items.range(..index).next_back().map(|(_, item)| item)
    }

    pub fn set(&mut self, index: TxIndex, incarnation: Incarnation, value: Value) -> Result<(), OccError> {
        self.put(index, incarnation, Some(value), false)
    }

    pub fn delete(&mut self, index: TxIndex, incarnation: Incarnation) -> Result<(), OccError> {
        self.put(index, incarnation, None, false)
    }

    /// Marks the slot of `index` as an estimate, keeping any previous value.
    pub fn set_estimate(&mut self, index: TxIndex, incarnation: Incarnation) -> Result<(), OccError> {
        let value = self.items.get(&index).and_then(|item| item.value.clone());
        self.put(index, incarnation, value, true)
    }

    /// Retracts the slot of `index`.
    pub fn remove(&mut self, index: TxIndex) -> Option<ValueItem> {
        self.items.remove(&index)
    }

    pub fn get(&self, index: TxIndex) -> Option<&ValueItem> {
        self.items.get(&index)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    fn put(
        &mut self,
        index: TxIndex,
        incarnation: Incarnation,
        value: Option<Value>,
        estimate: bool,
    ) -> Result<(), OccError> {
        if let Some(existing) = self.items.get(&index) {
            if existing.incarnation() > incarnation {
                return Err(OccError::StaleIncarnation {
                    index,
                    incarnation,
                    published: existing.incarnation(),
                });
            }
        }
        self.items.insert(
            index,
            ValueItem {
                value,
                version: Version::new(index, incarnation),
                estimate,
            },
        );
        Ok(())
    }
}
