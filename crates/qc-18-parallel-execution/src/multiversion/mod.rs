//! Multi-version state shared by the tasks of one batch.

pub mod iterator;
pub mod mvkv;
pub mod store;
pub mod value;

pub use iterator::VersionedIterator;
pub use mvkv::{StoreLimits, VersionIndexedStore};
pub use store::MultiVersionStore;
pub use value::{MultiVersionValue, ValueItem};
