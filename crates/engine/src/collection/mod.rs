//! Collection views
//!
//! Views bind a declared `Collection` to one connection's local storage and
//! one transaction's store view:
//! - `ReadCollection`: cached point lookups, scans, counts, observer
//!   registration and extension queries
//! - `ReadWriteCollection`: everything above plus mutations that keep the
//!   cache, change set, pending cache updates and extensions in step
//! - `ValuesSequence`: lazy scan over every value, bypassing the cache

mod read;
mod read_write;
mod values;

pub use read::ReadCollection;
pub use read_write::ReadWriteCollection;
pub use values::{KeyedValuesSequence, ValuesSequence};
