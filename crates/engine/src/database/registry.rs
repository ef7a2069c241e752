//! Global database registry for singleton management
//!
//! Ensures only one database instance exists per filesystem path, so every
//! connection to a directory shares one snapshot registry and one write
//! lock. Uses weak references to allow cleanup when all handles are dropped.

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Weak;

use super::DatabaseInner;

/// Global registry of open databases (canonical path -> weak reference)
pub(crate) static OPEN_DATABASES: Lazy<Mutex<HashMap<PathBuf, Weak<DatabaseInner>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));
