//! Identifier and classification types shared by every layer

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Snapshot number
///
/// Monotonically increasing, one per committed write transaction.
/// Zero means "nothing committed yet".
pub type SnapshotNumber = u64;

/// Row identity assigned by the store
///
/// Allocated once when a key is first inserted and kept for the lifetime
/// of that row. Extensions use it to correlate primary and derived rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RowId(pub i64);

impl RowId {
    /// Raw row identity
    pub fn as_i64(self) -> i64 {
        self.0
    }
}

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Classification of an upsert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RowChange {
    /// Key had no row; a new row identity was allocated
    Insert {
        /// Identity of the new row
        row_id: RowId,
    },
    /// Key already had a row; its identity is unchanged
    Update {
        /// Identity of the existing row
        row_id: RowId,
    },
}

impl RowChange {
    /// Row identity regardless of classification
    pub fn row_id(&self) -> RowId {
        match *self {
            RowChange::Insert { row_id } | RowChange::Update { row_id } => row_id,
        }
    }

    /// True for `Insert`
    pub fn is_insert(&self) -> bool {
        matches!(self, RowChange::Insert { .. })
    }
}

/// Opaque handle returned when a permanent change set observer is registered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverToken(Uuid);

impl ObserverToken {
    /// Allocate a new unique token
    pub fn new() -> Self {
        ObserverToken(Uuid::new_v4())
    }
}

impl Default for ObserverToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ObserverToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a connection within one database
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}
