//! Change sets
//!
//! A change set is the ordered record of key-level mutations a single write
//! transaction made to one collection. Entries are never collapsed: a key
//! written three times shows up three times, in issue order, so observers see
//! the full history of the transaction.

/// One key-level mutation
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Change {
    /// A value was stored under a key that had no row
    Inserted(String),
    /// A value replaced the existing value of a key
    Updated(String),
    /// The value for a key was removed
    Removed(String),
    /// Every value in the collection was removed
    AllRemoved,
}

impl Change {
    /// Key this change concerns, `None` for `AllRemoved`
    pub fn key(&self) -> Option<&str> {
        match self {
            Change::Inserted(k) | Change::Updated(k) | Change::Removed(k) => Some(k),
            Change::AllRemoved => None,
        }
    }
}

/// Ordered mutations of one collection within one transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeSet {
    collection: String,
    changes: Vec<Change>,
}

impl ChangeSet {
    /// Create an empty change set for `collection`
    pub fn new(collection: impl Into<String>) -> Self {
        ChangeSet {
            collection: collection.into(),
            changes: Vec::new(),
        }
    }

    /// Name of the collection these changes were made to
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Changes in issue order
    pub fn changes(&self) -> &[Change] {
        &self.changes
    }

    /// Number of recorded changes
    pub fn len(&self) -> usize {
        self.changes.len()
    }

    /// True if nothing was recorded
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Record an insert of `key`
    pub fn record_value_inserted(&mut self, key: &str) {
        self.changes.push(Change::Inserted(key.to_string()));
    }

    /// Record an update of `key`
    pub fn record_value_updated(&mut self, key: &str) {
        self.changes.push(Change::Updated(key.to_string()));
    }

    /// Record a removal of `key`
    pub fn record_value_removed(&mut self, key: &str) {
        self.changes.push(Change::Removed(key.to_string()));
    }

    /// Record removal of every value
    pub fn record_all_values_removed(&mut self) {
        self.changes.push(Change::AllRemoved);
    }

    /// True if `key` was touched, directly or by a remove-all
    pub fn has_change_for_key(&self, key: &str) -> bool {
        self.changes.iter().any(|c| match c.key() {
            Some(k) => k == key,
            None => true,
        })
    }

    /// True if a remove-all was recorded
    pub fn all_values_removed(&self) -> bool {
        self.changes.contains(&Change::AllRemoved)
    }

    /// Drop every recorded change
    pub fn clear(&mut self) {
        self.changes.clear();
    }

    /// Copy out the current changes and clear this set
    pub fn drain(&mut self) -> ChangeSet {
        ChangeSet {
            collection: self.collection.clone(),
            changes: std::mem::take(&mut self.changes),
        }
    }
}
