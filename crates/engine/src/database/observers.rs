//! Permanent change set observers
//!
//! Observers are registered per collection and outlive the transaction that
//! registered them. After every committed write transaction, each touched
//! collection's change set is delivered once to each of its observers, in
//! commit order.

use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;
use turf_core::{ChangeSet, ObserverToken};

/// Callback receiving the change set of one committed transaction
pub type ChangeSetObserver = Arc<dyn Fn(&ChangeSet) + Send + Sync>;

/// Observers of every collection of one database
#[derive(Default)]
pub struct ObserverRegistry {
    observers: DashMap<String, Vec<(ObserverToken, ChangeSetObserver)>>,
}

impl ObserverRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `observer` for `collection`
    pub fn register(&self, collection: &str, observer: ChangeSetObserver) -> ObserverToken {
        let token = ObserverToken::new();
        self.observers
            .entry(collection.to_string())
            .or_default()
            .push((token, observer));
        debug!(target: "turf::txn", collection, %token, "Registered change set observer");
        token
    }

    /// Remove a previously registered observer; unknown tokens are ignored
    pub fn unregister(&self, collection: &str, token: ObserverToken) -> bool {
        let Some(mut list) = self.observers.get_mut(collection) else {
            return false;
        };
        let before = list.len();
        list.retain(|(t, _)| *t != token);
        before != list.len()
    }

    /// Number of observers registered for `collection`
    pub fn count(&self, collection: &str) -> usize {
        self.observers.get(collection).map_or(0, |l| l.len())
    }

    /// Deliver `change_set` to every observer of its collection
    pub fn notify(&self, change_set: &ChangeSet) {
        // Copy out so callbacks run without holding the shard lock
        let observers: Vec<ChangeSetObserver> = match self.observers.get(change_set.collection()) {
            Some(list) => list.iter().map(|(_, o)| Arc::clone(o)).collect(),
            None => return,
        };
        for observer in observers {
            observer(change_set);
        }
    }
}
