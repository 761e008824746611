//! Thread-safe transactional wrapper around [`MemoryStore`].

use crate::memory::MemoryStore;
use parking_lot::{Mutex, MutexGuard};
use std::ops::{Deref, DerefMut};
use tracing::debug;

/// A [`MemoryStore`] shared between threads with all-or-nothing
/// transactions.
///
/// Transactions are serialized: [`SharedStore::begin`] blocks until the
/// previous transaction ends. A transaction works on a private copy of the
/// graph which replaces the committed state on [`Transaction::commit`] and
/// is discarded on [`Transaction::rollback`] or drop.
#[derive(Debug, Default)]
pub struct SharedStore {
    inner: Mutex<MemoryStore>,
}

impl SharedStore {
    pub fn new(store: MemoryStore) -> Self {
        Self {
            inner: Mutex::new(store),
        }
    }

    /// Starts a transaction.
    pub fn begin(&self) -> Transaction<'_> {
        let guard = self.inner.lock();
        let work = guard.clone();
        Transaction { guard, work }
    }

    /// Runs `f` inside a transaction, committing when it returns `Ok`.
    pub fn transaction<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut MemoryStore) -> Result<T, E>,
    {
        let mut txn = self.begin();
        match f(&mut txn) {
            Ok(value) => {
                txn.commit();
                Ok(value)
            }
            Err(err) => {
                txn.rollback();
                Err(err)
            }
        }
    }

    /// Returns a copy of the committed state.
    pub fn snapshot(&self) -> MemoryStore {
        self.inner.lock().clone()
    }

    pub fn into_inner(self) -> MemoryStore {
        self.inner.into_inner()
    }
}

impl From<MemoryStore> for SharedStore {
    fn from(store: MemoryStore) -> Self {
        SharedStore::new(store)
    }
}

/// An open unit of work on a [`SharedStore`].
///
/// Dereferences to the working copy, which implements
/// [`TopologyStore`](crate::TopologyStore).
pub struct Transaction<'a> {
    guard: MutexGuard<'a, MemoryStore>,
    work: MemoryStore,
}

impl Transaction<'_> {
    /// Publishes the working copy.
    pub fn commit(mut self) {
        debug!("Committing transaction");
        std::mem::swap(&mut *self.guard, &mut self.work);
    }

    /// Discards the working copy.
    pub fn rollback(self) {
        debug!("Rolling back transaction");
    }
}

impl Deref for Transaction<'_> {
    type Target = MemoryStore;

    fn deref(&self) -> &MemoryStore {
        &self.work
    }
}

impl DerefMut for Transaction<'_> {
    fn deref_mut(&mut self) -> &mut MemoryStore {
        &mut self.work
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::model::NodeStatus;
    use crate::store::TopologyStore;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    #[test]
    fn test_commit_publishes_changes() {
        let shared = SharedStore::default();
        let mut txn = shared.begin();
        txn.create_node("node1", NodeStatus::New).unwrap();
        txn.commit();

        assert!(shared.snapshot().find_node_by_hostname("node1").is_some());
    }

    #[test]
    fn test_drop_discards_changes() {
        let shared = SharedStore::default();
        {
            let mut txn = shared.begin();
            txn.create_node("node1", NodeStatus::New).unwrap();
        }
        assert!(shared.snapshot().find_node_by_hostname("node1").is_none());
    }

    #[test]
    fn test_transaction_rolls_back_on_error() {
        let shared = SharedStore::default();
        let result: Result<(), StoreError> = shared.transaction(|store| {
            store.create_node("node1", NodeStatus::New)?;
            store.create_node("node1", NodeStatus::New)?;
            Ok(())
        });

        assert!(result.is_err());
        let committed = shared.snapshot();
        assert!(committed.find_node_by_hostname("node1").is_none());
        assert_eq!(committed.mutation_count(), 0);
    }

    #[test]
    fn test_transactions_are_serialized() {
        let shared = Arc::new(SharedStore::default());
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let shared = Arc::clone(&shared);
                std::thread::spawn(move || {
                    shared
                        .transaction(|store| store.create_node(&format!("node{i}"), NodeStatus::New))
                        .unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let store = Arc::try_unwrap(shared).unwrap().into_inner();
        assert_eq!(store.state().nodes.len(), 4);
    }
}
