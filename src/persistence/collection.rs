//! Owned, persisted collections.
//!
//! A `Collection` is the only way engines touch shared state: take a
//! `snapshot()` for read-only work, or `lock()` for exclusive
//! read-compute-`commit()`. A commit persists first and only then swaps the
//! in-memory contents, so a failed write leaves both sides as they were.

use anyhow::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};

use super::{load_slot, Slot, StateStore};
use crate::error::EngineError;

pub struct Collection<T> {
    slot: Slot,
    store: Arc<dyn StateStore>,
    items: Mutex<Vec<T>>,
}

impl<T> Collection<T>
where
    T: Clone + Serialize + DeserializeOwned + Send,
{
    /// Read the slot whole from the store
    pub fn load(slot: Slot, store: Arc<dyn StateStore>) -> Result<Self> {
        let items = load_slot(store.as_ref(), slot)?;
        Ok(Self {
            slot,
            store,
            items: Mutex::new(items),
        })
    }

    pub fn slot(&self) -> Slot {
        self.slot
    }

    pub async fn snapshot(&self) -> Vec<T> {
        self.items.lock().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.items.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.items.lock().await.is_empty()
    }

    /// Exclusive access until the guard drops
    pub async fn lock(&self) -> CollectionGuard<'_, T> {
        CollectionGuard {
            slot: self.slot,
            store: self.store.as_ref(),
            items: self.items.lock().await,
        }
    }
}

pub struct CollectionGuard<'a, T> {
    slot: Slot,
    store: &'a dyn StateStore,
    items: MutexGuard<'a, Vec<T>>,
}

impl<'a, T: Serialize> CollectionGuard<'a, T> {
    pub fn items(&self) -> &[T] {
        &self.items
    }

    /// Persist `next` and make it the current state
    pub fn commit(&mut self, next: Vec<T>) -> Result<(), EngineError> {
        let json = serde_json::to_string_pretty(&next).map_err(|e| EngineError::Persistence {
            slot: self.slot,
            source: e.into(),
        })?;
        self.store
            .save(self.slot, &json)
            .map_err(|source| EngineError::Persistence {
                slot: self.slot,
                source,
            })?;
        *self.items = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::MemoryStore;

    #[tokio::test]
    async fn commit_persists_then_replaces() {
        let store = Arc::new(MemoryStore::new());
        let collection: Collection<u32> =
            Collection::load(Slot::PendingSignals, store.clone()).unwrap();

        {
            let mut guard = collection.lock().await;
            guard.commit(vec![1, 2, 3]).unwrap();
            assert_eq!(guard.items(), &[1, 2, 3]);
        }

        assert_eq!(collection.snapshot().await, vec![1, 2, 3]);
        let persisted: Vec<u32> =
            serde_json::from_str(&store.raw(Slot::PendingSignals).unwrap()).unwrap();
        assert_eq!(persisted, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn failed_write_keeps_memory_untouched() {
        let store = Arc::new(MemoryStore::new().with_slot(Slot::ActiveTrades, "[7]"));
        let collection: Collection<u32> =
            Collection::load(Slot::ActiveTrades, store.clone()).unwrap();

        store.set_fail_writes(true);
        let err = collection.lock().await.commit(vec![]).unwrap_err();
        assert!(matches!(err, EngineError::Persistence { slot: Slot::ActiveTrades, .. }));

        assert_eq!(collection.snapshot().await, vec![7]);
        assert_eq!(store.raw(Slot::ActiveTrades).as_deref(), Some("[7]"));
    }
}
