use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use tokio::sync::{Mutex as ItemLock, OwnedMutexGuard};

use stockbook_core::{EventId, ItemId};
use stockbook_ledger::{
    CostUpdate, InventorySnapshot, Item, LedgerEvent, NewLedgerEvent, replay_order,
};

use super::{ItemLedgerTx, LedgerStore, LedgerStoreError};

#[derive(Debug, Clone)]
struct ItemRecord {
    item: Item,
    snapshot: InventorySnapshot,
    events: Vec<LedgerEvent>,
}

#[derive(Debug, Default)]
struct Inner {
    items: RwLock<HashMap<ItemId, ItemRecord>>,
    locks: Mutex<HashMap<ItemId, Arc<ItemLock<()>>>>,
    next_event_id: AtomicI64,
}

/// In-memory ledger store.
///
/// Intended for tests/dev. Each item has its own async mutex standing in for
/// the snapshot row lock; a unit of work edits a private copy of the item's
/// ledger and writes its events and snapshot back on commit.
#[derive(Debug, Clone, Default)]
pub struct InMemoryLedgerStore {
    inner: Arc<Inner>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace catalog data for an item. Existing events are kept.
    pub fn register_item(&self, item: Item) -> Result<(), LedgerStoreError> {
        let mut items = self.inner.write_items()?;
        match items.get_mut(&item.id) {
            Some(record) => record.item = item,
            None => {
                items.insert(
                    item.id,
                    ItemRecord {
                        item,
                        snapshot: InventorySnapshot::default(),
                        events: Vec::new(),
                    },
                );
            }
        }
        Ok(())
    }

    fn record(&self, item_id: ItemId) -> Result<ItemRecord, LedgerStoreError> {
        let items = self.inner.read_items()?;
        items
            .get(&item_id)
            .cloned()
            .ok_or(LedgerStoreError::ItemNotFound(item_id))
    }

    fn item_lock(&self, item_id: ItemId) -> Result<Arc<ItemLock<()>>, LedgerStoreError> {
        let mut locks = self
            .inner
            .locks
            .lock()
            .map_err(|_| LedgerStoreError::Backend("lock poisoned".to_string()))?;
        Ok(locks.entry(item_id).or_default().clone())
    }
}

impl Inner {
    fn read_items(
        &self,
    ) -> Result<std::sync::RwLockReadGuard<'_, HashMap<ItemId, ItemRecord>>, LedgerStoreError> {
        self.items
            .read()
            .map_err(|_| LedgerStoreError::Backend("lock poisoned".to_string()))
    }

    fn write_items(
        &self,
    ) -> Result<std::sync::RwLockWriteGuard<'_, HashMap<ItemId, ItemRecord>>, LedgerStoreError> {
        self.items
            .write()
            .map_err(|_| LedgerStoreError::Backend("lock poisoned".to_string()))
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    type Tx = InMemoryItemTx;

    async fn lock_item(
        &self,
        item_id: ItemId,
        timeout: Duration,
    ) -> Result<Self::Tx, LedgerStoreError> {
        let lock = self.item_lock(item_id)?;
        let guard = tokio::time::timeout(timeout, lock.lock_owned())
            .await
            .map_err(|_| LedgerStoreError::LockTimeout { item_id })?;

        // Read under the lock so the copy reflects the last commit.
        let record = self.record(item_id)?;
        Ok(InMemoryItemTx {
            inner: Arc::clone(&self.inner),
            record,
            _guard: guard,
        })
    }

    async fn item_ids(&self) -> Result<Vec<ItemId>, LedgerStoreError> {
        let items = self.inner.read_items()?;
        let mut ids: Vec<ItemId> = items.keys().copied().collect();
        ids.sort();
        Ok(ids)
    }

    async fn snapshot(&self, item_id: ItemId) -> Result<InventorySnapshot, LedgerStoreError> {
        Ok(self.record(item_id)?.snapshot)
    }

    async fn events(&self, item_id: ItemId) -> Result<Vec<LedgerEvent>, LedgerStoreError> {
        let record = self.record(item_id)?;
        Ok(replay_order(&record.events).into_iter().cloned().collect())
    }
}

/// Unit of work over an [`InMemoryLedgerStore`] item.
#[derive(Debug)]
pub struct InMemoryItemTx {
    inner: Arc<Inner>,
    record: ItemRecord,
    _guard: OwnedMutexGuard<()>,
}

#[async_trait]
impl ItemLedgerTx for InMemoryItemTx {
    fn item(&self) -> &Item {
        &self.record.item
    }

    fn snapshot(&self) -> InventorySnapshot {
        self.record.snapshot
    }

    async fn latest_event_date(&mut self) -> Result<Option<NaiveDate>, LedgerStoreError> {
        Ok(self.record.events.iter().map(|e| e.event_date).max())
    }

    async fn insert_event(
        &mut self,
        event: &NewLedgerEvent,
    ) -> Result<LedgerEvent, LedgerStoreError> {
        if event.item_id != self.record.item.id {
            return Err(LedgerStoreError::Backend(format!(
                "event for item {} written through the ledger of item {}",
                event.item_id, self.record.item.id
            )));
        }
        let id = EventId::new(self.inner.next_event_id.fetch_add(1, Ordering::SeqCst) + 1);
        let stored = event.clone().into_event(id);
        self.record.events.push(stored.clone());
        Ok(stored)
    }

    async fn delete_event(&mut self, event_id: EventId) -> Result<(), LedgerStoreError> {
        let before = self.record.events.len();
        self.record.events.retain(|e| e.id != event_id);
        if self.record.events.len() == before {
            return Err(LedgerStoreError::EventNotFound(event_id));
        }
        Ok(())
    }

    async fn load_events(&mut self) -> Result<Vec<LedgerEvent>, LedgerStoreError> {
        Ok(replay_order(&self.record.events).into_iter().cloned().collect())
    }

    async fn write_costs(&mut self, updates: &[CostUpdate]) -> Result<(), LedgerStoreError> {
        for update in updates {
            let event = self
                .record
                .events
                .iter_mut()
                .find(|e| e.id == update.event_id)
                .ok_or(LedgerStoreError::EventNotFound(update.event_id))?;
            event.cogs = update.cogs;
            event.is_cogs_provisional = update.is_provisional;
        }
        Ok(())
    }

    async fn save_snapshot(
        &mut self,
        snapshot: &InventorySnapshot,
    ) -> Result<(), LedgerStoreError> {
        self.record.snapshot = *snapshot;
        Ok(())
    }

    /// Catalog data is left alone; `register_item` may have changed it while
    /// the unit was open.
    async fn commit(self) -> Result<(), LedgerStoreError> {
        let item_id = self.record.item.id;
        let mut items = self.inner.write_items()?;
        let stored = items
            .get_mut(&item_id)
            .ok_or(LedgerStoreError::ItemNotFound(item_id))?;
        stored.snapshot = self.record.snapshot;
        stored.events = self.record.events;
        Ok(())
    }
}
