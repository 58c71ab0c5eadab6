//! Stock ledger persistence boundary.
//!
//! A [`LedgerStore`] hands out one [`ItemLedgerTx`] per item: an exclusive,
//! atomic unit of work holding the item's snapshot lock. Everything written
//! through the unit becomes visible on [`ItemLedgerTx::commit`]; dropping
//! the unit without committing discards it.

pub mod in_memory;
pub mod postgres;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use thiserror::Error;

use stockbook_core::{EventId, ItemId};
use stockbook_ledger::{CostUpdate, InventorySnapshot, Item, LedgerEvent, NewLedgerEvent};

pub use in_memory::{InMemoryItemTx, InMemoryLedgerStore};
pub use postgres::{PostgresItemTx, PostgresLedgerStore};

/// Storage and locking failures.
#[derive(Debug, Error)]
pub enum LedgerStoreError {
    /// The item's snapshot lock was not acquired in time.
    #[error("timed out waiting for the ledger lock of item {item_id}")]
    LockTimeout { item_id: ItemId },

    #[error("item not found: {0}")]
    ItemNotFound(ItemId),

    #[error("ledger event not found: {0}")]
    EventNotFound(EventId),

    /// Concurrent writers collided (deadlock, serialization failure).
    #[error("concurrent ledger update: {0}")]
    Conflict(String),

    #[error("storage backend error: {0}")]
    Backend(String),
}

impl LedgerStoreError {
    /// Whether retrying the whole unit of work may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::LockTimeout { .. } | Self::Conflict(_))
    }
}

/// Per-item stock ledgers with exclusive, atomic write access.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    type Tx: ItemLedgerTx;

    /// Lock the item's snapshot and open a unit of work on its ledger.
    ///
    /// Waits at most `timeout`; fails with [`LedgerStoreError::LockTimeout`].
    async fn lock_item(&self, item_id: ItemId, timeout: Duration)
    -> Result<Self::Tx, LedgerStoreError>;

    async fn item_ids(&self) -> Result<Vec<ItemId>, LedgerStoreError>;

    /// Last committed snapshot; the default one if the item was never replayed.
    async fn snapshot(&self, item_id: ItemId) -> Result<InventorySnapshot, LedgerStoreError>;

    /// Committed events in replay order.
    async fn events(&self, item_id: ItemId) -> Result<Vec<LedgerEvent>, LedgerStoreError>;
}

/// One locked, atomic unit of work on a single item's ledger.
#[async_trait]
pub trait ItemLedgerTx: Send {
    fn item(&self) -> &Item;

    /// The snapshot as of lock acquisition, or as last saved in this unit.
    fn snapshot(&self) -> InventorySnapshot;

    async fn latest_event_date(&mut self) -> Result<Option<NaiveDate>, LedgerStoreError>;

    /// Persist a new event with its cost unset; assigns the next sequence id.
    async fn insert_event(&mut self, event: &NewLedgerEvent)
    -> Result<LedgerEvent, LedgerStoreError>;

    async fn delete_event(&mut self, event_id: EventId) -> Result<(), LedgerStoreError>;

    /// All events of the item, in replay order.
    async fn load_events(&mut self) -> Result<Vec<LedgerEvent>, LedgerStoreError>;

    /// Write back a batch of recomputed costs.
    async fn write_costs(&mut self, updates: &[CostUpdate]) -> Result<(), LedgerStoreError>;

    async fn save_snapshot(&mut self, snapshot: &InventorySnapshot)
    -> Result<(), LedgerStoreError>;

    async fn commit(self) -> Result<(), LedgerStoreError>;
}

#[async_trait]
impl<S> LedgerStore for Arc<S>
where
    S: LedgerStore + ?Sized,
{
    type Tx = S::Tx;

    async fn lock_item(
        &self,
        item_id: ItemId,
        timeout: Duration,
    ) -> Result<Self::Tx, LedgerStoreError> {
        (**self).lock_item(item_id, timeout).await
    }

    async fn item_ids(&self) -> Result<Vec<ItemId>, LedgerStoreError> {
        (**self).item_ids().await
    }

    async fn snapshot(&self, item_id: ItemId) -> Result<InventorySnapshot, LedgerStoreError> {
        (**self).snapshot(item_id).await
    }

    async fn events(&self, item_id: ItemId) -> Result<Vec<LedgerEvent>, LedgerStoreError> {
        (**self).events(item_id).await
    }
}
