//! Ingestion and amendment flow for item stock ledgers.
//!
//! ```text
//! post_event
//!   ↓
//! 1. Validate input (before touching storage)
//!   ↓
//! 2. Lock the item's snapshot (unit of work)
//!   ↓
//! 3. Insert the event with its cost unset
//!   ↓
//! 4. Replay the whole history (or take the append fast path)
//!   ↓
//! 5. Write back changed costs, overwrite the snapshot, commit
//! ```
//!
//! Every step after the lock runs inside one [`ItemLedgerTx`]; an error
//! drops the unit and nothing is committed.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use stockbook_core::{DomainError, EventId, ItemId};
use stockbook_ledger::{
    InventoryEffect, InventorySnapshot, Item, ItemCosting, LedgerEvent, NewLedgerEvent,
    ReplayOutcome, replay, replay_legacy,
};

use crate::config::LedgerConfig;
use crate::store::{ItemLedgerTx, LedgerStore, LedgerStoreError};

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Store(#[from] LedgerStoreError),
}

impl LedgerError {
    /// Lock timeouts and write collisions; the caller may retry the request.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Domain(_) => false,
            Self::Store(err) => err.is_retryable(),
        }
    }
}

/// Costing policy for a bulk rebuild.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CostingPolicy {
    Fifo,
    /// Moving average or last purchase price, per [`LedgerConfig::legacy_cost_mode`].
    MovingAverageOrLpp,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RebuildReport {
    pub items_rebuilt: usize,
    pub events_updated: usize,
}

/// What one replay changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplaySummary {
    pub item_id: ItemId,
    pub events: usize,
    pub updated: usize,
    pub provisional: usize,
    pub snapshot: InventorySnapshot,
}

/// Stock ledger service over a [`LedgerStore`].
#[derive(Debug, Clone)]
pub struct StockLedger<S> {
    store: S,
    config: LedgerConfig,
}

impl<S> StockLedger<S>
where
    S: LedgerStore,
{
    pub fn new(store: S, config: LedgerConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    /// Record a new event and return it with its final cost.
    #[instrument(
        skip(self, input),
        fields(item_id = %input.item_id, kind = %input.kind, event_date = %input.event_date),
        err
    )]
    pub async fn post_event(&self, input: NewLedgerEvent) -> Result<LedgerEvent, LedgerError> {
        input.validate()?;

        let mut tx = self
            .store
            .lock_item(input.item_id, self.config.lock_timeout)
            .await?;

        let prior = tx.snapshot();
        let appended = match tx.latest_event_date().await? {
            Some(latest) => input.event_date >= latest,
            None => true,
        };
        let fast = if self.config.fast_path && appended {
            fast_path_snapshot(tx.item(), &prior, &input)
        } else {
            None
        };

        let inserted = tx.insert_event(&input).await?;

        let event = match fast {
            Some(snapshot) => {
                debug!(event_id = %inserted.id, "append without replay");
                tx.save_snapshot(&snapshot).await?;
                inserted
            }
            None => {
                let (events, _) = replay_locked(&mut tx, Costing::Fifo, &prior).await?;
                events
                    .into_iter()
                    .find(|e| e.id == inserted.id)
                    .ok_or(LedgerStoreError::EventNotFound(inserted.id))?
            }
        };

        tx.commit().await?;

        if event.is_cogs_provisional {
            warn!(event_id = %event.id, cogs = ?event.cogs, "cost is provisional until a purchase covers it");
        }
        Ok(event)
    }

    /// Replay one item's full history under its lock.
    #[instrument(skip(self), fields(item_id = %item_id), err)]
    pub async fn replay_item(&self, item_id: ItemId) -> Result<ReplaySummary, LedgerError> {
        let mut tx = self.store.lock_item(item_id, self.config.lock_timeout).await?;
        let prior = tx.snapshot();
        let (_, summary) = replay_locked(&mut tx, Costing::Fifo, &prior).await?;
        tx.commit().await?;
        Ok(summary)
    }

    /// Delete an event and replay the item in the same unit of work.
    #[instrument(skip(self), fields(item_id = %item_id, event_id = %event_id), err)]
    pub async fn delete_event(
        &self,
        item_id: ItemId,
        event_id: EventId,
    ) -> Result<ReplaySummary, LedgerError> {
        let mut tx = self.store.lock_item(item_id, self.config.lock_timeout).await?;
        let prior = tx.snapshot();
        tx.delete_event(event_id).await?;
        let (_, summary) = replay_locked(&mut tx, Costing::Fifo, &prior).await?;
        tx.commit().await?;
        Ok(summary)
    }

    /// Recompute every item from a reset snapshot, one item per unit of work.
    #[instrument(skip(self), err)]
    pub async fn rebuild_all(&self, policy: CostingPolicy) -> Result<RebuildReport, LedgerError> {
        let costing = match policy {
            CostingPolicy::Fifo => Costing::Fifo,
            CostingPolicy::MovingAverageOrLpp => Costing::Legacy(self.config.legacy_cost_mode),
        };
        let item_ids = self.store.item_ids().await?;
        info!(items = item_ids.len(), ?policy, "rebuilding stock ledgers");

        let mut report = RebuildReport::default();
        for item_id in item_ids {
            let mut tx = self.store.lock_item(item_id, self.config.lock_timeout).await?;
            let (_, summary) =
                replay_locked(&mut tx, costing, &InventorySnapshot::default()).await?;
            tx.commit().await?;

            report.items_rebuilt += 1;
            report.events_updated += summary.updated;
        }

        info!(
            items_rebuilt = report.items_rebuilt,
            events_updated = report.events_updated,
            "rebuild finished"
        );
        Ok(report)
    }
}

#[derive(Debug, Clone, Copy)]
enum Costing {
    Fifo,
    Legacy(stockbook_ledger::LegacyCostMode),
}

/// Snapshot after appending `input` when no replay can change earlier costs.
///
/// `None` means a full replay is required.
fn fast_path_snapshot(
    item: &Item,
    prior: &InventorySnapshot,
    input: &NewLedgerEvent,
) -> Option<InventorySnapshot> {
    // A legacy rebuild left costs a FIFO replay would rewrite.
    if prior.average_cost.is_some() {
        return None;
    }
    match (input.kind.inventory_effect(), item.costing()) {
        (InventoryEffect::None, _) => Some(*prior),
        (InventoryEffect::Acquire, ItemCosting::OwnedStock)
            if input.quantity > 0 && prior.quantity_on_hand >= 0 =>
        {
            Some(InventorySnapshot {
                quantity_on_hand: prior.quantity_on_hand.saturating_add(input.quantity),
                last_acquisition_cost: Some(input.unit_price),
                average_cost: None,
            })
        }
        (InventoryEffect::Acquire, ItemCosting::Consignment(_)) => Some(InventorySnapshot {
            quantity_on_hand: prior.quantity_on_hand.saturating_add(input.quantity),
            last_acquisition_cost: Some(input.unit_price),
            average_cost: None,
        }),
        _ => None,
    }
}

/// Replay the locked item, write back what changed, and save the snapshot.
///
/// Returns the events with their recomputed costs, in replay order.
async fn replay_locked<T>(
    tx: &mut T,
    costing: Costing,
    prior: &InventorySnapshot,
) -> Result<(Vec<LedgerEvent>, ReplaySummary), LedgerError>
where
    T: ItemLedgerTx,
{
    let mut events = tx.load_events().await?;
    let outcome: ReplayOutcome = match costing {
        Costing::Fifo => replay(tx.item(), &events, prior),
        Costing::Legacy(mode) => replay_legacy(tx.item(), &events, prior, mode),
    };

    let changes = outcome.changes(&events);
    tx.write_costs(&changes).await?;
    tx.save_snapshot(&outcome.snapshot).await?;
    outcome.apply_to(&mut events);

    let summary = ReplaySummary {
        item_id: tx.item().id,
        events: events.len(),
        updated: changes.len(),
        provisional: outcome.provisional_count(),
        snapshot: outcome.snapshot,
    };
    info!(
        item_id = %summary.item_id,
        events = summary.events,
        updated = summary.updated,
        provisional = summary.provisional,
        quantity_on_hand = summary.snapshot.quantity_on_hand,
        "replayed stock ledger"
    );
    Ok((events, summary))
}
