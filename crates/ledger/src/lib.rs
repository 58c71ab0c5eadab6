//! Stock ledger domain: cost layers, COGS replay and inventory snapshots.
//!
//! Pure, deterministic logic (no IO, no storage). Infra loads an item's
//! events, calls [`replay`] or [`replay_legacy`], and persists the outcome.

pub mod consignment;
pub mod event;
pub mod item;
pub mod layers;
pub mod legacy;
pub mod replay;
pub mod snapshot;

pub use event::{CostUpdate, EventCost, InventoryEffect, LedgerEvent, NewLedgerEvent, OperationKind};
pub use item::{CommissionPolicy, Item, ItemCosting, SettlementType};
pub use layers::{CostLayer, CostLayerQueue, Correction, CoverOutcome, Draw};
pub use legacy::{LegacyCostMode, replay_legacy};
pub use replay::{ReplayOutcome, replay, replay_order};
pub use snapshot::InventorySnapshot;
