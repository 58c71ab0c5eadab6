use serde::{Deserialize, Serialize};

/// Per-item stock summary, materialized after every replay.
///
/// Always derivable from the item's events plus the snapshot the replay
/// started from. `quantity_on_hand` may be negative while sales are
/// waiting for a purchase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventorySnapshot {
    pub quantity_on_hand: i64,
    /// Unit cost of the newest acquisition still relevant for costing.
    pub last_acquisition_cost: Option<i64>,
    /// Moving average unit cost; only maintained by the legacy policy.
    pub average_cost: Option<i64>,
}
