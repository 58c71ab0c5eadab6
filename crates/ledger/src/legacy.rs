//! Legacy reconciliation policy: moving average valuation with sales priced
//! at the moving average or at the last purchase price.
//!
//! No lots are kept, so there are no negative layers and no provisional
//! costs. Consignment items keep their commission rule under this policy.

use serde::{Deserialize, Serialize};

use crate::consignment;
use crate::event::{EventCost, InventoryEffect, LedgerEvent};
use crate::item::{Item, ItemCosting};
use crate::layers::saturate;
use crate::replay::{ReplayOutcome, replay_order};
use crate::snapshot::InventorySnapshot;

/// Unit cost charged to sales under the legacy policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LegacyCostMode {
    MovingAverage,
    /// Last purchase price.
    #[default]
    LastPurchasePrice,
}

impl LegacyCostMode {
    /// Accepts `average`/`avg`/`moving-average` and `lpp`/`last-purchase-price`.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "average" | "avg" | "moving-average" => Some(Self::MovingAverage),
            "lpp" | "last-purchase-price" => Some(Self::LastPurchasePrice),
            _ => None,
        }
    }
}

/// Replay `events` under the legacy policy.
pub fn replay_legacy(
    item: &Item,
    events: &[LedgerEvent],
    prior: &InventorySnapshot,
    mode: LegacyCostMode,
) -> ReplayOutcome {
    let ordered = replay_order(events);
    let policy = match item.costing() {
        ItemCosting::OwnedStock => return moving_average(&ordered, prior, mode),
        ItemCosting::Consignment(policy) => policy,
    };
    consignment::replay(&ordered, policy, prior)
}

fn moving_average(
    events: &[&LedgerEvent],
    prior: &InventorySnapshot,
    mode: LegacyCostMode,
) -> ReplayOutcome {
    let mut quantity: i64 = 0;
    let mut average: Option<i64> = None;
    let mut last_buy: Option<i64> = None;
    let mut costs = Vec::with_capacity(events.len());

    for event in events {
        let cost = match event.kind.inventory_effect() {
            InventoryEffect::Acquire => {
                let after = quantity.saturating_add(event.quantity);
                if after > 0 {
                    let before = i128::from(quantity) * i128::from(average.unwrap_or(0));
                    let added = i128::from(event.quantity) * i128::from(event.unit_price);
                    let avg = (before + added) / i128::from(after);
                    average = Some(saturate(avg));
                }
                quantity = after;
                last_buy = Some(event.unit_price);
                EventCost::cleared(event.id)
            }
            InventoryEffect::Consume => {
                let base = match mode {
                    LegacyCostMode::MovingAverage => average,
                    LegacyCostMode::LastPurchasePrice => last_buy,
                };
                quantity = quantity.saturating_sub(event.quantity);
                EventCost::settled(event.id, base.unwrap_or(0).saturating_mul(event.quantity))
            }
            InventoryEffect::None => EventCost::cleared(event.id),
        };
        costs.push(cost);
    }

    ReplayOutcome {
        costs,
        snapshot: InventorySnapshot {
            quantity_on_hand: quantity,
            last_acquisition_cost: last_buy.or(prior.last_acquisition_cost),
            // Zero until a purchase leaves stock on hand.
            average_cost: Some(average.unwrap_or(0)),
        },
    }
}
