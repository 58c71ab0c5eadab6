//! Full replay of one item's ledger.
//!
//! A replay is a pure function of the item, its events and the snapshot it
//! starts from. Every derived field is recomputed from scratch, so replaying
//! the same history twice yields the same costs and snapshot.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use stockbook_core::EventId;

use crate::consignment;
use crate::event::{CostUpdate, EventCost, InventoryEffect, LedgerEvent};
use crate::item::{Item, ItemCosting};
use crate::layers::CostLayerQueue;
use crate::snapshot::InventorySnapshot;

/// Costs and terminal snapshot produced by one replay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayOutcome {
    /// One entry per event, in replay order.
    pub costs: Vec<EventCost>,
    pub snapshot: InventorySnapshot,
}

impl ReplayOutcome {
    pub fn cost_of(&self, event_id: EventId) -> Option<&EventCost> {
        self.costs.iter().find(|cost| cost.event_id == event_id)
    }

    pub fn provisional_count(&self) -> usize {
        self.costs.iter().filter(|cost| cost.is_provisional).count()
    }

    /// Cost updates for the events whose stored values differ from the replay.
    pub fn changes(&self, events: &[LedgerEvent]) -> Vec<CostUpdate> {
        let stored: HashMap<EventId, EventCost> =
            events.iter().map(|event| (event.id, event.cost())).collect();
        self.costs
            .iter()
            .filter(|cost| stored.get(&cost.event_id) != Some(*cost))
            .copied()
            .collect()
    }

    /// Write the computed costs onto `events`.
    pub fn apply_to(&self, events: &mut [LedgerEvent]) {
        let by_id: HashMap<EventId, &EventCost> =
            self.costs.iter().map(|cost| (cost.event_id, cost)).collect();
        for event in events.iter_mut() {
            if let Some(cost) = by_id.get(&event.id) {
                event.cogs = cost.cogs;
                event.is_cogs_provisional = cost.is_provisional;
            }
        }
    }
}

/// Events in replay order: business date, then creation sequence.
pub fn replay_order(events: &[LedgerEvent]) -> Vec<&LedgerEvent> {
    let mut ordered: Vec<&LedgerEvent> = events.iter().collect();
    ordered.sort_by_key(|event| event.replay_key());
    ordered
}

/// Recompute every event cost and the terminal snapshot of `item`.
///
/// `prior` only feeds the last acquisition cost when the history itself has
/// no purchase to derive it from.
pub fn replay(item: &Item, events: &[LedgerEvent], prior: &InventorySnapshot) -> ReplayOutcome {
    let ordered = replay_order(events);
    match item.costing() {
        ItemCosting::OwnedStock => replay_fifo(&ordered, prior).0,
        ItemCosting::Consignment(policy) => consignment::replay(&ordered, policy, prior),
    }
}

/// FIFO pass over ordered events. Also returns the final layer queue, whose
/// negative layers point at sales by their position in `costs`.
fn replay_fifo(
    events: &[&LedgerEvent],
    prior: &InventorySnapshot,
) -> (ReplayOutcome, CostLayerQueue<usize>) {
    let mut queue = CostLayerQueue::<usize>::new();
    let mut costs: Vec<EventCost> = Vec::with_capacity(events.len());
    let mut last_buy: Option<i64> = None;

    for (position, event) in events.iter().enumerate() {
        let cost = match event.kind.inventory_effect() {
            InventoryEffect::Acquire => {
                let cover = queue.cover_negative_from_front(event.quantity, event.unit_price);
                for correction in &cover.corrections {
                    let sale = &mut costs[correction.origin];
                    sale.cogs = Some(correction.reprice(sale.cogs.unwrap_or(0)));
                    if correction.settled {
                        sale.is_provisional = false;
                    }
                }
                queue.push_positive(cover.remaining, event.unit_price);
                last_buy = Some(event.unit_price);
                EventCost::cleared(event.id)
            }
            InventoryEffect::Consume => {
                let draw = queue.consume_from_front(event.quantity);
                if draw.unsatisfied > 0 {
                    let base = queue
                        .last_positive_cost()
                        .or(last_buy)
                        .unwrap_or(event.unit_price);
                    queue.push_negative(draw.unsatisfied, base, position);
                    let shortfall = draw.unsatisfied.saturating_mul(base);
                    EventCost::provisional(event.id, draw.cost.saturating_add(shortfall))
                } else {
                    EventCost::settled(event.id, draw.cost)
                }
            }
            InventoryEffect::None => EventCost::cleared(event.id),
        };
        costs.push(cost);
    }

    let snapshot = InventorySnapshot {
        quantity_on_hand: queue.quantity_on_hand(),
        last_acquisition_cost: queue
            .last_positive_cost()
            .or(last_buy)
            .or(prior.last_acquisition_cost),
        average_cost: None,
    };
    (ReplayOutcome { costs, snapshot }, queue)
}
