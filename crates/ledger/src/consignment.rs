//! Costing for consignment items.
//!
//! Consigned stock is not lotted. A sale costs its price minus the shop's
//! commission; gifts and own use cost the most recent purchase price.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};

use crate::event::{EventCost, InventoryEffect, LedgerEvent, OperationKind};
use crate::item::CommissionPolicy;
use crate::replay::ReplayOutcome;
use crate::snapshot::InventorySnapshot;

impl CommissionPolicy {
    /// Commission withheld on one unit sold at `unit_price`.
    pub fn commission(&self, unit_price: i64) -> i64 {
        match *self {
            CommissionPolicy::FixedAmount(amount) => amount,
            CommissionPolicy::Percent(percent) => {
                let exact = Decimal::from(unit_price) * percent / Decimal::ONE_HUNDRED;
                exact
                    .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
                    .to_i64()
                    .unwrap_or(unit_price)
            }
            CommissionPolicy::None => 0,
        }
    }
}

/// Cost of one consignment sale or use, given the last purchase price seen.
pub fn unit_cost(
    kind: OperationKind,
    unit_price: i64,
    policy: CommissionPolicy,
    last_buy: Option<i64>,
) -> i64 {
    match kind {
        OperationKind::Sell if unit_price != 0 => {
            unit_price.saturating_sub(policy.commission(unit_price))
        }
        _ => last_buy.unwrap_or(0),
    }
}

/// Replay `events` (already in replay order) under the commission rule.
pub(crate) fn replay(
    events: &[&LedgerEvent],
    policy: CommissionPolicy,
    prior: &InventorySnapshot,
) -> ReplayOutcome {
    let mut quantity_on_hand = 0_i64;
    let mut last_buy: Option<i64> = None;
    let mut costs = Vec::with_capacity(events.len());

    for event in events {
        let cost = match event.kind.inventory_effect() {
            InventoryEffect::Acquire => {
                quantity_on_hand = quantity_on_hand.saturating_add(event.quantity);
                last_buy = Some(event.unit_price);
                EventCost::cleared(event.id)
            }
            InventoryEffect::Consume => {
                quantity_on_hand = quantity_on_hand.saturating_sub(event.quantity);
                let unit = unit_cost(event.kind, event.unit_price, policy, last_buy);
                EventCost::settled(event.id, unit.saturating_mul(event.quantity))
            }
            InventoryEffect::None => EventCost::cleared(event.id),
        };
        costs.push(cost);
    }

    ReplayOutcome {
        costs,
        snapshot: InventorySnapshot {
            quantity_on_hand,
            last_acquisition_cost: last_buy.or(prior.last_acquisition_cost),
            average_cost: None,
        },
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use stockbook_core::{EventId, ItemId};

    use super::*;
    use crate::item::Item;
    use crate::replay::replay as replay_item;

    fn event(id: i64, kind: OperationKind, date: u32, quantity: i64, unit_price: i64) -> LedgerEvent {
        LedgerEvent {
            id: EventId::new(id),
            item_id: ItemId::from_uuid(uuid::Uuid::nil()),
            party_id: None,
            kind,
            event_date: NaiveDate::from_ymd_opt(2024, 7, date).unwrap(),
            quantity,
            unit_price,
            total_price: quantity.saturating_mul(unit_price),
            description: None,
            cogs: None,
            is_cogs_provisional: false,
        }
    }

    fn consigned() -> Item {
        Item::consignment(ItemId::from_uuid(uuid::Uuid::nil()), "Vase")
    }

    #[test]
    fn percent_commission_is_deducted_from_sale_price() {
        let item = consigned().with_commission_percent(Decimal::from(10));
        let events = vec![event(1, OperationKind::Sell, 1, 3, 100)];
        let outcome = replay_item(&item, &events, &InventorySnapshot::default());

        assert_eq!(outcome.costs, vec![EventCost::settled(EventId::new(1), 270)]);
        assert_eq!(outcome.snapshot.quantity_on_hand, -3);
    }

    #[test]
    fn zero_priced_sale_costs_last_purchase() {
        let item = consigned().with_commission_percent(Decimal::from(10));
        let events = vec![
            event(1, OperationKind::Buy, 1, 10, 50),
            event(2, OperationKind::Sell, 2, 3, 0),
        ];
        let outcome = replay_item(&item, &events, &InventorySnapshot::default());

        assert_eq!(outcome.costs[1], EventCost::settled(EventId::new(2), 150));
        assert_eq!(outcome.snapshot.quantity_on_hand, 7);
        assert_eq!(outcome.snapshot.last_acquisition_cost, Some(50));
    }

    #[test]
    fn fixed_commission_applies_per_unit() {
        let item = consigned().with_commission_amount(15);
        let events = vec![event(1, OperationKind::Sell, 1, 2, 100)];
        let outcome = replay_item(&item, &events, &InventorySnapshot::default());
        assert_eq!(outcome.costs[0].cogs, Some(170));
    }

    #[test]
    fn use_without_prior_purchase_costs_nothing() {
        let events = vec![
            event(1, OperationKind::Use, 1, 2, 80),
            event(2, OperationKind::Buy, 2, 2, 40),
            event(3, OperationKind::Use, 3, 1, 0),
        ];
        let outcome = replay_item(&consigned(), &events, &InventorySnapshot::default());

        assert_eq!(outcome.costs[0].cogs, Some(0));
        assert_eq!(outcome.costs[2].cogs, Some(40));
        assert_eq!(outcome.provisional_count(), 0);
    }

    #[test]
    fn quantity_restarts_from_zero_each_replay() {
        let prior = InventorySnapshot {
            quantity_on_hand: 99,
            last_acquisition_cost: Some(12),
            average_cost: None,
        };
        let events = vec![event(1, OperationKind::Payment, 1, 0, 0)];
        let outcome = replay_item(&consigned(), &events, &prior);

        assert_eq!(outcome.snapshot.quantity_on_hand, 0);
        assert_eq!(outcome.snapshot.last_acquisition_cost, Some(12));
        assert_eq!(outcome.costs[0], EventCost::cleared(EventId::new(1)));
    }

    #[test]
    fn large_sales_saturate_cost() {
        let big = 4_000_000_000;
        let events = vec![
            event(1, OperationKind::Sell, 1, big, big),
            event(2, OperationKind::Buy, 2, big, big),
            event(3, OperationKind::Use, 3, big, 0),
        ];
        let outcome = replay_item(&consigned(), &events, &InventorySnapshot::default());

        assert_eq!(outcome.costs[0].cogs, Some(i64::MAX));
        assert_eq!(outcome.costs[2].cogs, Some(i64::MAX));
        assert_eq!(outcome.snapshot.quantity_on_hand, -big);
    }

    #[test]
    fn percent_commission_rounds_half_away_from_zero() {
        let policy = CommissionPolicy::Percent(Decimal::new(125, 1));
        // 12.5% of 100 = 12.5 -> 13
        assert_eq!(policy.commission(100), 13);
        // 12.5% of 99 = 12.375 -> 12
        assert_eq!(policy.commission(99), 12);
        assert_eq!(CommissionPolicy::None.commission(99), 0);
    }
}
