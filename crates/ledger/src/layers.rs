//! FIFO cost layers.
//!
//! A queue of acquisition lots, oldest first. Positive layers are owned stock
//! at a known unit cost. Negative layers record a provisional shortfall: stock
//! sold before the purchase that covers it was known. They carry the origin
//! of the sale so its cost can be corrected when a later BUY covers it.
//!
//! The queue holds layers of a single sign at any time: a BUY first covers
//! negative layers, and a sale only goes short once every positive layer is
//! consumed.

use std::collections::VecDeque;

/// One lot of stock at a unit cost.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CostLayer<O> {
    /// Signed: negative for a provisional shortfall.
    pub quantity: i64,
    pub unit_cost: i64,
    /// The sale that created a negative layer; `None` for owned lots.
    pub origin: Option<O>,
}

impl<O> CostLayer<O> {
    pub fn is_negative(&self) -> bool {
        self.quantity < 0
    }
}

/// Result of consuming stock from the front of the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Draw {
    /// Cost charged for the quantity that was satisfied.
    pub cost: i64,
    /// Quantity left over once positive layers ran out.
    pub unsatisfied: i64,
}

/// A provisional sale cost that a purchase has (partly) covered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Correction<O> {
    pub origin: O,
    pub covered: i64,
    pub provisional_unit_cost: i64,
    pub buy_unit_cost: i64,
    /// The negative layer was fully covered and popped.
    pub settled: bool,
}

impl<O> Correction<O> {
    /// Swap the covered quantity's fallback cost for the purchase cost.
    ///
    /// Saturates at the `i64` bounds.
    pub fn reprice(&self, cogs: i64) -> i64 {
        let delta = i128::from(self.buy_unit_cost) - i128::from(self.provisional_unit_cost);
        saturate(i128::from(cogs) + i128::from(self.covered) * delta)
    }
}

pub(crate) fn saturate(value: i128) -> i64 {
    i64::try_from(value).unwrap_or(if value < 0 { i64::MIN } else { i64::MAX })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoverOutcome<O> {
    /// Purchase quantity not used for covering; becomes a positive layer.
    pub remaining: i64,
    pub corrections: Vec<Correction<O>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CostLayerQueue<O> {
    layers: VecDeque<CostLayer<O>>,
}

impl<O> Default for CostLayerQueue<O> {
    fn default() -> Self {
        Self {
            layers: VecDeque::new(),
        }
    }
}

impl<O: Copy> CostLayerQueue<O> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_positive(&mut self, quantity: i64, unit_cost: i64) {
        if quantity <= 0 {
            return;
        }
        self.layers.push_back(CostLayer {
            quantity,
            unit_cost,
            origin: None,
        });
    }

    /// Record `quantity` units sold short at a fallback `unit_cost`.
    pub fn push_negative(&mut self, quantity: i64, unit_cost: i64, origin: O) {
        if quantity <= 0 {
            return;
        }
        self.layers.push_back(CostLayer {
            quantity: -quantity,
            unit_cost,
            origin: Some(origin),
        });
    }

    /// Take `quantity` from the positive head layers.
    pub fn consume_from_front(&mut self, quantity: i64) -> Draw {
        let mut draw = Draw {
            cost: 0,
            unsatisfied: quantity.max(0),
        };
        while draw.unsatisfied > 0 {
            let Some(head) = self.layers.front_mut() else {
                break;
            };
            if head.is_negative() {
                break;
            }
            let take = draw.unsatisfied.min(head.quantity);
            draw.cost = draw.cost.saturating_add(take.saturating_mul(head.unit_cost));
            draw.unsatisfied -= take;
            head.quantity -= take;
            if head.quantity == 0 {
                self.layers.pop_front();
            }
        }
        draw
    }

    /// Use a purchase to cover negative head layers, oldest first.
    pub fn cover_negative_from_front(
        &mut self,
        buy_quantity: i64,
        buy_unit_cost: i64,
    ) -> CoverOutcome<O> {
        let mut remaining = buy_quantity.max(0);
        let mut corrections = Vec::new();
        while remaining > 0 {
            let Some(head) = self.layers.front_mut() else {
                break;
            };
            if !head.is_negative() {
                break;
            }
            let Some(origin) = head.origin else {
                break;
            };
            let covered = remaining.min(-head.quantity);
            head.quantity += covered;
            remaining -= covered;
            let settled = head.quantity == 0;
            corrections.push(Correction {
                origin,
                covered,
                provisional_unit_cost: head.unit_cost,
                buy_unit_cost,
                settled,
            });
            if settled {
                self.layers.pop_front();
            }
        }
        CoverOutcome {
            remaining,
            corrections,
        }
    }

    /// Unit cost of the newest owned lot still in the queue.
    pub fn last_positive_cost(&self) -> Option<i64> {
        self.layers
            .iter()
            .rev()
            .find(|layer| layer.quantity > 0)
            .map(|layer| layer.unit_cost)
    }

    pub fn quantity_on_hand(&self) -> i64 {
        self.layers
            .iter()
            .fold(0_i64, |total, layer| total.saturating_add(layer.quantity))
    }

    pub fn has_shortfall(&self) -> bool {
        self.layers.iter().any(CostLayer::is_negative)
    }

    /// Origins whose negative layers are still open.
    pub fn open_origins(&self) -> impl Iterator<Item = O> + '_ {
        self.layers.iter().filter_map(|layer| layer.origin)
    }

    pub fn layers(&self) -> impl Iterator<Item = &CostLayer<O>> {
        self.layers.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }
}
