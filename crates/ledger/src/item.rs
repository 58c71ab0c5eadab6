use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stockbook_core::ItemId;

/// Catalog item as seen by the stock ledger.
///
/// Owned by the catalog; the ledger only reads the consignment flag and the
/// commission terms. At most one of `commission_amount` / `commission_percent`
/// is expected to be set (enforced at input, not here).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemId,
    pub name: String,
    pub is_consignment: bool,
    /// Fixed commission per unit, in the smallest currency unit.
    pub commission_amount: Option<i64>,
    /// Commission as a percentage of the sale price, in `(0, 100]`.
    pub commission_percent: Option<Decimal>,
}

impl Item {
    /// Owned-stock item with no commission terms.
    pub fn owned(id: ItemId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            is_consignment: false,
            commission_amount: None,
            commission_percent: None,
        }
    }

    /// Consignment item with no commission terms yet.
    pub fn consignment(id: ItemId, name: impl Into<String>) -> Self {
        Self {
            is_consignment: true,
            ..Self::owned(id, name)
        }
    }

    pub fn with_commission_amount(mut self, amount: i64) -> Self {
        self.commission_amount = Some(amount);
        self
    }

    pub fn with_commission_percent(mut self, percent: Decimal) -> Self {
        self.commission_percent = Some(percent);
        self
    }

    /// Resolve the costing regime once, before a replay loop.
    pub fn costing(&self) -> ItemCosting {
        if !self.is_consignment {
            return ItemCosting::OwnedStock;
        }
        ItemCosting::Consignment(self.commission_policy())
    }

    /// How the item is settled with its supplier (reporting label).
    pub fn settlement_type(&self) -> SettlementType {
        match self.costing() {
            ItemCosting::OwnedStock => SettlementType::FixedPurchase,
            ItemCosting::Consignment(CommissionPolicy::FixedAmount(_)) => {
                SettlementType::CommissionAmount
            }
            ItemCosting::Consignment(CommissionPolicy::Percent(_)) => {
                SettlementType::CommissionPercent
            }
            ItemCosting::Consignment(CommissionPolicy::None) => {
                SettlementType::ConsignmentNoCommission
            }
        }
    }

    // Zero-valued terms count as unset.
    fn commission_policy(&self) -> CommissionPolicy {
        if let Some(amount) = self.commission_amount.filter(|a| *a > 0) {
            return CommissionPolicy::FixedAmount(amount);
        }
        if let Some(percent) = self.commission_percent.filter(|p| *p > Decimal::ZERO) {
            return CommissionPolicy::Percent(percent);
        }
        CommissionPolicy::None
    }
}

/// Costing regime of one item, resolved once per replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemCosting {
    /// Owned inventory, costed by FIFO lots.
    OwnedStock,
    /// Stock held on behalf of a supplier; cost is sale price minus commission.
    Consignment(CommissionPolicy),
}

/// Commission terms of a consignment item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommissionPolicy {
    FixedAmount(i64),
    Percent(Decimal),
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SettlementType {
    FixedPurchase,
    CommissionAmount,
    CommissionPercent,
    ConsignmentNoCommission,
}
