use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use stockbook_core::{DomainError, DomainResult, EventId, ItemId, PartyId};

/// Kind of a ledger event, with the codes used by the stored records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationKind {
    #[serde(rename = "BUY")]
    Buy,
    #[serde(rename = "SELL")]
    Sell,
    /// Own use or gift: leaves stock like a sale.
    #[serde(rename = "USE")]
    Use,
    #[serde(rename = "RCV")]
    Receipt,
    #[serde(rename = "PAY")]
    Payment,
    #[serde(other, rename = "OTHER")]
    Other,
}

/// What an event does to the stock of its item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InventoryEffect {
    Acquire,
    Consume,
    None,
}

impl OperationKind {
    /// Parse a stored code. Unknown codes become [`OperationKind::Other`] so a
    /// single malformed record never blocks a replay.
    pub fn from_code(code: &str) -> Self {
        match code.trim().to_ascii_uppercase().as_str() {
            "BUY" => Self::Buy,
            "SELL" => Self::Sell,
            "USE" => Self::Use,
            "RCV" => Self::Receipt,
            "PAY" => Self::Payment,
            _ => Self::Other,
        }
    }

    pub fn code(self) -> &'static str {
        match self {
            Self::Buy => "BUY",
            Self::Sell => "SELL",
            Self::Use => "USE",
            Self::Receipt => "RCV",
            Self::Payment => "PAY",
            Self::Other => "OTHER",
        }
    }

    pub fn inventory_effect(self) -> InventoryEffect {
        match self {
            Self::Buy => InventoryEffect::Acquire,
            Self::Sell | Self::Use => InventoryEffect::Consume,
            Self::Receipt | Self::Payment | Self::Other => InventoryEffect::None,
        }
    }

    /// Whether events of this kind carry a quantity (buy/sell/use).
    pub fn is_qty_based(self) -> bool {
        self.inventory_effect() != InventoryEffect::None
    }
}

impl core::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.code())
    }
}

/// A persisted ledger event (transaction) for one item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEvent {
    pub id: EventId,
    pub item_id: ItemId,
    pub party_id: Option<PartyId>,
    pub kind: OperationKind,
    pub event_date: NaiveDate,
    pub quantity: i64,
    /// Purchase cost for BUY, sale price for SELL; 0 for gifts.
    pub unit_price: i64,
    pub total_price: i64,
    pub description: Option<String>,
    /// Cost of goods sold; only SELL/USE events carry one after a replay.
    pub cogs: Option<i64>,
    pub is_cogs_provisional: bool,
}

impl LedgerEvent {
    /// Replay ordering key: business date, then creation sequence.
    pub fn replay_key(&self) -> (NaiveDate, EventId) {
        (self.event_date, self.id)
    }

    /// Sale total minus cost, once a cost is known.
    pub fn gross_profit(&self) -> Option<i64> {
        self.cogs.map(|cogs| self.total_price.saturating_sub(cogs))
    }

    pub fn cost(&self) -> EventCost {
        EventCost {
            event_id: self.id,
            cogs: self.cogs,
            is_provisional: self.is_cogs_provisional,
        }
    }
}

/// Input for recording a new ledger event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewLedgerEvent {
    pub item_id: ItemId,
    pub party_id: Option<PartyId>,
    pub kind: OperationKind,
    pub event_date: NaiveDate,
    pub quantity: i64,
    pub unit_price: i64,
    pub total_price: i64,
    pub description: Option<String>,
}

impl NewLedgerEvent {
    pub fn new(
        item_id: ItemId,
        kind: OperationKind,
        event_date: NaiveDate,
        quantity: i64,
        unit_price: i64,
    ) -> Self {
        Self {
            item_id,
            party_id: None,
            kind,
            event_date,
            quantity,
            unit_price,
            total_price: quantity.saturating_mul(unit_price),
            description: None,
        }
    }

    pub fn with_party(mut self, party_id: PartyId) -> Self {
        self.party_id = Some(party_id);
        self
    }

    pub fn with_total_price(mut self, total_price: i64) -> Self {
        self.total_price = total_price;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Reject values the engine would otherwise take as authoritative.
    pub fn validate(&self) -> DomainResult<()> {
        if self.quantity < 0 {
            return Err(DomainError::validation("quantity cannot be negative"));
        }
        if self.unit_price < 0 {
            return Err(DomainError::validation("unit_price cannot be negative"));
        }
        if self.total_price < 0 {
            return Err(DomainError::validation("total_price cannot be negative"));
        }
        Ok(())
    }

    /// The persisted form, with its cost fields unset.
    pub fn into_event(self, id: EventId) -> LedgerEvent {
        LedgerEvent {
            id,
            item_id: self.item_id,
            party_id: self.party_id,
            kind: self.kind,
            event_date: self.event_date,
            quantity: self.quantity,
            unit_price: self.unit_price,
            total_price: self.total_price,
            description: self.description,
            cogs: None,
            is_cogs_provisional: false,
        }
    }
}

/// Cost fields of one event as computed by a replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventCost {
    pub event_id: EventId,
    pub cogs: Option<i64>,
    pub is_provisional: bool,
}

impl EventCost {
    /// No cost: BUY and non-stock events.
    pub fn cleared(event_id: EventId) -> Self {
        Self {
            event_id,
            cogs: None,
            is_provisional: false,
        }
    }

    pub fn settled(event_id: EventId, cogs: i64) -> Self {
        Self {
            event_id,
            cogs: Some(cogs),
            is_provisional: false,
        }
    }

    pub fn provisional(event_id: EventId, cogs: i64) -> Self {
        Self {
            event_id,
            cogs: Some(cogs),
            is_provisional: true,
        }
    }
}

/// Cost write-back for one event whose stored values are stale.
pub type CostUpdate = EventCost;
