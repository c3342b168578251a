//! Stock items: current price and on-hand quantity for one book.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use catalog_core::{DomainError, DomainResult, Entity, RecordId, Timestamps};

/// Price and quantity on hand for a catalog book.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockItem {
    pub id: RecordId,
    pub book_id: RecordId,
    pub price: Decimal,
    pub quantity: i64,
    #[serde(flatten)]
    pub timestamps: Timestamps,
}

impl Entity for StockItem {
    const ENTITY_NAME: &'static str = "StockItem";

    type Draft = StockDraft;
    type Patch = StockPatch;

    fn id(&self) -> RecordId {
        self.id
    }

    fn deleted_at(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        self.timestamps.deleted_at
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockDraft {
    pub book_id: RecordId,
    pub price: Decimal,
    pub quantity: i64,
}

impl StockDraft {
    pub fn validate(&self) -> DomainResult<()> {
        ensure_price(self.price)?;
        if self.quantity < 0 {
            return Err(DomainError::validation("opening quantity cannot be negative"));
        }
        Ok(())
    }

    /// Before/after snapshot for the opening movement.
    pub fn opening_change(&self) -> StockChange {
        StockChange {
            price_before: None,
            price_after: self.price,
            quantity_before: None,
            quantity_after: self.quantity,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quantity: Option<i64>,
}

/// Before/after snapshot of a planned stock mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StockChange {
    pub price_before: Option<Decimal>,
    pub price_after: Decimal,
    pub quantity_before: Option<i64>,
    pub quantity_after: i64,
}

impl StockChange {
    pub fn patch(&self) -> StockPatch {
        StockPatch {
            price: Some(self.price_after),
            quantity: Some(self.quantity_after),
        }
    }
}

impl StockItem {
    fn change(&self, price_after: Decimal, quantity_after: i64) -> StockChange {
        StockChange {
            price_before: Some(self.price),
            price_after,
            quantity_before: Some(self.quantity),
            quantity_after,
        }
    }

    /// Plan an inbound delivery of `units`.
    pub fn plan_receive(&self, units: i64) -> DomainResult<StockChange> {
        if units <= 0 {
            return Err(DomainError::validation("received units must be positive"));
        }
        let quantity = self.quantity.checked_add(units).ok_or_else(|| {
            DomainError::invariant(format!("receiving {units} units would overflow the stock count"))
        })?;
        Ok(self.change(self.price, quantity))
    }

    /// Plan a sale of `units`; stock cannot go negative.
    pub fn plan_sell(&self, units: i64) -> DomainResult<StockChange> {
        if units <= 0 {
            return Err(DomainError::validation("sold units must be positive"));
        }
        let remaining = self.quantity - units;
        if remaining < 0 {
            return Err(DomainError::invariant(format!(
                "cannot sell {units} units, only {} on hand",
                self.quantity
            )));
        }
        Ok(self.change(self.price, remaining))
    }

    /// Plan a price change.
    pub fn plan_reprice(&self, price: Decimal) -> DomainResult<StockChange> {
        ensure_price(price)?;
        if price == self.price {
            return Err(DomainError::validation("new price equals current price"));
        }
        Ok(self.change(price, self.quantity))
    }

    /// Snapshot for archival: values are unchanged.
    pub fn archival_change(&self) -> StockChange {
        self.change(self.price, self.quantity)
    }
}

fn ensure_price(price: Decimal) -> DomainResult<()> {
    if price.is_sign_negative() {
        return Err(DomainError::validation("price cannot be negative"));
    }
    Ok(())
}
