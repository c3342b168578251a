//! Inventory movements: a tracked change to a stock-bearing record's price
//! and/or quantity, with its own PENDING -> COMPLETED | ERROR lifecycle.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use catalog_core::{DomainError, DomainResult, Entity, RecordId, Timestamps};

/// Kind of inventory change.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MovementType {
    Purchase,
    Sale,
    Discount,
    Increase,
    OutOfStock,
    Archived,
}

/// Movement lifecycle. `Completed` and `Error` are terminal.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MovementStatus {
    Pending,
    Completed,
    Error,
}

impl MovementStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, MovementStatus::Pending)
    }
}

/// Infer the movement type from before/after snapshots.
///
/// First match wins: delete, create, price change, quantity change. A price
/// change therefore masks a simultaneous quantity change.
pub fn determine_movement_type(
    is_create: bool,
    is_delete: bool,
    price_before: Option<Decimal>,
    price_after: Option<Decimal>,
    quantity_before: Option<i64>,
    quantity_after: Option<i64>,
) -> MovementType {
    if is_delete {
        return MovementType::Archived;
    }
    if is_create {
        return MovementType::Purchase;
    }
    if let (Some(before), Some(after)) = (price_before, price_after) {
        if before != after {
            return if after > before {
                MovementType::Increase
            } else {
                MovementType::Discount
            };
        }
    }
    if let (Some(before), Some(after)) = (quantity_before, quantity_after) {
        if before != after {
            return if after > before {
                MovementType::Purchase
            } else {
                MovementType::Sale
            };
        }
    }
    MovementType::Purchase
}

/// Who triggered the movement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementActor {
    pub user_id: String,
    pub user_full_name: String,
    pub user_role: String,
}

impl MovementActor {
    pub fn new(
        user_id: impl Into<String>,
        full_name: impl Into<String>,
        role: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            user_full_name: full_name.into(),
            user_role: role.into(),
        }
    }
}

/// Persisted movement row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryMovement {
    pub id: RecordId,
    pub entity_type: String,
    pub entity_id: RecordId,
    #[serde(flatten)]
    pub actor: MovementActor,
    pub price_before: Option<Decimal>,
    pub price_after: Option<Decimal>,
    pub quantity_before: Option<i64>,
    pub quantity_after: Option<i64>,
    pub movement_type: MovementType,
    pub status: MovementStatus,
    #[serde(default)]
    pub notes: Option<String>,
    pub is_active: bool,
    #[serde(flatten)]
    pub timestamps: Timestamps,
}

impl Entity for InventoryMovement {
    const ENTITY_NAME: &'static str = "InventoryMovement";

    type Draft = PendingMovement;
    type Patch = MovementPatch;

    fn id(&self) -> RecordId {
        self.id
    }

    fn deleted_at(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        self.timestamps.deleted_at
    }
}

/// Caller input for a new movement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMovement {
    pub entity_type: String,
    pub entity_id: RecordId,
    #[serde(flatten)]
    pub actor: MovementActor,
    pub price_before: Option<Decimal>,
    pub price_after: Option<Decimal>,
    pub quantity_before: Option<i64>,
    pub quantity_after: Option<i64>,
    pub movement_type: MovementType,
    pub notes: Option<String>,
}

/// A [`NewMovement`] with its initial status fixed to `Pending`.
///
/// The only way to build one is `From<NewMovement>`, so every movement row
/// starts out pending.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingMovement {
    #[serde(flatten)]
    movement: NewMovement,
    status: MovementStatus,
    is_active: bool,
}

impl From<NewMovement> for PendingMovement {
    fn from(movement: NewMovement) -> Self {
        Self {
            movement,
            status: MovementStatus::Pending,
            is_active: true,
        }
    }
}

impl PendingMovement {
    pub fn movement(&self) -> &NewMovement {
        &self.movement
    }
}

/// Values supplied when resolving a movement as completed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompletionValues {
    pub quantity_after: Option<i64>,
    pub price_after: Option<Decimal>,
    pub movement_type: Option<MovementType>,
}

/// Partial update applied to a movement row on resolution.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<MovementStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub movement_type: Option<MovementType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quantity_after: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price_after: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl InventoryMovement {
    fn ensure_pending(&self) -> DomainResult<()> {
        if self.status.is_terminal() {
            return Err(DomainError::invariant(format!(
                "movement {} already resolved as {:?}",
                self.id, self.status
            )));
        }
        Ok(())
    }

    /// Decide the completion patch.
    ///
    /// A resolved `quantity_after` of zero forces `OutOfStock`, overriding any
    /// caller-supplied type.
    pub fn complete(&self, values: &CompletionValues) -> DomainResult<MovementPatch> {
        self.ensure_pending()?;

        let quantity_after = values.quantity_after.or(self.quantity_after);
        let movement_type = match quantity_after {
            Some(0) => Some(MovementType::OutOfStock),
            _ => values.movement_type,
        };

        Ok(MovementPatch {
            status: Some(MovementStatus::Completed),
            movement_type,
            quantity_after,
            price_after: values.price_after,
            notes: None,
        })
    }

    /// Decide the failure patch; `message` is kept in `notes`.
    pub fn fail(&self, message: impl Into<String>) -> DomainResult<MovementPatch> {
        self.ensure_pending()?;

        Ok(MovementPatch {
            status: Some(MovementStatus::Error),
            notes: Some(message.into()),
            ..MovementPatch::default()
        })
    }
}
