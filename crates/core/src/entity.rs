//! Entity trait: identity + continuity across state changes.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::id::RecordId;

/// Minimal capability set every persisted record exposes.
///
/// Stores treat implementors structurally: the entity is persisted as a JSON
/// document, and the store owns `id` plus the bookkeeping timestamps.
/// `Draft` is the payload accepted on create, `Patch` the partial payload
/// accepted on update (fields serialized as absent are left untouched).
pub trait Entity: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Logical entity name, used as the storage partition and in audit records.
    const ENTITY_NAME: &'static str;

    type Draft: Serialize + Send + Sync;
    type Patch: Serialize + Send + Sync;

    /// Returns the entity identifier.
    fn id(&self) -> RecordId;

    /// Soft-delete marker. `None` means the record is live.
    fn deleted_at(&self) -> Option<DateTime<Utc>> {
        None
    }
}

/// Bookkeeping timestamps maintained by the store.
///
/// Entities embed this with `#[serde(flatten)]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timestamps {
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Timestamps {
    pub fn now() -> Self {
        let now = Utc::now();
        Self {
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}
