use serde::{Deserialize, Serialize};

use catalog_core::{DomainError, DomainResult, Entity, RecordId, Timestamps};

/// A publishing house.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Publisher {
    pub id: RecordId,
    pub name: String,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(flatten)]
    pub timestamps: Timestamps,
}

impl Entity for Publisher {
    const ENTITY_NAME: &'static str = "Publisher";

    type Draft = PublisherDraft;
    type Patch = PublisherPatch;

    fn id(&self) -> RecordId {
        self.id
    }

    fn deleted_at(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        self.timestamps.deleted_at
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublisherDraft {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
}

impl PublisherDraft {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            country: None,
        }
    }

    pub fn validate(&self) -> DomainResult<()> {
        if self.name.trim().is_empty() {
            return Err(DomainError::validation("publisher name cannot be empty"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublisherPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
}
