use serde::{Deserialize, Serialize};

use catalog_core::{DomainError, DomainResult, Entity, RecordId, Timestamps};

/// A book author.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    pub id: RecordId,
    pub name: String,
    #[serde(default)]
    pub biography: Option<String>,
    #[serde(flatten)]
    pub timestamps: Timestamps,
}

impl Entity for Author {
    const ENTITY_NAME: &'static str = "Author";

    type Draft = AuthorDraft;
    type Patch = AuthorPatch;

    fn id(&self) -> RecordId {
        self.id
    }

    fn deleted_at(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        self.timestamps.deleted_at
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorDraft {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub biography: Option<String>,
}

impl AuthorDraft {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            biography: None,
        }
    }

    pub fn validate(&self) -> DomainResult<()> {
        validate_name(&self.name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub biography: Option<String>,
}

impl AuthorPatch {
    pub fn validate(&self) -> DomainResult<()> {
        match &self.name {
            Some(name) => validate_name(name),
            None => Ok(()),
        }
    }
}

fn validate_name(name: &str) -> DomainResult<()> {
    if name.trim().is_empty() {
        return Err(DomainError::validation("author name cannot be empty"));
    }
    Ok(())
}
