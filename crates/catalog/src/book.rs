use serde::{Deserialize, Serialize};

use catalog_core::{DomainError, DomainResult, Entity, RecordId, Timestamps};

use crate::publisher::Publisher;

/// A catalog title.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Book {
    pub id: RecordId,
    pub title: String,
    pub isbn: String,
    #[serde(default)]
    pub publisher_id: Option<RecordId>,
    #[serde(default)]
    pub published_year: Option<i32>,
    /// Filled only when the publisher relation was eager-loaded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publisher: Option<Publisher>,
    #[serde(flatten)]
    pub timestamps: Timestamps,
}

impl Entity for Book {
    const ENTITY_NAME: &'static str = "Book";

    type Draft = BookDraft;
    type Patch = BookPatch;

    fn id(&self) -> RecordId {
        self.id
    }

    fn deleted_at(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        self.timestamps.deleted_at
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookDraft {
    pub title: String,
    pub isbn: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub publisher_id: Option<RecordId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub published_year: Option<i32>,
}

impl BookDraft {
    pub fn new(title: impl Into<String>, isbn: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            isbn: isbn.into(),
            publisher_id: None,
            published_year: None,
        }
    }

    pub fn published_by(mut self, publisher_id: RecordId) -> Self {
        self.publisher_id = Some(publisher_id);
        self
    }

    /// Validate and canonicalize the ISBN in place.
    pub fn validate(&mut self) -> DomainResult<()> {
        if self.title.trim().is_empty() {
            return Err(DomainError::validation("book title cannot be empty"));
        }
        self.isbn = normalize_isbn(&self.isbn)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub publisher_id: Option<RecordId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub published_year: Option<i32>,
}

/// Strip separators and check the ISBN-10/ISBN-13 shape.
///
/// Only the digit count (and a trailing `X` for ISBN-10) is checked, not the
/// check digit.
pub fn normalize_isbn(raw: &str) -> DomainResult<String> {
    let compact: String = raw
        .chars()
        .filter(|c| !matches!(c, '-' | ' '))
        .map(|c| c.to_ascii_uppercase())
        .collect();

    let valid = match compact.len() {
        13 => compact.chars().all(|c| c.is_ascii_digit()),
        10 => {
            let (body, last) = compact.split_at(9);
            body.chars().all(|c| c.is_ascii_digit())
                && last.chars().all(|c| c.is_ascii_digit() || c == 'X')
        }
        _ => false,
    };

    if !valid {
        return Err(DomainError::validation(format!("invalid ISBN: {raw}")));
    }
    Ok(compact)
}

/// Link between a book and one of its authors. Unique per `(book_id, author_id)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookAuthor {
    pub id: RecordId,
    pub book_id: RecordId,
    pub author_id: RecordId,
    #[serde(flatten)]
    pub timestamps: Timestamps,
}

impl Entity for BookAuthor {
    const ENTITY_NAME: &'static str = "BookAuthor";

    type Draft = BookAuthorDraft;
    type Patch = NoPatch;

    fn id(&self) -> RecordId {
        self.id
    }

    fn deleted_at(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        self.timestamps.deleted_at
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookAuthorDraft {
    pub book_id: RecordId,
    pub author_id: RecordId,
}

/// Links are created and soft-deleted, never edited.
#[derive(Debug, Clone, Copy, Serialize)]
pub enum NoPatch {}
