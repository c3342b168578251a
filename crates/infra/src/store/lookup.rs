//! Field lookups: value transforms, id exclusion and case folding.

use std::collections::HashMap;
use std::fmt;

use serde_json::Value as JsonValue;

use catalog_core::RecordId;

use crate::backend::{Filter, Relation};

/// Value transform applied before a lookup.
///
/// Built-in transforms only touch strings; other values pass through.
#[derive(Clone, Copy)]
pub enum Transform {
    Trim,
    Lowercase,
    TrimLowercase,
    Custom(fn(&JsonValue) -> JsonValue),
}

impl Transform {
    pub fn apply(&self, value: &JsonValue) -> JsonValue {
        match (self, value) {
            (Transform::Custom(f), v) => f(v),
            (Transform::Trim, JsonValue::String(s)) => JsonValue::String(s.trim().to_string()),
            (Transform::Lowercase, JsonValue::String(s)) => JsonValue::String(s.to_lowercase()),
            (Transform::TrimLowercase, JsonValue::String(s)) => {
                JsonValue::String(s.trim().to_lowercase())
            }
            (_, v) => v.clone(),
        }
    }
}

impl fmt::Debug for Transform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transform::Trim => f.write_str("Trim"),
            Transform::Lowercase => f.write_str("Lowercase"),
            Transform::TrimLowercase => f.write_str("TrimLowercase"),
            Transform::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// Options for `find_by_field` and friends.
///
/// Lookups are case-insensitive by default: string values are compared after
/// trim + lowercase on both sides.
#[derive(Debug, Clone, Default)]
pub struct LookupOptions {
    pub exclude_id: Option<RecordId>,
    pub relations: Vec<Relation>,
    pub case_sensitive: bool,
    pub transforms: HashMap<String, Transform>,
    pub include_deleted: bool,
}

impl LookupOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn excluding(mut self, id: RecordId) -> Self {
        self.exclude_id = Some(id);
        self
    }

    pub fn with_relation(mut self, relation: Relation) -> Self {
        self.relations.push(relation);
        self
    }

    pub fn case_sensitive(mut self) -> Self {
        self.case_sensitive = true;
        self
    }

    pub fn transform(mut self, field: impl Into<String>, transform: Transform) -> Self {
        self.transforms.insert(field.into(), transform);
        self
    }

    pub fn with_deleted(mut self) -> Self {
        self.include_deleted = true;
        self
    }

    /// Filter matching every `(field, value)` pair under these options.
    pub(crate) fn filter_for<'a>(
        &self,
        fields: impl IntoIterator<Item = (&'a str, &'a JsonValue)>,
    ) -> Filter {
        let mut filter = Filter::new();
        for (field, value) in fields {
            let value = match self.transforms.get(field) {
                Some(t) => t.apply(value),
                None => value.clone(),
            };
            filter = match_value(filter, field, value, self.case_sensitive);
        }
        if let Some(id) = self.exclude_id {
            filter = filter.ne("id", id.to_string());
        }
        for relation in &self.relations {
            filter = filter.with_relation(relation.clone());
        }
        if self.include_deleted {
            filter = filter.with_deleted();
        }
        filter
    }
}

pub(crate) fn match_value(filter: Filter, field: &str, value: JsonValue, case_sensitive: bool) -> Filter {
    match value {
        JsonValue::String(s) if !case_sensitive => filter.eq_normalized(field, s),
        other => filter.eq(field, other),
    }
}
