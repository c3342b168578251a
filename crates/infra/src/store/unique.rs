//! Uniqueness constraints checked before insert/update.

use serde_json::Value as JsonValue;

use catalog_core::RecordId;

use crate::backend::{Document, Filter};

use super::lookup::{match_value, Transform};

#[derive(Debug, Clone)]
struct UniqueField {
    name: String,
    transform: Option<Transform>,
}

/// A set of fields whose combined values must be unique among live rows.
///
/// A constraint with several fields is compound: only the combination has to
/// be unique, not each field on its own.
#[derive(Debug, Clone)]
pub struct UniqueConstraint {
    fields: Vec<UniqueField>,
    message: String,
    case_sensitive: bool,
}

impl UniqueConstraint {
    pub fn single(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::compound([field], message)
    }

    pub fn compound<I, S>(fields: I, message: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fields: fields
                .into_iter()
                .map(|name| UniqueField {
                    name: name.into(),
                    transform: None,
                })
                .collect(),
            message: message.into(),
            case_sensitive: false,
        }
    }

    /// Transform the candidate value of `field` before the lookup.
    pub fn transform(mut self, field: &str, transform: Transform) -> Self {
        if let Some(f) = self.fields.iter_mut().find(|f| f.name == field) {
            f.transform = Some(transform);
        }
        self
    }

    pub fn case_sensitive(mut self) -> Self {
        self.case_sensitive = true;
        self
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }

    /// Filter finding a conflicting row, or `None` when the candidate lacks
    /// one of the fields (the constraint does not apply).
    pub(crate) fn lookup(&self, candidate: &Document, exclude_id: Option<RecordId>) -> Option<Filter> {
        let mut filter = Filter::new();
        for field in &self.fields {
            let value = match candidate.get(&field.name) {
                None | Some(JsonValue::Null) => return None,
                Some(v) => v,
            };
            let value = match &field.transform {
                Some(t) => t.apply(value),
                None => value.clone(),
            };
            filter = match_value(filter, &field.name, value, self.case_sensitive);
        }
        if let Some(id) = exclude_id {
            filter = filter.ne("id", id.to_string());
        }
        Some(filter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: JsonValue) -> Document {
        match value {
            JsonValue::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn missing_fields_skip_the_constraint() {
        let c = UniqueConstraint::compound(["book_id", "author_id"], "dup");
        assert!(c.lookup(&doc(json!({"book_id": "b1"})), None).is_none());
        assert!(c.lookup(&doc(json!({"book_id": "b1", "author_id": null})), None).is_none());
    }

    #[test]
    fn compound_lookup_matches_the_combination_only() {
        let c = UniqueConstraint::compound(["book_id", "author_id"], "dup");
        let filter = c
            .lookup(&doc(json!({"book_id": "b1", "author_id": "a1"})), None)
            .unwrap();

        assert!(filter.matches(&doc(json!({"book_id": "b1", "author_id": "a1"}))));
        assert!(!filter.matches(&doc(json!({"book_id": "b1", "author_id": "a2"}))));
        assert!(!filter.matches(&doc(json!({"book_id": "b2", "author_id": "a1"}))));
    }

    #[test]
    fn excluded_id_never_conflicts_with_itself() {
        let id = RecordId::new();
        let c = UniqueConstraint::single("name", "taken");
        let existing = doc(json!({"id": id.to_string(), "name": "Ada"}));

        assert!(c.lookup(&doc(json!({"name": "ada "})), None).unwrap().matches(&existing));
        assert!(!c.lookup(&doc(json!({"name": "Ada"})), Some(id)).unwrap().matches(&existing));
    }
}
