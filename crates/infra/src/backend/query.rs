//! Predicates, ordering and relation hints understood by every backend.

use std::cmp::Ordering;

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use super::Document;

/// Field the store uses for soft deletion.
pub const DELETED_AT: &str = "deleted_at";

/// One predicate over a top-level document field.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// Exact JSON equality.
    Eq { field: String, value: JsonValue },
    /// String equality after trim + lowercase on both sides.
    EqNormalized { field: String, value: String },
    /// Field differs from `value` (absent fields differ from everything).
    Ne { field: String, value: JsonValue },
}

impl Condition {
    pub fn field(&self) -> &str {
        match self {
            Condition::Eq { field, .. }
            | Condition::EqNormalized { field, .. }
            | Condition::Ne { field, .. } => field,
        }
    }

    fn matches(&self, doc: &Document) -> bool {
        match self {
            Condition::Eq { field, value } => doc.get(field) == Some(value),
            Condition::EqNormalized { field, value } => match doc.get(field) {
                Some(JsonValue::String(actual)) => normalize(actual) == normalize(value),
                _ => false,
            },
            Condition::Ne { field, value } => doc.get(field) != Some(value),
        }
    }
}

/// Eager-loading hint: embed the document referenced by `field` (an id of
/// `entity_type`) under `embed_as`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relation {
    pub field: String,
    pub entity_type: String,
    pub embed_as: String,
}

impl Relation {
    pub fn new(
        field: impl Into<String>,
        entity_type: impl Into<String>,
        embed_as: impl Into<String>,
    ) -> Self {
        Self {
            field: field.into(),
            entity_type: entity_type.into(),
            embed_as: embed_as.into(),
        }
    }
}

/// Conjunction of conditions plus relation hints.
///
/// Soft-deleted documents are excluded unless [`Filter::with_deleted`] is set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    conditions: Vec<Condition>,
    relations: Vec<Relation>,
    include_deleted: bool,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, field: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.conditions.push(Condition::Eq {
            field: field.into(),
            value: value.into(),
        });
        self
    }

    pub fn eq_normalized(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.conditions.push(Condition::EqNormalized {
            field: field.into(),
            value: value.into(),
        });
        self
    }

    pub fn ne(mut self, field: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.conditions.push(Condition::Ne {
            field: field.into(),
            value: value.into(),
        });
        self
    }

    pub fn with_relation(mut self, relation: Relation) -> Self {
        self.relations.push(relation);
        self
    }

    pub fn with_deleted(mut self) -> Self {
        self.include_deleted = true;
        self
    }

    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    pub fn relations(&self) -> &[Relation] {
        &self.relations
    }

    pub fn includes_deleted(&self) -> bool {
        self.include_deleted
    }

    pub fn matches(&self, doc: &Document) -> bool {
        if !self.include_deleted && !matches!(doc.get(DELETED_AT), None | Some(JsonValue::Null)) {
            return false;
        }
        self.conditions.iter().all(|c| c.matches(doc))
    }
}

/// Sort direction.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    pub fn as_sql(self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sort {
    pub field: String,
    pub order: SortOrder,
}

/// A filtered, optionally ordered and windowed read.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    pub filter: Filter,
    pub sort: Option<Sort>,
    pub offset: u64,
    pub limit: Option<u64>,
}

impl Query {
    pub fn filtered(filter: Filter) -> Self {
        Self {
            filter,
            ..Self::default()
        }
    }

    pub fn sorted(mut self, field: impl Into<String>, order: SortOrder) -> Self {
        self.sort = Some(Sort {
            field: field.into(),
            order,
        });
        self
    }

    pub fn window(mut self, offset: u64, limit: u64) -> Self {
        self.offset = offset;
        self.limit = Some(limit);
        self
    }

    /// Order documents in place: by the sort field, ties broken by `id`.
    pub fn order(&self, docs: &mut [Document]) {
        let Some(sort) = &self.sort else {
            return;
        };
        docs.sort_by(|a, b| {
            let primary = compare_json(a.get(&sort.field), b.get(&sort.field));
            let primary = match sort.order {
                SortOrder::Asc => primary,
                SortOrder::Desc => primary.reverse(),
            };
            primary.then_with(|| compare_json(a.get("id"), b.get("id")))
        });
    }
}

pub(crate) fn normalize(value: &str) -> String {
    value.trim().to_lowercase()
}

/// Total order over optional JSON scalars.
///
/// Missing/null sort first; RFC 3339 strings compare as instants so differing
/// fractional precision does not distort the order.
pub(crate) fn compare_json(a: Option<&JsonValue>, b: Option<&JsonValue>) -> Ordering {
    let a = a.filter(|v| !v.is_null());
    let b = b.filter(|v| !v.is_null());
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(JsonValue::Number(x)), Some(JsonValue::Number(y))) => {
            let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Some(JsonValue::String(x)), Some(JsonValue::String(y))) => {
            match (parse_instant(x), parse_instant(y)) {
                (Some(x), Some(y)) => x.cmp(&y),
                _ => x.cmp(y),
            }
        }
        (Some(JsonValue::Bool(x)), Some(JsonValue::Bool(y))) => x.cmp(y),
        (Some(x), Some(y)) => x.to_string().cmp(&y.to_string()),
    }
}

fn parse_instant(value: &str) -> Option<DateTime<FixedOffset>> {
    DateTime::parse_from_rfc3339(value).ok()
}
