//! Page requests and page metadata.

use serde::{Deserialize, Serialize};

use crate::backend::SortOrder;
use crate::error::{StoreError, StoreResult};

pub const DEFAULT_LIMIT: u64 = 10;
pub const MAX_LIMIT: u64 = 100;

/// A 1-based page request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Pagination {
    pub page: u64,
    pub limit: u64,
    pub sort_by: String,
    pub sort_order: SortOrder,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            page: 1,
            limit: DEFAULT_LIMIT,
            sort_by: "created_at".to_string(),
            sort_order: SortOrder::Desc,
        }
    }
}

impl Pagination {
    pub fn new(page: u64, limit: u64) -> Self {
        Self {
            page,
            limit,
            ..Self::default()
        }
    }

    pub fn sorted_by(mut self, field: impl Into<String>, order: SortOrder) -> Self {
        self.sort_by = field.into();
        self.sort_order = order;
        self
    }

    /// Out-of-range requests are rejected, not clamped.
    pub fn validate(&self) -> StoreResult<()> {
        if self.page < 1 {
            return Err(StoreError::Validation("page must be at least 1".to_string()));
        }
        if !(1..=MAX_LIMIT).contains(&self.limit) {
            return Err(StoreError::Validation(format!(
                "limit must be between 1 and {MAX_LIMIT}"
            )));
        }
        if self.sort_by.trim().is_empty() {
            return Err(StoreError::Validation("sort field cannot be empty".to_string()));
        }
        Ok(())
    }

    pub fn offset(&self) -> u64 {
        self.page.saturating_sub(1).saturating_mul(self.limit)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageMeta {
    pub total: u64,
    pub page: u64,
    pub limit: u64,
    pub total_pages: u64,
    pub has_next: bool,
    pub has_prev: bool,
}

impl PageMeta {
    /// A zero `limit` yields no pages.
    pub fn new(total: u64, page: u64, limit: u64) -> Self {
        let total_pages = if limit == 0 { 0 } else { total.div_ceil(limit) };
        Self {
            total,
            page,
            limit,
            total_pages,
            has_next: page < total_pages,
            has_prev: page > 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub data: Vec<T>,
    pub meta: PageMeta,
}

impl<T> Page<T> {
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            data: self.data.into_iter().map(f).collect(),
            meta: self.meta,
        }
    }
}
