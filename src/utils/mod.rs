//! Helpers shared by the lending modules.

use serde::{Deserialize, Serialize};

use crate::error::{LendingError, LendingResult};

pub const MAX_PER_PAGE: u64 = 100;

/// A validated page request; pages are 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub page: u64,
    pub per_page: u64,
}

impl Pagination {
    /// Validates optional query values, filling in defaults.
    pub fn new(page: Option<u64>, per_page: Option<u64>, default_per_page: u64) -> LendingResult<Self> {
        let page = page.unwrap_or(1);
        let per_page = per_page.unwrap_or(default_per_page);

        if page == 0 {
            return Err(LendingError::validation("page", "must be at least 1"));
        }
        if !(1..=MAX_PER_PAGE).contains(&per_page) {
            return Err(LendingError::validation(
                "per_page",
                format!("must be within 1..={MAX_PER_PAGE}"),
            ));
        }
        Ok(Self { page, per_page })
    }

    pub fn offset(&self) -> u64 {
        (self.page - 1).saturating_mul(self.per_page)
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            page: 1,
            per_page: 10,
        }
    }
}

/// One page of results with enough bookkeeping to render pagers.
#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
    pub total_pages: u64,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, total: u64, pagination: Pagination) -> Self {
        Self {
            items,
            total,
            page: pagination.page,
            per_page: pagination.per_page,
            total_pages: total.div_ceil(pagination.per_page),
        }
    }
}

/// Trims a required text field, rejecting blanks.
pub fn required_text(field: &str, value: &str) -> LendingResult<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(LendingError::validation(field, "must not be blank"));
    }
    Ok(trimmed.to_string())
}
