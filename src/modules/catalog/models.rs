use serde::{Deserialize, Serialize};
use shelf_db::{BookCopy, CopyCounts, Title};

use crate::error::{LendingError, LendingResult};
use crate::utils::required_text;

/// Editable bibliographic fields of a title.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTitle {
    pub title: String,
    pub author: String,
    pub details: String,
    pub price: f64,
    pub course: String,
    pub branch: String,
}

impl NewTitle {
    /// Trimmed copy of the fields, or the first offending field.
    pub fn validated(&self) -> LendingResult<NewTitle> {
        if !self.price.is_finite() || self.price < 0.0 {
            return Err(LendingError::validation(
                "price",
                "must be a finite, non-negative amount",
            ));
        }
        Ok(NewTitle {
            title: required_text("title", &self.title)?,
            author: required_text("author", &self.author)?,
            details: required_text("details", &self.details)?,
            price: self.price,
            course: required_text("course", &self.course)?,
            branch: required_text("branch", &self.branch)?,
        })
    }
}

/// Search filters; every present field must match, case-insensitively.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TitleFilter {
    pub title: Option<String>,
    pub author: Option<String>,
    /// Matches titles owning a copy whose id contains this substring.
    pub copy_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TitleWithCopies {
    #[serde(flatten)]
    pub title: Title,
    pub copies: Vec<BookCopy>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegisteredTitle {
    pub title: Title,
    pub copies: Vec<BookCopy>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TitleUpdate {
    pub title: Title,
    pub added_copies: Vec<BookCopy>,
}

/// A copy together with its title and the title's stock.
#[derive(Debug, Clone, Serialize)]
pub struct CopyDetails {
    pub title: Title,
    pub copy: BookCopy,
    pub stock: StockSummary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StockSummary {
    pub total: u64,
    pub issued: u64,
    pub available: u64,
}

impl From<CopyCounts> for StockSummary {
    fn from(counts: CopyCounts) -> Self {
        Self {
            total: counts.total,
            issued: counts.issued,
            available: counts.available(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DashboardCounts {
    pub titles: u64,
    pub copies: u64,
    pub issued: u64,
    pub available: u64,
}

// request bodies

#[derive(Debug, Clone, Deserialize)]
pub struct RegisterTitleRequest {
    #[serde(flatten)]
    pub title: NewTitle,
    pub stock: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateTitleRequest {
    #[serde(flatten)]
    pub title: NewTitle,
    pub stock: i64,
}

/// Query string of `GET /titles`. Kept flat: urlencoded values cannot be
/// typed through `#[serde(flatten)]`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchParams {
    pub title: Option<String>,
    pub author: Option<String>,
    pub copy_id: Option<String>,
    pub page: Option<u64>,
    pub per_page: Option<u64>,
}

impl SearchParams {
    pub fn filter(&self) -> TitleFilter {
        TitleFilter {
            title: self.title.clone(),
            author: self.author.clone(),
            copy_id: self.copy_id.clone(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TamperedRequest {
    pub tampered: bool,
}
