//! Rows persisted by every backend.
//!
//! These are plain data carriers; validation and state transitions live in
//! the application services that own them.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// Bibliographic metadata shared by all copies of one book.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Title {
    pub id: Uuid,
    pub title: String,
    pub author: String,
    pub details: String,
    pub price: f64,
    pub course: String,
    pub branch: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl Title {
    /// Key used for the `(title, author)` uniqueness constraint.
    pub fn dedup_key(&self) -> (String, String) {
        dedup_key(&self.title, &self.author)
    }
}

/// Normalizes a `(title, author)` pair for duplicate detection.
pub fn dedup_key(title: &str, author: &str) -> (String, String) {
    (title.trim().to_lowercase(), author.trim().to_lowercase())
}

/// One physical, individually loanable instance of a [`Title`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookCopy {
    /// Human readable identifier such as `AA-000042`.
    pub id: String,
    pub title_id: Uuid,
    /// Denormalized cache of "has an open loan".
    pub issued: bool,
    pub tampered: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Closed set of borrower populations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BorrowerKind {
    Student,
    Faculty,
}

impl BorrowerKind {
    pub fn as_str(self) -> &'static str {
        match self {
            BorrowerKind::Student => "student",
            BorrowerKind::Faculty => "faculty",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "student" => Some(BorrowerKind::Student),
            "faculty" => Some(BorrowerKind::Faculty),
            _ => None,
        }
    }
}

impl std::fmt::Display for BorrowerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A borrower as resolved by the identity layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BorrowerRef {
    pub id: String,
    pub kind: BorrowerKind,
}

impl BorrowerRef {
    pub fn new(id: impl Into<String>, kind: BorrowerKind) -> Self {
        Self {
            id: id.into(),
            kind,
        }
    }

    pub fn student(id: impl Into<String>) -> Self {
        Self::new(id, BorrowerKind::Student)
    }

    pub fn faculty(id: impl Into<String>) -> Self {
        Self::new(id, BorrowerKind::Faculty)
    }
}

/// One issue-to-return cycle of one copy for one borrower.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoanRecord {
    pub id: Uuid,
    pub borrower: BorrowerRef,
    pub librarian_id: String,
    pub copy_id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub issue_date: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub return_date: Option<OffsetDateTime>,
    pub returned: bool,
    pub remarks: Option<String>,
}

impl LoanRecord {
    /// A freshly opened loan.
    pub fn open(
        borrower: BorrowerRef,
        librarian_id: impl Into<String>,
        copy_id: impl Into<String>,
        issue_date: OffsetDateTime,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            borrower,
            librarian_id: librarian_id.into(),
            copy_id: copy_id.into(),
            issue_date,
            return_date: None,
            returned: false,
            remarks: None,
        }
    }

    pub fn is_open(&self) -> bool {
        !self.returned
    }
}

/// Persistent state of one named identifier sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceCounter {
    pub name: String,
    pub prefix: String,
    pub number: u32,
}

/// Filters for title search; every present field must match.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TitleQuery {
    /// Case-insensitive substring of the title.
    pub title: Option<String>,
    /// Case-insensitive substring of the author.
    pub author: Option<String>,
    /// Case-insensitive substring of any copy id owned by the title.
    pub copy_id: Option<String>,
    pub offset: u64,
    pub limit: u64,
}

/// One page of titles plus the total number of matches.
#[derive(Debug, Clone, Default)]
pub struct TitlePage {
    pub titles: Vec<Title>,
    pub total: u64,
}

/// Result of the atomic issue write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenLoan {
    Opened,
    CopyMissing,
    AlreadyIssued,
}

/// Aggregate copy counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CopyCounts {
    pub total: u64,
    pub issued: u64,
}

impl CopyCounts {
    pub fn available(&self) -> u64 {
        self.total.saturating_sub(self.issued)
    }
}
