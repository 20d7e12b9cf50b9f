use serde::{Deserialize, Serialize};
use shelf_db::{BookCopy, BorrowerRef, LoanRecord, Title};
use time::OffsetDateTime;

/// Why one copy of an issue batch was not issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureReason {
    #[serde(rename = "Book not found")]
    NotFound,
    #[serde(rename = "Already issued")]
    AlreadyIssued,
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            FailureReason::NotFound => "Book not found",
            FailureReason::AlreadyIssued => "Already issued",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedCopy {
    pub copy_id: String,
    pub reason: FailureReason,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Complete,
    Partial,
    NoneIssued,
}

/// Per-copy result of an issue batch, in request order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueOutcome {
    pub issued: Vec<String>,
    pub failed: Vec<FailedCopy>,
}

impl IssueOutcome {
    pub fn status(&self) -> BatchStatus {
        match (self.issued.is_empty(), self.failed.is_empty()) {
            (false, true) => BatchStatus::Complete,
            (false, false) => BatchStatus::Partial,
            (true, _) => BatchStatus::NoneIssued,
        }
    }
}

/// [`IssueOutcome`] with its status spelled out for clients.
#[derive(Debug, Clone, Serialize)]
pub struct IssueReport {
    pub status: BatchStatus,
    #[serde(flatten)]
    pub outcome: IssueOutcome,
}

impl From<IssueOutcome> for IssueReport {
    fn from(outcome: IssueOutcome) -> Self {
        Self {
            status: outcome.status(),
            outcome,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnOutcome {
    pub returned: Vec<String>,
    pub not_found: Vec<String>,
}

/// A loan with its fine evaluated at some instant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssessedLoan {
    #[serde(flatten)]
    pub loan: LoanRecord,
    #[serde(with = "time::serde::rfc3339")]
    pub due_date: OffsetDateTime,
    pub overdue: bool,
    pub fine: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Statement {
    pub borrower: BorrowerRef,
    pub loans: Vec<AssessedLoan>,
    /// Fines of loans still out.
    pub outstanding_fine: u64,
    pub total_fine: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MonthlyIssues {
    /// `YYYY-MM`
    pub month: String,
    pub issued_count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CopyAnalytics {
    pub total_issued: u64,
    pub total_returned: u64,
    pub currently_issued: bool,
    pub monthly: Vec<MonthlyIssues>,
}

/// Everything known about one copy's circulation.
#[derive(Debug, Clone, Serialize)]
pub struct CopyTrack {
    pub title: Title,
    pub copy: BookCopy,
    pub history: Vec<LoanRecord>,
    pub current_loan: Option<AssessedLoan>,
    pub analytics: CopyAnalytics,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    /// Flag says issued, ledger has no open loan.
    FlaggedWithoutLoan,
    /// Ledger has an open loan, flag says available.
    LoanWithoutFlag,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IntegrityViolation {
    pub copy_id: String,
    pub kind: ViolationKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Reconciliation {
    pub copy_id: String,
    pub issued: bool,
    pub changed: bool,
}

// request bodies

#[derive(Debug, Clone, Deserialize)]
pub struct IssueRequest {
    pub borrower: BorrowerRef,
    pub copy_ids: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReturnRequest {
    pub borrower: BorrowerRef,
    pub copy_ids: Vec<String>,
    #[serde(default)]
    pub remarks: Option<String>,
}

impl Statement {
    pub fn new(borrower: BorrowerRef, loans: Vec<AssessedLoan>) -> Self {
        let outstanding_fine = loans
            .iter()
            .filter(|assessed| assessed.loan.is_open())
            .map(|assessed| assessed.fine)
            .sum();
        let total_fine = loans.iter().map(|assessed| assessed.fine).sum();
        Self {
            borrower,
            loans,
            outstanding_fine,
            total_fine,
        }
    }
}
