//! Overdue fines. Pure functions of dates and policy; nothing here is stored.

use shelf_db::LoanRecord;
use time::{Duration, OffsetDateTime};

use super::models::AssessedLoan;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FinePolicy {
    pub loan_period_days: u32,
    pub per_day_rate: u64,
}

impl FinePolicy {
    pub fn from_settings(settings: &shelf_kernel::settings::CirculationSettings) -> Self {
        Self {
            loan_period_days: settings.loan_period_days,
            per_day_rate: settings.fine_per_day,
        }
    }

    pub fn due_date(&self, issue_date: OffsetDateTime) -> OffsetDateTime {
        issue_date + Duration::days(i64::from(self.loan_period_days))
    }
}

impl Default for FinePolicy {
    fn default() -> Self {
        Self {
            loan_period_days: 14,
            per_day_rate: 2,
        }
    }
}

/// Fine owed at `now` for a copy issued at `issue_date`.
///
/// Nothing is owed up to and including the due date; after it every whole
/// elapsed day costs `per_day_rate`. Partial days are truncated.
pub fn fine(issue_date: OffsetDateTime, now: OffsetDateTime, policy: &FinePolicy) -> u64 {
    let due = policy.due_date(issue_date);
    if now <= due {
        return 0;
    }
    let days = u64::try_from((now - due).whole_days()).unwrap_or(0);
    days.saturating_mul(policy.per_day_rate)
}

/// Evaluates a loan at `now`. Returned loans are frozen at their return date.
pub fn assess(loan: LoanRecord, now: OffsetDateTime, policy: &FinePolicy) -> AssessedLoan {
    let until = loan.return_date.unwrap_or(now);
    let due_date = policy.due_date(loan.issue_date);
    AssessedLoan {
        fine: fine(loan.issue_date, until, policy),
        overdue: until > due_date,
        due_date,
        loan,
    }
}
