use std::collections::{BTreeMap, HashMap};

use shelf_db::{BookCopy, BorrowerRef, LoanRecord, OpenLoan, SharedStore};
use shelf_kernel::SharedClock;

use super::fines::{assess, FinePolicy};
use super::models::{
    AssessedLoan, CopyAnalytics, CopyTrack, FailedCopy, FailureReason, IssueOutcome,
    MonthlyIssues, ReturnOutcome,
};
use crate::catalog::{CopyCatalog, TitleCatalog};
use crate::error::{LendingError, LendingResult};
use crate::utils::required_text;

/// The issue/return state machine and the loan log behind it.
///
/// Each copy of a batch is committed on its own; a failure part-way through
/// never undoes the copies before it. A storage fault aborts the rest of the
/// batch and surfaces as [`LendingError::StorageUnavailable`].
#[derive(Clone)]
pub struct CirculationLedger {
    pub(super) store: SharedStore,
    pub(super) copies: CopyCatalog,
    titles: TitleCatalog,
    clock: SharedClock,
    policy: FinePolicy,
}

impl CirculationLedger {
    pub fn new(
        store: SharedStore,
        copies: CopyCatalog,
        titles: TitleCatalog,
        clock: SharedClock,
        policy: FinePolicy,
    ) -> Self {
        Self {
            store,
            copies,
            titles,
            clock,
            policy,
        }
    }

    pub fn policy(&self) -> &FinePolicy {
        &self.policy
    }

    /// `borrower` with its id trimmed; loans are stored and matched on this form.
    fn normalize(borrower: &BorrowerRef) -> LendingResult<BorrowerRef> {
        let id = required_text("borrower.id", &borrower.id)?;
        Ok(BorrowerRef::new(id, borrower.kind))
    }

    fn validate_batch(borrower: &BorrowerRef, copy_ids: &[String]) -> LendingResult<BorrowerRef> {
        let borrower = Self::normalize(borrower)?;
        if copy_ids.is_empty() {
            return Err(LendingError::validation(
                "copy_ids",
                "must name at least one copy",
            ));
        }
        Ok(borrower)
    }

    pub async fn issue(
        &self,
        borrower: &BorrowerRef,
        librarian_id: &str,
        copy_ids: &[String],
    ) -> LendingResult<IssueOutcome> {
        let borrower = Self::validate_batch(borrower, copy_ids)?;
        let librarian_id = required_text("librarian_id", librarian_id)?;

        let copy_ids: Vec<String> = copy_ids.iter().map(|id| id.trim().to_string()).collect();
        let known: HashMap<String, BookCopy> = self
            .copies
            .find_by_ids(&copy_ids)
            .await?
            .into_iter()
            .map(|copy| (copy.id.clone(), copy))
            .collect();

        let mut outcome = IssueOutcome::default();
        for copy_id in copy_ids {
            let reason = match known.get(&copy_id) {
                None => Some(FailureReason::NotFound),
                Some(copy) if copy.issued => Some(FailureReason::AlreadyIssued),
                Some(_) => self.open(&borrower, &librarian_id, &copy_id).await?,
            };
            match reason {
                None => outcome.issued.push(copy_id),
                Some(reason) => {
                    tracing::debug!(copy_id = %copy_id, %reason, "copy not issued");
                    outcome.failed.push(FailedCopy { copy_id, reason });
                }
            }
        }

        tracing::info!(
            borrower = %borrower.id,
            kind = %borrower.kind,
            librarian = %librarian_id,
            issued = outcome.issued.len(),
            failed = outcome.failed.len(),
            "issue batch processed"
        );
        Ok(outcome)
    }

    async fn open(
        &self,
        borrower: &BorrowerRef,
        librarian_id: &str,
        copy_id: &str,
    ) -> LendingResult<Option<FailureReason>> {
        let loan = LoanRecord::open(borrower.clone(), librarian_id, copy_id, self.clock.now());
        Ok(match self.store.open_loan(&loan).await? {
            OpenLoan::Opened => None,
            OpenLoan::CopyMissing => Some(FailureReason::NotFound),
            // Another request, or an earlier entry of this batch, took the
            // copy after the lookup.
            OpenLoan::AlreadyIssued => Some(FailureReason::AlreadyIssued),
        })
    }

    /// Closes `borrower`'s open loans on `copy_ids`. A copy that is missing
    /// or not on loan to this borrower is reported in `not_found`.
    pub async fn return_copies(
        &self,
        borrower: &BorrowerRef,
        copy_ids: &[String],
        remarks: Option<&str>,
    ) -> LendingResult<ReturnOutcome> {
        let borrower = Self::validate_batch(borrower, copy_ids)?;
        let remarks = remarks.map(str::trim).filter(|r| !r.is_empty());

        let mut outcome = ReturnOutcome::default();
        for copy_id in copy_ids {
            let copy_id = copy_id.trim();
            let closed = self
                .store
                .close_loan(&borrower, copy_id, self.clock.now(), remarks)
                .await?;
            match closed {
                Some(_) => outcome.returned.push(copy_id.to_string()),
                None => outcome.not_found.push(copy_id.to_string()),
            }
        }

        tracing::info!(
            borrower = %borrower.id,
            kind = %borrower.kind,
            returned = outcome.returned.len(),
            not_found = outcome.not_found.len(),
            "return batch processed"
        );
        Ok(outcome)
    }

    /// Every loan of `borrower`, newest first.
    pub async fn history(&self, borrower: &BorrowerRef) -> LendingResult<Vec<LoanRecord>> {
        let borrower = Self::normalize(borrower)?;
        Ok(self.store.loans_for_borrower(&borrower, false).await?)
    }

    pub async fn active_loans(&self, borrower: &BorrowerRef) -> LendingResult<Vec<LoanRecord>> {
        let borrower = Self::normalize(borrower)?;
        Ok(self.store.loans_for_borrower(&borrower, true).await?)
    }

    /// History with fines evaluated now.
    pub async fn statement(&self, borrower: &BorrowerRef) -> LendingResult<Vec<AssessedLoan>> {
        let now = self.clock.now();
        Ok(self
            .history(borrower)
            .await?
            .into_iter()
            .map(|loan| assess(loan, now, &self.policy))
            .collect())
    }

    pub async fn track_copy(&self, copy_id: &str) -> LendingResult<CopyTrack> {
        let copy = self.copies.get(copy_id).await?;
        let title = self.titles.owning_title(&copy).await?;
        let history = self.store.loans_for_copy(copy_id).await?;

        let now = self.clock.now();
        let current_loan = history
            .iter()
            .find(|loan| loan.is_open())
            .cloned()
            .map(|loan| assess(loan, now, &self.policy));
        let analytics = analytics(&history, current_loan.is_some());

        Ok(CopyTrack {
            title,
            copy,
            history,
            current_loan,
            analytics,
        })
    }
}

fn analytics(history: &[LoanRecord], currently_issued: bool) -> CopyAnalytics {
    let mut monthly: BTreeMap<(i32, u8), u64> = BTreeMap::new();
    for loan in history {
        let date = loan.issue_date.date();
        *monthly.entry((date.year(), u8::from(date.month()))).or_default() += 1;
    }

    CopyAnalytics {
        total_issued: history.len() as u64,
        total_returned: history.iter().filter(|loan| loan.returned).count() as u64,
        currently_issued,
        monthly: monthly
            .into_iter()
            .map(|((year, month), issued_count)| MonthlyIssues {
                month: format!("{year:04}-{month:02}"),
                issued_count,
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::models::NewTitle;
    use crate::catalog::{CatalogPolicy, SequenceAllocator};
    use shelf_db::MemoryStore;
    use shelf_kernel::FixedClock;
    use std::sync::Arc;
    use time::macros::datetime;
    use time::Duration;

    struct Fixture {
        ledger: CirculationLedger,
        clock: Arc<FixedClock>,
        ids: Vec<String>,
    }

    async fn fixture(stock: i64) -> Fixture {
        let store: SharedStore = Arc::new(MemoryStore::new());
        let clock = Arc::new(FixedClock::new(datetime!(2025-01-01 10:00 UTC)));
        let copies = CopyCatalog::new(store.clone());
        let titles = TitleCatalog::new(
            store.clone(),
            SequenceAllocator::new(store.clone()),
            copies.clone(),
            clock.clone(),
            CatalogPolicy::default(),
        );
        let registered = titles
            .register_title(
                NewTitle {
                    title: "Signals and Systems".to_string(),
                    author: "Oppenheim".to_string(),
                    details: "2nd edition".to_string(),
                    price: 500.0,
                    course: "B.Tech".to_string(),
                    branch: "ECE".to_string(),
                },
                stock,
            )
            .await
            .unwrap();
        let ids = registered.copies.into_iter().map(|c| c.id).collect();
        let ledger = CirculationLedger::new(store, copies, titles, clock.clone(), FinePolicy::default());
        Fixture { ledger, clock, ids }
    }

    #[tokio::test]
    async fn empty_batch_is_rejected() {
        let fx = fixture(1).await;
        let err = fx
            .ledger
            .issue(&BorrowerRef::student("s-1"), "lib-1", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, LendingError::Validation { .. }));
    }

    #[tokio::test]
    async fn duplicate_id_in_one_batch_is_already_issued() {
        let fx = fixture(1).await;
        let id = fx.ids[0].clone();
        let outcome = fx
            .ledger
            .issue(&BorrowerRef::student("s-1"), "lib-1", &[id.clone(), id.clone()])
            .await
            .unwrap();
        assert_eq!(outcome.issued, vec![id.clone()]);
        assert_eq!(
            outcome.failed,
            vec![FailedCopy {
                copy_id: id,
                reason: FailureReason::AlreadyIssued
            }]
        );
    }

    #[tokio::test]
    async fn borrower_id_is_trimmed_before_it_is_stored() {
        let fx = fixture(1).await;
        let ids = fx.ids.clone();
        fx.ledger
            .issue(&BorrowerRef::student("  s-1 "), "lib-1", &ids)
            .await
            .unwrap();

        let history = fx.ledger.history(&BorrowerRef::student("s-1")).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].borrower.id, "s-1");

        let outcome = fx
            .ledger
            .return_copies(&BorrowerRef::student("s-1"), &ids, None)
            .await
            .unwrap();
        assert_eq!(outcome.returned, ids);
        assert!(fx
            .ledger
            .active_loans(&BorrowerRef::student(" s-1"))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn lookup_keeps_input_order_and_reports_missing_copies() {
        let fx = fixture(2).await;
        let batch = vec![
            "ZZ-000001".to_string(),
            format!(" {} ", fx.ids[1]),
            fx.ids[0].clone(),
        ];
        let outcome = fx
            .ledger
            .issue(&BorrowerRef::faculty("f-1"), "lib-1", &batch)
            .await
            .unwrap();
        assert_eq!(outcome.issued, vec![fx.ids[1].clone(), fx.ids[0].clone()]);
        assert_eq!(
            outcome.failed,
            vec![FailedCopy {
                copy_id: "ZZ-000001".to_string(),
                reason: FailureReason::NotFound
            }]
        );
    }

    #[tokio::test]
    async fn remarks_are_kept_on_the_closed_loan() {
        let fx = fixture(1).await;
        let borrower = BorrowerRef::faculty("f-9");
        fx.ledger
            .issue(&borrower, "lib-1", &fx.ids)
            .await
            .unwrap();
        fx.clock.advance(Duration::days(3));
        fx.ledger
            .return_copies(&borrower, &fx.ids, Some("  cover torn "))
            .await
            .unwrap();

        let history = fx.ledger.history(&borrower).await.unwrap();
        assert_eq!(history[0].remarks.as_deref(), Some("cover torn"));
        assert_eq!(
            history[0].return_date,
            Some(datetime!(2025-01-04 10:00 UTC))
        );
    }

    #[tokio::test]
    async fn statement_charges_open_loans_until_now() {
        let fx = fixture(2).await;
        let borrower = BorrowerRef::student("s-1");
        fx.ledger
            .issue(&borrower, "lib-1", &fx.ids)
            .await
            .unwrap();

        fx.clock.advance(Duration::days(16));
        fx.ledger
            .return_copies(&borrower, &fx.ids[..1], None)
            .await
            .unwrap();
        fx.clock.advance(Duration::days(4));

        let statement = fx.ledger.statement(&borrower).await.unwrap();
        let fine_of = |id: &str| {
            statement
                .iter()
                .find(|assessed| assessed.loan.copy_id == id)
                .map(|assessed| assessed.fine)
        };
        // Returned after 16 days: frozen at 2 days late.
        assert_eq!(fine_of(&fx.ids[0]), Some(4));
        // Still out after 20 days.
        assert_eq!(fine_of(&fx.ids[1]), Some(12));
    }

    #[tokio::test]
    async fn track_copy_reports_history_and_monthly_counts() {
        let fx = fixture(1).await;
        let id = fx.ids[0].clone();
        let first = BorrowerRef::student("s-1");
        let second = BorrowerRef::student("s-2");

        fx.ledger.issue(&first, "lib-1", &[id.clone()]).await.unwrap();
        fx.clock.advance(Duration::days(5));
        fx.ledger.return_copies(&first, &[id.clone()], None).await.unwrap();
        fx.clock.set(datetime!(2025-02-10 10:00 UTC));
        fx.ledger.issue(&second, "lib-2", &[id.clone()]).await.unwrap();

        let track = fx.ledger.track_copy(&id).await.unwrap();
        assert_eq!(track.history.len(), 2);
        assert_eq!(track.history[0].borrower, second);
        assert_eq!(
            track.current_loan.as_ref().map(|c| c.loan.borrower.clone()),
            Some(second)
        );
        assert_eq!(track.analytics.total_issued, 2);
        assert_eq!(track.analytics.total_returned, 1);
        assert!(track.analytics.currently_issued);
        assert_eq!(
            track.analytics.monthly,
            vec![
                MonthlyIssues {
                    month: "2025-01".to_string(),
                    issued_count: 1
                },
                MonthlyIssues {
                    month: "2025-02".to_string(),
                    issued_count: 1
                },
            ]
        );
        assert_eq!(track.title.title, "Signals and Systems");
    }

    #[tokio::test]
    async fn unknown_copy_cannot_be_tracked() {
        let fx = fixture(1).await;
        assert!(matches!(
            fx.ledger.track_copy("QQ-123456").await.unwrap_err(),
            LendingError::NotFound(_)
        ));
    }
}
