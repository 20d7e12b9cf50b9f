use std::sync::Arc;

use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::StoreResult;
use crate::records::{
    BookCopy, BorrowerRef, CopyCounts, LoanRecord, OpenLoan, SequenceCounter, Title, TitlePage,
    TitleQuery,
};

/// Shared handle used by every service.
pub type SharedStore = Arc<dyn Store>;

/// Storage contract for the four lending collections.
///
/// Every method is a single atomic unit against the backend. Methods that
/// touch two collections (`insert_title`, `update_title`, `open_loan`,
/// `close_loan`) commit every write or none. Callers never hold in-process
/// locks across these calls.
#[async_trait]
pub trait Store: Send + Sync {
    /// Short backend name for logs.
    fn backend(&self) -> &'static str;

    /// Cheap connectivity check.
    async fn ping(&self) -> StoreResult<()>;

    // sequence counters

    async fn load_counter(&self, name: &str) -> StoreResult<Option<SequenceCounter>>;

    /// Compare-and-swap on a counter row.
    ///
    /// With `expected = None` the row is created only if absent. Returns
    /// `false` when the stored value no longer matches `expected`.
    async fn swap_counter(
        &self,
        expected: Option<&SequenceCounter>,
        next: &SequenceCounter,
    ) -> StoreResult<bool>;

    // titles

    /// Inserts a title together with its first copies, all or nothing.
    /// Enforces `(title, author)` uniqueness and unused copy ids.
    async fn insert_title(&self, title: &Title, copies: &[BookCopy]) -> StoreResult<()>;

    /// Replaces a title's fields and appends `new_copies`, all or nothing.
    /// Enforces uniqueness against other titles.
    async fn update_title(&self, title: &Title, new_copies: &[BookCopy]) -> StoreResult<()>;

    async fn get_title(&self, id: Uuid) -> StoreResult<Option<Title>>;

    async fn search_titles(&self, query: &TitleQuery) -> StoreResult<TitlePage>;

    async fn count_titles(&self) -> StoreResult<u64>;

    // copies

    async fn get_copy(&self, id: &str) -> StoreResult<Option<BookCopy>>;

    /// Batch lookup; missing ids are simply absent from the result.
    async fn find_copies(&self, ids: &[String]) -> StoreResult<Vec<BookCopy>>;

    /// Copies of one title in creation order.
    async fn copies_for_title(&self, title_id: Uuid) -> StoreResult<Vec<BookCopy>>;

    async fn count_copies(&self, title_id: Option<Uuid>) -> StoreResult<CopyCounts>;

    /// Overwrites the cached issued flag. Returns `false` if the copy is absent.
    async fn set_copy_issued(&self, id: &str, issued: bool) -> StoreResult<bool>;

    /// Returns `false` if the copy is absent.
    async fn set_copy_tampered(&self, id: &str, tampered: bool) -> StoreResult<bool>;

    /// Ids of every copy whose cached flag says issued.
    async fn issued_copy_ids(&self) -> StoreResult<Vec<String>>;

    // loans

    /// Flips the copy to issued and appends `loan`, atomically.
    ///
    /// Fails over to [`OpenLoan::AlreadyIssued`] when the copy is flagged
    /// issued or already has an open loan.
    async fn open_loan(&self, loan: &LoanRecord) -> StoreResult<OpenLoan>;

    /// Closes the open loan of `copy_id` held by `borrower` and flips the copy
    /// back to available, atomically. Returns the closed loan, or `None` when
    /// that borrower has no open loan on that copy.
    async fn close_loan(
        &self,
        borrower: &BorrowerRef,
        copy_id: &str,
        returned_at: OffsetDateTime,
        remarks: Option<&str>,
    ) -> StoreResult<Option<LoanRecord>>;

    /// Loans of one borrower, newest issue first.
    async fn loans_for_borrower(
        &self,
        borrower: &BorrowerRef,
        open_only: bool,
    ) -> StoreResult<Vec<LoanRecord>>;

    /// Every loan ever recorded for a copy, newest issue first.
    async fn loans_for_copy(&self, copy_id: &str) -> StoreResult<Vec<LoanRecord>>;

    /// Every open loan, in no particular order.
    async fn open_loans(&self) -> StoreResult<Vec<LoanRecord>>;
}
