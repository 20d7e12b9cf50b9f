//! Process-local backend used by tests and the `memory` deployment mode.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};
use crate::records::{
    BookCopy, BorrowerRef, CopyCounts, LoanRecord, OpenLoan, SequenceCounter, Title, TitlePage,
    TitleQuery,
};
use crate::store::Store;

#[derive(Default)]
struct Tables {
    counters: HashMap<String, SequenceCounter>,
    titles: Vec<Title>,
    title_index: HashMap<Uuid, usize>,
    copies: HashMap<String, BookCopy>,
    copies_by_title: HashMap<Uuid, Vec<String>>,
    loans: Vec<LoanRecord>,
    open_by_copy: HashMap<String, usize>,
}

impl Tables {
    fn title_conflict(&self, title: &Title) -> bool {
        let key = title.dedup_key();
        self.titles
            .iter()
            .any(|existing| existing.id != title.id && existing.dedup_key() == key)
    }

    /// Every copy must belong to `title_id` and carry an id unused both in
    /// the table and within the batch.
    fn check_copies(&self, title_id: Uuid, copies: &[BookCopy]) -> StoreResult<()> {
        let mut batch_ids = HashSet::new();
        for copy in copies {
            if copy.title_id != title_id {
                return Err(StoreError::not_found("title", copy.title_id.to_string()));
            }
            if self.copies.contains_key(&copy.id) || !batch_ids.insert(copy.id.as_str()) {
                return Err(StoreError::duplicate("copy", copy.id.clone()));
            }
        }
        Ok(())
    }

    fn push_copies(&mut self, copies: &[BookCopy]) {
        for copy in copies {
            self.copies_by_title
                .entry(copy.title_id)
                .or_default()
                .push(copy.id.clone());
            self.copies.insert(copy.id.clone(), copy.clone());
        }
    }

    fn sorted_newest_first(&self, mut loans: Vec<LoanRecord>) -> Vec<LoanRecord> {
        loans.sort_by(|a, b| b.issue_date.cmp(&a.issue_date).then_with(|| b.id.cmp(&a.id)));
        loans
    }
}

/// In-memory [`Store`]. Each method runs inside one critical section of a
/// single table lock, which gives the same per-call atomicity the durable
/// backends provide.
pub struct MemoryStore {
    tables: RwLock<Tables>,
    available: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            available: AtomicBool::new(true),
        }
    }

    /// Simulates an outage: while unavailable every call fails with
    /// [`StoreError::Unavailable`] and applies nothing.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn check(&self) -> StoreResult<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("memory store offline".to_string()))
        }
    }

    fn read(&self) -> StoreResult<RwLockReadGuard<'_, Tables>> {
        self.check()?;
        self.tables
            .read()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".to_string()))
    }

    fn write(&self) -> StoreResult<RwLockWriteGuard<'_, Tables>> {
        self.check()?;
        self.tables
            .write()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".to_string()))
    }

    /// Test hook: overwrites a copy's cached flag without touching the
    /// ledger, producing the drift the audit pass is meant to catch.
    pub fn corrupt_copy_flag(&self, id: &str, issued: bool) -> StoreResult<()> {
        let mut tables = self.write()?;
        let copy = tables
            .copies
            .get_mut(id)
            .ok_or_else(|| StoreError::not_found("copy", id))?;
        copy.issued = issued;
        Ok(())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn contains_ci(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

#[async_trait]
impl Store for MemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn ping(&self) -> StoreResult<()> {
        self.read().map(|_| ())
    }

    async fn load_counter(&self, name: &str) -> StoreResult<Option<SequenceCounter>> {
        Ok(self.read()?.counters.get(name).cloned())
    }

    async fn swap_counter(
        &self,
        expected: Option<&SequenceCounter>,
        next: &SequenceCounter,
    ) -> StoreResult<bool> {
        let mut tables = self.write()?;
        let current = tables.counters.get(&next.name);
        if current != expected {
            return Ok(false);
        }
        tables.counters.insert(next.name.clone(), next.clone());
        Ok(true)
    }

    async fn insert_title(&self, title: &Title, copies: &[BookCopy]) -> StoreResult<()> {
        let mut tables = self.write()?;
        if tables.title_index.contains_key(&title.id) {
            return Err(StoreError::duplicate("title", title.id.to_string()));
        }
        if tables.title_conflict(title) {
            return Err(StoreError::duplicate(
                "title",
                format!("{} / {}", title.title, title.author),
            ));
        }
        tables.check_copies(title.id, copies)?;

        let position = tables.titles.len();
        tables.titles.push(title.clone());
        tables.title_index.insert(title.id, position);
        tables.push_copies(copies);
        Ok(())
    }

    async fn update_title(&self, title: &Title, new_copies: &[BookCopy]) -> StoreResult<()> {
        let mut tables = self.write()?;
        let position = *tables
            .title_index
            .get(&title.id)
            .ok_or_else(|| StoreError::not_found("title", title.id.to_string()))?;
        if tables.title_conflict(title) {
            return Err(StoreError::duplicate(
                "title",
                format!("{} / {}", title.title, title.author),
            ));
        }
        tables.check_copies(title.id, new_copies)?;

        tables.titles[position] = title.clone();
        tables.push_copies(new_copies);
        Ok(())
    }

    async fn get_title(&self, id: Uuid) -> StoreResult<Option<Title>> {
        let tables = self.read()?;
        Ok(tables
            .title_index
            .get(&id)
            .map(|&position| tables.titles[position].clone()))
    }

    async fn search_titles(&self, query: &TitleQuery) -> StoreResult<TitlePage> {
        let tables = self.read()?;
        let matches: Vec<&Title> = tables
            .titles
            .iter()
            .filter(|title| {
                query
                    .title
                    .as_deref()
                    .map_or(true, |needle| contains_ci(&title.title, needle))
            })
            .filter(|title| {
                query
                    .author
                    .as_deref()
                    .map_or(true, |needle| contains_ci(&title.author, needle))
            })
            .filter(|title| {
                query.copy_id.as_deref().map_or(true, |needle| {
                    tables
                        .copies_by_title
                        .get(&title.id)
                        .is_some_and(|ids| ids.iter().any(|id| contains_ci(id, needle)))
                })
            })
            .collect();

        let total = matches.len() as u64;
        let offset = usize::try_from(query.offset).unwrap_or(usize::MAX);
        let limit = if query.limit == 0 {
            usize::MAX
        } else {
            usize::try_from(query.limit).unwrap_or(usize::MAX)
        };
        let titles = matches
            .into_iter()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect();

        Ok(TitlePage { titles, total })
    }

    async fn count_titles(&self) -> StoreResult<u64> {
        Ok(self.read()?.titles.len() as u64)
    }

    async fn get_copy(&self, id: &str) -> StoreResult<Option<BookCopy>> {
        Ok(self.read()?.copies.get(id).cloned())
    }

    async fn find_copies(&self, ids: &[String]) -> StoreResult<Vec<BookCopy>> {
        let tables = self.read()?;
        Ok(ids
            .iter()
            .filter_map(|id| tables.copies.get(id).cloned())
            .collect())
    }

    async fn copies_for_title(&self, title_id: Uuid) -> StoreResult<Vec<BookCopy>> {
        let tables = self.read()?;
        Ok(tables
            .copies_by_title
            .get(&title_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| tables.copies.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn count_copies(&self, title_id: Option<Uuid>) -> StoreResult<CopyCounts> {
        let tables = self.read()?;
        let mut counts = CopyCounts::default();
        for copy in tables.copies.values() {
            if title_id.is_some_and(|id| id != copy.title_id) {
                continue;
            }
            counts.total += 1;
            if copy.issued {
                counts.issued += 1;
            }
        }
        Ok(counts)
    }

    async fn set_copy_issued(&self, id: &str, issued: bool) -> StoreResult<bool> {
        let mut tables = self.write()?;
        Ok(match tables.copies.get_mut(id) {
            Some(copy) => {
                copy.issued = issued;
                true
            }
            None => false,
        })
    }

    async fn set_copy_tampered(&self, id: &str, tampered: bool) -> StoreResult<bool> {
        let mut tables = self.write()?;
        Ok(match tables.copies.get_mut(id) {
            Some(copy) => {
                copy.tampered = tampered;
                true
            }
            None => false,
        })
    }

    async fn issued_copy_ids(&self) -> StoreResult<Vec<String>> {
        let tables = self.read()?;
        let mut ids: Vec<String> = tables
            .copies
            .values()
            .filter(|copy| copy.issued)
            .map(|copy| copy.id.clone())
            .collect();
        ids.sort();
        Ok(ids)
    }

    async fn open_loan(&self, loan: &LoanRecord) -> StoreResult<OpenLoan> {
        let mut tables = self.write()?;
        let already_open = tables.open_by_copy.contains_key(&loan.copy_id);
        let Some(copy) = tables.copies.get_mut(&loan.copy_id) else {
            return Ok(OpenLoan::CopyMissing);
        };
        if copy.issued || already_open {
            return Ok(OpenLoan::AlreadyIssued);
        }
        copy.issued = true;

        let position = tables.loans.len();
        tables.loans.push(loan.clone());
        tables.open_by_copy.insert(loan.copy_id.clone(), position);
        Ok(OpenLoan::Opened)
    }

    async fn close_loan(
        &self,
        borrower: &BorrowerRef,
        copy_id: &str,
        returned_at: OffsetDateTime,
        remarks: Option<&str>,
    ) -> StoreResult<Option<LoanRecord>> {
        let mut tables = self.write()?;
        let Some(&position) = tables.open_by_copy.get(copy_id) else {
            return Ok(None);
        };
        if tables.loans[position].borrower != *borrower {
            return Ok(None);
        }

        let loan = &mut tables.loans[position];
        loan.returned = true;
        loan.return_date = Some(returned_at);
        if let Some(remarks) = remarks {
            loan.remarks = Some(remarks.to_string());
        }
        let closed = loan.clone();

        tables.open_by_copy.remove(copy_id);
        if let Some(copy) = tables.copies.get_mut(copy_id) {
            copy.issued = false;
        }
        Ok(Some(closed))
    }

    async fn loans_for_borrower(
        &self,
        borrower: &BorrowerRef,
        open_only: bool,
    ) -> StoreResult<Vec<LoanRecord>> {
        let tables = self.read()?;
        let loans = tables
            .loans
            .iter()
            .filter(|loan| loan.borrower == *borrower && (!open_only || loan.is_open()))
            .cloned()
            .collect();
        Ok(tables.sorted_newest_first(loans))
    }

    async fn loans_for_copy(&self, copy_id: &str) -> StoreResult<Vec<LoanRecord>> {
        let tables = self.read()?;
        let loans = tables
            .loans
            .iter()
            .filter(|loan| loan.copy_id == copy_id)
            .cloned()
            .collect();
        Ok(tables.sorted_newest_first(loans))
    }

    async fn open_loans(&self) -> StoreResult<Vec<LoanRecord>> {
        let tables = self.read()?;
        Ok(tables
            .open_by_copy
            .values()
            .map(|&position| tables.loans[position].clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::BorrowerKind;

    fn title(name: &str, author: &str) -> Title {
        let now = OffsetDateTime::now_utc();
        Title {
            id: Uuid::now_v7(),
            title: name.to_string(),
            author: author.to_string(),
            details: "details".to_string(),
            price: 10.0,
            course: "B.Tech".to_string(),
            branch: "CSE".to_string(),
            created_at: now,
            updated_at: now,
        }
    }

    fn copy(id: &str, title_id: Uuid) -> BookCopy {
        BookCopy {
            id: id.to_string(),
            title_id,
            issued: false,
            tampered: false,
            created_at: OffsetDateTime::now_utc(),
        }
    }

    #[tokio::test]
    async fn swap_counter_rejects_stale_expectation() {
        let store = MemoryStore::new();
        let first = SequenceCounter {
            name: "bookId".to_string(),
            prefix: "AA".to_string(),
            number: 1,
        };
        assert!(store.swap_counter(None, &first).await.unwrap());
        assert!(!store.swap_counter(None, &first).await.unwrap());

        let second = SequenceCounter {
            number: 2,
            ..first.clone()
        };
        assert!(store.swap_counter(Some(&first), &second).await.unwrap());
        assert!(!store.swap_counter(Some(&first), &second).await.unwrap());
        assert_eq!(store.load_counter("bookId").await.unwrap(), Some(second));
    }

    #[tokio::test]
    async fn duplicate_title_author_pair_is_rejected_case_insensitively() {
        let store = MemoryStore::new();
        store.insert_title(&title("Dune", "Frank Herbert"), &[]).await.unwrap();

        let err = store
            .insert_title(&title("  dune ", "FRANK HERBERT"), &[])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Duplicate { entity: "title", .. }));

        store.insert_title(&title("Dune", "Someone Else"), &[]).await.unwrap();
        assert_eq!(store.count_titles().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn title_and_copies_are_written_together() {
        let store = MemoryStore::new();
        let dune = title("Dune", "Frank Herbert");
        store
            .insert_title(&dune, &[copy("AA-000001", dune.id)])
            .await
            .unwrap();

        let messiah = title("Dune Messiah", "Frank Herbert");
        let err = store
            .insert_title(
                &messiah,
                &[copy("AA-000002", messiah.id), copy("AA-000001", messiah.id)],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Duplicate { entity: "copy", .. }));
        assert!(store.get_title(messiah.id).await.unwrap().is_none());
        assert!(store.get_copy("AA-000002").await.unwrap().is_none());

        // The failed insert left nothing behind, so the same title still fits.
        store
            .insert_title(&messiah, &[copy("AA-000002", messiah.id)])
            .await
            .unwrap();
        assert_eq!(store.count_titles().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn rejected_update_appends_no_copies() {
        let store = MemoryStore::new();
        let dune = title("Dune", "Frank Herbert");
        let emma = title("Emma", "Jane Austen");
        store
            .insert_title(&dune, &[copy("AA-000001", dune.id)])
            .await
            .unwrap();
        store
            .insert_title(&emma, &[copy("AA-000002", emma.id)])
            .await
            .unwrap();

        let renamed = Title {
            title: "EMMA".to_string(),
            author: "jane austen".to_string(),
            ..dune.clone()
        };
        let err = store
            .update_title(&renamed, &[copy("AA-000003", dune.id)])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Duplicate { entity: "title", .. }));
        assert!(store.get_copy("AA-000003").await.unwrap().is_none());
        assert_eq!(store.get_title(dune.id).await.unwrap(), Some(dune.clone()));

        let retitled = Title {
            details: "Deluxe".to_string(),
            ..dune.clone()
        };
        store
            .update_title(&retitled, &[copy("AA-000003", dune.id)])
            .await
            .unwrap();
        assert_eq!(store.copies_for_title(dune.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn open_loan_refuses_second_open_loan() {
        let store = MemoryStore::new();
        let dune = title("Dune", "Frank Herbert");
        store
            .insert_title(&dune, &[copy("AA-000001", dune.id)])
            .await
            .unwrap();

        let now = OffsetDateTime::now_utc();
        let first = LoanRecord::open(BorrowerRef::student("s-1"), "lib-1", "AA-000001", now);
        let second = LoanRecord::open(BorrowerRef::student("s-2"), "lib-1", "AA-000001", now);

        assert_eq!(store.open_loan(&first).await.unwrap(), OpenLoan::Opened);
        assert_eq!(store.open_loan(&second).await.unwrap(), OpenLoan::AlreadyIssued);
        assert_eq!(store.open_loans().await.unwrap().len(), 1);

        let missing = LoanRecord::open(BorrowerRef::student("s-1"), "lib-1", "ZZ-999999", now);
        assert_eq!(store.open_loan(&missing).await.unwrap(), OpenLoan::CopyMissing);
    }

    #[tokio::test]
    async fn close_loan_matches_borrower_kind_and_id() {
        let store = MemoryStore::new();
        let dune = title("Dune", "Frank Herbert");
        store
            .insert_title(&dune, &[copy("AA-000001", dune.id)])
            .await
            .unwrap();

        let now = OffsetDateTime::now_utc();
        let loan = LoanRecord::open(BorrowerRef::student("42"), "lib-1", "AA-000001", now);
        store.open_loan(&loan).await.unwrap();

        let impostor = BorrowerRef::new("42", BorrowerKind::Faculty);
        assert!(store
            .close_loan(&impostor, "AA-000001", now, None)
            .await
            .unwrap()
            .is_none());

        let closed = store
            .close_loan(&BorrowerRef::student("42"), "AA-000001", now, Some("spine torn"))
            .await
            .unwrap()
            .expect("loan should close");
        assert!(closed.returned);
        assert_eq!(closed.remarks.as_deref(), Some("spine torn"));
        assert!(!store.get_copy("AA-000001").await.unwrap().unwrap().issued);
    }

    #[tokio::test]
    async fn offline_store_applies_nothing() {
        let store = MemoryStore::new();
        store.set_available(false);
        let counter = SequenceCounter {
            name: "bookId".to_string(),
            prefix: "AA".to_string(),
            number: 1,
        };
        assert!(matches!(
            store.swap_counter(None, &counter).await,
            Err(StoreError::Unavailable(_))
        ));

        store.set_available(true);
        assert!(store.load_counter("bookId").await.unwrap().is_none());
    }
}
