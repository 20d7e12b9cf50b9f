use shelf_db::{BookCopy, CopyCounts, SharedStore};
use uuid::Uuid;

use super::models::DashboardCounts;
use crate::error::{LendingError, LendingResult};

/// Physical copies and their cached state flags.
#[derive(Clone)]
pub struct CopyCatalog {
    store: SharedStore,
}

impl CopyCatalog {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    /// Batch lookup in input order; unknown ids are skipped and repeated ids
    /// repeat in the result.
    pub async fn find_by_ids(&self, ids: &[String]) -> LendingResult<Vec<BookCopy>> {
        Ok(self.store.find_copies(ids).await?)
    }

    pub async fn get(&self, id: &str) -> LendingResult<BookCopy> {
        self.store
            .get_copy(id)
            .await?
            .ok_or_else(|| LendingError::not_found(format!("copy {id} not found")))
    }

    /// Overwrites the issued flag. Reserved for reconciliation; issue and
    /// return flip the flag inside their own atomic write.
    pub async fn set_issued(&self, id: &str, issued: bool) -> LendingResult<()> {
        if !self.store.set_copy_issued(id, issued).await? {
            return Err(LendingError::not_found(format!("copy {id} not found")));
        }
        tracing::info!(copy_id = id, issued, "copy issued flag overwritten");
        Ok(())
    }

    pub async fn set_tampered(&self, id: &str, tampered: bool) -> LendingResult<BookCopy> {
        if !self.store.set_copy_tampered(id, tampered).await? {
            return Err(LendingError::not_found(format!("copy {id} not found")));
        }
        tracing::info!(copy_id = id, tampered, "copy tampered flag updated");
        self.get(id).await
    }

    pub async fn count_by_title(&self, title_id: Uuid) -> LendingResult<CopyCounts> {
        Ok(self.store.count_copies(Some(title_id)).await?)
    }

    pub async fn count_issued(&self) -> LendingResult<u64> {
        Ok(self.store.count_copies(None).await?.issued)
    }

    pub async fn count_available(&self) -> LendingResult<u64> {
        Ok(self.store.count_copies(None).await?.available())
    }

    pub async fn dashboard(&self) -> LendingResult<DashboardCounts> {
        let titles = self.store.count_titles().await?;
        let counts = self.store.count_copies(None).await?;
        Ok(DashboardCounts {
            titles,
            copies: counts.total,
            issued: counts.issued,
            available: counts.available(),
        })
    }
}
