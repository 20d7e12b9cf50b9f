use shelf_db::{dedup_key, BookCopy, SharedStore, StoreError, Title, TitleQuery};
use shelf_kernel::SharedClock;
use uuid::Uuid;

use super::copies::CopyCatalog;
use super::models::{
    CopyDetails, NewTitle, RegisteredTitle, TitleFilter, TitleUpdate, TitleWithCopies,
};
use super::sequence::SequenceAllocator;
use crate::error::{LendingError, LendingResult};
use crate::utils::{Page, Pagination};

/// Limits applied when registering or restocking titles.
#[derive(Debug, Clone)]
pub struct CatalogPolicy {
    pub counter_name: String,
    pub max_stock: u32,
}

impl CatalogPolicy {
    pub fn from_settings(settings: &shelf_kernel::settings::CirculationSettings) -> Self {
        Self {
            counter_name: settings.counter_name.clone(),
            max_stock: settings.max_stock,
        }
    }
}

impl Default for CatalogPolicy {
    fn default() -> Self {
        Self {
            counter_name: "bookId".to_string(),
            max_stock: 200,
        }
    }
}

/// Bibliographic metadata and the copies minted for it.
#[derive(Clone)]
pub struct TitleCatalog {
    store: SharedStore,
    allocator: SequenceAllocator,
    copies: CopyCatalog,
    clock: SharedClock,
    policy: CatalogPolicy,
}

impl TitleCatalog {
    pub fn new(
        store: SharedStore,
        allocator: SequenceAllocator,
        copies: CopyCatalog,
        clock: SharedClock,
        policy: CatalogPolicy,
    ) -> Self {
        Self {
            store,
            allocator,
            copies,
            clock,
            policy,
        }
    }

    fn validate_stock(&self, stock: i64) -> LendingResult<usize> {
        if stock <= 0 || stock > i64::from(self.policy.max_stock) {
            return Err(LendingError::validation(
                "stock",
                format!("must be within 1..={}", self.policy.max_stock),
            ));
        }
        usize::try_from(stock).map_err(|_| LendingError::validation("stock", "out of range"))
    }

    fn duplicate(fields: &NewTitle) -> LendingError {
        LendingError::conflict(format!(
            "title '{}' by '{}' already exists",
            fields.title, fields.author
        ))
    }

    /// Creates the title and `stock` available copies for it in one write.
    /// Identifiers are allocated before anything is stored, so a failure
    /// leaves no title behind and the call can be retried.
    pub async fn register_title(&self, new: NewTitle, stock: i64) -> LendingResult<RegisteredTitle> {
        let fields = new.validated()?;
        let stock = self.validate_stock(stock)?;

        let now = self.clock.now();
        let title = Title {
            id: Uuid::now_v7(),
            title: fields.title.clone(),
            author: fields.author.clone(),
            details: fields.details.clone(),
            price: fields.price,
            course: fields.course.clone(),
            branch: fields.branch.clone(),
            created_at: now,
            updated_at: now,
        };
        if self.collides(title.id, &fields).await? {
            return Err(Self::duplicate(&fields));
        }

        let copies = self.mint(title.id, stock).await?;
        self.store
            .insert_title(&title, &copies)
            .await
            .map_err(|err| match err {
                StoreError::Duplicate { entity: "title", .. } => Self::duplicate(&fields),
                other => other.into(),
            })?;

        tracing::info!(
            title_id = %title.id,
            title = %title.title,
            stock = copies.len(),
            "title registered"
        );
        Ok(RegisteredTitle { title, copies })
    }

    /// Applies new fields to the title owning `any_copy_id` and grows its
    /// stock to `new_stock`. Stock never shrinks. Fields and new copies are
    /// stored together; a rejected update adds no copies.
    pub async fn update_title(
        &self,
        any_copy_id: &str,
        fields: NewTitle,
        new_stock: i64,
    ) -> LendingResult<TitleUpdate> {
        let fields = fields.validated()?;
        let new_stock = self.validate_stock(new_stock)?;

        let copy = self.copies.get(any_copy_id).await?;
        let current = self.owning_title(&copy).await?;

        let existing = self.copies.count_by_title(current.id).await?.total;
        let existing = usize::try_from(existing).unwrap_or(usize::MAX);
        if new_stock < existing {
            return Err(LendingError::conflict(format!(
                "stock cannot shrink from {existing} to {new_stock}"
            )));
        }
        if self.collides(current.id, &fields).await? {
            return Err(Self::duplicate(&fields));
        }

        let added_copies = self.mint(current.id, new_stock - existing).await?;
        let title = Title {
            title: fields.title.clone(),
            author: fields.author.clone(),
            details: fields.details.clone(),
            price: fields.price,
            course: fields.course.clone(),
            branch: fields.branch.clone(),
            updated_at: self.clock.now(),
            ..current
        };
        self.store
            .update_title(&title, &added_copies)
            .await
            .map_err(|err| match err {
                StoreError::Duplicate { entity: "title", .. } => Self::duplicate(&fields),
                other => other.into(),
            })?;

        tracing::info!(
            title_id = %title.id,
            added = added_copies.len(),
            "title updated"
        );
        Ok(TitleUpdate {
            title,
            added_copies,
        })
    }

    /// Titles matching every present filter, oldest first, each with its copies.
    pub async fn search(
        &self,
        filter: TitleFilter,
        pagination: Pagination,
    ) -> LendingResult<Page<TitleWithCopies>> {
        let query = TitleQuery {
            title: non_blank(filter.title),
            author: non_blank(filter.author),
            copy_id: non_blank(filter.copy_id),
            offset: pagination.offset(),
            limit: pagination.per_page,
        };
        let page = self.store.search_titles(&query).await?;

        let mut items = Vec::with_capacity(page.titles.len());
        for title in page.titles {
            let copies = self.store.copies_for_title(title.id).await?;
            items.push(TitleWithCopies { title, copies });
        }
        Ok(Page::new(items, page.total, pagination))
    }

    pub async fn get_by_copy(&self, copy_id: &str) -> LendingResult<CopyDetails> {
        let copy = self.copies.get(copy_id).await?;
        let title = self.owning_title(&copy).await?;
        let stock = self.copies.count_by_title(title.id).await?.into();
        Ok(CopyDetails { title, copy, stock })
    }

    pub(crate) async fn owning_title(&self, copy: &BookCopy) -> LendingResult<Title> {
        self.store.get_title(copy.title_id).await?.ok_or_else(|| {
            LendingError::Integrity(format!(
                "copy {} references missing title {}",
                copy.id, copy.title_id
            ))
        })
    }

    async fn collides(&self, own_id: Uuid, fields: &NewTitle) -> LendingResult<bool> {
        let key = dedup_key(&fields.title, &fields.author);
        let candidates = self
            .store
            .search_titles(&TitleQuery {
                title: Some(fields.title.clone()),
                author: Some(fields.author.clone()),
                ..TitleQuery::default()
            })
            .await?;
        Ok(candidates
            .titles
            .iter()
            .any(|other| other.id != own_id && other.dedup_key() == key))
    }

    /// Allocates ids for `count` fresh copies of `title_id`. Nothing is
    /// stored here; the caller writes the copies with their title.
    async fn mint(&self, title_id: Uuid, count: usize) -> LendingResult<Vec<BookCopy>> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let ids = self
            .allocator
            .allocate_many(&self.policy.counter_name, count)
            .await?;
        let created_at = self.clock.now();
        Ok(ids
            .into_iter()
            .map(|id| BookCopy {
                id,
                title_id,
                issued: false,
                tampered: false,
                created_at,
            })
            .collect())
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::sequence::MAX_NUMBER;
    use shelf_db::{MemoryStore, SequenceCounter, Store};
    use shelf_kernel::FixedClock;
    use std::sync::Arc;
    use time::macros::datetime;

    fn catalog() -> TitleCatalog {
        catalog_on(Arc::new(MemoryStore::new()))
    }

    fn catalog_on(store: SharedStore) -> TitleCatalog {
        let clock: SharedClock = Arc::new(FixedClock::new(datetime!(2025-03-01 09:00 UTC)));
        TitleCatalog::new(
            store.clone(),
            SequenceAllocator::new(store.clone()),
            CopyCatalog::new(store),
            clock,
            CatalogPolicy::default(),
        )
    }

    fn fields(title: &str, author: &str) -> NewTitle {
        NewTitle {
            title: title.to_string(),
            author: author.to_string(),
            details: "Second edition".to_string(),
            price: 450.0,
            course: "B.Tech".to_string(),
            branch: "CSE".to_string(),
        }
    }

    #[tokio::test]
    async fn register_mints_sequential_available_copies() {
        let catalog = catalog();
        let registered = catalog
            .register_title(fields("Operating Systems", "Galvin"), 3)
            .await
            .unwrap();

        let ids: Vec<_> = registered.copies.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["AA-000001", "AA-000002", "AA-000003"]);
        assert!(registered.copies.iter().all(|c| !c.issued && !c.tampered));
        assert!(registered
            .copies
            .iter()
            .all(|c| c.title_id == registered.title.id));
    }

    #[tokio::test]
    async fn register_validates_input() {
        let catalog = catalog();
        for stock in [0, -1, 201] {
            let err = catalog
                .register_title(fields("Networks", "Tanenbaum"), stock)
                .await
                .unwrap_err();
            assert!(matches!(err, LendingError::Validation { ref field, .. } if field == "stock"));
        }

        let mut blank = fields("Networks", "Tanenbaum");
        blank.author = "  ".to_string();
        assert!(matches!(
            catalog.register_title(blank, 1).await.unwrap_err(),
            LendingError::Validation { ref field, .. } if field == "author"
        ));

        let mut negative = fields("Networks", "Tanenbaum");
        negative.price = -5.0;
        assert!(catalog.register_title(negative, 1).await.is_err());
    }

    #[tokio::test]
    async fn duplicate_title_and_author_conflicts() {
        let catalog = catalog();
        catalog
            .register_title(fields("Compilers", "Aho"), 1)
            .await
            .unwrap();
        let err = catalog
            .register_title(fields("  compilers ", "AHO"), 2)
            .await
            .unwrap_err();
        assert!(matches!(err, LendingError::Conflict(_)));

        // Same title by someone else is a different book.
        catalog
            .register_title(fields("Compilers", "Appel"), 1)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn failed_registration_stores_nothing_and_can_be_retried() {
        let store = Arc::new(MemoryStore::new());
        let catalog = catalog_on(store.clone());
        let nearly_spent = SequenceCounter {
            name: "bookId".to_string(),
            prefix: "ZZ".to_string(),
            number: MAX_NUMBER - 1,
        };
        assert!(store.swap_counter(None, &nearly_spent).await.unwrap());

        // One id is left, so the second copy cannot be numbered.
        let err = catalog
            .register_title(fields("Dune", "Herbert"), 2)
            .await
            .unwrap_err();
        assert!(matches!(err, LendingError::Conflict(_)));
        assert_eq!(store.count_titles().await.unwrap(), 0);
        assert_eq!(store.count_copies(None).await.unwrap().total, 0);

        let spent = store.load_counter("bookId").await.unwrap();
        let fresh = SequenceCounter {
            prefix: "AA".to_string(),
            number: 0,
            ..nearly_spent
        };
        assert!(store.swap_counter(spent.as_ref(), &fresh).await.unwrap());

        let registered = catalog
            .register_title(fields("Dune", "Herbert"), 2)
            .await
            .unwrap();
        let ids: Vec<_> = registered.copies.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["AA-000001", "AA-000002"]);
        assert_eq!(store.count_titles().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn registration_during_outage_can_be_retried() {
        let store = Arc::new(MemoryStore::new());
        let catalog = catalog_on(store.clone());

        store.set_available(false);
        let err = catalog
            .register_title(fields("Emma", "Austen"), 1)
            .await
            .unwrap_err();
        assert!(matches!(err, LendingError::StorageUnavailable(_)));

        store.set_available(true);
        let registered = catalog
            .register_title(fields("Emma", "Austen"), 1)
            .await
            .unwrap();
        assert_eq!(registered.copies.len(), 1);
    }

    #[tokio::test]
    async fn update_grows_stock_and_never_shrinks_it() {
        let catalog = catalog();
        let registered = catalog
            .register_title(fields("Algorithms", "CLRS"), 2)
            .await
            .unwrap();
        let any_copy = registered.copies[1].id.clone();

        let update = catalog
            .update_title(&any_copy, fields("Algorithms", "Cormen"), 5)
            .await
            .unwrap();
        assert_eq!(update.added_copies.len(), 3);
        assert_eq!(update.title.author, "Cormen");
        assert_eq!(update.title.created_at, registered.title.created_at);

        let err = catalog
            .update_title(&any_copy, fields("Algorithms", "Cormen"), 4)
            .await
            .unwrap_err();
        assert!(matches!(err, LendingError::Conflict(_)));
        let details = catalog.get_by_copy(&any_copy).await.unwrap();
        assert_eq!(details.stock.total, 5);

        let unchanged = catalog
            .update_title(&any_copy, fields("Algorithms", "Cormen"), 5)
            .await
            .unwrap();
        assert!(unchanged.added_copies.is_empty());
    }

    #[tokio::test]
    async fn update_rejects_unknown_copy_and_collisions() {
        let catalog = catalog();
        let first = catalog
            .register_title(fields("Databases", "Korth"), 1)
            .await
            .unwrap();
        catalog
            .register_title(fields("Graphics", "Hearn"), 1)
            .await
            .unwrap();

        let err = catalog
            .update_title("ZZ-999999", fields("Databases", "Korth"), 1)
            .await
            .unwrap_err();
        assert!(matches!(err, LendingError::NotFound(_)));

        let err = catalog
            .update_title(&first.copies[0].id, fields("graphics", "hearn"), 3)
            .await
            .unwrap_err();
        assert!(matches!(err, LendingError::Conflict(_)));
        // Nothing was minted for the rejected update.
        let details = catalog.get_by_copy(&first.copies[0].id).await.unwrap();
        assert_eq!(details.stock.total, 1);
    }

    #[tokio::test]
    async fn search_filters_and_paginates_in_creation_order() {
        let catalog = catalog();
        for n in 0..12 {
            catalog
                .register_title(fields(&format!("Rust Volume {n}"), "Klabnik"), 1)
                .await
                .unwrap();
        }
        catalog
            .register_title(fields("Haskell", "Lipovaca"), 2)
            .await
            .unwrap();

        let page = catalog
            .search(
                TitleFilter {
                    author: Some("klab".to_string()),
                    ..TitleFilter::default()
                },
                Pagination { page: 2, per_page: 10 },
            )
            .await
            .unwrap();
        assert_eq!(page.total, 12);
        assert_eq!(page.total_pages, 2);
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.items[0].title.title, "Rust Volume 10");

        let by_copy = catalog
            .search(
                TitleFilter {
                    copy_id: Some("aa-000014".to_string()),
                    ..TitleFilter::default()
                },
                Pagination::default(),
            )
            .await
            .unwrap();
        assert_eq!(by_copy.total, 1);
        assert_eq!(by_copy.items[0].title.title, "Haskell");
        assert_eq!(by_copy.items[0].copies.len(), 2);
    }
}
