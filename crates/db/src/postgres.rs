//! PostgreSQL backend.
//!
//! Atomicity comes from the database: counters use conditional updates,
//! title writes, issue and return run in one transaction each, and a partial
//! unique index keeps at most one open loan per copy even if the cached flag
//! drifts.

use async_trait::async_trait;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgConnection, PgPool, Row};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};
use crate::migrations::MIGRATIONS;
use crate::records::{
    BookCopy, BorrowerKind, BorrowerRef, CopyCounts, LoanRecord, OpenLoan, SequenceCounter, Title,
    TitlePage, TitleQuery,
};
use crate::store::Store;

const TITLE_COLUMNS: &str =
    "id, title, author, details, price, course, branch, created_at, updated_at";
const COPY_COLUMNS: &str = "id, title_id, issued, tampered, created_at";
const LOAN_COLUMNS: &str = "id, borrower_id, borrower_kind, librarian_id, copy_id, issue_date, \
     return_date, returned, remarks";

/// [`Store`] backed by a `sqlx` connection pool.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connects a pool to `url`.
    pub async fn connect(url: &str, max_connections: u32) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;
        Ok(Self { pool })
    }

    pub const fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Applies pending [`MIGRATIONS`], one transaction per migration.
    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS schema_migrations (
                id          TEXT PRIMARY KEY,
                applied_at  TIMESTAMPTZ NOT NULL DEFAULT now()
            )",
        )
        .execute(&self.pool)
        .await?;

        for migration in MIGRATIONS {
            let mut tx = self.pool.begin().await?;
            let applied = sqlx::query("SELECT 1 FROM schema_migrations WHERE id = $1")
                .bind(migration.id)
                .fetch_optional(&mut *tx)
                .await?
                .is_some();
            if applied {
                continue;
            }

            sqlx::raw_sql(migration.up).execute(&mut *tx).await?;
            sqlx::query("INSERT INTO schema_migrations (id) VALUES ($1)")
                .bind(migration.id)
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;

            tracing::info!(target: "shelf-db", migration = migration.id, "applied migration");
        }

        Ok(())
    }
}

/// `ILIKE` pattern matching `needle` anywhere, with wildcards escaped.
fn contains_pattern(needle: Option<&str>) -> Option<String> {
    needle.map(|needle| {
        let escaped = needle
            .replace('\\', "\\\\")
            .replace('%', "\\%")
            .replace('_', "\\_");
        format!("%{escaped}%")
    })
}

fn number_to_sql(number: u32) -> StoreResult<i32> {
    i32::try_from(number)
        .map_err(|_| StoreError::corrupt("sequence_counter", format!("number {number} too large")))
}

fn counter_from_row(row: &PgRow) -> StoreResult<SequenceCounter> {
    let number: i32 = row.try_get("number")?;
    Ok(SequenceCounter {
        name: row.try_get("name")?,
        prefix: row.try_get::<String, _>("prefix")?.trim().to_string(),
        number: u32::try_from(number)
            .map_err(|_| StoreError::corrupt("sequence_counter", format!("number {number}")))?,
    })
}

fn title_from_row(row: &PgRow) -> StoreResult<Title> {
    Ok(Title {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        author: row.try_get("author")?,
        details: row.try_get("details")?,
        price: row.try_get("price")?,
        course: row.try_get("course")?,
        branch: row.try_get("branch")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn copy_from_row(row: &PgRow) -> StoreResult<BookCopy> {
    Ok(BookCopy {
        id: row.try_get("id")?,
        title_id: row.try_get("title_id")?,
        issued: row.try_get("issued")?,
        tampered: row.try_get("tampered")?,
        created_at: row.try_get("created_at")?,
    })
}

fn loan_from_row(row: &PgRow) -> StoreResult<LoanRecord> {
    let kind: String = row.try_get("borrower_kind")?;
    let kind = BorrowerKind::parse(&kind)
        .ok_or_else(|| StoreError::corrupt("loan", format!("unknown borrower kind '{kind}'")))?;
    Ok(LoanRecord {
        id: row.try_get("id")?,
        borrower: BorrowerRef::new(row.try_get::<String, _>("borrower_id")?, kind),
        librarian_id: row.try_get("librarian_id")?,
        copy_id: row.try_get("copy_id")?,
        issue_date: row.try_get("issue_date")?,
        return_date: row.try_get("return_date")?,
        returned: row.try_get("returned")?,
        remarks: row.try_get("remarks")?,
    })
}

fn count_to_u64(count: i64) -> u64 {
    u64::try_from(count).unwrap_or(0)
}

fn title_write_error(title: &Title, err: sqlx::Error) -> StoreError {
    match StoreError::from(err) {
        StoreError::Duplicate { .. } => {
            StoreError::duplicate("title", format!("{} / {}", title.title, title.author))
        }
        other => other,
    }
}

async fn insert_copies(conn: &mut PgConnection, copies: &[BookCopy]) -> StoreResult<()> {
    for copy in copies {
        sqlx::query(
            "INSERT INTO copies (id, title_id, issued, tampered, created_at)
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(&copy.id)
        .bind(copy.title_id)
        .bind(copy.issued)
        .bind(copy.tampered)
        .bind(copy.created_at)
        .execute(&mut *conn)
        .await
        .map_err(|err| match StoreError::from(err) {
            StoreError::Duplicate { .. } => StoreError::duplicate("copy", copy.id.clone()),
            other => other,
        })?;
    }
    Ok(())
}

#[async_trait]
impl Store for PgStore {
    fn backend(&self) -> &'static str {
        "postgres"
    }

    async fn ping(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn load_counter(&self, name: &str) -> StoreResult<Option<SequenceCounter>> {
        sqlx::query("SELECT name, prefix, number FROM sequence_counters WHERE name = $1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(counter_from_row)
            .transpose()
    }

    async fn swap_counter(
        &self,
        expected: Option<&SequenceCounter>,
        next: &SequenceCounter,
    ) -> StoreResult<bool> {
        let result = match expected {
            None => {
                sqlx::query(
                    "INSERT INTO sequence_counters (name, prefix, number) VALUES ($1, $2, $3)
                     ON CONFLICT (name) DO NOTHING",
                )
                .bind(&next.name)
                .bind(&next.prefix)
                .bind(number_to_sql(next.number)?)
                .execute(&self.pool)
                .await?
            }
            Some(current) => {
                sqlx::query(
                    "UPDATE sequence_counters SET prefix = $2, number = $3
                     WHERE name = $1 AND prefix = $4 AND number = $5",
                )
                .bind(&next.name)
                .bind(&next.prefix)
                .bind(number_to_sql(next.number)?)
                .bind(&current.prefix)
                .bind(number_to_sql(current.number)?)
                .execute(&self.pool)
                .await?
            }
        };
        Ok(result.rows_affected() == 1)
    }

    async fn insert_title(&self, title: &Title, copies: &[BookCopy]) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO titles
                (id, title, author, details, price, course, branch, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(title.id)
        .bind(&title.title)
        .bind(&title.author)
        .bind(&title.details)
        .bind(title.price)
        .bind(&title.course)
        .bind(&title.branch)
        .bind(title.created_at)
        .bind(title.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(|err| title_write_error(title, err))?;

        insert_copies(&mut *tx, copies).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn update_title(&self, title: &Title, new_copies: &[BookCopy]) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(
            "UPDATE titles
             SET title = $2, author = $3, details = $4, price = $5, course = $6,
                 branch = $7, updated_at = $8
             WHERE id = $1",
        )
        .bind(title.id)
        .bind(&title.title)
        .bind(&title.author)
        .bind(&title.details)
        .bind(title.price)
        .bind(&title.course)
        .bind(&title.branch)
        .bind(title.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(|err| title_write_error(title, err))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("title", title.id.to_string()));
        }
        insert_copies(&mut *tx, new_copies).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn get_title(&self, id: Uuid) -> StoreResult<Option<Title>> {
        sqlx::query(&format!("SELECT {TITLE_COLUMNS} FROM titles WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(title_from_row)
            .transpose()
    }

    async fn search_titles(&self, query: &TitleQuery) -> StoreResult<TitlePage> {
        const FILTER: &str = "($1::text IS NULL OR t.title ILIKE $1)
             AND ($2::text IS NULL OR t.author ILIKE $2)
             AND ($3::text IS NULL OR EXISTS (
                 SELECT 1 FROM copies c WHERE c.title_id = t.id AND c.id ILIKE $3))";

        let title = contains_pattern(query.title.as_deref());
        let author = contains_pattern(query.author.as_deref());
        let copy_id = contains_pattern(query.copy_id.as_deref());
        let limit = (query.limit > 0).then(|| i64::try_from(query.limit).unwrap_or(i64::MAX));
        let offset = i64::try_from(query.offset).unwrap_or(i64::MAX);

        let total: i64 = sqlx::query(&format!("SELECT COUNT(*) AS total FROM titles t WHERE {FILTER}"))
            .bind(&title)
            .bind(&author)
            .bind(&copy_id)
            .fetch_one(&self.pool)
            .await?
            .try_get("total")?;

        let rows = sqlx::query(&format!(
            "SELECT {TITLE_COLUMNS} FROM titles t WHERE {FILTER}
             ORDER BY t.created_at, t.id OFFSET $4 LIMIT $5"
        ))
        .bind(&title)
        .bind(&author)
        .bind(&copy_id)
        .bind(offset)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(TitlePage {
            titles: rows.iter().map(title_from_row).collect::<StoreResult<_>>()?,
            total: count_to_u64(total),
        })
    }

    async fn count_titles(&self) -> StoreResult<u64> {
        let total: i64 = sqlx::query("SELECT COUNT(*) AS total FROM titles")
            .fetch_one(&self.pool)
            .await?
            .try_get("total")?;
        Ok(count_to_u64(total))
    }

    async fn get_copy(&self, id: &str) -> StoreResult<Option<BookCopy>> {
        sqlx::query(&format!("SELECT {COPY_COLUMNS} FROM copies WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(copy_from_row)
            .transpose()
    }

    async fn find_copies(&self, ids: &[String]) -> StoreResult<Vec<BookCopy>> {
        let rows = sqlx::query(&format!(
            "SELECT {COPY_COLUMNS} FROM copies WHERE id = ANY($1)"
        ))
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;
        let found: Vec<BookCopy> = rows.iter().map(copy_from_row).collect::<StoreResult<_>>()?;

        // Keep the caller's order.
        Ok(ids
            .iter()
            .filter_map(|id| found.iter().find(|copy| &copy.id == id).cloned())
            .collect())
    }

    async fn copies_for_title(&self, title_id: Uuid) -> StoreResult<Vec<BookCopy>> {
        let rows = sqlx::query(&format!(
            "SELECT {COPY_COLUMNS} FROM copies WHERE title_id = $1 ORDER BY created_at, id"
        ))
        .bind(title_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(copy_from_row).collect()
    }

    async fn count_copies(&self, title_id: Option<Uuid>) -> StoreResult<CopyCounts> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS total, COUNT(*) FILTER (WHERE issued) AS issued
             FROM copies WHERE ($1::uuid IS NULL OR title_id = $1)",
        )
        .bind(title_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(CopyCounts {
            total: count_to_u64(row.try_get("total")?),
            issued: count_to_u64(row.try_get("issued")?),
        })
    }

    async fn set_copy_issued(&self, id: &str, issued: bool) -> StoreResult<bool> {
        let result = sqlx::query("UPDATE copies SET issued = $2 WHERE id = $1")
            .bind(id)
            .bind(issued)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn set_copy_tampered(&self, id: &str, tampered: bool) -> StoreResult<bool> {
        let result = sqlx::query("UPDATE copies SET tampered = $2 WHERE id = $1")
            .bind(id)
            .bind(tampered)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn issued_copy_ids(&self) -> StoreResult<Vec<String>> {
        let rows = sqlx::query("SELECT id FROM copies WHERE issued ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| row.try_get("id").map_err(StoreError::from))
            .collect()
    }

    async fn open_loan(&self, loan: &LoanRecord) -> StoreResult<OpenLoan> {
        let mut tx = self.pool.begin().await?;

        let flipped = sqlx::query("UPDATE copies SET issued = TRUE WHERE id = $1 AND NOT issued")
            .bind(&loan.copy_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        if flipped == 0 {
            let exists = sqlx::query("SELECT 1 FROM copies WHERE id = $1")
                .bind(&loan.copy_id)
                .fetch_optional(&mut *tx)
                .await?
                .is_some();
            return Ok(if exists {
                OpenLoan::AlreadyIssued
            } else {
                OpenLoan::CopyMissing
            });
        }

        let inserted = sqlx::query(
            "INSERT INTO loans
                (id, borrower_id, borrower_kind, librarian_id, copy_id, issue_date,
                 return_date, returned, remarks)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(loan.id)
        .bind(&loan.borrower.id)
        .bind(loan.borrower.kind.as_str())
        .bind(&loan.librarian_id)
        .bind(&loan.copy_id)
        .bind(loan.issue_date)
        .bind(loan.return_date)
        .bind(loan.returned)
        .bind(&loan.remarks)
        .execute(&mut *tx)
        .await;

        match inserted.map_err(StoreError::from) {
            Ok(_) => {}
            // The flag said available but an open loan exists: the ledger wins.
            Err(StoreError::Duplicate { .. }) => return Ok(OpenLoan::AlreadyIssued),
            Err(err) => return Err(err),
        }

        tx.commit().await?;
        Ok(OpenLoan::Opened)
    }

    async fn close_loan(
        &self,
        borrower: &BorrowerRef,
        copy_id: &str,
        returned_at: OffsetDateTime,
        remarks: Option<&str>,
    ) -> StoreResult<Option<LoanRecord>> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(&format!(
            "UPDATE loans
             SET returned = TRUE, return_date = $4, remarks = COALESCE($5, remarks)
             WHERE copy_id = $1 AND borrower_id = $2 AND borrower_kind = $3 AND NOT returned
             RETURNING {LOAN_COLUMNS}"
        ))
        .bind(copy_id)
        .bind(&borrower.id)
        .bind(borrower.kind.as_str())
        .bind(returned_at)
        .bind(remarks)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let closed = loan_from_row(&row)?;

        sqlx::query("UPDATE copies SET issued = FALSE WHERE id = $1")
            .bind(copy_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(Some(closed))
    }

    async fn loans_for_borrower(
        &self,
        borrower: &BorrowerRef,
        open_only: bool,
    ) -> StoreResult<Vec<LoanRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {LOAN_COLUMNS} FROM loans
             WHERE borrower_id = $1 AND borrower_kind = $2 AND (NOT $3 OR NOT returned)
             ORDER BY issue_date DESC, id DESC"
        ))
        .bind(&borrower.id)
        .bind(borrower.kind.as_str())
        .bind(open_only)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(loan_from_row).collect()
    }

    async fn loans_for_copy(&self, copy_id: &str) -> StoreResult<Vec<LoanRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {LOAN_COLUMNS} FROM loans WHERE copy_id = $1 ORDER BY issue_date DESC, id DESC"
        ))
        .bind(copy_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(loan_from_row).collect()
    }

    async fn open_loans(&self) -> StoreResult<Vec<LoanRecord>> {
        let rows = sqlx::query(&format!("SELECT {LOAN_COLUMNS} FROM loans WHERE NOT returned"))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(loan_from_row).collect()
    }
}
