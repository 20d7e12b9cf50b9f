//! Storage for shelf: the [`Store`] contract, its records, and the
//! in-memory and PostgreSQL backends.

use std::sync::Arc;

use serde::Deserialize;

pub mod error;
pub mod memory;
pub mod migrations;
pub mod postgres;
pub mod records;
pub mod store;

pub use error::{StoreError, StoreResult};
pub use memory::MemoryStore;
pub use postgres::PgStore;
pub use records::{
    dedup_key, BookCopy, BorrowerKind, BorrowerRef, CopyCounts, LoanRecord, OpenLoan,
    SequenceCounter, Title, TitlePage, TitleQuery,
};
pub use store::{SharedStore, Store};

/// Which backend to construct.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    Memory,
    Postgres,
}

/// Builds the configured backend and, for SQL backends, applies migrations.
pub async fn connect(backend: Backend, url: &str, max_connections: u32) -> StoreResult<SharedStore> {
    let store: SharedStore = match backend {
        Backend::Memory => Arc::new(MemoryStore::new()),
        Backend::Postgres => {
            let store = PgStore::connect(url, max_connections).await?;
            store.migrate().await?;
            Arc::new(store)
        }
    };

    tracing::info!(target: "shelf-db", backend = store.backend(), "store ready");
    Ok(store)
}
