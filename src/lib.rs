//! Shelf: physical book lending.
//!
//! The catalog module owns titles, copies and the copy-id sequence; the
//! circulation module owns the loan log, fines and the integrity audit. Both
//! share one [`Services`] bundle over a single store.

pub mod error;
pub mod modules;
pub mod utils;

use anyhow::Context;
use shelf_db::SharedStore;
use shelf_kernel::settings::{CirculationSettings, Settings};
use shelf_kernel::{InitCtx, ModuleRegistry, SharedClock, SystemClock};
use std::sync::Arc;

pub use error::{LendingError, LendingResult};
pub use modules::{catalog, circulation};

use catalog::{CatalogPolicy, CopyCatalog, SequenceAllocator, TitleCatalog};
use circulation::{CirculationLedger, FinePolicy};

/// Every lending service, wired over one store and one clock.
#[derive(Clone)]
pub struct Services {
    pub store: SharedStore,
    pub allocator: SequenceAllocator,
    pub titles: TitleCatalog,
    pub copies: CopyCatalog,
    pub ledger: CirculationLedger,
    pub default_page_size: u64,
}

impl Services {
    pub fn new(store: SharedStore, clock: SharedClock, settings: &CirculationSettings) -> Self {
        let allocator = SequenceAllocator::new(store.clone());
        let copies = CopyCatalog::new(store.clone());
        let titles = TitleCatalog::new(
            store.clone(),
            allocator.clone(),
            copies.clone(),
            clock.clone(),
            CatalogPolicy::from_settings(settings),
        );
        let ledger = CirculationLedger::new(
            store.clone(),
            copies.clone(),
            titles.clone(),
            clock,
            FinePolicy::from_settings(settings),
        );
        Self {
            store,
            allocator,
            titles,
            copies,
            ledger,
            default_page_size: u64::from(settings.default_page_size),
        }
    }
}

/// Connect the configured backend.
pub async fn open_store(settings: &Settings) -> anyhow::Result<SharedStore> {
    let database = &settings.database;
    shelf_db::connect(database.backend, &database.url, database.max_connections)
        .await
        .with_context(|| format!("failed to open {:?} store", database.backend))
}

/// Registry with every lending module registered.
pub fn build_registry(services: &Services) -> anyhow::Result<ModuleRegistry> {
    let mut registry = ModuleRegistry::new();
    modules::register_all(&mut registry, services)?;
    Ok(registry)
}

/// Run the service until ctrl-c.
pub async fn run(settings: Settings) -> anyhow::Result<()> {
    let store = open_store(&settings).await?;
    let services = Services::new(store.clone(), Arc::new(SystemClock), &settings.circulation);
    let registry = build_registry(&services)?;

    let ctx = InitCtx {
        settings: &settings,
        store: &store,
    };
    registry.init_all(&ctx).await?;
    registry.start_all(&ctx).await?;

    let served = shelf_http::start_server(&registry, &settings, shutdown_signal()).await;
    registry.stop_all().await?;
    served
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}
