pub mod catalog;
pub mod circulation;

use std::sync::Arc;

use shelf_kernel::ModuleRegistry;

use crate::Services;

/// Register all lending modules with the registry
pub fn register_all(registry: &mut ModuleRegistry, services: &Services) -> anyhow::Result<()> {
    registry.register(Arc::new(catalog::CatalogModule::new(services.clone())))?;
    registry.register(Arc::new(circulation::CirculationModule::new(services.clone())))?;
    Ok(())
}
