use std::sync::Arc;

use profiles_core::{Catalog, TimePoint, WarehouseDatastore};
use serde_json::json;

use crate::cli::{CatalogArgs, CatalogCommand};
use crate::error::CliError;

use super::{CommandResult, Session};

pub fn run(args: &CatalogArgs, session: &Session) -> Result<CommandResult, CliError> {
    match args.command {
        CatalogCommand::Validate => {
            let catalog = Catalog::load(&session.config.catalog_path)?;
            let warehouse = session.warehouse()?;
            let registry = catalog.build_registry(
                Arc::new(warehouse.clone()),
                Arc::new(WarehouseDatastore::new(warehouse)),
            )?;
            catalog.validate_time_coverage(&registry, TimePoint::now())?;

            tracing::debug!(path = %session.config.catalog_path.display(), "catalog is valid");
            Ok(CommandResult::ok(json!({
                "valid": true,
                "time_axes": catalog.time_axes.len(),
                "sources": catalog.sources.len(),
                "variables": catalog.variables.len(),
                "indicators": catalog.indicators.len(),
            })))
        }
    }
}

pub fn taxonomy(session: &Session) -> Result<CommandResult, CliError> {
    let catalog = Catalog::load(&session.config.catalog_path)?;
    Ok(CommandResult::ok(catalog.taxonomy.tree()))
}
