use std::collections::BTreeMap;
use std::fs;

use profiles_core::domain::parse_subregion_lines;
use profiles_core::{GeogKind, Geography, GeographyCatalog};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::cli::{GeoArgs, GeoCommand};
use crate::error::CliError;

use super::{CommandResult, Session};

/// One boundary as exported by the offline shapefile step.
#[derive(Debug, Deserialize)]
struct GeographyImport {
    kind: GeogKind,
    common_geoid: String,
    name: String,
    #[serde(default)]
    global_geoid: Option<String>,
    #[serde(default)]
    geometry: Option<Value>,
    #[serde(default)]
    centroid: Option<(f64, f64)>,
    #[serde(default)]
    base_zoom: Option<i32>,
    #[serde(default)]
    subregions: BTreeMap<GeogKind, Vec<String>>,
}

impl GeographyImport {
    fn into_geography(self) -> Geography {
        let mut geography = Geography::new(self.kind, self.common_geoid, self.name);
        if let Some(global_geoid) = self.global_geoid {
            geography.global_geoid = global_geoid;
        }
        geography.geometry = self.geometry;
        geography.centroid = self.centroid;
        geography.base_zoom = self.base_zoom;
        geography.subregions = self.subregions;
        geography
    }
}

pub fn run(args: &GeoArgs, session: &Session) -> Result<CommandResult, CliError> {
    let warehouse = session.warehouse()?;
    match &args.command {
        GeoCommand::Import { file } => {
            let rows: Vec<GeographyImport> = serde_json::from_str(&fs::read_to_string(file)?)?;
            let imported = GeographyCatalog::new(
                rows.into_iter()
                    .map(GeographyImport::into_geography)
                    .collect(),
            );
            let written = warehouse.upsert_geographies(&imported.to_records()?)?;
            tracing::info!(written, file = %file.display(), "geographies imported");
            Ok(CommandResult::ok(json!({"imported": written})))
        }
        GeoCommand::SetExtent { counties } => {
            let counties = if counties.is_empty() {
                session.config.extent_counties.clone()
            } else {
                counties.clone()
            };
            let mut catalog = GeographyCatalog::from_records(warehouse.geographies()?)?;
            let inside = catalog.apply_extent(&counties);
            let marked = warehouse.set_extent(&inside)?;

            let mut result = CommandResult::ok(json!({"counties": counties, "in_extent": marked}));
            for county in &counties {
                if catalog.find(GeogKind::County, county).is_none() {
                    result = result.with_warning(format!("county {county} is not in the catalog"));
                }
            }
            Ok(result)
        }
        GeoCommand::SaveSubregions {
            file,
            kind,
            child_kind,
        } => {
            let text = fs::read_to_string(file)?;
            let mut catalog = GeographyCatalog::from_records(warehouse.geographies()?)?;

            let mut saved = 0;
            let mut result = CommandResult::ok(Value::Null);
            for (parent, children) in parse_subregion_lines(&text) {
                let missing: Vec<&String> = children
                    .iter()
                    .filter(|child| catalog.find(*child_kind, child).is_none())
                    .collect();
                if !missing.is_empty() {
                    result = result.with_warning(format!(
                        "{parent}: {} unknown {} subregions skipped",
                        missing.len(),
                        child_kind.title().to_ascii_lowercase()
                    ));
                }
                let children: Vec<String> = children
                    .iter()
                    .filter(|child| catalog.find(*child_kind, child).is_some())
                    .cloned()
                    .collect();

                let geography = match catalog.assign_subregions(*kind, &parent, *child_kind, children) {
                    Ok(geography) => geography,
                    Err(error) => {
                        result = result.with_warning(error.to_string());
                        continue;
                    }
                };
                warehouse.set_subregions(
                    &geography.global_geoid,
                    &serde_json::to_string(&geography.subregions)?,
                )?;
                saved += 1;
            }

            result.data = json!({"saved": saved, "kind": kind, "child_kind": child_kind});
            Ok(result)
        }
    }
}
