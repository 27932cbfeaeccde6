//! Concrete source adapters and the authored source definitions that build them.

pub mod census;
pub mod ckan;
pub mod datastore;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

pub use census::{CensusDataset, CensusSource};
pub use ckan::{default_lookup, CkanSource, CkanSourceConfig, GeoJoin, RegionalField};
pub use datastore::{CkanDatastoreClient, WarehouseDatastore, DEFAULT_DATASTORE_ENDPOINT};

use crate::data_source::{CensusTableStore, DataSource, DatastoreClient, TimeCoverage};
use crate::domain::{TimePoint, TimeUnit};
use crate::ValidationError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CensusSourceConfig {
    pub slug: String,
    pub name: String,
    pub dataset: CensusDataset,
    pub time_coverage_start: TimePoint,
    #[serde(default)]
    pub time_coverage_end: Option<TimePoint>,
}

/// A source as it appears in the catalog document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceSpec {
    Census(CensusSourceConfig),
    /// Rows located by geometry and joined to boundary lookups.
    CkanGeom(CkanSourceConfig),
    /// Rows that already name their geography.
    CkanRegional(CkanSourceConfig),
}

impl SourceSpec {
    pub fn slug(&self) -> &str {
        match self {
            Self::Census(config) => &config.slug,
            Self::CkanGeom(config) | Self::CkanRegional(config) => &config.slug,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        let invalid = |reason: &str| ValidationError::InvalidSource {
            slug: self.slug().to_owned(),
            reason: reason.to_owned(),
        };
        let (start, end) = match self {
            Self::Census(config) => (config.time_coverage_start, config.time_coverage_end),
            Self::CkanGeom(config) | Self::CkanRegional(config) => {
                (config.time_coverage_start, config.time_coverage_end)
            }
        };
        if end.is_some_and(|end| end < start) {
            return Err(invalid("time coverage ends before it starts"));
        }

        match self {
            Self::Census(_) => Ok(()),
            Self::CkanGeom(config) | Self::CkanRegional(config) => {
                if config.resource_id.trim().is_empty() {
                    return Err(invalid("resource_id is required"));
                }
                if config.time_field_format.is_some() && config.time_field.is_none() {
                    return Err(invalid("time_field_format requires time_field"));
                }
                let single_unit = end.is_some_and(|end| {
                    let unit = config.granularity;
                    unit.truncate(start.into_inner()) == unit.truncate(end.into_inner())
                });
                if config.time_field.is_none() && !single_unit {
                    return Err(invalid(
                        "time_field is required unless coverage fits within one unit",
                    ));
                }
                if matches!(self, Self::CkanRegional(_)) && config.fields.is_empty() {
                    return Err(invalid("regional sources need at least one geography field"));
                }
                Ok(())
            }
        }
    }

    pub fn granularity(&self) -> TimeUnit {
        match self {
            Self::Census(_) => TimeUnit::Year,
            Self::CkanGeom(config) | Self::CkanRegional(config) => config.granularity,
        }
    }

    /// Instantiate the adapter over the given backends.
    pub fn build(
        &self,
        census_store: Arc<dyn CensusTableStore>,
        datastore: Arc<dyn DatastoreClient>,
    ) -> Arc<dyn DataSource> {
        match self {
            Self::Census(config) => Arc::new(CensusSource::new(
                config.slug.clone(),
                config.name.clone(),
                config.dataset,
                TimeCoverage::new(config.time_coverage_start, config.time_coverage_end),
                census_store,
            )),
            Self::CkanGeom(config) => Arc::new(CkanSource::new(
                config.clone(),
                GeoJoin::geometry(config),
                datastore,
            )),
            Self::CkanRegional(config) => Arc::new(CkanSource::new(
                config.clone(),
                GeoJoin::fields(config),
                datastore,
            )),
        }
    }
}
