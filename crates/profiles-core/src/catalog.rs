//! The authored catalog: time axes, sources, variables, indicators, and taxonomy.
//!
//! Loaded from one JSON document and validated as a whole before any engine
//! is built over it.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::adapters::SourceSpec;
use crate::data_source::{CensusTableStore, DatastoreClient};
use crate::domain::{
    find_denominator_cycle, Indicator, Taxonomy, TimeAxis, TimePoint, Variable,
};
use crate::routing::SourceRegistry;
use crate::{CoreError, ValidationError};

/// On-disk shape of the catalog.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogDocument {
    #[serde(default)]
    pub time_axes: Vec<TimeAxis>,
    #[serde(default)]
    pub sources: Vec<SourceSpec>,
    #[serde(default)]
    pub variables: Vec<Variable>,
    #[serde(default)]
    pub indicators: Vec<Indicator>,
    #[serde(default)]
    pub taxonomy: Taxonomy,
}

/// Slug-keyed, validated catalog.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    pub time_axes: BTreeMap<String, TimeAxis>,
    pub sources: BTreeMap<String, SourceSpec>,
    pub variables: BTreeMap<String, Variable>,
    pub indicators: BTreeMap<String, Indicator>,
    pub taxonomy: Taxonomy,
}

impl Catalog {
    pub fn load(path: &Path) -> Result<Self, CoreError> {
        let text = fs::read_to_string(path)?;
        let document: CatalogDocument = serde_json::from_str(&text)?;
        Ok(Self::from_document(document)?)
    }

    pub fn from_document(document: CatalogDocument) -> Result<Self, ValidationError> {
        let catalog = Self {
            time_axes: keyed("time axis", document.time_axes, |axis| &axis.slug)?,
            sources: keyed("source", document.sources, |source| source.slug())?,
            variables: keyed("variable", document.variables, |variable| &variable.slug)?,
            indicators: keyed("indicator", document.indicators, |indicator| &indicator.slug)?,
            taxonomy: document.taxonomy,
        };
        catalog.validate()?;
        Ok(catalog)
    }

    pub fn to_document(&self) -> CatalogDocument {
        CatalogDocument {
            time_axes: self.time_axes.values().cloned().collect(),
            sources: self.sources.values().cloned().collect(),
            variables: self.variables.values().cloned().collect(),
            indicators: self.indicators.values().cloned().collect(),
            taxonomy: self.taxonomy.clone(),
        }
    }

    /// Structural checks that need no source backends.
    pub fn validate(&self) -> Result<(), ValidationError> {
        for axis in self.time_axes.values() {
            axis.validate()?;
        }
        for source in self.sources.values() {
            source.validate()?;
        }

        for variable in self.variables.values() {
            variable.validate()?;
            for slug in variable.source_slugs() {
                if !self.sources.contains_key(slug) {
                    return Err(ValidationError::UnknownSource {
                        slug: slug.to_owned(),
                    });
                }
            }
            for denominator in &variable.denominators {
                self.variable(denominator)?;
            }
        }
        if let Some(slug) = find_denominator_cycle(&self.variables) {
            return Err(ValidationError::DenominatorCycle { slug });
        }

        for indicator in self.indicators.values() {
            self.time_axis(&indicator.time_axis)?;
            if indicator.variables.is_empty() {
                return Err(ValidationError::InvalidVariable {
                    slug: indicator.slug.clone(),
                    reason: String::from("indicator lists no variables"),
                });
            }
            for slug in &indicator.variables {
                self.variable(slug)?;
            }
            if let Some(mirror) = &indicator.mirror_indicator {
                self.indicator(mirror)?;
            }
        }

        for slug in self.taxonomy.indicator_slugs() {
            self.indicator(slug)?;
        }
        Ok(())
    }

    /// Every variable of every indicator must be served at every time-part of
    /// the indicator's axis, as evaluated at `now`.
    pub fn validate_time_coverage(
        &self,
        registry: &SourceRegistry,
        now: TimePoint,
    ) -> Result<(), ValidationError> {
        for indicator in self.indicators.values() {
            let axis = self.time_axis(&indicator.time_axis)?;
            let time_parts = axis.time_parts_at(now);
            for slug in &indicator.variables {
                let variable = self.variable(slug)?;
                if let Some(time_part) = time_parts
                    .iter()
                    .find(|time_part| !registry.can_handle_time_part(variable, time_part))
                {
                    return Err(ValidationError::VariableTimeMismatch {
                        variable: variable.name.clone(),
                        time_part: time_part.name.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Adapters for every source, over the given backends.
    pub fn build_registry(
        &self,
        census_store: Arc<dyn CensusTableStore>,
        datastore: Arc<dyn DatastoreClient>,
    ) -> Result<SourceRegistry, ValidationError> {
        let mut registry = SourceRegistry::new();
        for spec in self.sources.values() {
            registry.register(spec.build(Arc::clone(&census_store), Arc::clone(&datastore)))?;
        }
        Ok(registry)
    }

    pub fn variable(&self, slug: &str) -> Result<&Variable, ValidationError> {
        self.variables
            .get(slug)
            .ok_or_else(|| ValidationError::UnknownVariable {
                slug: slug.to_owned(),
            })
    }

    pub fn indicator(&self, slug: &str) -> Result<&Indicator, ValidationError> {
        self.indicators
            .get(slug)
            .ok_or_else(|| ValidationError::UnknownIndicator {
                slug: slug.to_owned(),
            })
    }

    pub fn time_axis(&self, slug: &str) -> Result<&TimeAxis, ValidationError> {
        self.time_axes
            .get(slug)
            .ok_or_else(|| ValidationError::UnknownTimeAxis {
                slug: slug.to_owned(),
            })
    }
}

fn keyed<T, F>(
    entity: &'static str,
    items: Vec<T>,
    slug: F,
) -> Result<BTreeMap<String, T>, ValidationError>
where
    F: Fn(&T) -> &str,
{
    let mut keyed = BTreeMap::new();
    for item in items {
        let key = slug(&item).to_owned();
        if keyed.contains_key(&key) {
            return Err(ValidationError::DuplicateSlug { entity, slug: key });
        }
        keyed.insert(key, item);
    }
    Ok(keyed)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn document() -> serde_json::Value {
        json!({
            "time_axes": [
                {"slug": "acs-2019", "name": "2019", "unit": "year", "kind": "static", "instants": ["2019"]}
            ],
            "sources": [
                {"type": "census", "slug": "acs5-2019", "name": "ACS 5-Year 2019", "dataset": "ACS5",
                 "time_coverage_start": "2015", "time_coverage_end": "2019-12-31"}
            ],
            "variables": [
                {"slug": "total-pop", "name": "Total Population", "type": "census",
                 "bindings": [{"source": "acs5-2019", "value_tables": ["B01003_001E"], "moe_tables": ["B01003_001M"]}]},
                {"slug": "pop-under-18", "name": "Population under 18", "type": "census",
                 "denominators": ["total-pop"],
                 "bindings": [{"source": "acs5-2019", "value_tables": ["B09001_001E"]}]}
            ],
            "indicators": [
                {"slug": "youth", "name": "Youth", "time_axis": "acs-2019", "variables": ["pop-under-18"]}
            ],
            "taxonomy": {
                "topics": [{"slug": "age", "name": "Age", "indicators": ["youth"]}]
            }
        })
    }

    fn parse(value: serde_json::Value) -> Result<Catalog, ValidationError> {
        Catalog::from_document(serde_json::from_value(value).expect("document shape"))
    }

    #[test]
    fn valid_document_is_keyed_by_slug() {
        let catalog = parse(document()).expect("catalog");
        assert_eq!(catalog.variables.len(), 2);
        assert!(catalog.indicators["youth"].across_geogs);
        assert_eq!(
            catalog.variable("pop-under-18").expect("variable").primary_denominator(),
            Some("total-pop")
        );
    }

    #[test]
    fn duplicate_slugs_are_rejected() {
        let mut value = document();
        let copy = value["variables"][0].clone();
        value["variables"]
            .as_array_mut()
            .expect("variables array")
            .push(copy);
        let error = parse(value).expect_err("duplicate");
        assert!(matches!(
            error,
            ValidationError::DuplicateSlug { entity: "variable", .. }
        ));
    }

    #[test]
    fn denominator_cycles_are_rejected() {
        let mut value = document();
        value["variables"][0]["denominators"] = json!(["pop-under-18"]);
        let error = parse(value).expect_err("cycle");
        assert!(matches!(error, ValidationError::DenominatorCycle { .. }));
    }

    #[test]
    fn dangling_references_are_rejected() {
        let mut value = document();
        value["indicators"][0]["variables"] = json!(["missing"]);
        assert!(matches!(
            parse(value).expect_err("unknown variable"),
            ValidationError::UnknownVariable { .. }
        ));

        let mut value = document();
        value["taxonomy"]["topics"][0]["indicators"] = json!(["ghost"]);
        assert!(matches!(
            parse(value).expect_err("unknown indicator"),
            ValidationError::UnknownIndicator { .. }
        ));
    }
}
