use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use profiles_warehouse::{CensusValueRecord, Warehouse};
use serde::{Deserialize, Serialize};

use crate::data_source::{
    CensusTableStore, DataSource, FetchBatch, FetchRequest, FetchedValue, SourceError,
    TimeCoverage,
};
use crate::domain::{GeogKind, TimePart, TimeUnit, Variable};

/// Bureau data product.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CensusDataset {
    #[serde(rename = "CEN")]
    Decennial,
    #[serde(rename = "ACS5")]
    Acs5,
    #[serde(rename = "ACS1")]
    Acs1,
}

impl CensusDataset {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Decennial => "CEN",
            Self::Acs5 => "ACS5",
            Self::Acs1 => "ACS1",
        }
    }

    /// Geography kinds the product is published for.
    pub const fn geog_kinds(self) -> &'static [GeogKind] {
        match self {
            Self::Decennial | Self::Acs5 => &[
                GeogKind::BlockGroup,
                GeogKind::Tract,
                GeogKind::CountySubdivision,
                GeogKind::Place,
                GeogKind::Puma,
                GeogKind::SchoolDistrict,
                GeogKind::StateHouse,
                GeogKind::StateSenate,
                GeogKind::County,
                GeogKind::Zcta,
            ],
            Self::Acs1 => &[
                GeogKind::CountySubdivision,
                GeogKind::Place,
                GeogKind::Puma,
                GeogKind::SchoolDistrict,
                GeogKind::County,
            ],
        }
    }

    pub const fn info_link(self) -> &'static str {
        match self {
            Self::Decennial => "https://www.census.gov/",
            Self::Acs5 | Self::Acs1 => "https://www.census.gov/programs-surveys/acs/",
        }
    }
}

impl Display for CensusDataset {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tabular-bureau source: values come from `(geoid, table_id)` lookups.
#[derive(Clone)]
pub struct CensusSource {
    slug: String,
    name: String,
    dataset: CensusDataset,
    coverage: TimeCoverage,
    store: Arc<dyn CensusTableStore>,
}

impl CensusSource {
    pub fn new(
        slug: impl Into<String>,
        name: impl Into<String>,
        dataset: CensusDataset,
        coverage: TimeCoverage,
        store: Arc<dyn CensusTableStore>,
    ) -> Self {
        Self {
            slug: slug.into(),
            name: name.into(),
            dataset,
            coverage,
            store,
        }
    }

    pub const fn dataset(&self) -> CensusDataset {
        self.dataset
    }
}

impl DataSource for CensusSource {
    fn slug(&self) -> &str {
        &self.slug
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn coverage(&self) -> TimeCoverage {
        self.coverage
    }

    fn info_link(&self) -> String {
        self.dataset.info_link().to_owned()
    }

    fn can_handle_time_part(&self, time_part: &TimePart) -> bool {
        if time_part.unit != TimeUnit::Year || !self.coverage.contains(time_part.instant) {
            return false;
        }
        self.dataset != CensusDataset::Decennial || time_part.year() % 10 == 0
    }

    fn can_handle_geog_kind(&self, kind: GeogKind) -> bool {
        self.dataset.geog_kinds().contains(&kind)
    }

    fn value_warnings(&self, variable: &Variable) -> Vec<String> {
        match variable.census_binding(&self.slug) {
            Some(binding) if binding.is_compound() => vec![format!(
                "MOE unavailable for {}: it combines {} margin-of-error tables.",
                variable.name,
                binding.moe_tables.len()
            )],
            _ => Vec::new(),
        }
    }

    fn fetch<'a>(
        &'a self,
        request: FetchRequest<'a>,
    ) -> Pin<Box<dyn Future<Output = Result<FetchBatch, SourceError>> + Send + 'a>> {
        Box::pin(async move {
            if !self.can_handle_geog_kind(request.kind) {
                return Err(SourceError::unsupported_geography(&self.slug, request.kind));
            }
            let binding = request
                .variable
                .census_binding(&self.slug)
                .ok_or_else(|| {
                    SourceError::invalid_request(format!(
                        "variable '{}' has no tables in source '{}'",
                        request.variable.slug, self.slug
                    ))
                })?;

            let geoids: Vec<String> = request
                .geogs
                .iter()
                .map(|geog| geog.common_geoid.clone())
                .collect();
            let table_ids = binding.table_ids();
            let records = self
                .store
                .table_values(
                    self.dataset.as_str(),
                    request.time_part.year(),
                    &table_ids,
                    &geoids,
                )
                .await?;

            let mut by_geoid: HashMap<&str, HashMap<&str, Option<f64>>> = HashMap::new();
            for record in &records {
                by_geoid
                    .entry(record.geoid.as_str())
                    .or_default()
                    .insert(record.table_id.as_str(), record.value);
            }

            let mut rows = Vec::with_capacity(by_geoid.len());
            for geog in request.geogs {
                let Some(tables) = by_geoid.get(geog.common_geoid.as_str()) else {
                    continue;
                };
                let lookup = |table: &String| tables.get(table.as_str()).copied().flatten();

                let value = binding
                    .value_tables
                    .iter()
                    .map(lookup)
                    .sum::<Option<f64>>();
                let moe = match binding.moe_tables.as_slice() {
                    [single] => lookup(single),
                    _ => None,
                };
                rows.push(FetchedValue {
                    geog: geog.slug.clone(),
                    value,
                    moe,
                    denom: None,
                });
            }

            tracing::debug!(
                source = %self.slug,
                variable = %request.variable.slug,
                year = request.time_part.year(),
                requested = request.geogs.len(),
                returned = rows.len(),
                "bureau tables resolved"
            );
            Ok(FetchBatch {
                rows,
                warnings: Vec::new(),
            })
        })
    }
}

impl CensusTableStore for Warehouse {
    fn table_values<'a>(
        &'a self,
        dataset: &'a str,
        year: i32,
        table_ids: &'a [String],
        geoids: &'a [String],
    ) -> Pin<Box<dyn Future<Output = Result<Vec<CensusValueRecord>, SourceError>> + Send + 'a>>
    {
        Box::pin(async move {
            self.census_values(dataset, year, table_ids, geoids)
                .map_err(|error| SourceError::unavailable(format!("bureau table lookup failed: {error}")))
        })
    }
}

#[cfg(test)]
mod tests {
    use profiles_warehouse::{Warehouse, WarehouseConfig};
    use tempfile::TempDir;

    use super::*;
    use crate::domain::{CensusBinding, Geography, TimePoint, VariableKind};

    fn year(value: &str) -> TimePart {
        TimePart::new("axis", TimePoint::parse(value).expect("year"), TimeUnit::Year)
    }

    fn warehouse() -> (TempDir, Warehouse) {
        let temp = tempfile::tempdir().expect("tempdir");
        let warehouse = Warehouse::open(WarehouseConfig::in_dir(temp.path())).expect("warehouse open");
        (temp, warehouse)
    }

    fn source(dataset: CensusDataset, warehouse: Warehouse) -> CensusSource {
        CensusSource::new(
            "acs5",
            "ACS 5-year",
            dataset,
            TimeCoverage::new(
                TimePoint::parse("2010").expect("start"),
                Some(TimePoint::parse("2020").expect("end")),
            ),
            Arc::new(warehouse),
        )
    }

    fn variable(value_tables: &[&str], moe_tables: &[&str]) -> Variable {
        Variable {
            slug: String::from("pop"),
            name: String::from("Population"),
            short_name: None,
            units: None,
            unit_notes: None,
            denominators: Vec::new(),
            percent_label_text: None,
            depth: 0,
            aggregation_method: None,
            kind: VariableKind::Census {
                bindings: vec![CensusBinding {
                    source: String::from("acs5"),
                    value_tables: value_tables.iter().map(|t| (*t).to_owned()).collect(),
                    moe_tables: moe_tables.iter().map(|t| (*t).to_owned()).collect(),
                }],
            },
        }
    }

    fn record(geoid: &str, table_id: &str, value: f64) -> CensusValueRecord {
        CensusValueRecord {
            geoid: geoid.to_owned(),
            dataset: String::from("ACS5"),
            year: 2019,
            table_id: table_id.to_owned(),
            value: Some(value),
            raw_value: None,
        }
    }

    #[test]
    fn decennial_sources_only_accept_decade_years() {
        let (_temp, warehouse) = warehouse();
        let decennial = source(CensusDataset::Decennial, warehouse.clone());
        assert!(decennial.can_handle_time_part(&year("2010")));
        assert!(!decennial.can_handle_time_part(&year("2015")));

        let acs = source(CensusDataset::Acs5, warehouse);
        assert!(acs.can_handle_time_part(&year("2015")));
        assert!(!acs.can_handle_time_part(&year("2005")));
        assert!(!acs.can_handle_geog_kind(GeogKind::Neighborhood));
    }

    #[tokio::test]
    async fn sums_value_tables_and_keeps_single_moe() {
        let (_temp, warehouse) = warehouse();
        warehouse
            .upsert_census_values(&[
                record("42003020100", "B01001_003E", 10.0),
                record("42003020100", "B01001_027E", 12.0),
                record("42003020100", "B01001_003M", 3.0),
            ])
            .expect("load");
        let source = source(CensusDataset::Acs5, warehouse);
        let tract = Geography::new(GeogKind::Tract, "42003020100", "2010");
        let missing = Geography::new(GeogKind::Tract, "42003020300", "2030");
        let variable = variable(&["B01001_003E", "B01001_027E"], &["B01001_003M"]);
        let time_part = year("2019");

        let batch = source
            .fetch(FetchRequest {
                variable: &variable,
                denominator: None,
                geogs: &[&tract, &missing],
                kind: GeogKind::Tract,
                time_part: &time_part,
            })
            .await
            .expect("fetch");

        assert_eq!(batch.rows.len(), 1);
        assert_eq!(batch.rows[0].geog, tract.slug);
        assert_eq!(batch.rows[0].value, Some(22.0));
        assert_eq!(batch.rows[0].moe, Some(3.0));
        assert!(source.value_warnings(&variable).is_empty());
    }

    #[test]
    fn compound_moe_produces_a_warning() {
        let (_temp, warehouse) = warehouse();
        let source = source(CensusDataset::Acs5, warehouse);
        let variable = variable(&["A", "B"], &["A_M", "B_M"]);
        let warnings = source.value_warnings(&variable);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].starts_with("MOE unavailable"));
    }
}
