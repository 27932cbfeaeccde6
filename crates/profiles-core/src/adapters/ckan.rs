use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::data_source::{
    DataSource, DatastoreClient, FetchBatch, FetchRequest, FetchedValue, SourceError,
    TimeCoverage,
};
use crate::domain::{
    AggregationMethod, GeogKind, Geography, TimePart, TimePoint, TimeUnit, Variable, VariableKind,
};

pub const DEFAULT_GEOM_FIELD: &str = "_geom";

/// Boundary lookup resources used when joining point data to geographies.
pub fn default_lookup(kind: GeogKind) -> Option<&'static str> {
    match kind {
        GeogKind::County => Some("8a5fc9dc-5eb9-4fe3-b60a-0366ad9b813b"),
        GeogKind::CountySubdivision => Some("35c72b10-147e-4bf3-8678-ae6e83ad1de2"),
        GeogKind::Tract => Some("bb9a7972-981c-4026-8483-df8bdd1801c2"),
        GeogKind::BlockGroup => Some("b5f5480c-548d-46d8-b623-40a226d87517"),
        _ => None,
    }
}

/// Column (or raw SQL expression) holding a geography's id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionalField {
    pub field: String,
    #[serde(default)]
    pub is_sql: bool,
}

/// Authored definition of an open-data resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CkanSourceConfig {
    pub slug: String,
    pub name: String,
    pub package_id: String,
    pub resource_id: String,
    #[serde(default)]
    pub time_field: Option<String>,
    #[serde(default)]
    pub time_field_format: Option<String>,
    #[serde(default)]
    pub standardization_query: Option<String>,
    pub time_coverage_start: TimePoint,
    #[serde(default)]
    pub time_coverage_end: Option<TimePoint>,
    #[serde(default = "default_granularity")]
    pub granularity: TimeUnit,
    #[serde(default)]
    pub geom_field: Option<String>,
    #[serde(default)]
    pub lookups: BTreeMap<GeogKind, String>,
    #[serde(default)]
    pub fields: BTreeMap<GeogKind, RegionalField>,
}

const fn default_granularity() -> TimeUnit {
    TimeUnit::Year
}

/// How rows are tied to geographies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GeoJoin {
    /// Points or shapes covered by boundaries from a lookup resource.
    Geometry {
        geom_field: String,
        lookups: BTreeMap<GeogKind, String>,
    },
    /// Rows already carry geography ids.
    Fields(BTreeMap<GeogKind, RegionalField>),
}

impl GeoJoin {
    pub fn geometry(config: &CkanSourceConfig) -> Self {
        Self::Geometry {
            geom_field: config
                .geom_field
                .clone()
                .unwrap_or_else(|| DEFAULT_GEOM_FIELD.to_owned()),
            lookups: config.lookups.clone(),
        }
    }

    pub fn fields(config: &CkanSourceConfig) -> Self {
        Self::Fields(config.fields.clone())
    }
}

/// SQL open-data source queried through a [`DatastoreClient`].
#[derive(Clone)]
pub struct CkanSource {
    config: CkanSourceConfig,
    join: GeoJoin,
    client: Arc<dyn DatastoreClient>,
}

impl CkanSource {
    pub fn new(config: CkanSourceConfig, join: GeoJoin, client: Arc<dyn DatastoreClient>) -> Self {
        Self {
            config,
            join,
            client,
        }
    }

    pub fn config(&self) -> &CkanSourceConfig {
        &self.config
    }

    /// Whether `denominator` can be computed by the same query.
    pub fn folds(&self, denominator: &Variable) -> bool {
        matches!(&denominator.kind, VariableKind::Ckan { sources, .. }
            if sources.iter().any(|source| source == &self.config.slug))
    }

    fn lookup_table(&self, kind: GeogKind) -> Option<String> {
        match &self.join {
            GeoJoin::Geometry { lookups, .. } => lookups
                .get(&kind)
                .cloned()
                .or_else(|| default_lookup(kind).map(str::to_owned)),
            GeoJoin::Fields(_) => None,
        }
    }

    /// Build the aggregate query for one fetch.
    pub fn build_query(&self, request: &FetchRequest<'_>) -> Result<String, SourceError> {
        let (field, filter) = ckan_field(request.variable, &self.config.slug)?;
        let ids = request
            .geogs
            .iter()
            .map(|geog| quote_literal(&geog.common_geoid))
            .collect::<Vec<_>>()
            .join(", ");
        if ids.is_empty() {
            return Err(SourceError::invalid_request("no geographies requested"));
        }

        let (geog_select, join, geog_filter) = match &self.join {
            GeoJoin::Geometry { geom_field, .. } => {
                let lookup = self.lookup_table(request.kind).ok_or_else(|| {
                    SourceError::unsupported_geography(&self.config.slug, request.kind)
                })?;
                let lookup = quote_ident(&lookup);
                let geom = format!("SQ.{}", quote_ident(geom_field));
                (
                    String::from("GEO.\"geoid\""),
                    format!(" JOIN {lookup} GEO ON ST_Covers(GEO.\"geom\", {geom})"),
                    format!(
                        "ST_Intersects((SELECT ST_Union(L.\"geom\") FROM {lookup} L \
                         WHERE L.\"geoid\" IN ({ids})), {geom}) AND GEO.\"geoid\" IN ({ids})"
                    ),
                )
            }
            GeoJoin::Fields(fields) => {
                let mapping = fields
                    .get(&request.kind)
                    .filter(|mapping| !mapping.field.trim().is_empty())
                    .ok_or_else(|| {
                        SourceError::unsupported_geography(&self.config.slug, request.kind)
                    })?;
                let select = if mapping.is_sql {
                    mapping.field.clone()
                } else {
                    format!("SQ.{}", quote_ident(&mapping.field))
                };
                let filter = format!("{select} IN ({ids})");
                (select, String::new(), filter)
            }
        };

        let mut select = format!(
            "SELECT {geog_select} AS geog, {} AS time, {} AS value",
            quote_literal(&request.time_part.slug),
            aggregate_select(request.variable.aggregation(), field, filter)
        );
        if let Some(denominator) = request.denominator.filter(|d| self.folds(d)) {
            let (denom_field, denom_filter) = ckan_field(denominator, &self.config.slug)?;
            select.push_str(&format!(
                ", {} AS denom",
                aggregate_select(denominator.aggregation(), denom_field, denom_filter)
            ));
        }

        let from = match self.config.standardization_query.as_deref() {
            Some(query) if !query.trim().is_empty() => format!("({})", query.trim()),
            _ => quote_ident(&self.config.resource_id),
        };

        let mut conditions = vec![geog_filter];
        if let Some(time_select) = self.time_select() {
            conditions.push(format!(
                "date_trunc('{}', ({time_select})::timestamp) = {}",
                request.time_part.unit.as_str(),
                request.time_part.trunc_sql()
            ));
        }

        Ok(format!(
            "{select} FROM {from} SQ{join} WHERE {} GROUP BY {geog_select}",
            conditions.join(" AND ")
        ))
    }

    fn time_select(&self) -> Option<String> {
        let field = format!("SQ.{}", quote_ident(self.config.time_field.as_deref()?));
        Some(match self.config.time_field_format.as_deref() {
            Some(format) => format!("to_timestamp({field}, {})", quote_literal(format)),
            None => field,
        })
    }
}

impl DataSource for CkanSource {
    fn slug(&self) -> &str {
        &self.config.slug
    }

    fn name(&self) -> &str {
        &self.config.name
    }

    fn coverage(&self) -> TimeCoverage {
        TimeCoverage::new(self.config.time_coverage_start, self.config.time_coverage_end)
    }

    fn info_link(&self) -> String {
        format!("https://data.wprdc.org/dataset/{}", self.config.package_id)
    }

    /// The part's unit must match the granularity and its span must overlap
    /// the coverage range.
    fn can_handle_time_part(&self, time_part: &TimePart) -> bool {
        if time_part.unit != self.config.granularity {
            return false;
        }
        self.coverage().contains(time_part.instant)
    }

    fn can_handle_geog_kind(&self, kind: GeogKind) -> bool {
        match &self.join {
            GeoJoin::Geometry { .. } => true,
            GeoJoin::Fields(fields) => fields
                .get(&kind)
                .is_some_and(|mapping| !mapping.field.trim().is_empty()),
        }
    }

    fn fetch<'a>(
        &'a self,
        request: FetchRequest<'a>,
    ) -> Pin<Box<dyn Future<Output = Result<FetchBatch, SourceError>> + Send + 'a>> {
        Box::pin(async move {
            let sql = self.build_query(&request)?;
            tracing::debug!(source = %self.config.slug, sql = %sql, "datastore query");

            let records = self.client.run_sql(sql).await?;
            let folded = request.denominator.is_some_and(|d| self.folds(d));
            let rows = parse_rows(&records, request.geogs, folded);
            tracing::debug!(
                source = %self.config.slug,
                variable = %request.variable.slug,
                time = %request.time_part.slug,
                returned = rows.len(),
                "datastore rows parsed"
            );
            Ok(FetchBatch {
                rows,
                warnings: Vec::new(),
            })
        })
    }
}

fn ckan_field<'v>(
    variable: &'v Variable,
    source: &str,
) -> Result<(&'v str, Option<&'v str>), SourceError> {
    match &variable.kind {
        VariableKind::Ckan {
            field, sql_filter, ..
        } => Ok((field.as_str(), sql_filter.as_deref())),
        VariableKind::Census { .. } => Err(SourceError::invalid_request(format!(
            "variable '{}' is not an open-data variable and cannot query '{source}'",
            variable.slug
        ))),
    }
}

fn aggregate_select(method: AggregationMethod, field: &str, filter: Option<&str>) -> String {
    let column = format!("SQ.{}", quote_ident(field));
    let aggregate = match method {
        AggregationMethod::Mode => format!("mode() WITHIN GROUP (ORDER BY {column})"),
        AggregationMethod::None | AggregationMethod::Sum => format!("SUM({column})"),
        AggregationMethod::Count => format!("COUNT({column})"),
        AggregationMethod::Avg => format!("AVG({column})"),
        AggregationMethod::Max => format!("MAX({column})"),
        AggregationMethod::Min => format!("MIN({column})"),
    };
    match filter.map(str::trim).filter(|filter| !filter.is_empty()) {
        Some(filter) => format!("({aggregate} FILTER (WHERE {filter}))::float8"),
        None => format!("({aggregate})::float8"),
    }
}

fn parse_rows(
    records: &[Map<String, Value>],
    geogs: &[&Geography],
    folded: bool,
) -> Vec<FetchedValue> {
    let slugs: HashMap<&str, &str> = geogs
        .iter()
        .map(|geog| (geog.common_geoid.as_str(), geog.slug.as_str()))
        .collect();

    records
        .iter()
        .filter_map(|record| {
            let geoid = match record.get("geog")? {
                Value::String(geoid) => geoid.clone(),
                Value::Number(geoid) => geoid.to_string(),
                _ => return None,
            };
            let Some(slug) = slugs.get(geoid.as_str()) else {
                tracing::debug!(geoid = %geoid, "datastore returned an unrequested geography");
                return None;
            };
            Some(FetchedValue {
                geog: (*slug).to_owned(),
                value: record.get("value").and_then(number),
                moe: None,
                denom: if folded {
                    record.get("denom").and_then(number)
                } else {
                    None
                },
            })
        })
        .collect()
}

fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}
