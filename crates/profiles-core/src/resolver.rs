//! Variable resolution: cache probe, source fetch, denominator join, and
//! roll-up from sub-geographies to the requested ones.

use std::collections::{BTreeMap, HashMap};

use crate::cache::{CachedValue, ValueCache};
use crate::context::RequestContext;
use crate::data_source::FetchRequest;
use crate::domain::{AggregationMethod, Datum, GeogCollection, GeogRecord, TimePart, Variable};
use crate::retrieval::{ResolveError, RetrievalError, RetrievalErrorKind};
use crate::routing::SourceRegistry;
use crate::ValidationError;

#[derive(Debug, Clone, Copy, PartialEq, Default)]
struct RawValue {
    value: Option<f64>,
    moe: Option<f64>,
    denom: Option<f64>,
}

impl From<CachedValue> for RawValue {
    fn from(cached: CachedValue) -> Self {
        Self {
            value: cached.value,
            moe: cached.moe,
            denom: cached.denom,
        }
    }
}

impl From<RawValue> for CachedValue {
    fn from(raw: RawValue) -> Self {
        Self {
            value: raw.value,
            moe: raw.moe,
            denom: raw.denom,
        }
    }
}

/// `(time-part slug, geography slug)`.
type RawKey = (String, String);

/// Resolves variables against the registry, reading through the cache.
pub struct VariableResolver<'a> {
    registry: &'a SourceRegistry,
    cache: &'a ValueCache,
    variables: &'a BTreeMap<String, Variable>,
}

impl<'a> VariableResolver<'a> {
    pub fn new(
        registry: &'a SourceRegistry,
        cache: &'a ValueCache,
        variables: &'a BTreeMap<String, Variable>,
    ) -> Self {
        Self {
            registry,
            cache,
            variables,
        }
    }

    /// Data for `variable` at every record of `collection` and every time-part.
    ///
    /// Records served by sub-geographies are rolled up with the variable's
    /// aggregation method. Partial roll-ups yield a null value plus a warning
    /// in `context`.
    pub async fn get_values(
        &self,
        variable: &Variable,
        collection: &GeogCollection,
        time_parts: &[TimePart],
        use_denominators: bool,
        context: &mut RequestContext,
    ) -> Result<Vec<Datum>, ResolveError> {
        let method = variable.aggregation();
        if collection.is_divided() && !method.can_roll_up() {
            return Err(RetrievalError::aggregation(format!(
                "{} cannot be aggregated to {}.",
                variable.name,
                collection.geog_type.plural_title()
            ))
            .into());
        }

        let denominator = if use_denominators {
            self.primary_denominator(variable)?
        } else {
            None
        };

        let mut raw = self
            .resolve_raw(variable, denominator, collection, time_parts, context)
            .await?;

        if let Some(denominator) = denominator {
            if raw.values().any(|row| row.denom.is_none()) {
                self.join_denominator(denominator, collection, time_parts, &mut raw, context)
                    .await?;
            }
        }

        let denom_method = denominator.map(Variable::aggregation);
        let mut data = Vec::with_capacity(collection.records.len() * time_parts.len());
        for record in &collection.records {
            for time_part in time_parts {
                let Some(row) = aggregate(record, time_part, method, denom_method, &raw, context)
                else {
                    continue;
                };
                data.push(Datum::new(
                    variable.slug.clone(),
                    record.geog.slug.clone(),
                    time_part.slug.clone(),
                    row.value,
                    row.moe,
                    if use_denominators { row.denom } else { None },
                ));
            }
        }
        Ok(data)
    }

    fn primary_denominator(&self, variable: &Variable) -> Result<Option<&'a Variable>, ResolveError> {
        let Some(slug) = variable.primary_denominator() else {
            return Ok(None);
        };
        let denominator = self.variables.get(slug).ok_or_else(|| {
            crate::CoreError::from(ValidationError::UnknownVariable {
                slug: slug.to_owned(),
            })
        })?;
        Ok(Some(denominator))
    }

    async fn join_denominator(
        &self,
        denominator: &Variable,
        collection: &GeogCollection,
        time_parts: &[TimePart],
        raw: &mut HashMap<RawKey, RawValue>,
        context: &mut RequestContext,
    ) -> Result<(), ResolveError> {
        let denominators = match self
            .resolve_raw(denominator, None, collection, time_parts, context)
            .await
        {
            Ok(values) => values,
            Err(ResolveError::Retrieval(error))
                if error.kind() != RetrievalErrorKind::DataRetrieval =>
            {
                context.warn(format!(
                    "Denominator {} unavailable: {}",
                    denominator.name,
                    error.message()
                ));
                return Ok(());
            }
            Err(error) => return Err(error),
        };

        for (key, row) in raw.iter_mut() {
            if row.denom.is_none() {
                row.denom = denominators.get(key).and_then(|denom| denom.value);
            }
        }
        Ok(())
    }

    /// Raw values for every sub-geography of `collection`, keyed by
    /// `(time-part, geography)` slugs.
    async fn resolve_raw(
        &self,
        variable: &Variable,
        fold: Option<&Variable>,
        collection: &GeogCollection,
        time_parts: &[TimePart],
        context: &mut RequestContext,
    ) -> Result<HashMap<RawKey, RawValue>, ResolveError> {
        let mut raw = HashMap::new();
        let mut pending: Vec<(String, Vec<(String, CachedValue)>)> = Vec::new();
        let mut returned_rows = 0;
        let mut cache_hits = 0;

        for time_part in time_parts {
            let hash = time_part.storage_hash();
            for kind in collection.subgeog_kinds() {
                let geogs = collection.subgeogs_of_kind(kind);
                let source = self.registry.select(variable, time_part, kind)?;
                context.record_source(source.slug());
                context.extend_warnings(source.value_warnings(variable));

                let slugs: Vec<String> = geogs.iter().map(|geog| geog.slug.clone()).collect();
                let hits = self
                    .cache
                    .get_many(&variable.slug, &hash, &slugs, context.now())?;
                cache_hits += hits.len();
                context.record_cache_hits(hits.len());

                let misses: Vec<_> = geogs
                    .iter()
                    .copied()
                    .filter(|geog| !hits.contains_key(&geog.slug))
                    .collect();
                for (slug, cached) in hits {
                    raw.insert((time_part.slug.clone(), slug), RawValue::from(cached));
                }
                if misses.is_empty() {
                    continue;
                }

                context.record_fetch();
                let started = std::time::Instant::now();
                let batch = source
                    .fetch(FetchRequest {
                        variable,
                        denominator: fold,
                        geogs: &misses,
                        kind,
                        time_part,
                    })
                    .await?;
                tracing::info!(
                    source = %source.slug(),
                    variable = %variable.slug,
                    time = %time_part.slug,
                    kind = %kind,
                    requested = misses.len(),
                    returned = batch.rows.len(),
                    latency_ms = started.elapsed().as_millis() as u64,
                    "values fetched"
                );
                returned_rows += batch.rows.len();
                context.extend_warnings(batch.warnings);

                let mut fetched: HashMap<String, RawValue> = batch
                    .rows
                    .into_iter()
                    .map(|row| {
                        let value = RawValue {
                            value: row.value,
                            moe: row.moe,
                            denom: row.denom,
                        };
                        (row.geog, value)
                    })
                    .collect();

                let mut writes = Vec::with_capacity(misses.len());
                for geog in misses {
                    let value = fetched.remove(&geog.slug).unwrap_or(RawValue {
                        value: absent_value(variable.aggregation()),
                        ..RawValue::default()
                    });
                    writes.push((geog.slug.clone(), CachedValue::from(value)));
                    raw.insert((time_part.slug.clone(), geog.slug.clone()), value);
                }
                pending.push((hash.clone(), writes));
            }
        }

        if returned_rows == 0 && cache_hits == 0 {
            return Err(
                RetrievalError::empty_results(format!("No data available for {}.", variable.name))
                    .into(),
            );
        }

        for (hash, writes) in pending {
            self.cache
                .put_many(&variable.slug, &hash, &writes, context.now())?;
        }
        Ok(raw)
    }
}

/// Value recorded for a geography the source returned nothing for.
fn absent_value(method: AggregationMethod) -> Option<f64> {
    match method {
        AggregationMethod::Count => Some(0.0),
        _ => None,
    }
}

fn aggregate(
    record: &GeogRecord,
    time_part: &TimePart,
    method: AggregationMethod,
    denom_method: Option<AggregationMethod>,
    raw: &HashMap<RawKey, RawValue>,
    context: &mut RequestContext,
) -> Option<RawValue> {
    let lookup = |slug: &str| raw.get(&(time_part.slug.clone(), slug.to_owned())).copied();

    if !record.is_divided() {
        return lookup(&record.geog.slug);
    }

    let parts: Vec<Option<RawValue>> = record
        .subgeogs
        .iter()
        .map(|subgeog| lookup(&subgeog.slug))
        .collect();
    let kind = record
        .subgeogs
        .first()
        .map(|subgeog| subgeog.kind.title().to_lowercase())
        .unwrap_or_default();

    let values: Option<Vec<f64>> = parts.iter().map(|part| part.and_then(|p| p.value)).collect();
    let value = match values {
        Some(values) => method.combine(&values),
        None => {
            context.warn(format!(
                "aggregate partial for {} at {}",
                record.geog.common_geoid, time_part.name
            ));
            None
        }
    };

    let moe = if matches!(method, AggregationMethod::Sum | AggregationMethod::Count) {
        parts
            .iter()
            .map(|part| part.and_then(|p| p.moe))
            .collect::<Option<Vec<f64>>>()
            .map(|moes| moes.iter().map(|moe| moe * moe).sum::<f64>().sqrt())
    } else {
        None
    };

    let denom = denom_method.and_then(|denom_method| {
        let denoms: Option<Vec<f64>> =
            parts.iter().map(|part| part.and_then(|p| p.denom)).collect();
        match denoms {
            Some(denoms) => denom_method.combine(&denoms),
            None => {
                context.warn(format!(
                    "aggregate partial for {} at {}: missing {kind} denominators",
                    record.geog.common_geoid, time_part.name
                ));
                None
            }
        }
    });

    Some(RawValue { value, moe, denom })
}

#[cfg(test)]
mod tests {
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;
    use crate::data_source::{
        DataSource, FetchBatch, FetchedValue, SourceError, TimeCoverage,
    };
    use crate::domain::{CensusBinding, GeogKind, Geography, TimePoint, TimeUnit, VariableKind};

    struct TableSource {
        values: HashMap<String, (f64, Option<f64>)>,
        fetches: AtomicUsize,
    }

    impl DataSource for TableSource {
        fn slug(&self) -> &str {
            "acs5"
        }

        fn name(&self) -> &str {
            "ACS 5-year"
        }

        fn coverage(&self) -> TimeCoverage {
            TimeCoverage::new(TimePoint::parse("2010").expect("start"), None)
        }

        fn info_link(&self) -> String {
            String::new()
        }

        fn can_handle_time_part(&self, time_part: &TimePart) -> bool {
            self.coverage().contains(time_part.instant)
        }

        fn can_handle_geog_kind(&self, kind: GeogKind) -> bool {
            kind == GeogKind::Tract
        }

        fn fetch<'a>(
            &'a self,
            request: FetchRequest<'a>,
        ) -> Pin<Box<dyn Future<Output = Result<FetchBatch, SourceError>> + Send + 'a>> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            let rows = request
                .geogs
                .iter()
                .filter_map(|geog| {
                    let (value, moe) = self.values.get(&geog.common_geoid)?;
                    Some(FetchedValue {
                        geog: geog.slug.clone(),
                        value: Some(*value),
                        moe: *moe,
                        denom: None,
                    })
                })
                .collect();
            Box::pin(async move {
                Ok(FetchBatch {
                    rows,
                    warnings: Vec::new(),
                })
            })
        }
    }

    fn variable(method: Option<AggregationMethod>) -> Variable {
        Variable {
            slug: String::from("pop"),
            name: String::from("Population"),
            short_name: None,
            units: None,
            unit_notes: None,
            denominators: Vec::new(),
            percent_label_text: None,
            depth: 0,
            aggregation_method: method,
            kind: VariableKind::Census {
                bindings: vec![CensusBinding {
                    source: String::from("acs5"),
                    value_tables: vec![String::from("B01003_001E")],
                    moe_tables: vec![String::from("B01003_001M")],
                }],
            },
        }
    }

    fn setup(values: &[(&str, f64, Option<f64>)]) -> (SourceRegistry, Arc<TableSource>) {
        let source = Arc::new(TableSource {
            values: values
                .iter()
                .map(|(geoid, value, moe)| ((*geoid).to_owned(), (*value, *moe)))
                .collect(),
            fetches: AtomicUsize::new(0),
        });
        let mut registry = SourceRegistry::new();
        registry.register(source.clone()).expect("register");
        (registry, source)
    }

    fn county_from_tracts() -> GeogCollection {
        let county = Geography::new(GeogKind::County, "42003", "Allegheny");
        let tracts = vec![
            Geography::new(GeogKind::Tract, "42003020100", "2010"),
            Geography::new(GeogKind::Tract, "42003020300", "2030"),
        ];
        GeogCollection::new(
            county.clone(),
            vec![GeogRecord {
                geog: county,
                subgeogs: tracts,
            }],
        )
    }

    fn year() -> Vec<TimePart> {
        vec![TimePart::new("acs", TimePoint::parse("2019").expect("year"), TimeUnit::Year)]
    }

    #[tokio::test]
    async fn sums_sub_values_and_composes_moe() {
        let (registry, _source) = setup(&[
            ("42003020100", 300.0, Some(3.0)),
            ("42003020300", 400.0, Some(4.0)),
        ]);
        let cache = ValueCache::in_memory();
        let variables = BTreeMap::new();
        let resolver = VariableResolver::new(&registry, &cache, &variables);
        let mut context = RequestContext::new();

        let data = resolver
            .get_values(&variable(None), &county_from_tracts(), &year(), true, &mut context)
            .await
            .expect("values");

        assert_eq!(data.len(), 1);
        assert_eq!(data[0].geog, "county-42003");
        assert_eq!(data[0].value, Some(700.0));
        assert!((data[0].moe.expect("moe") - 5.0).abs() < 1e-9);
        assert!(context.warnings().is_empty());
    }

    #[tokio::test]
    async fn missing_sub_value_nulls_the_aggregate_with_a_warning() {
        let (registry, _source) = setup(&[("42003020100", 300.0, None)]);
        let cache = ValueCache::in_memory();
        let variables = BTreeMap::new();
        let resolver = VariableResolver::new(&registry, &cache, &variables);
        let mut context = RequestContext::new();

        let data = resolver
            .get_values(&variable(None), &county_from_tracts(), &year(), true, &mut context)
            .await
            .expect("values");

        assert_eq!(data[0].value, None);
        assert_eq!(context.warnings(), ["aggregate partial for 42003 at 2019"]);
    }

    #[tokio::test]
    async fn non_aggregatable_variables_cannot_roll_up() {
        let (registry, source) = setup(&[("42003020100", 1.0, None)]);
        let cache = ValueCache::in_memory();
        let variables = BTreeMap::new();
        let resolver = VariableResolver::new(&registry, &cache, &variables);
        let mut context = RequestContext::new();

        let error = resolver
            .get_values(
                &variable(Some(AggregationMethod::None)),
                &county_from_tracts(),
                &year(),
                true,
                &mut context,
            )
            .await
            .expect_err("aggregation");

        assert!(matches!(
            error,
            ResolveError::Retrieval(ref error) if error.kind() == RetrievalErrorKind::Aggregation
        ));
        assert_eq!(source.fetches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn second_resolution_is_served_from_cache() {
        let (registry, source) = setup(&[
            ("42003020100", 300.0, None),
            ("42003020300", 400.0, None),
        ]);
        let cache = ValueCache::in_memory();
        let variables = BTreeMap::new();
        let resolver = VariableResolver::new(&registry, &cache, &variables);
        let collection = county_from_tracts();

        let mut first = RequestContext::new();
        let before = resolver
            .get_values(&variable(None), &collection, &year(), true, &mut first)
            .await
            .expect("first");
        let mut second = RequestContext::new();
        let after = resolver
            .get_values(&variable(None), &collection, &year(), true, &mut second)
            .await
            .expect("second");

        assert_eq!(before, after);
        assert_eq!(source.fetches.load(Ordering::SeqCst), 1);
        assert_eq!(second.fetches(), 0);
        assert_eq!(second.cache_hits(), 2);
    }

    #[tokio::test]
    async fn nothing_returned_anywhere_is_empty_results() {
        let (registry, _source) = setup(&[]);
        let cache = ValueCache::in_memory();
        let variables = BTreeMap::new();
        let resolver = VariableResolver::new(&registry, &cache, &variables);
        let mut context = RequestContext::new();

        let error = resolver
            .get_values(&variable(None), &county_from_tracts(), &year(), true, &mut context)
            .await
            .expect_err("empty");
        assert!(error.to_string().starts_with("No data available for Population"));
        assert!(cache
            .get_many(
                "pop",
                &year()[0].storage_hash(),
                &[String::from("tract-42003020100")],
                context.now()
            )
            .expect("probe")
            .is_empty());
    }
}
