//! Indicator orchestration: neighbor selection, sub-geography planning,
//! per-variable resolution, and assembly of the geography x time x variable cube.

use std::collections::HashMap;
use std::sync::Arc;

use profiles_warehouse::Warehouse;

use crate::adapters::{CkanDatastoreClient, WarehouseDatastore};
use crate::cache::ValueCache;
use crate::catalog::Catalog;
use crate::config::ProfilesConfig;
use crate::context::RequestContext;
use crate::data_source::DatastoreClient;
use crate::domain::{
    DataResponse, Datum, Dimensions, GeogCollection, GeogKind, GeogRecord, Geography,
    GeographyCatalog, Indicator, TimePart, TimePoint, Variable, SUBGEOG_TYPE_ORDER,
};
use crate::http_client::{HttpAuth, HttpClient};
use crate::maps::{LayerRequest, MapMaterializer};
use crate::resolver::VariableResolver;
use crate::retrieval::{ErrorLevel, ErrorRecord, ResolveError, RetrievalError};
use crate::routing::SourceRegistry;
use crate::CoreError;

type Cube = Vec<Vec<Vec<Option<Datum>>>>;

/// Builder for [`IndicatorEngine`].
pub struct EngineBuilder {
    catalog: Catalog,
    geographies: GeographyCatalog,
    registry: SourceRegistry,
    cache: ValueCache,
    maps: Option<MapMaterializer>,
}

impl EngineBuilder {
    pub fn new(catalog: Catalog, geographies: GeographyCatalog) -> Self {
        Self {
            catalog,
            geographies,
            registry: SourceRegistry::new(),
            cache: ValueCache::in_memory(),
            maps: None,
        }
    }

    pub fn with_registry(mut self, registry: SourceRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_cache(mut self, cache: ValueCache) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_maps(mut self, maps: MapMaterializer) -> Self {
        self.maps = Some(maps);
        self
    }

    pub fn build(self) -> Result<IndicatorEngine, CoreError> {
        self.geographies.validate()?;
        Ok(IndicatorEngine {
            catalog: self.catalog,
            geographies: self.geographies,
            registry: self.registry,
            cache: self.cache,
            maps: self.maps,
        })
    }
}

/// Answers "indicator X for geography G" requests.
pub struct IndicatorEngine {
    catalog: Catalog,
    geographies: GeographyCatalog,
    registry: SourceRegistry,
    cache: ValueCache,
    maps: Option<MapMaterializer>,
}

impl IndicatorEngine {
    pub fn builder(catalog: Catalog, geographies: GeographyCatalog) -> EngineBuilder {
        EngineBuilder::new(catalog, geographies)
    }

    /// Wire an engine from configuration: catalog file, warehouse-backed
    /// geographies, census tables, cache, and map layers, plus either the
    /// remote datastore or (offline) the warehouse itself for open-data SQL.
    pub fn open(
        config: &ProfilesConfig,
        warehouse: Warehouse,
        http: Arc<dyn HttpClient>,
    ) -> Result<Self, CoreError> {
        let catalog = Catalog::load(&config.catalog_path)?;
        let geographies = GeographyCatalog::from_records(warehouse.geographies()?)?;

        let datastore: Arc<dyn DatastoreClient> = if config.offline {
            Arc::new(WarehouseDatastore::new(warehouse.clone()))
        } else {
            let auth = config
                .datastore_token
                .clone()
                .map_or(HttpAuth::None, HttpAuth::ApiToken);
            Arc::new(
                CkanDatastoreClient::new(config.datastore_url.clone(), Arc::clone(&http))
                    .with_timeout_ms(config.datastore_timeout_ms)
                    .with_auth(auth),
            )
        };
        let registry = catalog.build_registry(Arc::new(warehouse.clone()), datastore)?;
        catalog.validate_time_coverage(&registry, TimePoint::now())?;

        let cache = ValueCache::persistent(warehouse.clone())
            .with_ttl(config.cache_ttl)
            .with_mode(config.cache_mode);

        let mut maps = MapMaterializer::new(warehouse).with_map_host(config.map_host.clone());
        if let Some(url) = &config.tile_index_url {
            maps = maps.with_tile_index(url.clone(), http);
        }

        EngineBuilder::new(catalog, geographies)
            .with_registry(registry)
            .with_cache(cache)
            .with_maps(maps)
            .build()
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn geographies(&self) -> &GeographyCatalog {
        &self.geographies
    }

    pub fn registry(&self) -> &SourceRegistry {
        &self.registry
    }

    pub fn cache(&self) -> &ValueCache {
        &self.cache
    }

    pub fn maps(&self) -> Option<&MapMaterializer> {
        self.maps.as_ref()
    }

    pub async fn get_data(
        &self,
        indicator: &str,
        kind: GeogKind,
        geog_id: &str,
        across: bool,
    ) -> Result<DataResponse, CoreError> {
        let mut context = RequestContext::new();
        self.get_data_with(indicator, kind, geog_id, across, &mut context)
            .await
    }

    /// [`Self::get_data`] under a caller-owned context, which keeps the
    /// warnings, source chain, and fetch counters afterwards.
    pub async fn get_data_with(
        &self,
        indicator: &str,
        kind: GeogKind,
        geog_id: &str,
        across: bool,
        context: &mut RequestContext,
    ) -> Result<DataResponse, CoreError> {
        let indicator = self.catalog.indicator(indicator)?;
        let geog = self.geographies.get(kind, geog_id)?;
        self.resolve(indicator, geog, across, context).await
    }

    /// Materialize the map layer of a mappable indicator over every in-extent
    /// geography of `kind`.
    pub async fn build_map(
        &self,
        indicator: &str,
        kind: GeogKind,
        context: &mut RequestContext,
    ) -> Result<DataResponse, CoreError> {
        let indicator = self.catalog.indicator(indicator)?;
        let Some(primary) = self.geographies.all_in_extent(kind).into_iter().next() else {
            let error = RetrievalError::not_available_for_geog(format!(
                "This map is not available for geography Level: {}.",
                kind.title()
            ));
            return Ok(DataResponse::failed(
                Dimensions::default(),
                error.to_record(),
                context.warnings().to_vec(),
            ));
        };
        self.resolve(indicator, primary, true, context).await
    }

    async fn resolve(
        &self,
        indicator: &Indicator,
        geog: &Geography,
        across: bool,
        context: &mut RequestContext,
    ) -> Result<DataResponse, CoreError> {
        let axis = self.catalog.time_axis(&indicator.time_axis)?;
        let time_parts = axis.time_parts_at(context.now().into());
        let variables = indicator
            .variables
            .iter()
            .map(|slug| self.catalog.variable(slug))
            .collect::<Result<Vec<_>, _>>()?;

        let mapped = across && indicator.is_mappable(time_parts.len());
        let neighbors = if mapped {
            self.geographies.all_in_extent(geog.kind)
        } else {
            vec![geog]
        };
        let dimensions = Dimensions {
            geog: neighbors.iter().map(|neighbor| neighbor.slug.clone()).collect(),
            time: time_parts.iter().map(|part| part.slug.clone()).collect(),
            vars: variables.iter().map(|variable| variable.slug.clone()).collect(),
        };

        match self
            .assemble(indicator, geog, &neighbors, &variables, &time_parts, context)
            .await
        {
            Ok(data) => {
                let map_options = if mapped {
                    self.map_options(indicator, geog, &neighbors, variables[0], &data, context)
                        .await
                } else {
                    None
                };
                Ok(DataResponse {
                    data,
                    dimensions,
                    map_options,
                    error: ErrorRecord::ok(),
                    warnings: context.warnings().to_vec(),
                })
            }
            Err(ResolveError::Retrieval(error)) => {
                if error.level() == ErrorLevel::Error {
                    tracing::error!(
                        indicator = %indicator.slug,
                        geog = %geog.slug,
                        kind = error.kind().as_str(),
                        message = %error,
                        "indicator retrieval failed"
                    );
                } else {
                    tracing::info!(
                        indicator = %indicator.slug,
                        geog = %geog.slug,
                        kind = error.kind().as_str(),
                        message = %error,
                        "indicator has no data"
                    );
                }
                Ok(DataResponse::failed(
                    dimensions,
                    error.to_record(),
                    context.warnings().to_vec(),
                ))
            }
            Err(ResolveError::Core(error)) => {
                tracing::error!(indicator = %indicator.slug, error = %error, "indicator resolution aborted");
                Err(error)
            }
        }
    }

    async fn assemble(
        &self,
        indicator: &Indicator,
        geog: &Geography,
        neighbors: &[&Geography],
        variables: &[&Variable],
        time_parts: &[TimePart],
        context: &mut RequestContext,
    ) -> Result<Cube, ResolveError> {
        if neighbors.is_empty() {
            return Err(RetrievalError::not_available_for_geog(format!(
                "This visualization is not available for {}.",
                geog.title()
            ))
            .into());
        }

        let records = neighbors
            .iter()
            .map(|neighbor| self.subgeogs(indicator, variables, neighbor))
            .collect::<Result<Vec<_>, _>>()?;
        let collection = GeogCollection::new(geog.clone(), records);

        let geog_index: HashMap<&str, usize> = neighbors
            .iter()
            .enumerate()
            .map(|(index, neighbor)| (neighbor.slug.as_str(), index))
            .collect();
        let time_index: HashMap<&str, usize> = time_parts
            .iter()
            .enumerate()
            .map(|(index, part)| (part.slug.as_str(), index))
            .collect();

        let mut cube: Cube =
            vec![vec![vec![None; variables.len()]; time_parts.len()]; neighbors.len()];
        let resolver =
            VariableResolver::new(&self.registry, &self.cache, &self.catalog.variables);
        for (var_index, variable) in variables.iter().enumerate() {
            let data = resolver
                .get_values(
                    variable,
                    &collection,
                    time_parts,
                    indicator.use_denominators,
                    context,
                )
                .await?;
            for datum in data {
                let (Some(&g), Some(&t)) = (
                    geog_index.get(datum.geog.as_str()),
                    time_index.get(datum.time.as_str()),
                ) else {
                    continue;
                };
                cube[g][t][var_index] = Some(datum);
            }
        }
        Ok(cube)
    }

    /// The neighbor itself when every variable serves its kind, otherwise the
    /// first sub-kind in [`SUBGEOG_TYPE_ORDER`] that every variable serves.
    fn subgeogs(
        &self,
        indicator: &Indicator,
        variables: &[&Variable],
        neighbor: &Geography,
    ) -> Result<GeogRecord, ResolveError> {
        let servable = |kind: GeogKind| {
            variables
                .iter()
                .all(|variable| self.registry.can_handle_kind(variable, kind))
        };
        if servable(neighbor.kind) {
            return Ok(GeogRecord::direct(neighbor.clone()));
        }

        for kind in SUBGEOG_TYPE_ORDER {
            if neighbor.subregion_ids(kind).is_empty() || !servable(kind) {
                continue;
            }
            let subgeogs = self
                .geographies
                .subregions(neighbor, kind)
                .map_err(CoreError::from)?
                .into_iter()
                .cloned()
                .collect();
            tracing::debug!(geog = %neighbor.slug, kind = %kind, "serving through subregions");
            return Ok(GeogRecord {
                geog: neighbor.clone(),
                subgeogs,
            });
        }

        Err(RetrievalError::aggregation(format!(
            "{} not available for {}.",
            indicator.name,
            neighbor.title()
        ))
        .into())
    }

    async fn map_options(
        &self,
        indicator: &Indicator,
        primary: &Geography,
        neighbors: &[&Geography],
        variable: &Variable,
        data: &Cube,
        context: &mut RequestContext,
    ) -> Option<serde_json::Value> {
        let maps = self.maps.as_ref()?;
        let use_percent = indicator.use_denominators && variable.primary_denominator().is_some();
        let request = LayerRequest {
            kind: primary.kind,
            variable,
            time_axis: &indicator.time_axis,
            use_percent,
            data: neighbors
                .iter()
                .zip(data)
                .map(|(neighbor, row)| (*neighbor, row[0][0].as_ref()))
                .collect(),
        };

        match maps.ensure_layer(request).await {
            Ok(layer) => Some(maps.map_options(&layer, primary)),
            Err(ResolveError::Retrieval(error)) => {
                context.warn(error.message());
                None
            }
            Err(ResolveError::Core(error)) => {
                tracing::warn!(indicator = %indicator.slug, error = %error, "map layer unavailable");
                context.warn(format!("Map unavailable: {error}"));
                None
            }
        }
    }
}
