use std::sync::Arc;

use profiles_warehouse::{LayerValue, Warehouse};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::domain::{Datum, GeogKind, Geography, Variable};
use crate::http_client::{HttpClient, HttpRequest};
use crate::maps::{class_count, jenks_breaks, MapLayer, DEFAULT_MAP_HOST};
use crate::retrieval::{ResolveError, RetrievalError};
use crate::CoreError;

/// Values for one layer: each extent geography with its resolved datum.
pub struct LayerRequest<'a> {
    pub kind: GeogKind,
    pub variable: &'a Variable,
    pub time_axis: &'a str,
    pub use_percent: bool,
    pub data: Vec<(&'a Geography, Option<&'a Datum>)>,
}

/// Persists layers in the warehouse and renders their map documents.
#[derive(Clone)]
pub struct MapMaterializer {
    warehouse: Warehouse,
    map_host: String,
    tile_index_url: Option<String>,
    http: Option<Arc<dyn HttpClient>>,
}

impl MapMaterializer {
    pub fn new(warehouse: Warehouse) -> Self {
        Self {
            warehouse,
            map_host: DEFAULT_MAP_HOST.to_owned(),
            tile_index_url: None,
            http: None,
        }
    }

    pub fn with_map_host(mut self, map_host: impl Into<String>) -> Self {
        self.map_host = map_host.into();
        self
    }

    /// Ping `url` after each new layer so the tile server picks up its view.
    pub fn with_tile_index(mut self, url: impl Into<String>, http: Arc<dyn HttpClient>) -> Self {
        self.tile_index_url = Some(url.into());
        self.http = Some(http);
        self
    }

    pub fn map_host(&self) -> &str {
        &self.map_host
    }

    /// Existing layer for the request's key, or a newly materialized one.
    pub async fn ensure_layer(&self, request: LayerRequest<'_>) -> Result<MapLayer, ResolveError> {
        if let Some(record) = self.warehouse.find_layer(
            request.kind.as_str(),
            &request.variable.slug,
            request.time_axis,
        )? {
            return Ok(MapLayer::from_record(record)?);
        }

        let values: Vec<LayerValue> = request
            .data
            .iter()
            .map(|(geog, datum)| LayerValue {
                geoid: geog.common_geoid.clone(),
                value: datum.and_then(|datum| datum.map_value(request.use_percent)),
            })
            .collect();
        let present: Vec<f64> = values.iter().filter_map(|value| value.value).collect();
        if present.is_empty() {
            return Err(RetrievalError::not_available_for_geog(format!(
                "This map is not available for geography Level: {}.",
                request.kind.title()
            ))
            .into());
        }

        let variable = request.variable;
        let layer = MapLayer {
            slug: format!("dl_{}", Uuid::new_v4().to_string().replace('-', "_")),
            geog_type: request.kind,
            variable: variable.slug.clone(),
            time_axis: request.time_axis.to_owned(),
            name: format!("{} across {}", variable.name, request.kind.plural_title()),
            label: if request.use_percent {
                variable.percent_label()
            } else {
                variable.name.clone()
            },
            use_percent: request.use_percent,
            number_format_options: if request.use_percent {
                json!({"style": "percent"})
            } else {
                variable.locale_options()
            },
            breaks: jenks_breaks(&present, class_count(&present)),
            created_at: None,
        };

        self.warehouse.store_layer(&layer.to_record()?, &values)?;
        tracing::info!(
            layer = %layer.slug,
            kind = %request.kind,
            variable = %variable.slug,
            values = present.len(),
            classes = layer.breaks.len(),
            "map layer materialized"
        );
        self.refresh_tile_index().await;

        // Re-read so callers see the stored creation time.
        match self.warehouse.layer(&layer.slug)? {
            Some(record) => Ok(MapLayer::from_record(record)?),
            None => Ok(layer),
        }
    }

    async fn refresh_tile_index(&self) {
        let (Some(url), Some(http)) = (&self.tile_index_url, &self.http) else {
            return;
        };
        match http.execute(HttpRequest::get(url.clone())).await {
            Ok(response) if response.is_success() => {
                tracing::debug!(url = %url, "tile index refreshed");
            }
            Ok(response) => {
                tracing::warn!(url = %url, status = response.status, "tile index refresh rejected");
            }
            Err(error) => {
                tracing::warn!(url = %url, error = %error, "tile index refresh failed");
            }
        }
    }

    pub fn map_options(&self, layer: &MapLayer, primary: &Geography) -> Value {
        layer.map_options(&self.map_host, primary)
    }

    pub fn find_layer(
        &self,
        kind: GeogKind,
        variable: &str,
        time_axis: &str,
    ) -> Result<Option<MapLayer>, CoreError> {
        self.warehouse
            .find_layer(kind.as_str(), variable, time_axis)?
            .map(MapLayer::from_record)
            .transpose()
    }

    pub fn layer(&self, slug: &str) -> Result<Option<MapLayer>, CoreError> {
        self.warehouse
            .layer(slug)?
            .map(MapLayer::from_record)
            .transpose()
    }

    pub fn list_layers(&self) -> Result<Vec<MapLayer>, CoreError> {
        self.warehouse
            .list_layers()?
            .into_iter()
            .map(MapLayer::from_record)
            .collect()
    }

    pub fn drop_layer(&self, slug: &str) -> Result<bool, CoreError> {
        Ok(self.warehouse.drop_layer(slug)?)
    }

    pub fn clear_layers(&self) -> Result<usize, CoreError> {
        Ok(self.warehouse.clear_layers()?)
    }

    /// FeatureCollection of a layer's view.
    pub fn geojson(&self, slug: &str) -> Result<Value, CoreError> {
        let layer = self.layer(slug)?.ok_or_else(|| {
            CoreError::from(profiles_warehouse::WarehouseError::NotFound {
                entity: "map layer",
                key: slug.to_owned(),
            })
        })?;

        let mut features = Vec::new();
        for feature in self.warehouse.layer_features(slug)? {
            let geometry = feature
                .geometry
                .as_deref()
                .map(serde_json::from_str::<Value>)
                .transpose()?
                .unwrap_or(Value::Null);
            features.push(json!({
                "type": "Feature",
                "geometry": geometry,
                "properties": {
                    "geoid": feature.geoid,
                    "name": feature.geo_name,
                    "title": feature.title,
                    "map_value": feature.value,
                    "value": feature.value,
                },
            }));
        }

        Ok(json!({
            "type": "FeatureCollection",
            "name": layer.name,
            "number_format_options": layer.number_format_options,
            "features": features,
        }))
    }
}

#[cfg(test)]
mod tests {
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::Mutex;

    use super::*;
    use crate::domain::{CensusBinding, GeographyCatalog, VariableKind};
    use crate::http_client::{HttpError, HttpResponse};
    use profiles_warehouse::WarehouseConfig;

    struct FailingTileServer {
        calls: Mutex<usize>,
    }

    impl HttpClient for FailingTileServer {
        fn execute<'a>(
            &'a self,
            _request: HttpRequest,
        ) -> Pin<Box<dyn Future<Output = Result<HttpResponse, HttpError>> + Send + 'a>> {
            *self.calls.lock().expect("call counter should not be poisoned") += 1;
            Box::pin(async { Err(HttpError::new("connection refused")) })
        }
    }

    fn variable() -> Variable {
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
                    value_tables: vec![String::from("B01003_001E")],
                    moe_tables: Vec::new(),
                }],
            },
        }
    }

    #[tokio::test]
    async fn layers_are_created_once_and_exported_as_geojson() {
        let temp = tempfile::tempdir().expect("tempdir");
        let warehouse = Warehouse::open(WarehouseConfig::in_dir(temp.path())).expect("warehouse");
        let mut tracts = Vec::new();
        for (geoid, x) in [("42003020100", 0.0), ("42003020300", 1.0)] {
            let mut tract = Geography::new(GeogKind::Tract, geoid, geoid);
            tract.geometry = Some(json!({"type": "Point", "coordinates": [x, 0.0]}));
            tracts.push(tract);
        }
        let catalog = GeographyCatalog::new(tracts.clone());
        warehouse
            .upsert_geographies(&catalog.to_records().expect("records"))
            .expect("load");

        let tile_server = Arc::new(FailingTileServer {
            calls: Mutex::new(0),
        });
        let materializer = MapMaterializer::new(warehouse)
            .with_tile_index("https://tiles.example/refresh", tile_server.clone());
        let variable = variable();
        let data = [
            Datum::new("pop", &tracts[0].slug, "acs:2019", Some(10.0), None, None),
            Datum::new("pop", &tracts[1].slug, "acs:2019", Some(30.0), None, None),
        ];

        let request = || LayerRequest {
            kind: GeogKind::Tract,
            variable: &variable,
            time_axis: "acs",
            use_percent: false,
            data: tracts.iter().zip(data.iter().map(Some)).collect(),
        };
        let first = materializer.ensure_layer(request()).await.expect("layer");
        let second = materializer.ensure_layer(request()).await.expect("layer");

        assert_eq!(first.slug, second.slug);
        assert!(first.slug.starts_with("dl_"));
        assert_eq!(first.breaks, vec![10.0, 30.0]);
        assert_eq!(first.name, "Population across Tracts");
        assert_eq!(*tile_server.calls.lock().expect("calls"), 1);

        let collection = materializer.geojson(&first.slug).expect("geojson");
        assert_eq!(collection["type"], "FeatureCollection");
        assert_eq!(collection["features"][1]["properties"]["value"], 30.0);
        assert_eq!(collection["features"][0]["properties"]["title"], "Tract 42003020100");
    }

    #[tokio::test]
    async fn layers_without_values_are_not_available() {
        let temp = tempfile::tempdir().expect("tempdir");
        let warehouse = Warehouse::open(WarehouseConfig::in_dir(temp.path())).expect("warehouse");
        let materializer = MapMaterializer::new(warehouse);
        let tract = Geography::new(GeogKind::Tract, "42003020100", "2010");
        let variable = variable();

        let error = materializer
            .ensure_layer(LayerRequest {
                kind: GeogKind::Tract,
                variable: &variable,
                time_axis: "acs",
                use_percent: false,
                data: vec![(&tract, None)],
            })
            .await
            .expect_err("no values");
        assert_eq!(
            error.to_string(),
            "This map is not available for geography Level: Tract."
        );
        assert!(materializer.list_layers().expect("list").is_empty());
    }
}
