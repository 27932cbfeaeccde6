//! Shared fixtures for behavior tests: a temp warehouse seeded with a small
//! Allegheny County slice, a catalog document, and an engine wired to both.

use std::sync::Arc;

use profiles_core::{
    CacheMode, Catalog, CensusValueRecord, GeogKind, Geography, GeographyCatalog,
    IndicatorEngine, MapMaterializer, ValueCache, Warehouse, WarehouseConfig, WarehouseDatastore,
};
use serde_json::{json, Value};
use tempfile::TempDir;

pub const TRACT_A: &str = "42003020100";
pub const TRACT_B: &str = "42003020300";
pub const COUNTY: &str = "42003";
pub const HOOD: &str = "central";

pub fn temp_warehouse() -> (TempDir, Warehouse) {
    let temp = tempfile::tempdir().expect("tempdir");
    let warehouse =
        Warehouse::open(WarehouseConfig::in_dir(temp.path())).expect("warehouse open");
    (temp, warehouse)
}

fn square(x: f64, y: f64) -> Value {
    json!({
        "type": "Polygon",
        "coordinates": [[[x, y], [x + 0.01, y], [x + 0.01, y + 0.01], [x, y + 0.01], [x, y]]]
    })
}

/// County with two tracts and one neighborhood built from both tracts. Every
/// geography falls inside the county extent.
pub fn seed_geographies(warehouse: &Warehouse) -> GeographyCatalog {
    let tracts = vec![TRACT_A.to_owned(), TRACT_B.to_owned()];
    let mut tract_a = Geography::new(GeogKind::Tract, TRACT_A, "2010");
    tract_a.geometry = Some(square(-80.0, 40.44));
    tract_a.centroid = Some((-79.995, 40.445));
    tract_a.base_zoom = Some(13);
    let mut tract_b = Geography::new(GeogKind::Tract, TRACT_B, "2030");
    tract_b.geometry = Some(square(-79.99, 40.44));

    let mut catalog = GeographyCatalog::new(vec![
        Geography::new(GeogKind::County, COUNTY, "Allegheny")
            .with_subregions(GeogKind::Tract, tracts.clone())
            .with_subregions(GeogKind::Neighborhood, vec![HOOD.to_owned()]),
        tract_a,
        tract_b,
        Geography::new(GeogKind::Neighborhood, HOOD, "Central")
            .with_subregions(GeogKind::Tract, tracts),
        Geography::new(GeogKind::Tract, "42007600100", "6001"),
    ]);
    let in_extent = catalog.apply_extent(&[COUNTY.to_owned()]);

    warehouse
        .upsert_geographies(&catalog.to_records().expect("records"))
        .expect("geographies");
    warehouse.set_extent(&in_extent).expect("extent");
    catalog
}

fn value(geoid: &str, year: i32, table_id: &str, value: f64) -> CensusValueRecord {
    CensusValueRecord {
        geoid: geoid.to_owned(),
        dataset: String::from("ACS5"),
        year,
        table_id: table_id.to_owned(),
        value: Some(value),
        raw_value: Some(value.to_string()),
    }
}

/// Bureau values for both tracts. Tract B has no under-18 count.
pub fn seed_census(warehouse: &Warehouse) {
    let mut rows = vec![
        value(TRACT_A, 2019, "B01003_001E", 3_000.0),
        value(TRACT_A, 2019, "B01003_001M", 120.0),
        value(TRACT_A, 2019, "B09001_001E", 600.0),
        value(TRACT_A, 2019, "B09001_001M", 50.0),
        value(TRACT_B, 2019, "B01003_001E", 2_000.0),
        value(TRACT_B, 2019, "B01003_001M", 90.0),
        value(COUNTY, 2019, "B01003_001E", 1_220_000.0),
    ];
    for year in [2018, 2019] {
        rows.push(value(TRACT_A, year, "C17002_002E", 100.0));
        rows.push(value(TRACT_A, year, "C17002_003E", 50.0));
        rows.push(value(TRACT_A, year, "C17002_002M", 10.0));
        rows.push(value(TRACT_A, year, "C17002_003M", 12.0));
    }
    warehouse.upsert_census_values(&rows).expect("census values");
}

pub fn catalog_document() -> Value {
    json!({
        "time_axes": [
            {"slug": "acs-2019", "name": "2019", "unit": "year", "kind": "static", "instants": ["2019"]},
            {"slug": "acs-2005", "name": "2005", "unit": "year", "kind": "static", "instants": ["2005"]},
            {"slug": "acs-recent", "name": "2018-2019", "unit": "year", "kind": "static",
             "instants": ["2018", "2019"]}
        ],
        "sources": [
            {"type": "census", "slug": "acs5-2019", "name": "ACS 5-Year", "dataset": "ACS5",
             "time_coverage_start": "2015", "time_coverage_end": "2019-12-31"},
            {"type": "ckan_regional", "slug": "arrests", "name": "Arrest records",
             "package_id": "arrest-data", "resource_id": "arrests_resource",
             "time_field": "ARRESTTIME", "time_coverage_start": "2016-01-01",
             "fields": {"neighborhood": {"field": "hood"}}}
        ],
        "variables": [
            {"slug": "total-pop", "name": "Total Population", "type": "census",
             "bindings": [{"source": "acs5-2019", "value_tables": ["B01003_001E"],
                           "moe_tables": ["B01003_001M"]}]},
            {"slug": "pop-under-18", "name": "Population under 18", "type": "census",
             "denominators": ["total-pop"],
             "bindings": [{"source": "acs5-2019", "value_tables": ["B09001_001E"],
                           "moe_tables": ["B09001_001M"]}]},
            {"slug": "poverty", "name": "Persons below poverty", "type": "census",
             "bindings": [{"source": "acs5-2019", "value_tables": ["C17002_002E", "C17002_003E"],
                           "moe_tables": ["C17002_002M", "C17002_003M"]}]},
            {"slug": "arrests", "name": "Arrests", "type": "ckan",
             "field": "ccr", "sources": ["arrests"]}
        ],
        "indicators": [
            {"slug": "total-pop", "name": "Total Population", "time_axis": "acs-2019",
             "variables": ["total-pop"]},
            {"slug": "youth", "name": "Youth", "time_axis": "acs-2019",
             "variables": ["pop-under-18"]},
            {"slug": "pop-2005", "name": "Population in 2005", "time_axis": "acs-2005",
             "variables": ["total-pop"]},
            {"slug": "poverty-trend", "name": "Poverty", "time_axis": "acs-recent",
             "variables": ["poverty"]},
            {"slug": "arrests", "name": "Arrests", "time_axis": "acs-2019",
             "variables": ["arrests"]}
        ],
        "taxonomy": {
            "domains": [{"slug": "people", "name": "People", "subdomains": ["population"]}],
            "subdomains": [{"slug": "population", "name": "Population", "topics": ["age"]}],
            "topics": [{"slug": "age", "name": "Age", "indicators": ["total-pop", "youth"]}]
        }
    })
}

pub fn catalog() -> Catalog {
    Catalog::from_document(serde_json::from_value(catalog_document()).expect("document shape"))
        .expect("catalog")
}

/// Engine over the seeded warehouse: bureau tables, offline datastore,
/// persistent cache, and map layers all live in `warehouse`.
pub fn engine(warehouse: &Warehouse) -> IndicatorEngine {
    engine_with_mode(warehouse, CacheMode::Use)
}

pub fn engine_with_mode(warehouse: &Warehouse, mode: CacheMode) -> IndicatorEngine {
    let catalog = catalog();
    let geographies =
        GeographyCatalog::from_records(warehouse.geographies().expect("geographies"))
            .expect("geography catalog");
    let registry = catalog
        .build_registry(
            Arc::new(warehouse.clone()),
            Arc::new(WarehouseDatastore::new(warehouse.clone())),
        )
        .expect("registry");

    IndicatorEngine::builder(catalog, geographies)
        .with_registry(registry)
        .with_cache(ValueCache::persistent(warehouse.clone()).with_mode(mode))
        .with_maps(MapMaterializer::new(warehouse.clone()))
        .build()
        .expect("engine")
}

/// Fully seeded warehouse plus an engine over it.
pub fn seeded() -> (TempDir, Warehouse, IndicatorEngine) {
    let (temp, warehouse) = temp_warehouse();
    seed_geographies(&warehouse);
    seed_census(&warehouse);
    let engine = engine(&warehouse);
    (temp, warehouse, engine)
}
