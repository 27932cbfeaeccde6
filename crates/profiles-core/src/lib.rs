//! # Profiles Core
//!
//! Neighborhood-indicator engine: turns a catalog of statistical variables
//! into geography x time x variable cubes, ready for tables, charts, and maps.
//!
//! ## Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`adapters`] | Bureau-table and open-data SQL sources, datastore clients |
//! | [`cache`] | Long-term value cache over memory and the warehouse |
//! | [`catalog`] | Authored time axes, sources, variables, indicators, taxonomy |
//! | [`config`] | `PROFILES_*` environment configuration |
//! | [`context`] | Per-request warnings and provenance |
//! | [`data_source`] | Source capability trait and fetch types |
//! | [`domain`] | Time axes, geographies, variables, indicators, datums |
//! | [`engine`] | Indicator orchestration and cube assembly |
//! | [`envelope`] | Response envelope for machine-readable output |
//! | [`error`] | Core error types |
//! | [`http_client`] | HTTP transport abstraction |
//! | [`maps`] | Jenks classification, map layers, GeoJSON export |
//! | [`resolver`] | Per-variable fetch, denominator join, and roll-up |
//! | [`retrieval`] | Pipeline error taxonomy and error records |
//! | [`retry`] | Retry policy with backoff |
//! | [`routing`] | Source registry and selection |
//! | [`throttling`] | Rate limiting for upstream calls |
//!
//! ## Request flow
//!
//! ```text
//! get_data(indicator, geog, across)
//!          │
//!          ▼
//! ┌─────────────────┐     ┌──────────────────┐
//! │ IndicatorEngine │────▶│ GeographyCatalog │  neighbors + subregions
//! └────────┬────────┘     └──────────────────┘
//!          │ per variable
//!          ▼
//! ┌──────────────────┐     ┌──────────────────┐
//! │ VariableResolver │────▶│ ValueCache       │
//! └────────┬─────────┘     └──────────────────┘
//!          │ misses
//!          ▼
//! ┌──────────────────┐     ┌──────────────────┐
//! │ SourceRegistry   │────▶│ DataSource       │  census / open-data SQL
//! └──────────────────┘     └──────────────────┘
//! ```

pub mod adapters;
pub mod cache;
pub mod catalog;
pub mod config;
pub mod context;
pub mod data_source;
pub mod domain;
pub mod engine;
pub mod envelope;
pub mod error;
pub mod http_client;
pub mod maps;
pub mod resolver;
pub mod retrieval;
pub mod retry;
pub mod routing;
pub mod throttling;

pub use adapters::{
    CensusDataset, CensusSource, CensusSourceConfig, CkanDatastoreClient, CkanSource,
    CkanSourceConfig, SourceSpec, WarehouseDatastore,
};
pub use cache::{CacheMode, CachedValue, ValueCache};
pub use catalog::{Catalog, CatalogDocument};
pub use config::ProfilesConfig;
pub use context::RequestContext;
pub use data_source::{
    CensusTableStore, DataSource, DatastoreClient, FetchBatch, FetchRequest, FetchedValue,
    SourceError, SourceErrorKind, TimeCoverage,
};
pub use domain::{
    AggregationMethod, DataResponse, Datum, Dimensions, GeogCollection, GeogKind, GeogRecord,
    Geography, GeographyCatalog, Indicator, Taxonomy, TimeAxis, TimePart, TimePoint, TimeUnit,
    UtcDateTime, Variable,
};
pub use engine::{EngineBuilder, IndicatorEngine};
pub use envelope::{Envelope, EnvelopeError, EnvelopeMeta, SCHEMA_VERSION};
pub use error::{CoreError, ValidationError};
pub use http_client::{
    HttpAuth, HttpClient, HttpError, HttpMethod, HttpRequest, HttpResponse, ReqwestHttpClient,
};
pub use maps::{MapLayer, MapMaterializer};
pub use profiles_warehouse::{
    CensusValueRecord, GeographyRecord, QueryGuardrails, QueryResult, SqlColumn, Warehouse,
    WarehouseConfig, WarehouseError,
};
pub use resolver::VariableResolver;
pub use retrieval::{ErrorLevel, ErrorRecord, ResolveError, RetrievalError, RetrievalErrorKind};
pub use retry::{Backoff, RetryPolicy};
pub use routing::{SourceRegistry, SourceSnapshot};
pub use throttling::RequestThrottle;
