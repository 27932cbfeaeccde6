//! CLI argument definitions for `profiles`.
//!
//! # Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `data` | Resolve an indicator for a geography |
//! | `map` | Build, export, list, and drop map layers |
//! | `cache` | Clear or prune the value cache |
//! | `geo` | Import geographies, set the extent, save subregions |
//! | `census` | Load bureau table values |
//! | `catalog` | Validate the authored catalog |
//! | `taxonomy` | List domains, subdomains, and topics |
//! | `sql` | Query the local DuckDB warehouse |
//!
//! # Examples
//!
//! ```bash
//! profiles data total-pop --geog-type tract --geog-id 42003020100 --pretty
//! profiles data total-pop --geog-type tract --geog-id 42003020100 --across
//! profiles map build total-pop --geog-type tract
//! profiles sql "SELECT * FROM v_layer_catalog"
//! ```

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use profiles_core::{CacheMode, GeogKind};

#[derive(Debug, Parser)]
#[command(
    name = "profiles",
    author,
    version,
    about = "Neighborhood indicator engine",
    long_about = "Resolves neighborhood indicators from census tables and open-data \
SQL sources, rolls them up to the requested geography, caches the results, and \
materializes choropleth map layers in a local DuckDB warehouse."
)]
pub struct Cli {
    /// Output format for results.
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Json)]
    pub format: OutputFormat,

    /// Pretty-print JSON output with indentation.
    #[arg(long, global = true, default_value_t = false)]
    pub pretty: bool,

    /// Treat warnings and errors as failures (exit code 5).
    #[arg(long, global = true, default_value_t = false)]
    pub strict: bool,

    /// Answer open-data SQL from warehouse tables instead of the remote datastore.
    #[arg(long, global = true, default_value_t = false)]
    pub offline: bool,

    /// How resolution uses the value cache.
    #[arg(long, global = true, value_enum, default_value_t = CacheModeArg::Use)]
    pub cache_mode: CacheModeArg,

    /// Catalog JSON path (overrides PROFILES_CATALOG).
    #[arg(long, global = true)]
    pub catalog: Option<PathBuf>,

    /// Log at debug level to stderr.
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable summary.
    Table,
    /// Single JSON object output.
    Json,
    /// Newline-delimited JSON.
    Ndjson,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CacheModeArg {
    Use,
    Refresh,
    Bypass,
}

impl From<CacheModeArg> for CacheMode {
    fn from(mode: CacheModeArg) -> Self {
        match mode {
            CacheModeArg::Use => Self::Use,
            CacheModeArg::Refresh => Self::Refresh,
            CacheModeArg::Bypass => Self::Bypass,
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Resolve an indicator for one geography, or across its whole kind.
    ///
    /// # Examples
    ///
    ///   profiles data total-pop --geog-type county --geog-id 42003
    ///   profiles data pop-under-18 --geog-type tract --geog-id 42003020100 --across
    Data(DataArgs),

    /// Manage materialized map layers.
    Map(MapArgs),

    /// Manage the value cache.
    Cache(CacheArgs),

    /// Load geographies and their extent and subregions.
    Geo(GeoArgs),

    /// Load bureau table values.
    Census(CensusArgs),

    /// Inspect the authored catalog.
    Catalog(CatalogArgs),

    /// List the domain / subdomain / topic hierarchy.
    Taxonomy,

    /// Run SQL against the DuckDB warehouse.
    ///
    /// Read-only unless --write is given.
    Sql(SqlArgs),
}

#[derive(Debug, Args)]
pub struct DataArgs {
    /// Indicator slug.
    pub indicator: String,

    /// Geography kind (tract, blockGroup, county, neighborhood, ...).
    #[arg(long, value_parser = parse_geog_kind)]
    pub geog_type: GeogKind,

    /// Common geoid of the geography.
    #[arg(long)]
    pub geog_id: String,

    /// Return every in-extent geography of the same kind when mappable.
    #[arg(long, default_value_t = false)]
    pub across: bool,
}

#[derive(Debug, Args)]
pub struct MapArgs {
    #[command(subcommand)]
    pub command: MapCommand,
}

#[derive(Debug, Subcommand)]
pub enum MapCommand {
    /// Materialize the layer of a mappable indicator.
    Build {
        indicator: String,
        #[arg(long, value_parser = parse_geog_kind)]
        geog_type: GeogKind,
    },
    /// Export a layer as a GeoJSON FeatureCollection.
    Geojson { slug: String },
    /// List materialized layers.
    List,
    /// Drop one layer.
    Drop { slug: String },
    /// Drop every layer.
    Clear,
}

#[derive(Debug, Args)]
pub struct CacheArgs {
    #[command(subcommand)]
    pub command: CacheCommand,
}

#[derive(Debug, Clone, Copy, Subcommand)]
pub enum CacheCommand {
    /// Remove every cached value.
    Clear,
    /// Remove expired cached values.
    Prune,
}

#[derive(Debug, Args)]
pub struct GeoArgs {
    #[command(subcommand)]
    pub command: GeoCommand,
}

#[derive(Debug, Subcommand)]
pub enum GeoCommand {
    /// Import geographies from a JSON array.
    Import { file: PathBuf },
    /// Mark counties (and their subregions) as the extent.
    SetExtent {
        /// County geoids; defaults to PROFILES_EXTENT_COUNTIES.
        #[arg(long = "county")]
        counties: Vec<String>,
    },
    /// Save `parent,child|child|...` subregion lines.
    SaveSubregions {
        file: PathBuf,
        #[arg(long, value_parser = parse_geog_kind, default_value = "neighborhood")]
        kind: GeogKind,
        #[arg(long, value_parser = parse_geog_kind, default_value = "blockGroup")]
        child_kind: GeogKind,
    },
}

#[derive(Debug, Args)]
pub struct CensusArgs {
    #[command(subcommand)]
    pub command: CensusCommand,
}

#[derive(Debug, Subcommand)]
pub enum CensusCommand {
    /// Load `geoid,dataset,year,table_id,value` lines.
    Load { file: PathBuf },
}

#[derive(Debug, Args)]
pub struct CatalogArgs {
    #[command(subcommand)]
    pub command: CatalogCommand,
}

#[derive(Debug, Clone, Copy, Subcommand)]
pub enum CatalogCommand {
    /// Check references, denominator cycles, and time coverage.
    Validate,
}

#[derive(Debug, Args)]
pub struct SqlArgs {
    /// SQL query to execute.
    pub query: String,

    /// Maximum rows to return.
    #[arg(long, default_value_t = 10_000)]
    pub max_rows: usize,

    /// Query timeout in milliseconds.
    #[arg(long, default_value_t = 5_000)]
    pub query_timeout_ms: u64,

    /// Allow write statements.
    #[arg(long, default_value_t = false)]
    pub write: bool,
}

fn parse_geog_kind(value: &str) -> Result<GeogKind, String> {
    value.parse().map_err(|error: profiles_core::ValidationError| error.to_string())
}
