//! Runtime configuration read from `PROFILES_*` environment variables.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use profiles_warehouse::WarehouseConfig;

use crate::adapters::DEFAULT_DATASTORE_ENDPOINT;
use crate::cache::CacheMode;
use crate::maps::DEFAULT_MAP_HOST;
use crate::ValidationError;

pub const DEFAULT_DATASTORE_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_EXTENT_COUNTIES: &[&str] = &["42003"];

#[derive(Debug, Clone)]
pub struct ProfilesConfig {
    pub warehouse: WarehouseConfig,
    pub catalog_path: PathBuf,
    pub datastore_url: String,
    pub datastore_timeout_ms: u64,
    pub datastore_token: Option<String>,
    /// GET after each new map layer; `None` skips the refresh.
    pub tile_index_url: Option<String>,
    pub map_host: String,
    /// `None` keeps cached values until an explicit clear.
    pub cache_ttl: Option<Duration>,
    pub cache_mode: CacheMode,
    pub extent_counties: Vec<String>,
    /// Answer open-data queries from local warehouse tables.
    pub offline: bool,
}

impl ProfilesConfig {
    pub fn from_env() -> Result<Self, ValidationError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ValidationError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let home = match get("PROFILES_HOME") {
            Some(path) => PathBuf::from(path),
            None => get("HOME")
                .map(|home| PathBuf::from(home).join(".profiles"))
                .unwrap_or_else(|| PathBuf::from(".profiles")),
        };
        let mut warehouse = WarehouseConfig::in_dir(home.clone());
        if let Some(path) = get("PROFILES_DB_PATH") {
            warehouse.db_path = PathBuf::from(path);
        }

        let datastore_timeout_ms = match get("PROFILES_DATASTORE_TIMEOUT_MS") {
            Some(value) => parse_positive("PROFILES_DATASTORE_TIMEOUT_MS", &value)?,
            None => DEFAULT_DATASTORE_TIMEOUT_MS,
        };
        let cache_ttl = get("PROFILES_CACHE_TTL_SECS")
            .map(|value| parse_positive("PROFILES_CACHE_TTL_SECS", &value))
            .transpose()?
            .map(Duration::from_secs);
        let extent_counties = match get("PROFILES_EXTENT_COUNTIES") {
            Some(value) => parse_list(&value),
            None => DEFAULT_EXTENT_COUNTIES
                .iter()
                .map(|county| (*county).to_owned())
                .collect(),
        };

        Ok(Self {
            warehouse,
            catalog_path: get("PROFILES_CATALOG")
                .map(PathBuf::from)
                .unwrap_or_else(|| home.join("catalog.json")),
            datastore_url: get("PROFILES_DATASTORE_URL")
                .unwrap_or_else(|| DEFAULT_DATASTORE_ENDPOINT.to_owned()),
            datastore_timeout_ms,
            datastore_token: get("PROFILES_DATASTORE_TOKEN"),
            tile_index_url: get("PROFILES_TILE_INDEX_URL"),
            map_host: get("PROFILES_MAP_HOST").unwrap_or_else(|| DEFAULT_MAP_HOST.to_owned()),
            cache_ttl,
            cache_mode: CacheMode::default(),
            extent_counties,
            offline: false,
        })
    }

    /// Configuration rooted at `home`, ignoring the environment.
    pub fn in_dir(home: impl Into<PathBuf>) -> Self {
        let home = home.into();
        Self {
            warehouse: WarehouseConfig::in_dir(home.clone()),
            catalog_path: home.join("catalog.json"),
            datastore_url: DEFAULT_DATASTORE_ENDPOINT.to_owned(),
            datastore_timeout_ms: DEFAULT_DATASTORE_TIMEOUT_MS,
            datastore_token: None,
            tile_index_url: None,
            map_host: DEFAULT_MAP_HOST.to_owned(),
            cache_ttl: None,
            cache_mode: CacheMode::default(),
            extent_counties: DEFAULT_EXTENT_COUNTIES
                .iter()
                .map(|county| (*county).to_owned())
                .collect(),
            offline: false,
        }
    }

    pub fn with_catalog_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.catalog_path = path.into();
        self
    }

    pub fn with_cache_mode(mut self, mode: CacheMode) -> Self {
        self.cache_mode = mode;
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.cache_ttl = ttl;
        self
    }

    pub fn with_offline(mut self, offline: bool) -> Self {
        self.offline = offline;
        self
    }

    pub fn with_tile_index_url(mut self, url: impl Into<String>) -> Self {
        self.tile_index_url = Some(url.into());
        self
    }
}

fn parse_positive(key: &'static str, value: &str) -> Result<u64, ValidationError> {
    value
        .trim()
        .parse::<u64>()
        .ok()
        .filter(|parsed| *parsed > 0)
        .ok_or_else(|| ValidationError::InvalidConfig {
            key,
            value: value.to_owned(),
        })
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_owned)
        .collect()
}
