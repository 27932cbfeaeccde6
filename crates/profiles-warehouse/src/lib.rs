//! # Profiles Warehouse
//!
//! DuckDB-backed persistence for the indicator engine.
//!
//! ## Tables
//!
//! | Table | Description |
//! |-------|-------------|
//! | `geographies` | Admin regions with their subregion maps and boundaries |
//! | `census_values` | Bureau table values keyed by `(geoid, dataset, year, table_id)` |
//! | `cached_indicator_data` | Long-term value cache keyed by `(variable, geog, time_part_hash)` |
//! | `indicator_layers` | Materialized map layers keyed by `(geog_type, variable, time_axis)` |
//! | `maps.t_<slug>` | Narrow `(geoid, value)` table for one layer |
//!
//! ## Views
//!
//! | View | Description |
//! |------|-------------|
//! | `v_cache_live` | Cache rows that have not expired |
//! | `v_layer_catalog` | Layer registry with value table and view names |
//! | `maps.v_<slug>` | Layer values joined to geography boundaries |
//!
//! Values supplied by callers travel as statement parameters. Identifiers that
//! must be interpolated (layer slugs) are validated first.

pub mod duckdb;
pub mod migrations;
pub mod views;

mod cache_store;
mod census;
mod geography;
mod layers;

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use ::duckdb::types::Value as DuckValue;
use ::duckdb::Connection;
use ::duckdb::ToSql;
use serde::Serialize;
use serde_json::{Number, Value};
use thiserror::Error;

pub use cache_store::CachedValueRecord;
pub use census::CensusValueRecord;
pub use duckdb::{AccessMode, ConnectionPool, PooledConnection};
pub use geography::GeographyRecord;
pub use layers::{LayerFeature, LayerRecord, LayerValue};

/// Errors raised by warehouse operations.
#[derive(Debug, Error)]
pub enum WarehouseError {
    #[error(transparent)]
    DuckDb(#[from] ::duckdb::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    #[error("query rejected: {0}")]
    QueryRejected(String),

    #[error("query timed out after {timeout_ms}ms")]
    QueryTimeout { timeout_ms: u64 },

    #[error("{entity} '{key}' not found")]
    NotFound { entity: &'static str, key: String },
}

/// Location and pool sizing of the warehouse database.
#[derive(Debug, Clone)]
pub struct WarehouseConfig {
    /// Root directory for profiles data.
    pub profiles_home: PathBuf,
    /// Path to the `DuckDB` database file.
    pub db_path: PathBuf,
    /// Idle connections kept per access mode.
    pub max_pool_size: usize,
}

impl WarehouseConfig {
    /// Configuration rooted at `profiles_home` with the default file name.
    pub fn in_dir(profiles_home: impl Into<PathBuf>) -> Self {
        let profiles_home = profiles_home.into();
        let db_path = profiles_home.join("warehouse.duckdb");
        Self {
            profiles_home,
            db_path,
            max_pool_size: 4,
        }
    }
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        let mut config = Self::in_dir(resolve_profiles_home());
        if let Some(path) = env::var_os("PROFILES_DB_PATH").filter(|path| !path.is_empty()) {
            config.db_path = PathBuf::from(path);
        }
        config
    }
}

/// Limits applied to ad-hoc queries.
#[derive(Debug, Clone, Copy)]
pub struct QueryGuardrails {
    pub max_rows: usize,
    pub query_timeout_ms: u64,
}

impl Default for QueryGuardrails {
    fn default() -> Self {
        Self {
            max_rows: 10_000,
            query_timeout_ms: 5_000,
        }
    }
}

impl QueryGuardrails {
    fn timeout(self) -> Duration {
        Duration::from_millis(self.query_timeout_ms.max(1))
    }

    fn validate(self) -> Result<(), WarehouseError> {
        if self.max_rows == 0 {
            return Err(WarehouseError::QueryRejected(String::from(
                "max_rows must be greater than zero",
            )));
        }
        if self.query_timeout_ms == 0 {
            return Err(WarehouseError::QueryRejected(String::from(
                "query_timeout_ms must be greater than zero",
            )));
        }
        Ok(())
    }
}

/// Column metadata of a query result.
#[derive(Debug, Clone, Serialize)]
pub struct SqlColumn {
    pub name: String,
    #[serde(rename = "type")]
    pub r#type: String,
}

/// Rows returned by [`Warehouse::execute_query`].
#[derive(Debug, Clone, Serialize)]
pub struct QueryResult {
    pub columns: Vec<SqlColumn>,
    pub rows: Vec<Vec<Value>>,
    pub row_count: usize,
    pub truncated: bool,
}

impl QueryResult {
    /// Rows as JSON objects keyed by column name.
    pub fn records(&self) -> Vec<serde_json::Map<String, Value>> {
        self.rows
            .iter()
            .map(|row| {
                self.columns
                    .iter()
                    .zip(row.iter())
                    .map(|(column, value)| (column.name.clone(), value.clone()))
                    .collect()
            })
            .collect()
    }
}

/// Handle to the profiles warehouse.
#[derive(Clone)]
pub struct Warehouse {
    config: WarehouseConfig,
    pool: ConnectionPool,
}

impl Warehouse {
    pub fn open_default() -> Result<Self, WarehouseError> {
        Self::open(WarehouseConfig::default())
    }

    /// Open (creating if needed) the database and apply migrations and views.
    pub fn open(config: WarehouseConfig) -> Result<Self, WarehouseError> {
        if let Some(parent) = config.db_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let pool = ConnectionPool::new(config.db_path.clone(), config.max_pool_size);
        let warehouse = Self { config, pool };
        warehouse.initialize()?;
        Ok(warehouse)
    }

    pub fn initialize(&self) -> Result<(), WarehouseError> {
        let connection = self.pool.acquire(AccessMode::ReadWrite)?;
        migrations::apply_migrations(&connection)?;
        views::create_views(&connection)?;
        Ok(())
    }

    pub fn db_path(&self) -> &Path {
        self.pool.db_path()
    }

    pub fn profiles_home(&self) -> &Path {
        self.config.profiles_home.as_path()
    }

    /// Run an ad-hoc statement under `guardrails`.
    ///
    /// Only a single `SELECT`-like statement is accepted unless `allow_write`
    /// is set.
    pub fn execute_query(
        &self,
        sql: &str,
        guardrails: QueryGuardrails,
        allow_write: bool,
    ) -> Result<QueryResult, WarehouseError> {
        guardrails.validate()?;
        let sql = normalize_sql(sql)?;

        if !allow_write {
            enforce_read_only_query(sql)?;
        }

        let mode = if allow_write {
            AccessMode::ReadWrite
        } else {
            AccessMode::ReadOnly
        };
        let connection = self.pool.acquire(mode)?;
        let started = Instant::now();
        if is_select_like(sql) {
            select_with_guardrails(&connection, sql, guardrails, started)
        } else {
            connection.execute_batch(sql)?;
            ensure_timeout(started, guardrails.timeout())?;
            Ok(QueryResult {
                columns: Vec::new(),
                rows: Vec::new(),
                row_count: 0,
                truncated: false,
            })
        }
    }

    pub(crate) fn read_connection(&self) -> Result<PooledConnection, WarehouseError> {
        Ok(self.pool.acquire(AccessMode::ReadOnly)?)
    }

    /// Run `work` inside a transaction on a write connection, committing on
    /// success and rolling back on error.
    pub(crate) fn with_transaction<T>(
        &self,
        work: impl FnOnce(&Connection) -> Result<T, WarehouseError>,
    ) -> Result<T, WarehouseError> {
        let connection = self.pool.acquire(AccessMode::ReadWrite)?;
        connection.execute_batch("BEGIN TRANSACTION")?;
        let result = work(&connection);
        finalize_transaction(&connection, result)
    }
}

fn finalize_transaction<T>(
    connection: &Connection,
    result: Result<T, WarehouseError>,
) -> Result<T, WarehouseError> {
    match result {
        Ok(value) => {
            connection.execute_batch("COMMIT")?;
            Ok(value)
        }
        Err(error) => {
            let _ = connection.execute_batch("ROLLBACK");
            Err(error)
        }
    }
}

fn select_with_guardrails(
    connection: &Connection,
    sql: &str,
    guardrails: QueryGuardrails,
    started: Instant,
) -> Result<QueryResult, WarehouseError> {
    let mut statement = connection.prepare(sql)?;
    // Column metadata is only populated once the statement has run.
    let _ = statement.query([] as [&dyn ToSql; 0])?;
    let width = statement.column_count();
    let columns = (0..width)
        .map(|index| SqlColumn {
            name: statement
                .column_name(index)
                .map(|name| name.to_string())
                .unwrap_or_else(|_| format!("column_{index}")),
            r#type: statement.column_type(index).to_string(),
        })
        .collect();

    let mut cursor = statement.query([] as [&dyn ToSql; 0])?;
    let mut rows = Vec::new();
    let mut truncated = false;
    while let Some(row) = cursor.next()? {
        ensure_timeout(started, guardrails.timeout())?;
        if rows.len() >= guardrails.max_rows {
            truncated = true;
            break;
        }
        rows.push(read_row(row, width)?);
    }
    ensure_timeout(started, guardrails.timeout())?;

    Ok(QueryResult {
        columns,
        row_count: rows.len(),
        rows,
        truncated,
    })
}

fn read_row(row: &::duckdb::Row<'_>, width: usize) -> Result<Vec<Value>, ::duckdb::Error> {
    (0..width)
        .map(|index| row.get::<_, DuckValue>(index).map(to_json_value))
        .collect()
}

fn to_json_value(value: DuckValue) -> Value {
    match value {
        DuckValue::Null => Value::Null,
        DuckValue::Boolean(value) => Value::Bool(value),
        DuckValue::TinyInt(value) => Value::Number(Number::from(value)),
        DuckValue::SmallInt(value) => Value::Number(Number::from(value)),
        DuckValue::Int(value) => Value::Number(Number::from(value)),
        DuckValue::BigInt(value) => Value::Number(Number::from(value)),
        DuckValue::HugeInt(value) => i64::try_from(value)
            .map(|value| Value::Number(Number::from(value)))
            .unwrap_or_else(|_| number_from_f64(value as f64)),
        DuckValue::UTinyInt(value) => Value::Number(Number::from(value)),
        DuckValue::USmallInt(value) => Value::Number(Number::from(value)),
        DuckValue::UInt(value) => Value::Number(Number::from(value)),
        DuckValue::UBigInt(value) => Value::Number(Number::from(value)),
        DuckValue::Float(value) => number_from_f64(f64::from(value)),
        DuckValue::Double(value) => number_from_f64(value),
        DuckValue::Text(value) => Value::String(value),
        DuckValue::Blob(value) => Value::String(hex::encode(value)),
        other => Value::String(format!("{other:?}")),
    }
}

/// NaN and infinities become `null`.
fn number_from_f64(value: f64) -> Value {
    Number::from_f64(value)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

fn normalize_sql(sql: &str) -> Result<&str, WarehouseError> {
    let normalized = sql.trim().trim_end_matches(';').trim();
    if normalized.is_empty() {
        return Err(WarehouseError::QueryRejected(String::from(
            "query must not be empty",
        )));
    }
    Ok(normalized)
}

fn enforce_read_only_query(sql: &str) -> Result<(), WarehouseError> {
    if !is_select_like(sql) {
        return Err(WarehouseError::QueryRejected(String::from(
            "read-only mode accepts only SELECT/CTE queries; use --write for write statements",
        )));
    }
    if sql.split(';').filter(|part| !part.trim().is_empty()).count() > 1 {
        return Err(WarehouseError::QueryRejected(String::from(
            "multiple SQL statements are not allowed in read-only mode",
        )));
    }
    Ok(())
}

fn is_select_like(sql: &str) -> bool {
    let keyword = sql
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .to_ascii_uppercase();
    matches!(
        keyword.as_str(),
        "SELECT" | "WITH" | "EXPLAIN" | "SHOW" | "DESCRIBE"
    )
}

fn ensure_timeout(started: Instant, timeout: Duration) -> Result<(), WarehouseError> {
    if started.elapsed() > timeout {
        return Err(WarehouseError::QueryTimeout {
            timeout_ms: timeout.as_millis().min(u128::from(u64::MAX)) as u64,
        });
    }
    Ok(())
}

fn resolve_profiles_home() -> PathBuf {
    if let Some(path) = env::var_os("PROFILES_HOME").filter(|path| !path.is_empty()) {
        return PathBuf::from(path);
    }
    match env::var_os("HOME") {
        Some(home) => PathBuf::from(home).join(".profiles"),
        None => PathBuf::from(".profiles"),
    }
}

/// `?, ?, ?` for `count` parameters.
pub(crate) fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

/// Layer slugs and other interpolated identifiers: lowercase ASCII, digits, `_`.
pub(crate) fn ensure_identifier(value: &str) -> Result<(), WarehouseError> {
    let valid = !value.is_empty()
        && value.len() <= 63
        && value
            .chars()
            .all(|ch| ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch == '_');
    if valid {
        Ok(())
    } else {
        Err(WarehouseError::QueryRejected(format!(
            "'{value}' is not a valid identifier"
        )))
    }
}

pub(crate) fn escape_sql_string(value: &str) -> String {
    value.replace('\'', "''")
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::open_temp;

    #[test]
    fn initializes_tables_and_views() {
        let (_temp, warehouse) = open_temp();

        let tables = warehouse
            .execute_query(
                "SELECT table_name FROM information_schema.tables ORDER BY table_name",
                QueryGuardrails::default(),
                false,
            )
            .expect("list tables");
        let names: Vec<String> = tables
            .rows
            .iter()
            .filter_map(|row| row[0].as_str().map(str::to_owned))
            .collect();

        for expected in [
            "cached_indicator_data",
            "census_values",
            "geographies",
            "indicator_layers",
            "v_cache_live",
            "v_layer_catalog",
        ] {
            assert!(names.iter().any(|name| name == expected), "missing {expected}");
        }
    }

    #[test]
    fn reopening_does_not_reapply_migrations() {
        let temp = tempfile::tempdir().expect("tempdir");
        let config = WarehouseConfig::in_dir(temp.path());
        drop(Warehouse::open(config.clone()).expect("first open"));
        let warehouse = Warehouse::open(config).expect("second open");

        let applied = warehouse
            .execute_query(
                "SELECT COUNT(*) AS applied FROM schema_migrations",
                QueryGuardrails::default(),
                false,
            )
            .expect("count");
        assert_eq!(applied.rows[0][0], Value::from(4));
    }

    #[test]
    fn read_only_mode_rejects_write_query() {
        let (_temp, warehouse) = open_temp();

        let error = warehouse
            .execute_query(
                "DELETE FROM cached_indicator_data",
                QueryGuardrails::default(),
                false,
            )
            .expect_err("write must be rejected");
        assert!(matches!(error, WarehouseError::QueryRejected(_)));
    }

    #[test]
    fn select_results_are_truncated_at_max_rows() {
        let (_temp, warehouse) = open_temp();

        let result = warehouse
            .execute_query(
                "SELECT * FROM range(10)",
                QueryGuardrails {
                    max_rows: 3,
                    query_timeout_ms: 5_000,
                },
                false,
            )
            .expect("select");
        assert_eq!(result.row_count, 3);
        assert!(result.truncated);
        assert_eq!(result.records().len(), 3);
    }

    #[test]
    fn identifiers_reject_sql_metacharacters() {
        assert!(ensure_identifier("dl_0f3a").is_ok());
        assert!(ensure_identifier("dl_x; DROP TABLE geographies").is_err());
        assert!(ensure_identifier("").is_err());
    }
}
