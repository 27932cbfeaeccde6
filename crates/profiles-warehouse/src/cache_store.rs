//! Persistent tier of the indicator value cache.

use ::duckdb::ToSql;
use serde::{Deserialize, Serialize};

use crate::{placeholders, Warehouse, WarehouseError};

/// One `(variable, geog, time_part_hash)` cache row.
///
/// `expiration` is a `YYYY-MM-DD HH:MM:SS` UTC timestamp; `None` never expires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedValueRecord {
    pub variable: String,
    pub geog: String,
    pub time_part_hash: String,
    pub value: Option<f64>,
    pub moe: Option<f64>,
    pub denom: Option<f64>,
    pub expiration: Option<String>,
}

impl Warehouse {
    /// Live cache rows for `variable` at one time-part across `geogs`.
    pub fn cached_values(
        &self,
        variable: &str,
        time_part_hash: &str,
        geogs: &[String],
        now: &str,
    ) -> Result<Vec<CachedValueRecord>, WarehouseError> {
        if geogs.is_empty() {
            return Ok(Vec::new());
        }

        let sql = format!(
            "SELECT variable, geog, time_part_hash, value, moe, denom, \
             CAST(expiration AS VARCHAR) \
             FROM cached_indicator_data \
             WHERE variable = ? AND time_part_hash = ? AND geog IN ({}) \
             AND (expiration IS NULL OR expiration > CAST(? AS TIMESTAMP))",
            placeholders(geogs.len())
        );

        let mut params: Vec<&dyn ToSql> = Vec::with_capacity(geogs.len() + 3);
        params.push(&variable);
        params.push(&time_part_hash);
        for geog in geogs {
            params.push(geog);
        }
        params.push(&now);

        let connection = self.read_connection()?;
        let mut statement = connection.prepare(sql.as_str())?;
        let rows = statement.query_map(params.as_slice(), |row| {
            Ok(CachedValueRecord {
                variable: row.get(0)?,
                geog: row.get(1)?,
                time_part_hash: row.get(2)?,
                value: row.get(3)?,
                moe: row.get(4)?,
                denom: row.get(5)?,
                expiration: row.get(6)?,
            })
        })?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }

    /// Bulk insert; rows whose key already exists are left untouched.
    ///
    /// Returns the number of rows written.
    pub fn insert_cached_values(
        &self,
        rows: &[CachedValueRecord],
    ) -> Result<usize, WarehouseError> {
        if rows.is_empty() {
            return Ok(0);
        }

        self.with_transaction(|connection| {
            let mut written = 0;
            for row in rows {
                let params: [&dyn ToSql; 7] = [
                    &row.variable,
                    &row.geog,
                    &row.time_part_hash,
                    &row.value,
                    &row.moe,
                    &row.denom,
                    &row.expiration,
                ];
                written += connection.execute(
                    "INSERT OR IGNORE INTO cached_indicator_data \
                     (variable, geog, time_part_hash, value, moe, denom, expiration) \
                     VALUES (?, ?, ?, ?, ?, ?, CAST(? AS TIMESTAMP))",
                    params.as_slice(),
                )?;
            }
            Ok(written)
        })
    }

    /// Bulk upsert used when refreshing: existing rows for the same key are
    /// overwritten.
    pub fn replace_cached_values(
        &self,
        rows: &[CachedValueRecord],
    ) -> Result<usize, WarehouseError> {
        if rows.is_empty() {
            return Ok(0);
        }

        self.with_transaction(|connection| {
            let mut written = 0;
            for row in rows {
                connection.execute(
                    "DELETE FROM cached_indicator_data \
                     WHERE variable = ? AND geog = ? AND time_part_hash = ?",
                    [&row.variable, &row.geog, &row.time_part_hash],
                )?;
                let params: [&dyn ToSql; 7] = [
                    &row.variable,
                    &row.geog,
                    &row.time_part_hash,
                    &row.value,
                    &row.moe,
                    &row.denom,
                    &row.expiration,
                ];
                written += connection.execute(
                    "INSERT INTO cached_indicator_data \
                     (variable, geog, time_part_hash, value, moe, denom, expiration) \
                     VALUES (?, ?, ?, ?, ?, ?, CAST(? AS TIMESTAMP))",
                    params.as_slice(),
                )?;
            }
            Ok(written)
        })
    }

    /// Truncate the cache.
    pub fn clear_cached_values(&self) -> Result<usize, WarehouseError> {
        self.with_transaction(|connection| {
            Ok(connection.execute("DELETE FROM cached_indicator_data", [])?)
        })
    }

    /// Drop rows whose expiration is at or before `now`.
    pub fn prune_cached_values(&self, now: &str) -> Result<usize, WarehouseError> {
        self.with_transaction(|connection| {
            Ok(connection.execute(
                "DELETE FROM cached_indicator_data \
                 WHERE expiration IS NOT NULL AND expiration <= CAST(? AS TIMESTAMP)",
                [now],
            )?)
        })
    }

    pub fn cached_value_count(&self) -> Result<usize, WarehouseError> {
        let connection = self.read_connection()?;
        let count: i64 =
            connection.query_row("SELECT COUNT(*) FROM cached_indicator_data", [], |row| {
                row.get(0)
            })?;
        Ok(usize::try_from(count).unwrap_or_default())
    }
}
