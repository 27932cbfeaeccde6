use ::duckdb::ToSql;
use serde::{Deserialize, Serialize};

use crate::{placeholders, Warehouse, WarehouseError};

/// A single bureau table value for one geography.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CensusValueRecord {
    pub geoid: String,
    pub dataset: String,
    pub year: i32,
    pub table_id: String,
    pub value: Option<f64>,
    #[serde(default)]
    pub raw_value: Option<String>,
}

impl Warehouse {
    /// Insert or replace bureau values.
    pub fn upsert_census_values(&self, rows: &[CensusValueRecord]) -> Result<usize, WarehouseError> {
        if rows.is_empty() {
            return Ok(0);
        }

        self.with_transaction(|connection| {
            let mut written = 0;
            for row in rows {
                let params: [&dyn ToSql; 6] = [
                    &row.geoid,
                    &row.dataset,
                    &row.year,
                    &row.table_id,
                    &row.value,
                    &row.raw_value,
                ];
                written += connection.execute(
                    "INSERT OR REPLACE INTO census_values \
                     (geoid, dataset, year, table_id, value, raw_value) \
                     VALUES (?, ?, ?, ?, ?, ?)",
                    params.as_slice(),
                )?;
            }
            Ok(written)
        })
    }

    /// Values of `table_ids` for `geoids` in one `(dataset, year)`.
    ///
    /// Missing combinations are simply absent from the result.
    pub fn census_values(
        &self,
        dataset: &str,
        year: i32,
        table_ids: &[String],
        geoids: &[String],
    ) -> Result<Vec<CensusValueRecord>, WarehouseError> {
        if table_ids.is_empty() || geoids.is_empty() {
            return Ok(Vec::new());
        }

        let sql = format!(
            "SELECT geoid, dataset, year, table_id, value, raw_value FROM census_values \
             WHERE dataset = ? AND year = ? AND table_id IN ({}) AND geoid IN ({}) \
             ORDER BY geoid, table_id",
            placeholders(table_ids.len()),
            placeholders(geoids.len()),
        );
        let mut params: Vec<&dyn ToSql> = Vec::with_capacity(table_ids.len() + geoids.len() + 2);
        params.push(&dataset);
        params.push(&year);
        params.extend(table_ids.iter().map(|id| id as &dyn ToSql));
        params.extend(geoids.iter().map(|id| id as &dyn ToSql));

        let connection = self.read_connection()?;
        let mut statement = connection.prepare(sql.as_str())?;
        let rows = statement.query_map(params.as_slice(), |row| {
            Ok(CensusValueRecord {
                geoid: row.get(0)?,
                dataset: row.get(1)?,
                year: row.get(2)?,
                table_id: row.get(3)?,
                value: row.get(4)?,
                raw_value: row.get(5)?,
            })
        })?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }
}
