use ::duckdb::ToSql;
use serde::{Deserialize, Serialize};

use crate::{placeholders, Warehouse, WarehouseError};

/// Stored form of a geography. `subregions` and `geometry` are JSON text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeographyRecord {
    pub global_geoid: String,
    pub kind: String,
    pub common_geoid: String,
    pub slug: String,
    pub name: String,
    pub title: String,
    pub in_extent: bool,
    pub subregions: String,
    pub geometry: Option<String>,
    pub centroid_x: Option<f64>,
    pub centroid_y: Option<f64>,
    pub base_zoom: Option<i32>,
}

impl Warehouse {
    pub fn upsert_geographies(&self, rows: &[GeographyRecord]) -> Result<usize, WarehouseError> {
        if rows.is_empty() {
            return Ok(0);
        }

        self.with_transaction(|connection| {
            let mut written = 0;
            for row in rows {
                let params: [&dyn ToSql; 12] = [
                    &row.global_geoid,
                    &row.kind,
                    &row.common_geoid,
                    &row.slug,
                    &row.name,
                    &row.title,
                    &row.in_extent,
                    &row.subregions,
                    &row.geometry,
                    &row.centroid_x,
                    &row.centroid_y,
                    &row.base_zoom,
                ];
                written += connection.execute(
                    "INSERT OR REPLACE INTO geographies \
                     (global_geoid, kind, common_geoid, slug, name, title, in_extent, \
                      subregions, geometry, centroid_x, centroid_y, base_zoom) \
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                    params.as_slice(),
                )?;
            }
            Ok(written)
        })
    }

    pub fn geographies(&self) -> Result<Vec<GeographyRecord>, WarehouseError> {
        let connection = self.read_connection()?;
        let mut statement = connection.prepare(
            "SELECT global_geoid, kind, common_geoid, slug, name, title, in_extent, \
             subregions, geometry, centroid_x, centroid_y, base_zoom \
             FROM geographies ORDER BY kind, common_geoid",
        )?;
        let rows = statement.query_map([], |row| {
            Ok(GeographyRecord {
                global_geoid: row.get(0)?,
                kind: row.get(1)?,
                common_geoid: row.get(2)?,
                slug: row.get(3)?,
                name: row.get(4)?,
                title: row.get(5)?,
                in_extent: row.get(6)?,
                subregions: row.get(7)?,
                geometry: row.get(8)?,
                centroid_x: row.get(9)?,
                centroid_y: row.get(10)?,
                base_zoom: row.get(11)?,
            })
        })?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }

    /// Mark exactly `global_geoids` as inside the extent.
    pub fn set_extent(&self, global_geoids: &[String]) -> Result<usize, WarehouseError> {
        self.with_transaction(|connection| {
            connection.execute("UPDATE geographies SET in_extent = FALSE", [])?;
            if global_geoids.is_empty() {
                return Ok(0);
            }
            let sql = format!(
                "UPDATE geographies SET in_extent = TRUE WHERE global_geoid IN ({})",
                placeholders(global_geoids.len())
            );
            let params: Vec<&dyn ToSql> =
                global_geoids.iter().map(|id| id as &dyn ToSql).collect();
            Ok(connection.execute(sql.as_str(), params.as_slice())?)
        })
    }

    /// Replace the subregion map (JSON text) of one geography.
    pub fn set_subregions(&self, global_geoid: &str, subregions: &str) -> Result<(), WarehouseError> {
        let updated = self.with_transaction(|connection| {
            Ok(connection.execute(
                "UPDATE geographies SET subregions = ?, updated_at = CURRENT_TIMESTAMP \
                 WHERE global_geoid = ?",
                [subregions, global_geoid],
            )?)
        })?;
        if updated == 0 {
            return Err(WarehouseError::NotFound {
                entity: "geography",
                key: global_geoid.to_owned(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::open_temp;

    fn tract(geoid: &str) -> GeographyRecord {
        GeographyRecord {
            global_geoid: format!("1400000US{geoid}"),
            kind: String::from("tract"),
            common_geoid: geoid.to_owned(),
            slug: format!("tract-{geoid}"),
            name: geoid.to_owned(),
            title: format!("Tract {geoid}"),
            in_extent: false,
            subregions: String::from("{}"),
            geometry: None,
            centroid_x: Some(-79.99),
            centroid_y: Some(40.44),
            base_zoom: Some(12),
        }
    }

    #[test]
    fn extent_flags_are_replaced_not_accumulated() {
        let (_temp, warehouse) = open_temp();
        warehouse
            .upsert_geographies(&[tract("42003020100"), tract("42003020300")])
            .expect("load");

        warehouse
            .set_extent(&[String::from("1400000US42003020100")])
            .expect("first extent");
        warehouse
            .set_extent(&[String::from("1400000US42003020300")])
            .expect("second extent");

        let stored = warehouse.geographies().expect("read");
        let in_extent: Vec<&str> = stored
            .iter()
            .filter(|row| row.in_extent)
            .map(|row| row.common_geoid.as_str())
            .collect();
        assert_eq!(in_extent, vec!["42003020300"]);
    }

    #[test]
    fn subregions_update_requires_known_geography() {
        let (_temp, warehouse) = open_temp();
        let error = warehouse
            .set_subregions("0500000US42003", r#"{"tract":[]}"#)
            .expect_err("unknown geography");
        assert!(matches!(error, WarehouseError::NotFound { .. }));
    }
}
