//! Map-layer registry and per-layer value tables.

use ::duckdb::{Connection, ToSql};
use serde::{Deserialize, Serialize};

use crate::views::{create_layer_table_sql, create_layer_view_sql, drop_layer_objects_sql};
use crate::{ensure_identifier, Warehouse, WarehouseError};

/// Registry row for a materialized layer. `number_format_options` and
/// `breaks` are JSON text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerRecord {
    pub slug: String,
    pub geog_type: String,
    pub variable: String,
    pub time_axis: String,
    pub name: String,
    pub label: String,
    pub use_percent: bool,
    pub number_format_options: String,
    pub breaks: String,
    #[serde(default)]
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LayerValue {
    pub geoid: String,
    pub value: Option<f64>,
}

/// One row of a layer view, ready for GeoJSON assembly.
#[derive(Debug, Clone, PartialEq)]
pub struct LayerFeature {
    pub geoid: String,
    pub geo_name: String,
    pub title: String,
    pub geometry: Option<String>,
    pub value: Option<f64>,
}

const LAYER_COLUMNS: &str = "slug, geog_type, variable, time_axis, name, label, use_percent, \
     number_format_options, breaks, CAST(created_at AS VARCHAR)";

impl Warehouse {
    pub fn find_layer(
        &self,
        geog_type: &str,
        variable: &str,
        time_axis: &str,
    ) -> Result<Option<LayerRecord>, WarehouseError> {
        let sql = format!(
            "SELECT {LAYER_COLUMNS} FROM indicator_layers \
             WHERE geog_type = ? AND variable = ? AND time_axis = ?"
        );
        self.query_layers(sql.as_str(), &[&geog_type, &variable, &time_axis])
            .map(|mut layers| layers.pop())
    }

    pub fn layer(&self, slug: &str) -> Result<Option<LayerRecord>, WarehouseError> {
        let sql = format!("SELECT {LAYER_COLUMNS} FROM indicator_layers WHERE slug = ?");
        self.query_layers(sql.as_str(), &[&slug])
            .map(|mut layers| layers.pop())
    }

    pub fn list_layers(&self) -> Result<Vec<LayerRecord>, WarehouseError> {
        let sql = format!("SELECT {LAYER_COLUMNS} FROM indicator_layers ORDER BY created_at, slug");
        self.query_layers(sql.as_str(), &[])
    }

    /// Persist a layer: value table, boundary view, and registry row.
    ///
    /// Runs in one transaction, so readers see either the previous state or
    /// the complete new layer.
    pub fn store_layer(
        &self,
        record: &LayerRecord,
        values: &[LayerValue],
    ) -> Result<(), WarehouseError> {
        ensure_identifier(record.slug.as_str())?;

        self.with_transaction(|connection| {
            connection.execute_batch(drop_layer_objects_sql(&record.slug).as_str())?;
            connection.execute_batch(create_layer_table_sql(&record.slug).as_str())?;

            let insert = format!(
                "INSERT INTO {} (geoid, value) VALUES (?, ?)",
                crate::views::layer_table_name(&record.slug)
            );
            for value in values {
                let params: [&dyn ToSql; 2] = [&value.geoid, &value.value];
                connection.execute(insert.as_str(), params.as_slice())?;
            }

            connection.execute_batch(
                create_layer_view_sql(
                    &record.slug,
                    &record.geog_type,
                    &record.number_format_options,
                )
                .as_str(),
            )?;

            let params: [&dyn ToSql; 9] = [
                &record.slug,
                &record.geog_type,
                &record.variable,
                &record.time_axis,
                &record.name,
                &record.label,
                &record.use_percent,
                &record.number_format_options,
                &record.breaks,
            ];
            connection.execute(
                "INSERT INTO indicator_layers \
                 (slug, geog_type, variable, time_axis, name, label, use_percent, \
                  number_format_options, breaks) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
                params.as_slice(),
            )?;
            Ok(())
        })
    }

    /// Rows of `maps.v_<slug>` ordered by geoid.
    pub fn layer_features(&self, slug: &str) -> Result<Vec<LayerFeature>, WarehouseError> {
        ensure_identifier(slug)?;
        let sql = format!(
            "SELECT geoid, geo_name, title, the_geom, value FROM {} ORDER BY geoid",
            crate::views::layer_view_name(slug)
        );

        let connection = self.read_connection()?;
        let mut statement = connection.prepare(sql.as_str())?;
        let rows = statement.query_map([], |row| {
            Ok(LayerFeature {
                geoid: row.get(0)?,
                geo_name: row.get(1)?,
                title: row.get(2)?,
                geometry: row.get(3)?,
                value: row.get(4)?,
            })
        })?;

        let mut features = Vec::new();
        for row in rows {
            features.push(row?);
        }
        Ok(features)
    }

    /// Remove a layer and its table and view. Returns whether it existed.
    pub fn drop_layer(&self, slug: &str) -> Result<bool, WarehouseError> {
        ensure_identifier(slug)?;
        self.with_transaction(|connection| drop_layer_in(connection, slug))
    }

    /// Remove every layer. Returns how many were dropped.
    pub fn clear_layers(&self) -> Result<usize, WarehouseError> {
        let slugs: Vec<String> = self
            .list_layers()?
            .into_iter()
            .map(|layer| layer.slug)
            .collect();
        self.with_transaction(|connection| {
            let mut dropped = 0;
            for slug in &slugs {
                ensure_identifier(slug)?;
                if drop_layer_in(connection, slug)? {
                    dropped += 1;
                }
            }
            Ok(dropped)
        })
    }

    fn query_layers(
        &self,
        sql: &str,
        params: &[&dyn ToSql],
    ) -> Result<Vec<LayerRecord>, WarehouseError> {
        let connection = self.read_connection()?;
        let mut statement = connection.prepare(sql)?;
        let rows = statement.query_map(params, |row| {
            Ok(LayerRecord {
                slug: row.get(0)?,
                geog_type: row.get(1)?,
                variable: row.get(2)?,
                time_axis: row.get(3)?,
                name: row.get(4)?,
                label: row.get(5)?,
                use_percent: row.get(6)?,
                number_format_options: row.get(7)?,
                breaks: row.get(8)?,
                created_at: row.get(9)?,
            })
        })?;

        let mut layers = Vec::new();
        for row in rows {
            layers.push(row?);
        }
        Ok(layers)
    }
}

fn drop_layer_in(connection: &Connection, slug: &str) -> Result<bool, WarehouseError> {
    connection.execute_batch(drop_layer_objects_sql(slug).as_str())?;
    let removed = connection.execute("DELETE FROM indicator_layers WHERE slug = ?", [slug])?;
    Ok(removed > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::open_temp;
    use crate::GeographyRecord;

    fn layer(slug: &str) -> LayerRecord {
        LayerRecord {
            slug: slug.to_owned(),
            geog_type: String::from("tract"),
            variable: String::from("total-pop"),
            time_axis: String::from("acs-2019"),
            name: String::from("Total Population across Tracts"),
            label: String::from("Total Population"),
            use_percent: false,
            number_format_options: String::from("{}"),
            breaks: String::from("[10.0,20.0]"),
            created_at: None,
        }
    }

    #[test]
    fn stored_layer_is_queryable_through_its_view() {
        let (_temp, warehouse) = open_temp();
        warehouse
            .upsert_geographies(&[GeographyRecord {
                global_geoid: String::from("1400000US42003020100"),
                kind: String::from("tract"),
                common_geoid: String::from("42003020100"),
                slug: String::from("tract-42003020100"),
                name: String::from("42003020100"),
                title: String::from("Tract 42003020100"),
                in_extent: true,
                subregions: String::from("{}"),
                geometry: Some(String::from(r#"{"type":"Point","coordinates":[0,0]}"#)),
                centroid_x: None,
                centroid_y: None,
                base_zoom: None,
            }])
            .expect("geography");

        warehouse
            .store_layer(
                &layer("dl_first"),
                &[LayerValue {
                    geoid: String::from("42003020100"),
                    value: Some(12.5),
                }],
            )
            .expect("store");

        let found = warehouse
            .find_layer("tract", "total-pop", "acs-2019")
            .expect("find")
            .expect("layer exists");
        assert_eq!(found.slug, "dl_first");
        assert!(found.created_at.is_some());

        let features = warehouse.layer_features("dl_first").expect("features");
        assert_eq!(features.len(), 1);
        assert_eq!(features[0].title, "Tract 42003020100");
        assert_eq!(features[0].value, Some(12.5));
    }

    #[test]
    fn dropping_a_layer_removes_registry_row_and_objects() {
        let (_temp, warehouse) = open_temp();
        warehouse.store_layer(&layer("dl_gone"), &[]).expect("store");

        assert!(warehouse.drop_layer("dl_gone").expect("drop"));
        assert!(!warehouse.drop_layer("dl_gone").expect("second drop"));
        assert!(warehouse.layer("dl_gone").expect("lookup").is_none());
        assert!(warehouse.layer_features("dl_gone").is_err());
    }

    #[test]
    fn unsafe_slugs_are_rejected_before_any_sql_runs() {
        let (_temp, warehouse) = open_temp();
        let error = warehouse
            .store_layer(&layer("dl_x; DROP TABLE geographies"), &[])
            .expect_err("rejected");
        assert!(matches!(error, WarehouseError::QueryRejected(_)));
    }
}
