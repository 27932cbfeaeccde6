//! Static reporting views and the per-layer map views under the `maps` schema.

use ::duckdb::Connection;

use crate::escape_sql_string;

/// Create the reporting views:
/// - `v_cache_live`: cache rows that have not expired
/// - `v_layer_catalog`: materialized map layers with their value tables and map views
pub fn create_views(connection: &Connection) -> Result<(), ::duckdb::Error> {
    connection.execute_batch(
        r"
CREATE OR REPLACE VIEW v_cache_live AS
SELECT
    variable,
    geog,
    time_part_hash,
    value,
    moe,
    denom,
    expiration
FROM cached_indicator_data
WHERE expiration IS NULL OR expiration > CURRENT_TIMESTAMP;

CREATE OR REPLACE VIEW v_layer_catalog AS
SELECT
    slug,
    geog_type,
    variable,
    time_axis,
    name,
    use_percent,
    'maps.t_' || slug AS value_table,
    'maps.v_' || slug AS map_view,
    breaks,
    created_at
FROM indicator_layers;
",
    )?;

    Ok(())
}

/// Qualified name of the narrow value table backing a layer.
pub fn layer_table_name(slug: &str) -> String {
    format!("maps.t_{slug}")
}

/// Qualified name of the boundary-joined view for a layer.
pub fn layer_view_name(slug: &str) -> String {
    format!("maps.v_{slug}")
}

/// `CREATE TABLE` statement for a layer's value table.
pub(crate) fn create_layer_table_sql(slug: &str) -> String {
    format!(
        "CREATE TABLE {table} (geoid VARCHAR(63) NOT NULL, value DOUBLE)",
        table = layer_table_name(slug)
    )
}

/// `CREATE VIEW` statement joining a layer's values against the geography
/// boundaries of `geog_type`.
///
/// `slug` must already be validated as an identifier.
pub(crate) fn create_layer_view_sql(
    slug: &str,
    geog_type: &str,
    number_format_options: &str,
) -> String {
    format!(
        r"CREATE VIEW {view} AS
SELECT
    g.name AS geo_name,
    g.geometry AS the_geom,
    g.title AS title,
    t.geoid AS geoid,
    CAST(t.value AS DOUBLE) AS value,
    '{format}' AS number_format_options
FROM {table} t
JOIN geographies g ON g.common_geoid = t.geoid AND g.kind = '{kind}'",
        view = layer_view_name(slug),
        table = layer_table_name(slug),
        format = escape_sql_string(number_format_options),
        kind = escape_sql_string(geog_type),
    )
}

pub(crate) fn drop_layer_objects_sql(slug: &str) -> String {
    format!(
        "DROP VIEW IF EXISTS {view}; DROP TABLE IF EXISTS {table};",
        view = layer_view_name(slug),
        table = layer_table_name(slug)
    )
}
