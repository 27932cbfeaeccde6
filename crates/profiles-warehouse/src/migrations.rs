use ::duckdb::Connection;

use crate::escape_sql_string;

struct Migration {
    version: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: "0001_geography_and_census",
        sql: r#"
CREATE TABLE IF NOT EXISTS geographies (
    global_geoid VARCHAR PRIMARY KEY,
    kind VARCHAR NOT NULL,
    common_geoid VARCHAR NOT NULL,
    slug VARCHAR NOT NULL,
    name VARCHAR NOT NULL,
    title VARCHAR NOT NULL,
    in_extent BOOLEAN NOT NULL DEFAULT FALSE,
    subregions VARCHAR NOT NULL DEFAULT '{}',
    geometry VARCHAR,
    centroid_x DOUBLE,
    centroid_y DOUBLE,
    base_zoom INTEGER,
    updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
);

CREATE TABLE IF NOT EXISTS census_values (
    geoid VARCHAR NOT NULL,
    dataset VARCHAR NOT NULL,
    year INTEGER NOT NULL,
    table_id VARCHAR NOT NULL,
    value DOUBLE,
    raw_value VARCHAR,
    PRIMARY KEY (geoid, dataset, year, table_id)
);
"#,
    },
    Migration {
        version: "0002_indicator_cache",
        sql: r#"
CREATE TABLE IF NOT EXISTS cached_indicator_data (
    variable VARCHAR NOT NULL,
    geog VARCHAR NOT NULL,
    time_part_hash VARCHAR NOT NULL,
    value DOUBLE,
    moe DOUBLE,
    denom DOUBLE,
    expiration TIMESTAMP,
    UNIQUE (geog, variable, time_part_hash)
);
"#,
    },
    Migration {
        version: "0003_map_layers",
        sql: r#"
CREATE SCHEMA IF NOT EXISTS maps;

CREATE TABLE IF NOT EXISTS indicator_layers (
    slug VARCHAR PRIMARY KEY,
    geog_type VARCHAR NOT NULL,
    variable VARCHAR NOT NULL,
    time_axis VARCHAR NOT NULL,
    name VARCHAR NOT NULL,
    label VARCHAR NOT NULL,
    use_percent BOOLEAN NOT NULL DEFAULT FALSE,
    number_format_options VARCHAR NOT NULL DEFAULT '{}',
    breaks VARCHAR NOT NULL DEFAULT '[]',
    created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
    UNIQUE (geog_type, variable, time_axis)
);
"#,
    },
    Migration {
        version: "0004_indexes",
        sql: r#"
CREATE INDEX IF NOT EXISTS idx_geographies_kind ON geographies(kind, common_geoid);
CREATE INDEX IF NOT EXISTS idx_census_values_table ON census_values(dataset, year, table_id);
CREATE INDEX IF NOT EXISTS idx_cached_indicator_lookup ON cached_indicator_data(variable, time_part_hash, geog);
CREATE INDEX IF NOT EXISTS idx_cached_indicator_expiration ON cached_indicator_data(expiration);
"#,
    },
];

pub fn apply_migrations(connection: &Connection) -> Result<(), ::duckdb::Error> {
    connection.execute_batch(
        r#"
CREATE TABLE IF NOT EXISTS schema_migrations (
    version VARCHAR PRIMARY KEY,
    applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
);
"#,
    )?;

    for migration in MIGRATIONS {
        let applied: i64 = connection.query_row(
            "SELECT COUNT(*) FROM schema_migrations WHERE version = ?",
            [migration.version],
            |row| row.get(0),
        )?;
        if applied > 0 {
            continue;
        }

        connection.execute_batch(migration.sql)?;
        connection.execute_batch(
            format!(
                "INSERT INTO schema_migrations (version) VALUES ('{}')",
                escape_sql_string(migration.version)
            )
            .as_str(),
        )?;
    }

    Ok(())
}
