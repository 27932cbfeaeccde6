use profiles_warehouse::WarehouseError;
use thiserror::Error;

/// Catalog, configuration, and contract validation failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("invalid geography kind '{value}'")]
    InvalidGeogKind { value: String },
    #[error("invalid time unit '{value}', expected one of minute, hour, day, week, month, quarter, year")]
    InvalidTimeUnit { value: String },
    #[error("invalid aggregation method '{value}', expected one of none, count, sum, avg, mode, max, min")]
    InvalidAggregation { value: String },
    #[error("invalid time point '{value}', expected YYYY[-MM[-DD[ HH:MM[:SS]]]]")]
    InvalidTimePoint { value: String },
    #[error("invalid cache mode '{value}', expected one of use, refresh, bypass")]
    InvalidCacheMode { value: String },
    #[error("invalid value '{value}' for {key}")]
    InvalidConfig { key: &'static str, value: String },
    #[error("timestamp must be RFC3339 UTC: '{value}'")]
    TimestampNotUtc { value: String },

    #[error("unknown variable '{slug}'")]
    UnknownVariable { slug: String },
    #[error("unknown source '{slug}'")]
    UnknownSource { slug: String },
    #[error("unknown time axis '{slug}'")]
    UnknownTimeAxis { slug: String },
    #[error("unknown indicator '{slug}'")]
    UnknownIndicator { slug: String },
    #[error("unknown {kind} geography '{id}'")]
    UnknownGeography { kind: String, id: String },
    #[error("duplicate {entity} slug '{slug}'")]
    DuplicateSlug { entity: &'static str, slug: String },

    #[error("denominator cycle through variable '{slug}'")]
    DenominatorCycle { slug: String },
    #[error("{variable} is not available in time {time_part}")]
    VariableTimeMismatch { variable: String, time_part: String },
    #[error("time axis '{slug}': {reason}")]
    InvalidTimeAxis { slug: String, reason: String },
    #[error("source '{slug}': {reason}")]
    InvalidSource { slug: String, reason: String },
    #[error("variable '{slug}': {reason}")]
    InvalidVariable { slug: String, reason: String },
    #[error("{geog} lists {kind} subregion '{child}' which is not in the catalog")]
    BrokenSubregion {
        geog: String,
        kind: String,
        child: String,
    },
}

/// Top-level error type for core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("warehouse error: {0}")]
    Warehouse(#[from] WarehouseError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
