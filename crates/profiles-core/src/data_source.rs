//! Source capability contract and fetch request/response types.
//!
//! A source answers two capability questions (can it serve a time-part, can
//! it serve a geography kind) and fetches raw per-geography values for one
//! variable at one time-part.
//!
//! | Trait | Implemented by | Purpose |
//! |-------|----------------|---------|
//! | [`DataSource`] | `CensusSource`, `CkanSource` | capability checks and fetch |
//! | [`CensusTableStore`] | `Warehouse` | bureau table lookup |
//! | [`DatastoreClient`] | `CkanDatastoreClient`, `WarehouseDatastore` | run SQL, get rows |

use std::fmt::{Display, Formatter};
use std::future::Future;
use std::pin::Pin;

use profiles_warehouse::CensusValueRecord;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::domain::{GeogKind, Geography, TimePart, TimePoint, Variable};

/// Adapter-level error classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceErrorKind {
    Unavailable,
    RateLimited,
    Timeout,
    InvalidRequest,
    UnsupportedGeography,
    Internal,
}

/// Structured source error. Every kind surfaces as a data retrieval error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceError {
    kind: SourceErrorKind,
    message: String,
    retryable: bool,
}

impl SourceError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self {
            kind: SourceErrorKind::Unavailable,
            message: message.into(),
            retryable: true,
        }
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self {
            kind: SourceErrorKind::RateLimited,
            message: message.into(),
            retryable: true,
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self {
            kind: SourceErrorKind::Timeout,
            message: message.into(),
            retryable: true,
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self {
            kind: SourceErrorKind::InvalidRequest,
            message: message.into(),
            retryable: false,
        }
    }

    pub fn unsupported_geography(source: &str, kind: GeogKind) -> Self {
        Self {
            kind: SourceErrorKind::UnsupportedGeography,
            message: format!("source '{source}' cannot serve {} geographies", kind.title()),
            retryable: false,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            kind: SourceErrorKind::Internal,
            message: message.into(),
            retryable: false,
        }
    }

    pub const fn kind(&self) -> SourceErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub const fn retryable(&self) -> bool {
        self.retryable
    }

    pub const fn code(&self) -> &'static str {
        match self.kind {
            SourceErrorKind::Unavailable => "source.unavailable",
            SourceErrorKind::RateLimited => "source.rate_limited",
            SourceErrorKind::Timeout => "source.timeout",
            SourceErrorKind::InvalidRequest => "source.invalid_request",
            SourceErrorKind::UnsupportedGeography => "source.unsupported_geography",
            SourceErrorKind::Internal => "source.internal",
        }
    }
}

impl Display for SourceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.code())
    }
}

impl std::error::Error for SourceError {}

/// Inclusive time range a source has data for. `end = None` is open-ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeCoverage {
    pub start: TimePoint,
    #[serde(default)]
    pub end: Option<TimePoint>,
}

impl TimeCoverage {
    pub const fn new(start: TimePoint, end: Option<TimePoint>) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, instant: TimePoint) -> bool {
        instant >= self.start && self.end.is_none_or(|end| instant <= end)
    }

    /// Length in seconds; open-ended ranges are maximally wide.
    pub fn span_seconds(&self) -> i64 {
        self.end.map_or(i64::MAX, |end| {
            end.unix_seconds().saturating_sub(self.start.unix_seconds())
        })
    }
}

/// One fetch: a variable at one time-part over geographies of one kind.
#[derive(Debug, Clone, Copy)]
pub struct FetchRequest<'a> {
    pub variable: &'a Variable,
    /// Denominator the source may fold into the same query.
    pub denominator: Option<&'a Variable>,
    pub geogs: &'a [&'a Geography],
    pub kind: GeogKind,
    pub time_part: &'a TimePart,
}

/// Raw value for one geography, keyed by geography slug.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchedValue {
    pub geog: String,
    pub value: Option<f64>,
    pub moe: Option<f64>,
    pub denom: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchBatch {
    /// Only geographies the source returned data for.
    pub rows: Vec<FetchedValue>,
    pub warnings: Vec<String>,
}

/// Source adapter contract.
///
/// Implementations must be `Send + Sync`; the registry shares them behind `Arc`.
pub trait DataSource: Send + Sync {
    fn slug(&self) -> &str;

    fn name(&self) -> &str;

    fn coverage(&self) -> TimeCoverage;

    /// Public landing page for the underlying dataset.
    fn info_link(&self) -> String;

    fn can_handle_time_part(&self, time_part: &TimePart) -> bool;

    fn can_handle_geog_kind(&self, kind: GeogKind) -> bool;

    /// Warnings that apply whenever `variable` is served by this source,
    /// whether values come from a fetch or from cache.
    fn value_warnings(&self, _variable: &Variable) -> Vec<String> {
        Vec::new()
    }

    /// Fetch raw values for the request's geographies.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] when the variable is not bound to this source,
    /// the kind is unsupported, or the upstream query fails.
    fn fetch<'a>(
        &'a self,
        request: FetchRequest<'a>,
    ) -> Pin<Box<dyn Future<Output = Result<FetchBatch, SourceError>> + Send + 'a>>;
}

/// Bureau table lookup.
pub trait CensusTableStore: Send + Sync {
    fn table_values<'a>(
        &'a self,
        dataset: &'a str,
        year: i32,
        table_ids: &'a [String],
        geoids: &'a [String],
    ) -> Pin<Box<dyn Future<Output = Result<Vec<CensusValueRecord>, SourceError>> + Send + 'a>>;
}

/// Runs a SQL statement against an open-data datastore and returns its rows.
pub trait DatastoreClient: Send + Sync {
    fn run_sql<'a>(
        &'a self,
        sql: String,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Map<String, Value>>, SourceError>> + Send + 'a>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(value: &str) -> TimePoint {
        TimePoint::parse(value).expect("time point")
    }

    #[test]
    fn coverage_is_inclusive_and_open_ended_when_end_is_missing() {
        let closed = TimeCoverage::new(point("2015"), Some(point("2019")));
        assert!(closed.contains(point("2019")));
        assert!(!closed.contains(point("2019-01-02")));

        let open = TimeCoverage::new(point("2015"), None);
        assert!(open.contains(point("2090")));
        assert!(open.span_seconds() > closed.span_seconds());
    }

    #[test]
    fn source_error_display_includes_code() {
        let error = SourceError::timeout("datastore did not answer within 30000ms");
        assert!(error.retryable());
        assert_eq!(
            error.to_string(),
            "datastore did not answer within 30000ms (source.timeout)"
        );
    }
}
