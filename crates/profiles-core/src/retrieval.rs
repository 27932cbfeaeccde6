//! Pipeline error taxonomy and the error record returned to callers.

use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use crate::data_source::SourceError;
use crate::error::CoreError;

/// Severity attached to a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorLevel {
    Ok,
    Empty,
    Warning,
    Error,
}

impl ErrorLevel {
    pub const fn code(self) -> u8 {
        match self {
            Self::Ok => 0,
            Self::Empty => 1,
            Self::Warning => 10,
            Self::Error => 100,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::Empty => "EMPTY",
            Self::Warning => "WARNING",
            Self::Error => "ERROR",
        }
    }

    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Ok),
            1 => Some(Self::Empty),
            10 => Some(Self::Warning),
            100 => Some(Self::Error),
            _ => None,
        }
    }
}

impl Serialize for ErrorLevel {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u8(self.code())
    }
}

impl<'de> Deserialize<'de> for ErrorLevel {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let code = u8::deserialize(deserializer)?;
        Self::from_code(code).ok_or_else(|| D::Error::custom(format!("unknown error level {code}")))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalErrorKind {
    /// No source covers a (variable, time-part).
    MissingSource,
    /// A roll-up was needed but impossible.
    Aggregation,
    /// Queries returned nothing for any requested cell.
    EmptyResults,
    /// The geography kind is not servable.
    NotAvailableForGeog,
    /// Any other fault talking to a source.
    DataRetrieval,
}

impl RetrievalErrorKind {
    pub const fn level(self) -> ErrorLevel {
        match self {
            Self::MissingSource | Self::DataRetrieval => ErrorLevel::Error,
            Self::Aggregation | Self::EmptyResults | Self::NotAvailableForGeog => ErrorLevel::Empty,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::MissingSource => "missing_source",
            Self::Aggregation => "aggregation",
            Self::EmptyResults => "empty_results",
            Self::NotAvailableForGeog => "not_available_for_geog",
            Self::DataRetrieval => "data_retrieval",
        }
    }
}

/// A fault that aborts the current `get_data` call with an error record.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct RetrievalError {
    kind: RetrievalErrorKind,
    message: String,
}

impl RetrievalError {
    pub fn new(kind: RetrievalErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn missing_source(message: impl Into<String>) -> Self {
        Self::new(RetrievalErrorKind::MissingSource, message)
    }

    pub fn aggregation(message: impl Into<String>) -> Self {
        Self::new(RetrievalErrorKind::Aggregation, message)
    }

    pub fn empty_results(message: impl Into<String>) -> Self {
        Self::new(RetrievalErrorKind::EmptyResults, message)
    }

    pub fn not_available_for_geog(message: impl Into<String>) -> Self {
        Self::new(RetrievalErrorKind::NotAvailableForGeog, message)
    }

    pub fn data_retrieval(message: impl Into<String>) -> Self {
        Self::new(RetrievalErrorKind::DataRetrieval, message)
    }

    pub const fn kind(&self) -> RetrievalErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub const fn level(&self) -> ErrorLevel {
        self.kind.level()
    }

    pub fn to_record(&self) -> ErrorRecord {
        ErrorRecord::new(self.level(), Some(self.message.clone()))
    }
}

impl From<SourceError> for RetrievalError {
    fn from(error: SourceError) -> Self {
        Self::data_retrieval(error.to_string())
    }
}

/// `{status, level, message}` error payload of a data response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub status: String,
    pub level: ErrorLevel,
    pub message: Option<String>,
}

impl ErrorRecord {
    pub fn new(level: ErrorLevel, message: Option<String>) -> Self {
        Self {
            status: level.as_str().to_owned(),
            level,
            message,
        }
    }

    pub fn ok() -> Self {
        Self::new(ErrorLevel::Ok, None)
    }

    pub fn is_ok(&self) -> bool {
        self.level == ErrorLevel::Ok
    }
}

impl Default for ErrorRecord {
    fn default() -> Self {
        Self::ok()
    }
}

/// Failure of a resolution step: either a reportable retrieval error or an
/// infrastructure fault that propagates to the caller.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error(transparent)]
    Retrieval(#[from] RetrievalError),

    #[error(transparent)]
    Core(#[from] CoreError),
}

impl From<SourceError> for ResolveError {
    fn from(error: SourceError) -> Self {
        Self::Retrieval(error.into())
    }
}

impl From<profiles_warehouse::WarehouseError> for ResolveError {
    fn from(error: profiles_warehouse::WarehouseError) -> Self {
        Self::Core(error.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_follow_error_kinds() {
        assert_eq!(RetrievalError::missing_source("x").level(), ErrorLevel::Error);
        assert_eq!(RetrievalError::aggregation("x").level(), ErrorLevel::Empty);
        assert_eq!(RetrievalError::empty_results("x").level(), ErrorLevel::Empty);
        assert_eq!(
            RetrievalError::not_available_for_geog("x").level(),
            ErrorLevel::Empty
        );
        assert_eq!(RetrievalError::data_retrieval("x").level(), ErrorLevel::Error);
    }

    #[test]
    fn error_record_serializes_status_level_and_message() {
        let record = RetrievalError::missing_source("no source for 2005").to_record();
        let json = serde_json::to_value(&record).expect("serialize");
        assert_eq!(
            json,
            serde_json::json!({"status": "ERROR", "level": 100, "message": "no source for 2005"})
        );

        let back: ErrorRecord = serde_json::from_value(json).expect("deserialize");
        assert_eq!(back, record);
    }

    #[test]
    fn ok_record_has_null_message() {
        let json = serde_json::to_value(ErrorRecord::ok()).expect("serialize");
        assert_eq!(json["level"], 0);
        assert!(json["message"].is_null());
    }
}
