//! Machine-readable wrapper around every `profiles` command result.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::context::RequestContext;
use crate::domain::UtcDateTime;
use crate::retrieval::ErrorRecord;

pub const SCHEMA_VERSION: &str = "v1.0.0";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub meta: EnvelopeMeta,
    pub data: T,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<EnvelopeError>,
}

impl<T> Envelope<T> {
    pub fn new(meta: EnvelopeMeta, data: T, errors: Vec<EnvelopeError>) -> Self {
        Self { meta, data, errors }
    }

    /// Anything a strict caller should refuse: errors or warnings.
    pub fn has_findings(&self) -> bool {
        !self.errors.is_empty() || !self.meta.warnings.is_empty()
    }
}

/// Provenance of one command: which sources answered, how long it took,
/// and whether every value came from the cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvelopeMeta {
    pub request_id: String,
    pub schema_version: String,
    pub generated_at: UtcDateTime,
    pub source_chain: Vec<String>,
    pub latency_ms: u64,
    pub cache_hit: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl EnvelopeMeta {
    /// Fresh request id, stamped now, for results that came from `source_chain`.
    pub fn new(source_chain: Vec<String>) -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            schema_version: SCHEMA_VERSION.to_owned(),
            generated_at: UtcDateTime::now(),
            source_chain,
            latency_ms: 0,
            cache_hit: false,
            warnings: Vec::new(),
        }
    }

    /// Meta for a resolution request. Sources fall back to `fallback` when
    /// the request never reached one.
    pub fn from_context(context: &RequestContext, fallback: &str) -> Self {
        let source_chain = if context.source_chain().is_empty() {
            vec![fallback.to_owned()]
        } else {
            context.source_chain().to_vec()
        };
        Self {
            latency_ms: context.elapsed_ms(),
            cache_hit: context.fetches() == 0 && context.cache_hits() > 0,
            warnings: context.warnings().to_vec(),
            ..Self::new(source_chain)
        }
    }

    pub fn with_timing(mut self, latency_ms: u64, cache_hit: bool) -> Self {
        self.latency_ms = latency_ms;
        self.cache_hit = cache_hit;
        self
    }

    /// Append warnings, keeping the first occurrence of each.
    pub fn with_warnings(mut self, warnings: impl IntoIterator<Item = String>) -> Self {
        for warning in warnings {
            if !self.warnings.contains(&warning) {
                self.warnings.push(warning);
            }
        }
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvelopeError {
    pub code: String,
    pub message: String,
}

impl EnvelopeError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    /// `retrieval.<status>` for a non-OK response record; `None` when OK.
    pub fn from_record(record: &ErrorRecord) -> Option<Self> {
        if record.is_ok() {
            return None;
        }
        let message = record
            .message
            .clone()
            .unwrap_or_else(|| record.status.clone());
        Some(Self::new(
            format!("retrieval.{}", record.status.to_ascii_lowercase()),
            message,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieval::{ErrorLevel, RetrievalError};

    #[test]
    fn meta_from_context_reports_provenance_and_cache_use() {
        let mut context = RequestContext::new();
        context.record_source("acs5-2019");
        context.record_cache_hits(2);
        context.warn("MOE unavailable for Population");

        let meta = EnvelopeMeta::from_context(&context, "warehouse");

        assert_eq!(meta.schema_version, "v1.0.0");
        assert_eq!(meta.source_chain, ["acs5-2019"]);
        assert!(meta.cache_hit);
        assert_eq!(meta.warnings, ["MOE unavailable for Population"]);
    }

    #[test]
    fn untouched_context_falls_back_to_the_local_source() {
        let meta = EnvelopeMeta::from_context(&RequestContext::new(), "warehouse");
        assert_eq!(meta.source_chain, ["warehouse"]);
        assert!(!meta.cache_hit);
    }

    #[test]
    fn only_failed_records_become_errors() {
        assert!(EnvelopeError::from_record(&ErrorRecord::ok()).is_none());

        let record = RetrievalError::missing_source("No source provides Population for 2005.")
            .to_record();
        let error = EnvelopeError::from_record(&record).expect("error");
        assert_eq!(error.code, "retrieval.error");
        assert_eq!(error.message, "No source provides Population for 2005.");

        let empty = ErrorRecord::new(ErrorLevel::Empty, None);
        let error = EnvelopeError::from_record(&empty).expect("error");
        assert_eq!(error.code, "retrieval.empty");
        assert_eq!(error.message, "EMPTY");
    }
}
