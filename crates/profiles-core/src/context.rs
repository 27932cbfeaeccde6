//! Per-request state threaded through resolution.

use std::time::Instant;

use crate::domain::UtcDateTime;

/// Warnings, provenance, and counters for one `get_data` call.
#[derive(Debug)]
pub struct RequestContext {
    now: UtcDateTime,
    started: Instant,
    warnings: Vec<String>,
    source_chain: Vec<String>,
    fetches: usize,
    cache_hits: usize,
}

impl RequestContext {
    pub fn new() -> Self {
        Self::at(UtcDateTime::now())
    }

    /// Context evaluated against a fixed clock.
    pub fn at(now: UtcDateTime) -> Self {
        Self {
            now,
            started: Instant::now(),
            warnings: Vec::new(),
            source_chain: Vec::new(),
            fetches: 0,
            cache_hits: 0,
        }
    }

    pub const fn now(&self) -> UtcDateTime {
        self.now
    }

    /// Record a warning; repeats of the same message are dropped.
    pub fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        if !self.warnings.contains(&message) {
            tracing::debug!(warning = %message, "request warning");
            self.warnings.push(message);
        }
    }

    pub fn extend_warnings(&mut self, messages: impl IntoIterator<Item = String>) {
        for message in messages {
            self.warn(message);
        }
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn take_warnings(&mut self) -> Vec<String> {
        std::mem::take(&mut self.warnings)
    }

    pub fn record_source(&mut self, slug: &str) {
        if !self.source_chain.iter().any(|seen| seen == slug) {
            self.source_chain.push(slug.to_owned());
        }
    }

    pub fn source_chain(&self) -> &[String] {
        &self.source_chain
    }

    pub fn record_fetch(&mut self) {
        self.fetches += 1;
    }

    pub const fn fetches(&self) -> usize {
        self.fetches
    }

    pub fn record_cache_hits(&mut self, hits: usize) {
        self.cache_hits += hits;
    }

    pub const fn cache_hits(&self) -> usize {
        self.cache_hits
    }

    pub fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}
