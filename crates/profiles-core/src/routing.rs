use std::collections::BTreeMap;
use std::sync::Arc;

use crate::data_source::{DataSource, TimeCoverage};
use crate::domain::{GeogKind, TimePart, Variable};
use crate::retrieval::RetrievalError;
use crate::ValidationError;

/// Source snapshot used by the catalog listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceSnapshot {
    pub slug: String,
    pub name: String,
    pub info_link: String,
    pub coverage: TimeCoverage,
}

/// Slug-keyed registry of source adapters and the selection policy over them.
#[derive(Clone, Default)]
pub struct SourceRegistry {
    sources: BTreeMap<String, Arc<dyn DataSource>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, source: Arc<dyn DataSource>) -> Result<(), ValidationError> {
        let slug = source.slug().to_owned();
        if self.sources.contains_key(&slug) {
            return Err(ValidationError::DuplicateSlug {
                entity: "source",
                slug,
            });
        }
        self.sources.insert(slug, source);
        Ok(())
    }

    pub fn get(&self, slug: &str) -> Option<&Arc<dyn DataSource>> {
        self.sources.get(slug)
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    pub fn snapshots(&self) -> Vec<SourceSnapshot> {
        self.sources
            .values()
            .map(|source| SourceSnapshot {
                slug: source.slug().to_owned(),
                name: source.name().to_owned(),
                info_link: source.info_link(),
                coverage: source.coverage(),
            })
            .collect()
    }

    fn candidates<'a>(
        &'a self,
        variable: &'a Variable,
    ) -> impl Iterator<Item = &'a Arc<dyn DataSource>> + 'a {
        variable
            .source_slugs()
            .into_iter()
            .filter_map(move |slug| self.sources.get(slug))
    }

    pub fn can_handle_time_part(&self, variable: &Variable, time_part: &TimePart) -> bool {
        self.candidates(variable)
            .any(|source| source.can_handle_time_part(time_part))
    }

    /// Whether any source of `variable` serves geographies of `kind`.
    pub fn can_handle_kind(&self, variable: &Variable, kind: GeogKind) -> bool {
        self.candidates(variable)
            .any(|source| source.can_handle_geog_kind(kind))
    }

    /// Pick the source for one `(variable, time-part, kind)` cell.
    ///
    /// Among sources covering the time-part and kind, the one with the
    /// narrowest coverage wins; equal spans fall back to slug order.
    pub fn select(
        &self,
        variable: &Variable,
        time_part: &TimePart,
        kind: GeogKind,
    ) -> Result<Arc<dyn DataSource>, RetrievalError> {
        let in_time: Vec<&Arc<dyn DataSource>> = self
            .candidates(variable)
            .filter(|source| source.can_handle_time_part(time_part))
            .collect();
        if in_time.is_empty() {
            return Err(RetrievalError::missing_source(format!(
                "No source provides {} for {}.",
                variable.name, time_part.name
            )));
        }

        let selected = in_time
            .into_iter()
            .filter(|source| source.can_handle_geog_kind(kind))
            .min_by(|left, right| {
                left.coverage()
                    .span_seconds()
                    .cmp(&right.coverage().span_seconds())
                    .then_with(|| left.slug().cmp(right.slug()))
            })
            .ok_or_else(|| {
                RetrievalError::not_available_for_geog(format!(
                    "{} is not available for {}.",
                    variable.name,
                    kind.plural_title()
                ))
            })?;

        tracing::debug!(
            variable = %variable.slug,
            time = %time_part.slug,
            kind = %kind,
            source = %selected.slug(),
            "source selected"
        );
        Ok(Arc::clone(selected))
    }
}
