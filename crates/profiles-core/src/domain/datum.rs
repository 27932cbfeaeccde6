use serde::{Deserialize, Serialize};

use crate::domain::{GeogKind, Geography};

/// One resolved cell: a variable at a geography and time-part.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Datum {
    pub variable: String,
    pub geog: String,
    pub time: String,
    pub value: Option<f64>,
    pub moe: Option<f64>,
    pub denom: Option<f64>,
    pub percent: Option<f64>,
}

impl Datum {
    pub fn new(
        variable: impl Into<String>,
        geog: impl Into<String>,
        time: impl Into<String>,
        value: Option<f64>,
        moe: Option<f64>,
        denom: Option<f64>,
    ) -> Self {
        Self {
            variable: variable.into(),
            geog: geog.into(),
            time: time.into(),
            value,
            moe,
            denom,
            percent: percent_of(value, denom),
        }
    }

    /// Value shown on a map: the percent for percent layers, else the raw value.
    pub fn map_value(&self, use_percent: bool) -> Option<f64> {
        if use_percent {
            self.percent
        } else {
            self.value
        }
    }
}

/// `value / denom` when both are present and `denom > 0`.
pub fn percent_of(value: Option<f64>, denom: Option<f64>) -> Option<f64> {
    match (value, denom) {
        (Some(value), Some(denom)) if denom > 0.0 => Some(value / denom),
        _ => None,
    }
}

/// A requested geography and the sub-geographies that serve it.
#[derive(Debug, Clone, PartialEq)]
pub struct GeogRecord {
    pub geog: Geography,
    pub subgeogs: Vec<Geography>,
}

impl GeogRecord {
    /// Served directly by its own values.
    pub fn direct(geog: Geography) -> Self {
        Self {
            subgeogs: vec![geog.clone()],
            geog,
        }
    }

    pub fn is_divided(&self) -> bool {
        !matches!(self.subgeogs.as_slice(), [only] if only.slug == self.geog.slug)
    }
}

/// Everything one request needs resolved, keyed by the requested geographies.
#[derive(Debug, Clone, PartialEq)]
pub struct GeogCollection {
    pub geog_type: GeogKind,
    pub primary: Geography,
    pub records: Vec<GeogRecord>,
}

impl GeogCollection {
    pub fn new(primary: Geography, records: Vec<GeogRecord>) -> Self {
        Self {
            geog_type: primary.kind,
            primary,
            records,
        }
    }

    pub fn is_divided(&self) -> bool {
        self.records.iter().any(GeogRecord::is_divided)
    }

    /// Distinct sub-geography kinds, in first-seen order.
    pub fn subgeog_kinds(&self) -> Vec<GeogKind> {
        let mut kinds = Vec::new();
        for subgeog in self.records.iter().flat_map(|record| &record.subgeogs) {
            if !kinds.contains(&subgeog.kind) {
                kinds.push(subgeog.kind);
            }
        }
        kinds
    }

    /// Distinct sub-geographies of `kind`, in first-seen order.
    pub fn subgeogs_of_kind(&self, kind: GeogKind) -> Vec<&Geography> {
        let mut seen = std::collections::HashSet::new();
        self.records
            .iter()
            .flat_map(|record| &record.subgeogs)
            .filter(|subgeog| subgeog.kind == kind && seen.insert(subgeog.slug.as_str()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_requires_positive_denominator() {
        assert_eq!(percent_of(Some(5.0), Some(20.0)), Some(0.25));
        assert_eq!(percent_of(Some(5.0), Some(0.0)), None);
        assert_eq!(percent_of(Some(5.0), None), None);
        assert_eq!(percent_of(None, Some(20.0)), None);
    }

    #[test]
    fn direct_records_are_not_divided() {
        let county = Geography::new(GeogKind::County, "42003", "Allegheny");
        let tract = Geography::new(GeogKind::Tract, "42003020100", "2010");
        assert!(!GeogRecord::direct(county.clone()).is_divided());

        let divided = GeogRecord {
            geog: county.clone(),
            subgeogs: vec![tract.clone(), tract],
        };
        let collection = GeogCollection::new(county, vec![divided]);
        assert!(collection.is_divided());
        assert_eq!(collection.subgeog_kinds(), vec![GeogKind::Tract]);
        assert_eq!(collection.subgeogs_of_kind(GeogKind::Tract).len(), 1);
    }
}
