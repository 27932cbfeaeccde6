use std::collections::{BTreeMap, HashSet};
use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::ValidationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregationMethod {
    None,
    Count,
    Sum,
    Avg,
    Mode,
    Max,
    Min,
}

impl AggregationMethod {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Count => "count",
            Self::Sum => "sum",
            Self::Avg => "avg",
            Self::Mode => "mode",
            Self::Max => "max",
            Self::Min => "min",
        }
    }

    /// Whether values at a finer kind can be combined into a coarser one.
    pub const fn can_roll_up(self) -> bool {
        !matches!(self, Self::None | Self::Mode)
    }

    /// Combine sub-geography values. Counts roll up as sums.
    pub fn combine(self, values: &[f64]) -> Option<f64> {
        if values.is_empty() {
            return None;
        }
        match self {
            Self::Count | Self::Sum => Some(values.iter().sum()),
            Self::Avg => Some(values.iter().sum::<f64>() / values.len() as f64),
            Self::Max => values.iter().copied().reduce(f64::max),
            Self::Min => values.iter().copied().reduce(f64::min),
            Self::None | Self::Mode => None,
        }
    }
}

impl Display for AggregationMethod {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AggregationMethod {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "count" => Ok(Self::Count),
            "sum" => Ok(Self::Sum),
            "avg" | "mean" => Ok(Self::Avg),
            "mode" => Ok(Self::Mode),
            "max" => Ok(Self::Max),
            "min" => Ok(Self::Min),
            other => Err(ValidationError::InvalidAggregation {
                value: other.to_owned(),
            }),
        }
    }
}

/// Bureau tables backing a variable within one source.
///
/// The value is the sum of `value_tables`; a margin of error exists only
/// when exactly one MOE table is linked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CensusBinding {
    pub source: String,
    pub value_tables: Vec<String>,
    #[serde(default)]
    pub moe_tables: Vec<String>,
}

impl CensusBinding {
    pub fn is_compound(&self) -> bool {
        self.moe_tables.len() > 1
    }

    pub fn table_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .value_tables
            .iter()
            .chain(self.moe_tables.iter())
            .cloned()
            .collect();
        ids.sort();
        ids.dedup();
        ids
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum VariableKind {
    Census {
        bindings: Vec<CensusBinding>,
    },
    Ckan {
        field: String,
        #[serde(default)]
        sql_filter: Option<String>,
        sources: Vec<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variable {
    pub slug: String,
    pub name: String,
    #[serde(default)]
    pub short_name: Option<String>,
    #[serde(default)]
    pub units: Option<String>,
    #[serde(default)]
    pub unit_notes: Option<String>,
    #[serde(default)]
    pub denominators: Vec<String>,
    #[serde(default)]
    pub percent_label_text: Option<String>,
    #[serde(default)]
    pub depth: u8,
    #[serde(default)]
    pub aggregation_method: Option<AggregationMethod>,
    #[serde(flatten)]
    pub kind: VariableKind,
}

impl Variable {
    /// Census variables sum by default; open-data variables count.
    pub fn aggregation(&self) -> AggregationMethod {
        self.aggregation_method.unwrap_or(match self.kind {
            VariableKind::Census { .. } => AggregationMethod::Sum,
            VariableKind::Ckan { .. } => AggregationMethod::Count,
        })
    }

    pub fn primary_denominator(&self) -> Option<&str> {
        self.denominators.first().map(String::as_str)
    }

    pub fn source_slugs(&self) -> Vec<&str> {
        match &self.kind {
            VariableKind::Census { bindings } => {
                bindings.iter().map(|binding| binding.source.as_str()).collect()
            }
            VariableKind::Ckan { sources, .. } => sources.iter().map(String::as_str).collect(),
        }
    }

    pub fn census_binding(&self, source: &str) -> Option<&CensusBinding> {
        match &self.kind {
            VariableKind::Census { bindings } => {
                bindings.iter().find(|binding| binding.source == source)
            }
            VariableKind::Ckan { .. } => None,
        }
    }

    pub fn percent_label(&self) -> String {
        self.percent_label_text
            .clone()
            .unwrap_or_else(|| format!("% of {}", self.name))
    }

    /// `Intl.NumberFormat` options implied by `units`.
    pub fn locale_options(&self) -> Value {
        match self.units.as_deref().and_then(|units| units.chars().next()) {
            Some('$') => json!({"style": "currency", "currency": "USD", "minimumFractionDigits": 0}),
            Some('%') => json!({"style": "percent"}),
            _ => json!({}),
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        let invalid = |reason: &str| ValidationError::InvalidVariable {
            slug: self.slug.clone(),
            reason: reason.to_owned(),
        };
        if self.source_slugs().is_empty() {
            return Err(invalid("no sources are linked"));
        }
        match &self.kind {
            VariableKind::Census { bindings }
                if bindings.iter().any(|binding| binding.value_tables.is_empty()) =>
            {
                Err(invalid("every census binding needs at least one value table"))
            }
            VariableKind::Ckan { field, .. } if field.trim().is_empty() => {
                Err(invalid("open-data variables need a field to aggregate"))
            }
            _ => Ok(()),
        }
    }
}

/// First variable found on a denominator cycle, if any.
pub fn find_denominator_cycle(variables: &BTreeMap<String, Variable>) -> Option<String> {
    fn visit(
        slug: &str,
        variables: &BTreeMap<String, Variable>,
        on_path: &mut Vec<String>,
        done: &mut HashSet<String>,
    ) -> Option<String> {
        if done.contains(slug) {
            return None;
        }
        if on_path.iter().any(|seen| seen == slug) {
            return Some(slug.to_owned());
        }
        let variable = variables.get(slug)?;
        on_path.push(slug.to_owned());
        for denominator in &variable.denominators {
            if let Some(cycle) = visit(denominator, variables, on_path, done) {
                return Some(cycle);
            }
        }
        on_path.pop();
        done.insert(slug.to_owned());
        None
    }

    let mut done = HashSet::new();
    variables
        .keys()
        .find_map(|slug| visit(slug, variables, &mut Vec::new(), &mut done))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn census(slug: &str, denominators: &[&str]) -> Variable {
        Variable {
            slug: slug.to_owned(),
            name: slug.to_owned(),
            short_name: None,
            units: None,
            unit_notes: None,
            denominators: denominators.iter().map(|d| (*d).to_owned()).collect(),
            percent_label_text: None,
            depth: 0,
            aggregation_method: None,
            kind: VariableKind::Census {
                bindings: vec![CensusBinding {
                    source: String::from("acs5"),
                    value_tables: vec![String::from("B01003_001E")],
                    moe_tables: vec![String::from("B01003_001M")],
                }],
            },
        }
    }

    #[test]
    fn defaults_depend_on_variable_family() {
        assert_eq!(census("pop", &[]).aggregation(), AggregationMethod::Sum);

        let ckan: Variable = serde_json::from_value(json!({
            "slug": "arrests",
            "name": "Arrests",
            "type": "ckan",
            "field": "_id",
            "sources": ["arrest-records"]
        }))
        .expect("variable");
        assert_eq!(ckan.aggregation(), AggregationMethod::Count);
        assert_eq!(ckan.source_slugs(), vec!["arrest-records"]);
    }

    #[test]
    fn counts_roll_up_as_sums() {
        assert_eq!(AggregationMethod::Count.combine(&[2.0, 3.0]), Some(5.0));
        assert_eq!(AggregationMethod::Avg.combine(&[2.0, 4.0]), Some(3.0));
        assert_eq!(AggregationMethod::Max.combine(&[2.0, 4.0]), Some(4.0));
        assert_eq!(AggregationMethod::Mode.combine(&[2.0, 4.0]), None);
        assert!(!AggregationMethod::None.can_roll_up());
    }

    #[test]
    fn locale_options_follow_units() {
        let mut variable = census("income", &[]);
        variable.units = Some(String::from("$"));
        assert_eq!(variable.locale_options()["style"], "currency");
        variable.units = Some(String::from("%"));
        assert_eq!(variable.locale_options(), json!({"style": "percent"}));
        variable.units = None;
        assert_eq!(variable.locale_options(), json!({}));
        assert_eq!(variable.percent_label(), "% of income");
    }

    #[test]
    fn detects_denominator_cycles() {
        let mut variables = BTreeMap::new();
        for variable in [census("a", &["b"]), census("b", &["c"]), census("c", &[])] {
            variables.insert(variable.slug.clone(), variable);
        }
        assert_eq!(find_denominator_cycle(&variables), None);

        variables.insert(String::from("c"), census("c", &["a"]));
        assert!(find_denominator_cycle(&variables).is_some());
    }
}
