use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::Datum;
use crate::retrieval::ErrorRecord;

const fn yes() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Indicator {
    pub slug: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub time_axis: String,
    pub variables: Vec<String>,
    #[serde(default = "yes")]
    pub across_geogs: bool,
    #[serde(default = "yes")]
    pub use_denominators: bool,
    #[serde(default)]
    pub note: Option<String>,
    #[serde(default)]
    pub use_columns: bool,
    #[serde(default)]
    pub mirror_indicator: Option<String>,
    #[serde(default)]
    pub multidimensional: bool,
    #[serde(default)]
    pub options: Value,
}

impl Indicator {
    /// One variable at one time-part across many geographies.
    pub fn is_mappable(&self, time_part_count: usize) -> bool {
        self.across_geogs && self.variables.len() == 1 && time_part_count == 1
    }
}

/// Axis labels of the response cube.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    pub geog: Vec<String>,
    pub time: Vec<String>,
    pub vars: Vec<String>,
}

impl Dimensions {
    pub fn shape(&self) -> (usize, usize, usize) {
        (self.geog.len(), self.time.len(), self.vars.len())
    }
}

/// Result of `get_data`: a geography x time x variable cube plus status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataResponse {
    pub data: Vec<Vec<Vec<Option<Datum>>>>,
    pub dimensions: Dimensions,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub map_options: Option<Value>,
    pub error: ErrorRecord,
    #[serde(default)]
    pub warnings: Vec<String>,
}

impl DataResponse {
    pub fn failed(dimensions: Dimensions, error: ErrorRecord, warnings: Vec<String>) -> Self {
        Self {
            data: Vec::new(),
            dimensions,
            map_options: None,
            error,
            warnings,
        }
    }

    pub fn cell(&self, geog: usize, time: usize, var: usize) -> Option<&Datum> {
        self.data.get(geog)?.get(time)?.get(var)?.as_ref()
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_ok()
    }
}
