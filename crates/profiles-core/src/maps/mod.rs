//! Map layers: classification, style documents, and warehouse materialization.
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`jenks`] | natural-breaks classification |
//! | [`layer`] | legend, vector source, and style layers for a [`MapLayer`] |
//! | [`materializer`] | persist layers, build map options, export GeoJSON |

pub mod jenks;
pub mod layer;
pub mod materializer;

use profiles_warehouse::LayerRecord;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use jenks::{class_count, jenks_breaks, MAX_CLASSES};
pub use materializer::{LayerRequest, MapMaterializer};

use crate::domain::GeogKind;
use crate::CoreError;

/// Sequential ramp, lightest first.
pub const COLORS: [&str; 9] = [
    "#FFF7FB", "#ECE7F2", "#D0D1E6", "#A6BDDB", "#74A9CF", "#3690C0", "#0570B0", "#045A8D",
    "#023858",
];

pub const DEFAULT_MAP_HOST: &str = "https://api.profiles.wprdc.org";

/// A materialized `(geog_type, variable, time_axis)` layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapLayer {
    pub slug: String,
    pub geog_type: GeogKind,
    pub variable: String,
    pub time_axis: String,
    pub name: String,
    pub label: String,
    pub use_percent: bool,
    pub number_format_options: Value,
    /// Lower bound of each class, ascending.
    pub breaks: Vec<f64>,
    #[serde(default)]
    pub created_at: Option<String>,
}

impl MapLayer {
    pub fn from_record(record: LayerRecord) -> Result<Self, CoreError> {
        Ok(Self {
            geog_type: record.geog_type.parse()?,
            number_format_options: serde_json::from_str(&record.number_format_options)?,
            breaks: serde_json::from_str(&record.breaks)?,
            slug: record.slug,
            variable: record.variable,
            time_axis: record.time_axis,
            name: record.name,
            label: record.label,
            use_percent: record.use_percent,
            created_at: record.created_at,
        })
    }

    pub fn to_record(&self) -> Result<LayerRecord, CoreError> {
        Ok(LayerRecord {
            slug: self.slug.clone(),
            geog_type: self.geog_type.as_str().to_owned(),
            variable: self.variable.clone(),
            time_axis: self.time_axis.clone(),
            name: self.name.clone(),
            label: self.label.clone(),
            use_percent: self.use_percent,
            number_format_options: serde_json::to_string(&self.number_format_options)?,
            breaks: serde_json::to_string(&self.breaks)?,
            created_at: self.created_at.clone(),
        })
    }

    /// One ramp color per class, spread across the full ramp.
    pub fn colors(&self) -> Vec<&'static str> {
        let classes = self.breaks.len();
        if classes <= 1 {
            return vec![COLORS[COLORS.len() / 2]; classes];
        }
        (0..classes)
            .map(|class| COLORS[class * (COLORS.len() - 1) / (classes - 1)])
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layer(breaks: Vec<f64>) -> MapLayer {
        MapLayer {
            slug: String::from("dl_abc"),
            geog_type: GeogKind::Tract,
            variable: String::from("pop"),
            time_axis: String::from("acs"),
            name: String::from("Population across Tracts"),
            label: String::from("Population"),
            use_percent: false,
            number_format_options: serde_json::json!({}),
            breaks,
            created_at: None,
        }
    }

    #[test]
    fn colors_span_the_ramp() {
        assert_eq!(layer(vec![0.0, 1.0, 2.0]).colors(), ["#FFF7FB", "#74A9CF", "#023858"]);
        assert_eq!(layer(vec![4.0]).colors(), ["#74A9CF"]);
        assert!(layer(Vec::new()).colors().is_empty());
    }

    #[test]
    fn records_round_trip_json_columns() {
        let original = layer(vec![1.5, 3.0]);
        let record = original.to_record().expect("record");
        assert_eq!(record.breaks, "[1.5,3.0]");
        assert_eq!(MapLayer::from_record(record).expect("layer"), original);
    }
}
