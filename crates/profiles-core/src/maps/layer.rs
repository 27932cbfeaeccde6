//! Style documents consumed by the web map for one [`MapLayer`].

use profiles_warehouse::views::layer_view_name;
use serde_json::{json, Value};

use crate::domain::Geography;
use crate::maps::MapLayer;

pub const HIGHLIGHT_SOURCE: &str = "highlight";

impl MapLayer {
    pub fn source_layer(&self) -> String {
        layer_view_name(&self.slug)
    }

    pub fn boundary_layer_id(&self) -> String {
        format!("{}/boundary", self.slug)
    }

    pub fn fill_layer_id(&self) -> String {
        format!("{}/fill", self.slug)
    }

    /// Vector tile source served by the tile host.
    pub fn vector_source(&self, map_host: &str) -> Value {
        json!({
            "id": self.slug,
            "type": "vector",
            "url": format!("{}/tiles/{}.json", map_host.trim_end_matches('/'), self.source_layer()),
        })
    }

    /// `step` expression coloring features by class.
    pub fn fill_color(&self) -> Value {
        let colors = self.colors();
        let mut expression = vec![json!("step"), json!(["get", "value"])];
        for (class, color) in colors.iter().enumerate() {
            if class > 0 {
                expression.push(json!(self.breaks[class]));
            }
            expression.push(json!(color));
        }
        if colors.is_empty() {
            expression.push(json!(super::COLORS[0]));
        }
        Value::Array(expression)
    }

    pub fn layers(&self) -> Value {
        json!([
            {
                "id": self.boundary_layer_id(),
                "source": self.slug,
                "source-layer": self.source_layer(),
                "type": "line",
                "paint": {"line-opacity": 1, "line-color": "#000"},
            },
            {
                "id": self.fill_layer_id(),
                "source": self.slug,
                "source-layer": self.source_layer(),
                "type": "fill",
                "paint": {"fill-opacity": 0.8, "fill-color": self.fill_color()},
            },
        ])
    }

    pub fn legend(&self) -> Value {
        let scale: Vec<Value> = self
            .breaks
            .iter()
            .zip(self.colors())
            .map(|(lower, color)| json!({"label": self.break_label(*lower), "marker": color}))
            .collect();

        let number_format_options = if self.use_percent {
            json!({"style": "percent"})
        } else {
            self.number_format_options.clone()
        };
        json!({
            "label": self.label,
            "number_format_options": number_format_options,
            "variant": "scale",
            "scale": scale,
        })
    }

    fn break_label(&self, lower: f64) -> String {
        if self.use_percent {
            return format!("{:.1}%", lower * 100.0);
        }
        if lower.fract() == 0.0 {
            format!("{lower:.0}")
        } else {
            format!("{lower:.2}")
        }
    }

    /// Everything the map widget needs to show this layer around `primary`.
    pub fn map_options(&self, map_host: &str, primary: &Geography) -> Value {
        let mut sources = vec![self.vector_source(map_host)];
        let mut layers = match self.layers() {
            Value::Array(layers) => layers,
            other => vec![other],
        };
        if let Some(feature) = primary.feature() {
            sources.push(json!({
                "id": HIGHLIGHT_SOURCE,
                "type": "geojson",
                "data": feature,
            }));
            layers.push(json!({
                "id": format!("{HIGHLIGHT_SOURCE}/line"),
                "source": HIGHLIGHT_SOURCE,
                "type": "line",
                "paint": {"line-color": "#000", "line-width": 3},
            }));
        }

        let mut map_options = json!({"interactive_layer_ids": [self.fill_layer_id()]});
        if let (Some((longitude, latitude)), Some(zoom)) = (primary.centroid, primary.base_zoom) {
            map_options["default_viewport"] = json!({
                "longitude": longitude,
                "latitude": latitude,
                "zoom": zoom - 1,
            });
        }

        json!({
            "sources": sources,
            "layers": layers,
            "legends": [self.legend()],
            "map_options": map_options,
        })
    }
}
