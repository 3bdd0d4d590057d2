// Copyright 2025 Chris Custine
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Styling parameters and the style expressions derived from them.
//!
//! The remote tile schema is not under our control and has shipped speed and
//! direction under several property names. [`SPEED_PROPERTY_ALIASES`] and
//! [`DIRECTION_PROPERTY_ALIASES`] are probed in order, first match wins; the
//! lists are a compatibility shim and should only ever grow.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::barb::{icon_name, BUCKET_REACH, SPEED_BUCKETS};
use crate::engine::{FeatureProperties, LayerDescriptor, LayerType, PropertyKind};
use crate::registry::{OverlayDefinition, OverlayKind};

/// Candidate names of the wind speed property, in probing order.
pub const SPEED_PROPERTY_ALIASES: [&str; 3] = ["windSpeedStyle", "value", "speed"];

/// Candidate names of the wind direction property, in probing order.
pub const DIRECTION_PROPERTY_ALIASES: [&str; 3] = ["windDirectionStyle", "value1", "direction"];

/// Icon bucket used when a feature carries no recognised speed property.
const FALLBACK_BUCKET: u32 = 10;

/// `icon-size` is derived from the text size so both scale together.
const ICON_SIZE_DIVISOR: f64 = 20.0;

const SIMPLIFIED_GLYPH: &str = "→";
const DOT_GLYPH: &str = "●";

/// Partial style change keyed by camelCase config field names.
pub type StyleUpdate = Map<String, Value>;

/// How wind features are drawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BarbStyle {
    /// Wind-barb icons bucketed by speed.
    #[default]
    Full,
    /// A rotated arrow glyph.
    Simplified,
    /// A dot sized by speed.
    Dots,
}

/// Unit the remote data reports wind speed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpeedUnit {
    #[default]
    Knots,
    Ms,
    Kmh,
    Mph,
}

impl SpeedUnit {
    /// Multiplier converting this unit to knots.
    #[must_use]
    pub fn knots_factor(self) -> f64 {
        match self {
            SpeedUnit::Knots => 1.0,
            SpeedUnit::Ms => 1.943_844,
            SpeedUnit::Kmh => 0.539_957,
            SpeedUnit::Mph => 0.868_976,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WindStyle {
    pub text_color: String,
    pub text_size: f64,
    pub text_opacity: f64,
    pub halo_color: String,
    pub halo_width: f64,
    pub symbol_spacing: f64,
    pub allow_overlap: bool,
    pub barb_style: BarbStyle,
    pub speed_unit: SpeedUnit,
}

impl Default for WindStyle {
    fn default() -> Self {
        Self {
            text_color: "#ffffff".to_string(),
            text_size: 16.0,
            text_opacity: 0.9,
            halo_color: "#000000".to_string(),
            halo_width: 1.0,
            symbol_spacing: 80.0,
            allow_overlap: true,
            barb_style: BarbStyle::Full,
            speed_unit: SpeedUnit::Knots,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PressureStyle {
    pub contour_width: f64,
    pub contour_opacity: f64,
    pub low_pressure_color: String,
    pub medium_pressure_color: String,
    pub high_pressure_color: String,
}

impl Default for PressureStyle {
    fn default() -> Self {
        Self {
            contour_width: 1.0,
            contour_opacity: 0.8,
            low_pressure_color: "#3b82f6".to_string(),
            medium_pressure_color: "#22c55e".to_string(),
            high_pressure_color: "#ef4444".to_string(),
        }
    }
}

/// One colour stop of the swell gradient, e.g. `{"value": "2m", "color": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradientStop {
    pub value: String,
    pub color: String,
}

impl GradientStop {
    /// Wave height in metres; accepts "2m", "6m+" or a bare number.
    #[must_use]
    pub fn height(&self) -> Option<f64> {
        self.value
            .trim()
            .trim_end_matches('+')
            .trim_end_matches('m')
            .parse()
            .ok()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SwellStyle {
    pub fill_opacity: f64,
    pub fill_outline_color: String,
    pub fill_antialias: bool,
    pub gradient: Vec<GradientStop>,
}

impl Default for SwellStyle {
    fn default() -> Self {
        let stop = |value: &str, color: &str| GradientStop {
            value: value.to_string(),
            color: color.to_string(),
        };
        Self {
            fill_opacity: 0.6,
            fill_outline_color: "#1e3a8a".to_string(),
            fill_antialias: true,
            gradient: vec![
                stop("0m", "#e0f2fe"),
                stop("1m", "#7dd3fc"),
                stop("2m", "#0ea5e9"),
                stop("4m", "#0369a1"),
                stop("6m+", "#1e3a8a"),
            ],
        }
    }
}

/// User-adjustable styling for one overlay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum LayerStyleConfig {
    Wind(WindStyle),
    Pressure(PressureStyle),
    Swell(SwellStyle),
}

/// A single property value to push to a live layer.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyPush {
    pub kind: PropertyKind,
    pub property: &'static str,
    pub value: Value,
}

impl PropertyPush {
    fn paint(property: &'static str, value: Value) -> Self {
        Self {
            kind: PropertyKind::Paint,
            property,
            value,
        }
    }

    fn layout(property: &'static str, value: Value) -> Self {
        Self {
            kind: PropertyKind::Layout,
            property,
            value,
        }
    }
}

impl LayerStyleConfig {
    #[must_use]
    pub fn default_for(kind: OverlayKind) -> Self {
        match kind {
            OverlayKind::Wind => LayerStyleConfig::Wind(WindStyle::default()),
            OverlayKind::Pressure => LayerStyleConfig::Pressure(PressureStyle::default()),
            OverlayKind::Swell => LayerStyleConfig::Swell(SwellStyle::default()),
        }
    }

    #[must_use]
    pub fn kind(&self) -> OverlayKind {
        match self {
            LayerStyleConfig::Wind(_) => OverlayKind::Wind,
            LayerStyleConfig::Pressure(_) => OverlayKind::Pressure,
            LayerStyleConfig::Swell(_) => OverlayKind::Swell,
        }
    }

    /// Return a copy with one field replaced, or `None` when the key is not a
    /// field of this config or the value does not fit the field.
    #[must_use]
    pub fn with_field(&self, key: &str, value: &Value) -> Option<Self> {
        if key == "kind" {
            return None;
        }
        let Ok(Value::Object(mut fields)) = serde_json::to_value(self) else {
            return None;
        };
        if !fields.contains_key(key) {
            return None;
        }
        fields.insert(key.to_string(), value.clone());
        serde_json::from_value(Value::Object(fields)).ok()
    }

    /// Whether `key` names a field of this config.
    #[must_use]
    pub fn has_field(&self, key: &str) -> bool {
        key != "kind"
            && matches!(serde_json::to_value(self), Ok(Value::Object(fields)) if fields.contains_key(key))
    }

    /// Live-layer updates implied by a change of `key`. Fields that cannot be
    /// changed on a live layer produce nothing.
    #[must_use]
    pub fn property_pushes(&self, key: &str) -> Vec<PropertyPush> {
        match self {
            LayerStyleConfig::Wind(style) => wind_pushes(style, key),
            LayerStyleConfig::Pressure(style) => pressure_pushes(style, key),
            LayerStyleConfig::Swell(style) => swell_pushes(style, key),
        }
    }
}

fn wind_pushes(style: &WindStyle, key: &str) -> Vec<PropertyPush> {
    match key {
        "textColor" => vec![PropertyPush::paint("text-color", json!(style.text_color))],
        "textOpacity" => vec![
            PropertyPush::paint("text-opacity", json!(style.text_opacity)),
            PropertyPush::paint("icon-opacity", json!(style.text_opacity)),
        ],
        "haloColor" => vec![PropertyPush::paint("text-halo-color", json!(style.halo_color))],
        "haloWidth" => vec![PropertyPush::paint("text-halo-width", json!(style.halo_width))],
        "textSize" => vec![
            PropertyPush::layout("text-size", wind_text_size(style)),
            PropertyPush::layout("icon-size", json!(style.text_size / ICON_SIZE_DIVISOR)),
        ],
        "allowOverlap" => vec![
            PropertyPush::layout("text-allow-overlap", json!(style.allow_overlap)),
            PropertyPush::layout("icon-allow-overlap", json!(style.allow_overlap)),
        ],
        "symbolSpacing" => vec![PropertyPush::layout("symbol-spacing", json!(style.symbol_spacing))],
        "barbStyle" => vec![
            PropertyPush::layout("icon-image", wind_icon_image(style)),
            PropertyPush::layout("text-field", wind_text_field(style)),
            PropertyPush::layout("text-size", wind_text_size(style)),
        ],
        "speedUnit" => vec![
            PropertyPush::layout("icon-image", wind_icon_image(style)),
            PropertyPush::layout("text-size", wind_text_size(style)),
        ],
        _ => Vec::new(),
    }
}

fn pressure_pushes(style: &PressureStyle, key: &str) -> Vec<PropertyPush> {
    match key {
        "contourWidth" => vec![PropertyPush::paint("line-width", json!(style.contour_width))],
        "contourOpacity" => vec![PropertyPush::paint("line-opacity", json!(style.contour_opacity))],
        "lowPressureColor" | "mediumPressureColor" | "highPressureColor" => {
            vec![PropertyPush::paint("line-color", pressure_color_expr(style))]
        }
        _ => Vec::new(),
    }
}

fn swell_pushes(style: &SwellStyle, key: &str) -> Vec<PropertyPush> {
    match key {
        "fillOpacity" => vec![PropertyPush::paint("fill-opacity", json!(style.fill_opacity))],
        "fillOutlineColor" => vec![PropertyPush::paint("fill-outline-color", json!(style.fill_outline_color))],
        "fillAntialias" => vec![PropertyPush::paint("fill-antialias", json!(style.fill_antialias))],
        "gradient" => vec![PropertyPush::paint("fill-color", swell_color_expr(style))],
        _ => Vec::new(),
    }
}

/// First alias present in `props`, with its value.
#[must_use]
pub fn probe_property<'a>(props: &'a FeatureProperties, aliases: &[&'static str]) -> Option<(&'static str, &'a Value)> {
    aliases
        .iter()
        .find_map(|&alias| props.get(alias).map(|value| (alias, value)))
}

/// Speed of a concrete feature in knots, probing the speed aliases.
#[must_use]
pub fn feature_speed_knots(props: &FeatureProperties, unit: SpeedUnit) -> Option<f64> {
    let (_, value) = probe_property(props, &SPEED_PROPERTY_ALIASES)?;
    let raw = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse().ok()?,
        _ => return None,
    };
    Some(raw * unit.knots_factor())
}

fn speed_expr(alias: &str, unit: SpeedUnit) -> Value {
    let raw = json!(["to-number", ["get", alias], 0]);
    if unit == SpeedUnit::Knots {
        raw
    } else {
        json!(["*", raw, unit.knots_factor()])
    }
}

/// `case` chain picking a bucket icon for the speed held in `alias`.
fn bucket_case(alias: &str, unit: SpeedUnit) -> Value {
    let speed = speed_expr(alias, unit);
    let mut expr = vec![json!("case")];
    let last = SPEED_BUCKETS.len() - 1;
    for &bucket in &SPEED_BUCKETS[..last] {
        expr.push(json!(["<", speed, f64::from(bucket) + BUCKET_REACH]));
        expr.push(json!(icon_name(bucket)));
    }
    expr.push(json!(icon_name(SPEED_BUCKETS[last])));
    Value::Array(expr)
}

/// Icon selection over every speed alias, falling back to a fixed bucket.
#[must_use]
pub fn icon_image_expr(unit: SpeedUnit) -> Value {
    let mut expr = vec![json!("case")];
    for alias in SPEED_PROPERTY_ALIASES {
        expr.push(json!(["has", alias]));
        expr.push(bucket_case(alias, unit));
    }
    expr.push(json!(icon_name(FALLBACK_BUCKET)));
    Value::Array(expr)
}

/// Converted speed over every alias, 0 when none is present.
#[must_use]
pub fn speed_value_expr(unit: SpeedUnit) -> Value {
    let mut expr = vec![json!("case")];
    for alias in SPEED_PROPERTY_ALIASES {
        expr.push(json!(["has", alias]));
        expr.push(speed_expr(alias, unit));
    }
    expr.push(json!(0));
    Value::Array(expr)
}

/// Rotation in degrees over every direction alias, 0 when none is present.
#[must_use]
pub fn rotation_expr() -> Value {
    let mut expr = vec![json!("case")];
    for alias in DIRECTION_PROPERTY_ALIASES {
        expr.push(json!(["has", alias]));
        expr.push(json!(["to-number", ["get", alias], 0]));
    }
    expr.push(json!(0));
    Value::Array(expr)
}

fn wind_icon_image(style: &WindStyle) -> Value {
    match style.barb_style {
        BarbStyle::Full => icon_image_expr(style.speed_unit),
        BarbStyle::Simplified | BarbStyle::Dots => json!(""),
    }
}

fn wind_text_field(style: &WindStyle) -> Value {
    match style.barb_style {
        BarbStyle::Full => json!(""),
        BarbStyle::Simplified => json!(SIMPLIFIED_GLYPH),
        BarbStyle::Dots => json!(DOT_GLYPH),
    }
}

fn wind_text_size(style: &WindStyle) -> Value {
    match style.barb_style {
        BarbStyle::Dots => json!([
            "interpolate",
            ["linear"],
            speed_value_expr(style.speed_unit),
            0,
            style.text_size * 0.5,
            50,
            style.text_size * 1.5
        ]),
        BarbStyle::Full | BarbStyle::Simplified => json!(style.text_size),
    }
}

fn pressure_color_expr(style: &PressureStyle) -> Value {
    json!([
        "interpolate",
        ["linear"],
        ["to-number", ["get", "value"], 1013],
        980, style.low_pressure_color,
        1000, style.low_pressure_color,
        1013, style.medium_pressure_color,
        1030, style.high_pressure_color,
        1050, style.high_pressure_color
    ])
}

fn swell_color_expr(style: &SwellStyle) -> Value {
    let mut stops: Vec<(f64, &str)> = style
        .gradient
        .iter()
        .filter_map(|stop| stop.height().map(|h| (h, stop.color.as_str())))
        .collect();
    stops.sort_by(|a, b| a.0.total_cmp(&b.0));
    stops.dedup_by(|a, b| a.0 == b.0);

    if stops.is_empty() {
        return json!(style.fill_outline_color);
    }

    let mut expr = vec![
        json!("interpolate"),
        json!(["exponential", 1.5]),
        json!(["to-number", ["get", "value"], 0]),
    ];
    for (height, color) in stops {
        expr.push(json!(height));
        expr.push(json!(color));
    }
    Value::Array(expr)
}

/// Main rendering layer for an overlay.
#[must_use]
pub fn main_layer(def: &OverlayDefinition, source_layer: &str, config: &LayerStyleConfig) -> LayerDescriptor {
    let base = |layer_type: LayerType| LayerDescriptor::new(def.layer_id(), layer_type, def.source_id(), source_layer.to_string());

    match config {
        LayerStyleConfig::Wind(style) => base(LayerType::Symbol)
            .with_layout("icon-image", wind_icon_image(style))
            .with_layout("icon-rotate", rotation_expr())
            .with_layout("icon-size", json!(style.text_size / ICON_SIZE_DIVISOR))
            .with_layout("icon-allow-overlap", json!(style.allow_overlap))
            .with_layout("icon-ignore-placement", json!(true))
            .with_layout("icon-rotation-alignment", json!("map"))
            .with_layout("text-field", wind_text_field(style))
            .with_layout("text-rotate", rotation_expr())
            .with_layout("text-size", wind_text_size(style))
            .with_layout("text-allow-overlap", json!(style.allow_overlap))
            .with_layout("text-rotation-alignment", json!("map"))
            .with_layout("symbol-spacing", json!(style.symbol_spacing))
            .with_paint("icon-opacity", json!(style.text_opacity))
            .with_paint("text-opacity", json!(style.text_opacity))
            .with_paint("text-color", json!(style.text_color))
            .with_paint("text-halo-color", json!(style.halo_color))
            .with_paint("text-halo-width", json!(style.halo_width)),
        LayerStyleConfig::Pressure(style) => base(LayerType::Line)
            .with_layout("line-join", json!("round"))
            .with_paint("line-width", json!(style.contour_width))
            .with_paint("line-opacity", json!(style.contour_opacity))
            .with_paint("line-color", pressure_color_expr(style)),
        LayerStyleConfig::Swell(style) => base(LayerType::Fill)
            .with_paint("fill-color", swell_color_expr(style))
            .with_paint("fill-opacity", json!(style.fill_opacity))
            .with_paint("fill-outline-color", json!(style.fill_outline_color))
            .with_paint("fill-antialias", json!(style.fill_antialias)),
    }
}

/// Red point markers drawn under the main layer to show where features are.
#[must_use]
pub fn debug_layer(def: &OverlayDefinition, source_layer: &str) -> LayerDescriptor {
    LayerDescriptor::new(
        format!("{}-debug", def.layer_id()),
        LayerType::Circle,
        def.source_id(),
        source_layer.to_string(),
    )
    .with_paint("circle-radius", json!(6))
    .with_paint("circle-color", json!("#ff0000"))
    .with_paint("circle-opacity", json!(0.7))
    .with_paint("circle-stroke-width", json!(2))
    .with_paint("circle-stroke-color", json!("#ffffff"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wind_defaults_match_panel() {
        let style = WindStyle::default();
        assert_eq!(style.text_size, 16.0);
        assert_eq!(style.barb_style, BarbStyle::Full);
        let json = serde_json::to_value(LayerStyleConfig::Wind(style)).unwrap();
        assert_eq!(json["kind"], json!("wind"));
        assert_eq!(json["textOpacity"], json!(0.9));
        assert_eq!(json["speedUnit"], json!("knots"));
    }

    #[test]
    fn test_with_field_merges_known_keys_only() {
        let config = LayerStyleConfig::default_for(OverlayKind::Wind);

        let updated = config.with_field("textOpacity", &json!(0.5)).unwrap();
        match &updated {
            LayerStyleConfig::Wind(style) => {
                assert_eq!(style.text_opacity, 0.5);
                assert_eq!(style.text_size, 16.0);
            }
            other => panic!("unexpected config {other:?}"),
        }

        assert!(config.with_field("bogus", &json!(1)).is_none());
        assert!(config.with_field("kind", &json!("swell")).is_none());
        assert!(config.with_field("textOpacity", &json!("high")).is_none());
        assert!(config.has_field("barbStyle"));
        assert!(!config.has_field("contourWidth"));
    }

    #[test]
    fn test_opacity_fans_out_to_icon_and_text() {
        let config = LayerStyleConfig::default_for(OverlayKind::Wind);
        let pushes = config.property_pushes("textOpacity");
        let names: Vec<_> = pushes.iter().map(|p| p.property).collect();
        assert_eq!(names, vec!["text-opacity", "icon-opacity"]);
        assert!(pushes.iter().all(|p| p.kind == PropertyKind::Paint));
        assert!(config.property_pushes("unknown").is_empty());
    }

    #[test]
    fn test_icon_expression_probes_aliases_in_order() {
        let expr = icon_image_expr(SpeedUnit::Knots);
        let parts = expr.as_array().unwrap();
        assert_eq!(parts[0], json!("case"));
        assert_eq!(parts[1], json!(["has", "windSpeedStyle"]));
        assert_eq!(parts[3], json!(["has", "value"]));
        assert_eq!(parts[5], json!(["has", "speed"]));
        assert_eq!(parts.last().unwrap(), &json!("wind-barb-10"));

        let inner = parts[2].as_array().unwrap();
        assert_eq!(inner[1], json!(["<", ["to-number", ["get", "windSpeedStyle"], 0], 3.0]));
        assert_eq!(inner[2], json!("wind-barb-0"));
        assert_eq!(inner.last().unwrap(), &json!("wind-barb-70"));
    }

    #[test]
    fn test_speed_unit_conversion_in_expression() {
        let expr = icon_image_expr(SpeedUnit::Ms);
        let first_test = &expr[2][1][1];
        assert_eq!(first_test[0], json!("*"));
        assert_eq!(first_test[2], json!(1.943_844));
    }

    #[test]
    fn test_probe_property_prefers_first_alias() {
        let mut props = FeatureProperties::new();
        props.insert("speed".to_string(), json!(4));
        props.insert("value".to_string(), json!("12.5"));
        assert_eq!(probe_property(&props, &SPEED_PROPERTY_ALIASES).map(|(name, _)| name), Some("value"));
        assert_eq!(feature_speed_knots(&props, SpeedUnit::Knots), Some(12.5));
        assert!(probe_property(&props, &DIRECTION_PROPERTY_ALIASES).is_none());
    }

    #[test]
    fn test_gradient_heights_and_ordering() {
        let style = SwellStyle {
            gradient: vec![
                GradientStop { value: "6m+".to_string(), color: "#111111".to_string() },
                GradientStop { value: "1m".to_string(), color: "#222222".to_string() },
                GradientStop { value: "n/a".to_string(), color: "#333333".to_string() },
            ],
            ..SwellStyle::default()
        };
        let expr = swell_color_expr(&style);
        assert_eq!(expr[3], json!(1.0));
        assert_eq!(expr[4], json!("#222222"));
        assert_eq!(expr[5], json!(6.0));
        assert_eq!(expr.as_array().unwrap().len(), 7);

        let empty = SwellStyle { gradient: Vec::new(), ..SwellStyle::default() };
        assert_eq!(swell_color_expr(&empty), json!("#1e3a8a"));
    }

    #[test]
    fn test_main_layer_per_kind() {
        let wind = OverlayDefinition::wind();
        let layer = main_layer(&wind, "wind-contours", &LayerStyleConfig::default_for(OverlayKind::Wind));
        assert_eq!(layer.layer_type, LayerType::Symbol);
        assert_eq!(layer.id, "overlay-layer-wind");
        assert_eq!(layer.source, "overlay-source-wind");
        assert_eq!(layer.layout["icon-size"], json!(0.8));
        assert_eq!(layer.layout["text-field"], json!(""));

        let pressure = OverlayDefinition::new("pressure", "msl", "t", OverlayKind::Pressure);
        let layer = main_layer(&pressure, "msl", &LayerStyleConfig::default_for(OverlayKind::Pressure));
        assert_eq!(layer.layer_type, LayerType::Line);
        assert_eq!(layer.paint["line-opacity"], json!(0.8));
    }

    #[test]
    fn test_dots_style_sizes_by_speed() {
        let style = WindStyle { barb_style: BarbStyle::Dots, ..WindStyle::default() };
        assert_eq!(wind_text_field(&style), json!("●"));
        assert_eq!(wind_icon_image(&style), json!(""));
        assert_eq!(wind_text_size(&style)[0], json!("interpolate"));
    }
}
