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

//! Map engine boundary.
//!
//! The overlay manager never talks to a renderer directly. It drives an
//! implementation of [`MapEngine`], which mirrors the source/layer/image API
//! of Mapbox-GL-style engines. [`StyleDocument`] is an in-process
//! implementation that keeps the resulting style as data.

mod document;

pub use document::StyleDocument;

use image::RgbaImage;
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

/// Properties of one rendered feature, as returned by the engine.
pub type FeatureProperties = Map<String, Value>;

/// Errors raised by a map engine when it rejects a mutation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EngineError {
    #[error("source '{0}' already exists")]
    DuplicateSource(String),

    #[error("layer '{0}' already exists")]
    DuplicateLayer(String),

    #[error("source '{0}' does not exist")]
    MissingSource(String),

    #[error("layer '{0}' does not exist")]
    MissingLayer(String),

    #[error("source '{source_id}' is still used by layer '{layer_id}'")]
    SourceInUse { source_id: String, layer_id: String },

    #[error("image '{0}' already exists")]
    DuplicateImage(String),

    #[error("invalid value for '{property}' on layer '{layer_id}': {reason}")]
    InvalidProperty {
        layer_id: String,
        property: String,
        reason: String,
    },
}

/// Tile source kinds the manager registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Vector,
}

/// Descriptor passed to [`MapEngine::add_source`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceDescriptor {
    #[serde(rename = "type")]
    pub kind: SourceKind,
    pub tiles: Vec<String>,
    pub minzoom: u8,
    pub maxzoom: u8,
}

impl SourceDescriptor {
    #[must_use]
    pub fn vector(tile_url: String, minzoom: u8, maxzoom: u8) -> Self {
        Self {
            kind: SourceKind::Vector,
            tiles: vec![tile_url],
            minzoom,
            maxzoom,
        }
    }
}

/// Rendering type of a layer; decides which style properties it accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LayerType {
    Symbol,
    Circle,
    Line,
    Fill,
}

impl LayerType {
    /// Property name prefixes accepted for the given property kind.
    #[must_use]
    pub fn property_prefixes(self, kind: PropertyKind) -> &'static [&'static str] {
        match (self, kind) {
            (LayerType::Symbol, PropertyKind::Paint) => &["icon-", "text-"],
            (LayerType::Symbol, PropertyKind::Layout) => &["icon-", "text-", "symbol-"],
            (LayerType::Circle, PropertyKind::Paint) => &["circle-"],
            (LayerType::Circle, PropertyKind::Layout) => &["circle-"],
            (LayerType::Line, _) => &["line-"],
            (LayerType::Fill, _) => &["fill-"],
        }
    }
}

/// Whether a style property lives in the paint or layout section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PropertyKind {
    Paint,
    Layout,
}

/// Descriptor passed to [`MapEngine::add_layer`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LayerDescriptor {
    pub id: String,

    #[serde(rename = "type")]
    pub layer_type: LayerType,

    pub source: String,

    #[serde(rename = "source-layer")]
    pub source_layer: String,

    #[serde(skip_serializing_if = "Map::is_empty")]
    pub layout: Map<String, Value>,

    #[serde(skip_serializing_if = "Map::is_empty")]
    pub paint: Map<String, Value>,
}

impl LayerDescriptor {
    #[must_use]
    pub fn new(id: String, layer_type: LayerType, source: String, source_layer: String) -> Self {
        Self {
            id,
            layer_type,
            source,
            source_layer,
            layout: Map::new(),
            paint: Map::new(),
        }
    }

    #[must_use]
    pub fn with_layout(mut self, property: &str, value: Value) -> Self {
        self.layout.insert(property.to_string(), value);
        self
    }

    #[must_use]
    pub fn with_paint(mut self, property: &str, value: Value) -> Self {
        self.paint.insert(property.to_string(), value);
        self
    }

    /// Current value of a property, if set.
    #[must_use]
    pub fn property(&self, kind: PropertyKind, property: &str) -> Option<&Value> {
        match kind {
            PropertyKind::Paint => self.paint.get(property),
            PropertyKind::Layout => self.layout.get(property),
        }
    }
}

/// Source/layer/image API of the rendering engine.
///
/// All calls happen on the thread that owns the engine; implementations do
/// not need internal synchronisation.
pub trait MapEngine: Send {
    /// Style and resources are loaded and mutations are accepted.
    fn is_style_loaded(&self) -> bool;

    fn add_source(&mut self, id: &str, source: SourceDescriptor) -> Result<(), EngineError>;
    fn remove_source(&mut self, id: &str) -> Result<(), EngineError>;
    fn has_source(&self, id: &str) -> bool;

    /// Add a layer, above everything or directly below `before_id`.
    fn add_layer(&mut self, layer: LayerDescriptor, before_id: Option<&str>) -> Result<(), EngineError>;
    fn remove_layer(&mut self, id: &str) -> Result<(), EngineError>;
    fn has_layer(&self, id: &str) -> bool;

    fn set_paint_property(&mut self, layer_id: &str, property: &str, value: Value) -> Result<(), EngineError>;
    fn set_layout_property(&mut self, layer_id: &str, property: &str, value: Value) -> Result<(), EngineError>;

    fn has_image(&self, name: &str) -> bool;
    fn add_image(&mut self, name: &str, image: RgbaImage) -> Result<(), EngineError>;

    /// Properties of features currently loaded for a source.
    fn query_source_features(&self, source_id: &str, source_layer: Option<&str>) -> Vec<FeatureProperties>;

    /// Dispatch to the paint or layout setter.
    fn set_property(
        &mut self,
        kind: PropertyKind,
        layer_id: &str,
        property: &str,
        value: Value,
    ) -> Result<(), EngineError> {
        match kind {
            PropertyKind::Paint => self.set_paint_property(layer_id, property, value),
            PropertyKind::Layout => self.set_layout_property(layer_id, property, value),
        }
    }
}
