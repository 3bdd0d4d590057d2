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

//! In-process map engine that keeps the style as a document.
//!
//! Enforces the same rules a live engine does (unique ids, layers must
//! reference an existing source, sources cannot be removed while in use,
//! properties must belong to the layer type) so the manager can be run
//! headless and its output written out as style JSON.

use std::collections::{BTreeMap, HashMap};

use image::RgbaImage;
use log::debug;
use serde_json::{json, Value};

use super::{
    EngineError, FeatureProperties, LayerDescriptor, MapEngine, PropertyKind, SourceDescriptor,
};

/// Style version emitted by [`StyleDocument::to_json`].
const STYLE_VERSION: u8 = 8;

/// Headless [`MapEngine`] backed by plain data.
#[derive(Debug, Default)]
pub struct StyleDocument {
    loaded: bool,
    sources: BTreeMap<String, SourceDescriptor>,
    layers: Vec<LayerDescriptor>,
    images: BTreeMap<String, RgbaImage>,
    features: HashMap<String, Vec<(Option<String>, FeatureProperties)>>,
    mutations: usize,
}

impl StyleDocument {
    /// A loaded, empty style.
    #[must_use]
    pub fn new() -> Self {
        Self {
            loaded: true,
            ..Self::default()
        }
    }

    /// A style that has not finished loading yet.
    #[must_use]
    pub fn unloaded() -> Self {
        Self::default()
    }

    pub fn set_loaded(&mut self, loaded: bool) {
        self.loaded = loaded;
    }

    /// Number of accepted mutations since creation.
    #[must_use]
    pub fn mutations(&self) -> usize {
        self.mutations
    }

    #[must_use]
    pub fn source(&self, id: &str) -> Option<&SourceDescriptor> {
        self.sources.get(id)
    }

    #[must_use]
    pub fn layer(&self, id: &str) -> Option<&LayerDescriptor> {
        self.layers.iter().find(|layer| layer.id == id)
    }

    /// Layer ids in draw order, bottom first.
    #[must_use]
    pub fn layer_ids(&self) -> Vec<&str> {
        self.layers.iter().map(|layer| layer.id.as_str()).collect()
    }

    pub fn source_ids(&self) -> impl Iterator<Item = &str> {
        self.sources.keys().map(String::as_str)
    }

    pub fn image_names(&self) -> impl Iterator<Item = &str> {
        self.images.keys().map(String::as_str)
    }

    #[must_use]
    pub fn image(&self, name: &str) -> Option<&RgbaImage> {
        self.images.get(name)
    }

    /// Make features available to [`MapEngine::query_source_features`].
    pub fn seed_features(
        &mut self,
        source_id: &str,
        source_layer: Option<&str>,
        features: impl IntoIterator<Item = FeatureProperties>,
    ) {
        let entry = self.features.entry(source_id.to_string()).or_default();
        entry.extend(
            features
                .into_iter()
                .map(|props| (source_layer.map(str::to_string), props)),
        );
    }

    /// Serialize the document in Mapbox-GL style form. Images are listed by
    /// name and size only.
    #[must_use]
    pub fn to_json(&self) -> Value {
        let images: Vec<Value> = self
            .images
            .iter()
            .map(|(name, image)| {
                json!({ "name": name, "width": image.width(), "height": image.height() })
            })
            .collect();

        json!({
            "version": STYLE_VERSION,
            "sources": self.sources,
            "layers": self.layers,
            "images": images,
        })
    }

    fn layer_mut(&mut self, id: &str) -> Result<&mut LayerDescriptor, EngineError> {
        self.layers
            .iter_mut()
            .find(|layer| layer.id == id)
            .ok_or_else(|| EngineError::MissingLayer(id.to_string()))
    }

    fn set_property_checked(
        &mut self,
        kind: PropertyKind,
        layer_id: &str,
        property: &str,
        value: Value,
    ) -> Result<(), EngineError> {
        let layer = self.layer_mut(layer_id)?;
        validate_property(layer, kind, property, &value)?;

        let section = match kind {
            PropertyKind::Paint => &mut layer.paint,
            PropertyKind::Layout => &mut layer.layout,
        };
        section.insert(property.to_string(), value);
        self.mutations += 1;
        Ok(())
    }
}

fn invalid(layer_id: &str, property: &str, reason: impl Into<String>) -> EngineError {
    EngineError::InvalidProperty {
        layer_id: layer_id.to_string(),
        property: property.to_string(),
        reason: reason.into(),
    }
}

/// Check a property name against the layer type and its value against the
/// property's family. Arrays are expressions and are accepted as-is.
fn validate_property(
    layer: &LayerDescriptor,
    kind: PropertyKind,
    property: &str,
    value: &Value,
) -> Result<(), EngineError> {
    let accepted = (kind == PropertyKind::Layout && property == "visibility")
        || layer
            .layer_type
            .property_prefixes(kind)
            .iter()
            .any(|prefix| property.starts_with(prefix));
    if !accepted {
        return Err(invalid(
            &layer.id,
            property,
            format!("not a {kind:?} property of a {:?} layer", layer.layer_type),
        ));
    }

    if value.is_array() {
        return Ok(());
    }

    if property.ends_with("-opacity") {
        match value.as_f64() {
            Some(v) if (0.0..=1.0).contains(&v) => Ok(()),
            _ => Err(invalid(&layer.id, property, "expected a number between 0 and 1")),
        }
    } else if property.ends_with("-color") {
        match value.as_str() {
            Some(s) if !s.is_empty() => Ok(()),
            _ => Err(invalid(&layer.id, property, "expected a colour string")),
        }
    } else if property.ends_with("-width") || property.ends_with("-size") || property == "symbol-spacing" {
        match value.as_f64() {
            Some(v) if v >= 0.0 => Ok(()),
            _ => Err(invalid(&layer.id, property, "expected a non-negative number")),
        }
    } else if property.ends_with("-allow-overlap") || property.ends_with("-ignore-placement") || property.ends_with("-antialias") {
        if value.is_boolean() {
            Ok(())
        } else {
            Err(invalid(&layer.id, property, "expected a boolean"))
        }
    } else {
        Ok(())
    }
}

impl MapEngine for StyleDocument {
    fn is_style_loaded(&self) -> bool {
        self.loaded
    }

    fn add_source(&mut self, id: &str, source: SourceDescriptor) -> Result<(), EngineError> {
        if self.sources.contains_key(id) {
            return Err(EngineError::DuplicateSource(id.to_string()));
        }
        debug!("Adding source {}", id);
        self.sources.insert(id.to_string(), source);
        self.mutations += 1;
        Ok(())
    }

    fn remove_source(&mut self, id: &str) -> Result<(), EngineError> {
        if let Some(layer) = self.layers.iter().find(|layer| layer.source == id) {
            return Err(EngineError::SourceInUse {
                source_id: id.to_string(),
                layer_id: layer.id.clone(),
            });
        }
        self.sources
            .remove(id)
            .ok_or_else(|| EngineError::MissingSource(id.to_string()))?;
        self.mutations += 1;
        Ok(())
    }

    fn has_source(&self, id: &str) -> bool {
        self.sources.contains_key(id)
    }

    fn add_layer(&mut self, layer: LayerDescriptor, before_id: Option<&str>) -> Result<(), EngineError> {
        if self.has_layer(&layer.id) {
            return Err(EngineError::DuplicateLayer(layer.id));
        }
        if !self.sources.contains_key(&layer.source) {
            return Err(EngineError::MissingSource(layer.source));
        }

        let index = match before_id {
            Some(before) => self
                .layers
                .iter()
                .position(|existing| existing.id == before)
                .ok_or_else(|| EngineError::MissingLayer(before.to_string()))?,
            None => self.layers.len(),
        };

        debug!("Adding layer {} at index {}", layer.id, index);
        self.layers.insert(index, layer);
        self.mutations += 1;
        Ok(())
    }

    fn remove_layer(&mut self, id: &str) -> Result<(), EngineError> {
        let index = self
            .layers
            .iter()
            .position(|layer| layer.id == id)
            .ok_or_else(|| EngineError::MissingLayer(id.to_string()))?;
        self.layers.remove(index);
        self.mutations += 1;
        Ok(())
    }

    fn has_layer(&self, id: &str) -> bool {
        self.layer(id).is_some()
    }

    fn set_paint_property(&mut self, layer_id: &str, property: &str, value: Value) -> Result<(), EngineError> {
        self.set_property_checked(PropertyKind::Paint, layer_id, property, value)
    }

    fn set_layout_property(&mut self, layer_id: &str, property: &str, value: Value) -> Result<(), EngineError> {
        self.set_property_checked(PropertyKind::Layout, layer_id, property, value)
    }

    fn has_image(&self, name: &str) -> bool {
        self.images.contains_key(name)
    }

    fn add_image(&mut self, name: &str, image: RgbaImage) -> Result<(), EngineError> {
        if self.images.contains_key(name) {
            return Err(EngineError::DuplicateImage(name.to_string()));
        }
        self.images.insert(name.to_string(), image);
        self.mutations += 1;
        Ok(())
    }

    fn query_source_features(&self, source_id: &str, source_layer: Option<&str>) -> Vec<FeatureProperties> {
        if !self.sources.contains_key(source_id) {
            return Vec::new();
        }
        self.features
            .get(source_id)
            .map(|features| {
                features
                    .iter()
                    .filter(|(layer, _)| source_layer.is_none() || layer.as_deref() == source_layer)
                    .map(|(_, props)| props.clone())
                    .collect()
            })
            .unwrap_or_default()
    }
}
