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

//! Static overlay definitions.
//!
//! Each overlay names a remote weather layer and tile set on the provider and
//! the rendering family used to draw it. Ids registered with the map engine
//! are derived from the overlay name so the manager never collides with ids
//! owned by other map collaborators.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Prefix for every vector source the manager registers.
pub const SOURCE_PREFIX: &str = "overlay-source-";

/// Prefix for every rendering layer the manager registers.
pub const LAYER_PREFIX: &str = "overlay-layer-";

/// Suffixes of auxiliary layers that may accompany a main overlay layer.
/// Removal sweeps all of them whether or not they were added.
pub const DERIVED_LAYER_SUFFIXES: [&str; 4] = ["-debug", "-fallback", "-fill", "-blur"];

/// Built-in wind overlay on the DTN map API.
pub const WIND_REMOTE_LAYER_ID: &str = "fcst-manta-wind-speed-contours";
pub const WIND_TILE_SET_ID: &str = "b864ff86-22af-41fc-963e-38837d457566";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("overlay '{0}' is defined more than once")]
    Duplicate(String),

    #[error("overlay name must not be empty")]
    EmptyName,

    #[error("overlay '{name}' would share layer ids with overlay '{base}'")]
    LayerIdCollision { name: String, base: String },
}

/// Rendering family of an overlay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverlayKind {
    /// Symbol layer with barb icons or glyphs, rotated by direction.
    #[default]
    Wind,
    /// Line contours coloured by pressure value.
    Pressure,
    /// Filled polygons coloured by wave height.
    Swell,
}

impl OverlayKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            OverlayKind::Wind => "wind",
            OverlayKind::Pressure => "pressure",
            OverlayKind::Swell => "swell",
        }
    }

    /// Whether activation must make sure the barb icon set is registered.
    #[must_use]
    pub fn requires_icons(self) -> bool {
        matches!(self, OverlayKind::Wind)
    }
}

fn default_min_zoom() -> u8 {
    0
}

fn default_max_zoom() -> u8 {
    14
}

/// One entry of the overlay registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverlayDefinition {
    /// Unique short name, e.g. "wind".
    pub name: String,

    /// Provider identifier of the weather data layer.
    pub remote_layer_id: String,

    /// Provider identifier of the tile set.
    pub tile_set_id: String,

    #[serde(default)]
    pub kind: OverlayKind,

    #[serde(default = "default_min_zoom")]
    pub min_zoom: u8,

    #[serde(default = "default_max_zoom")]
    pub max_zoom: u8,
}

impl OverlayDefinition {
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        remote_layer_id: impl Into<String>,
        tile_set_id: impl Into<String>,
        kind: OverlayKind,
    ) -> Self {
        Self {
            name: name.into(),
            remote_layer_id: remote_layer_id.into(),
            tile_set_id: tile_set_id.into(),
            kind,
            min_zoom: default_min_zoom(),
            max_zoom: default_max_zoom(),
        }
    }

    /// The built-in wind overlay.
    #[must_use]
    pub fn wind() -> Self {
        Self::new("wind", WIND_REMOTE_LAYER_ID, WIND_TILE_SET_ID, OverlayKind::Wind)
    }

    #[must_use]
    pub fn source_id(&self) -> String {
        source_id(&self.name)
    }

    #[must_use]
    pub fn layer_id(&self) -> String {
        layer_id(&self.name)
    }
}

#[must_use]
pub fn source_id(overlay: &str) -> String {
    format!("{SOURCE_PREFIX}{overlay}")
}

#[must_use]
pub fn layer_id(overlay: &str) -> String {
    format!("{LAYER_PREFIX}{overlay}")
}

/// Main layer id followed by every derived layer id for an overlay.
#[must_use]
pub fn layer_ids(overlay: &str) -> Vec<String> {
    let main = layer_id(overlay);
    let mut ids = Vec::with_capacity(DERIVED_LAYER_SUFFIXES.len() + 1);
    ids.extend(DERIVED_LAYER_SUFFIXES.iter().map(|suffix| format!("{main}{suffix}")));
    ids.insert(0, main);
    ids
}

/// Ordered, immutable set of known overlays.
#[derive(Debug, Clone)]
pub struct OverlayRegistry {
    definitions: Vec<OverlayDefinition>,
}

impl OverlayRegistry {
    /// Build a registry, rejecting empty or duplicate names and names whose
    /// main layer id is a derived layer id of another overlay.
    pub fn new(definitions: Vec<OverlayDefinition>) -> Result<Self, RegistryError> {
        for (i, def) in definitions.iter().enumerate() {
            if def.name.trim().is_empty() {
                return Err(RegistryError::EmptyName);
            }
            if definitions[..i].iter().any(|other| other.name == def.name) {
                return Err(RegistryError::Duplicate(def.name.clone()));
            }
        }

        for def in &definitions {
            let collision = DERIVED_LAYER_SUFFIXES.iter().find_map(|suffix| {
                let base = def.name.strip_suffix(suffix)?;
                definitions.iter().any(|other| other.name == base).then_some(base)
            });
            if let Some(base) = collision {
                return Err(RegistryError::LayerIdCollision {
                    name: def.name.clone(),
                    base: base.to_string(),
                });
            }
        }
        Ok(Self { definitions })
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&OverlayDefinition> {
        self.definitions.iter().find(|def| def.name == name)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &OverlayDefinition> {
        self.definitions.iter()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.definitions.iter().map(|def| def.name.as_str())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

impl Default for OverlayRegistry {
    fn default() -> Self {
        Self {
            definitions: vec![OverlayDefinition::wind()],
        }
    }
}
