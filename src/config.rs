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

//! Application configuration management.
//!
//! Persistent settings live in a TOML file managed by `confy`. Every field has
//! a serde default so older or hand-edited files keep loading.

use std::collections::BTreeMap;
use std::time::Duration;

use log::warn;
use overlay_core::style::{PressureStyle, SwellStyle, WindStyle};
use overlay_core::tile_access::DEFAULT_API_BASE;
use overlay_core::{
    AuthStrategy, LayerStyleConfig, ManagerConfig, OverlayDefinition, OverlayKind, OverlayRegistry, RegistryError,
};
use serde::{Deserialize, Serialize};

/// Application name used for configuration directories
pub const APP_NAME: &str = "weather-overlay";

const CONFIG_NAME: &str = "config";

/// Default style for each overlay kind
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct StyleDefaults {
    #[serde(default)]
    pub wind: WindStyle,

    #[serde(default)]
    pub pressure: PressureStyle,

    #[serde(default)]
    pub swell: SwellStyle,
}

impl StyleDefaults {
    pub fn for_kind(&self, kind: OverlayKind) -> LayerStyleConfig {
        match kind {
            OverlayKind::Wind => LayerStyleConfig::Wind(self.wind.clone()),
            OverlayKind::Pressure => LayerStyleConfig::Pressure(self.pressure.clone()),
            OverlayKind::Swell => LayerStyleConfig::Swell(self.swell.clone()),
        }
    }
}

/// Application configuration stored in TOML format
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct AppConfig {
    /// Configuration schema version for migrations
    #[serde(default = "default_config_version")]
    pub config_version: u32,

    /// How the access token reaches the tile host
    #[serde(default)]
    pub auth_strategy: AuthStrategy,

    /// Base URL of the style metadata API
    #[serde(default = "default_api_base")]
    pub style_api_base: String,

    /// Base URL of the vector tile API
    #[serde(default = "default_api_base")]
    pub tile_api_base: String,

    /// Seconds to wait for layer metadata before giving up
    #[serde(default = "default_metadata_timeout_secs")]
    pub metadata_timeout_secs: u64,

    /// Draw point markers under overlays
    #[serde(default)]
    pub debug_markers: bool,

    /// Insert overlays below this map layer
    #[serde(default)]
    pub before_layer_id: Option<String>,

    /// Overlays turned on when no explicit set is given
    #[serde(default)]
    pub default_active: Vec<String>,

    /// Known overlays
    #[serde(default = "default_overlays")]
    pub overlays: Vec<OverlayDefinition>,

    /// Starting style per overlay kind
    #[serde(default)]
    pub styles: StyleDefaults,
}

// Default value functions for serde
fn default_config_version() -> u32 {
    1
}

fn default_api_base() -> String {
    DEFAULT_API_BASE.to_string()
}

fn default_metadata_timeout_secs() -> u64 {
    10
}

fn default_overlays() -> Vec<OverlayDefinition> {
    vec![OverlayDefinition::wind()]
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            config_version: default_config_version(),
            auth_strategy: AuthStrategy::default(),
            style_api_base: default_api_base(),
            tile_api_base: default_api_base(),
            metadata_timeout_secs: default_metadata_timeout_secs(),
            debug_markers: false,
            before_layer_id: None,
            default_active: Vec::new(),
            overlays: default_overlays(),
            styles: StyleDefaults::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from disk, creating it with defaults when missing
    pub fn load() -> Result<Self, confy::ConfyError> {
        confy::load(APP_NAME, CONFIG_NAME)
    }

    /// Save configuration to disk
    pub fn save(&self) -> Result<(), confy::ConfyError> {
        confy::store(APP_NAME, CONFIG_NAME, self)
    }

    /// Get the config file path for display to user
    pub fn get_config_path() -> Result<std::path::PathBuf, confy::ConfyError> {
        confy::get_configuration_file_path(APP_NAME, CONFIG_NAME)
    }

    pub fn registry(&self) -> Result<OverlayRegistry, RegistryError> {
        OverlayRegistry::new(self.overlays.clone())
    }

    pub fn manager_config(&self) -> ManagerConfig {
        ManagerConfig {
            metadata_timeout: Duration::from_secs(self.metadata_timeout_secs.max(1)),
            debug_markers: self.debug_markers,
            before_layer_id: self.before_layer_id.clone(),
            ..ManagerConfig::default()
        }
    }

    /// Desired active set: the named overlays, or `default_active` when none
    /// are named. Names not in the registry are dropped with a warning.
    pub fn desired_set(&self, requested: &[String]) -> BTreeMap<String, bool> {
        let names = if requested.is_empty() {
            &self.default_active
        } else {
            requested
        };

        let mut desired: BTreeMap<String, bool> =
            self.overlays.iter().map(|def| (def.name.clone(), false)).collect();
        for name in names {
            match desired.get_mut(name) {
                Some(wanted) => *wanted = true,
                None => warn!("Unknown overlay '{}' ignored", name),
            }
        }
        desired
    }
}
