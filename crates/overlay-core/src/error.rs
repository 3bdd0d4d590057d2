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

//! Errors surfaced by the overlay manager.

use thiserror::Error;

use crate::engine::EngineError;
use crate::tile_access::TileAccessError;

/// Why an activation did not complete.
#[derive(Debug, Error)]
pub enum OverlayError {
    /// Name is not in the overlay registry. Nothing was touched.
    #[error("unknown overlay '{0}'")]
    UnknownOverlay(String),

    /// Map style has not finished loading. Nothing was touched.
    #[error("map style is not loaded yet")]
    NotReady,

    /// Metadata lookup or URL construction failed.
    #[error("failed to resolve overlay '{overlay}': {message}")]
    ResolutionFailed {
        overlay: String,
        status: Option<u16>,
        message: String,
    },

    /// The engine rejected a source or layer. Partial registrations were removed.
    #[error("map engine rejected overlay '{overlay}': {source}")]
    RegistrationFailed {
        overlay: String,
        #[source]
        source: EngineError,
    },
}

impl OverlayError {
    pub(crate) fn resolution(overlay: &str, err: &TileAccessError) -> Self {
        OverlayError::ResolutionFailed {
            overlay: overlay.to_string(),
            status: err.status(),
            message: err.to_string(),
        }
    }

    /// Upstream HTTP status for resolution failures.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            OverlayError::ResolutionFailed { status, .. } => *status,
            _ => None,
        }
    }

    /// Short text suitable for a user-facing notification.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            OverlayError::UnknownOverlay(name) => format!("There is no overlay called '{name}'."),
            OverlayError::NotReady => {
                "Please wait for the map to fully load before adding layers.".to_string()
            }
            OverlayError::ResolutionFailed { overlay, status: Some(401 | 403), .. } => {
                format!("Access to the {overlay} layer was denied. Check your token and try again.")
            }
            OverlayError::ResolutionFailed { overlay, status: Some(404), .. } => {
                format!("The provider does not know the {overlay} layer.")
            }
            OverlayError::ResolutionFailed { overlay, .. }
            | OverlayError::RegistrationFailed { overlay, .. } => {
                format!("Failed to add the {overlay} layer. Please check the token and try again.")
            }
        }
    }
}

/// A single style property the engine refused. Never fatal.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("failed to update {property} on '{layer_id}': {reason}")]
pub struct PropertyUpdateFailed {
    pub overlay: String,
    pub layer_id: String,
    pub property: String,
    pub reason: String,
}
