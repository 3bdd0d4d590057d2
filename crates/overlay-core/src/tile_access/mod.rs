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

//! Tile access: credentials and tile/metadata endpoints of the weather provider.
//!
//! The overlay manager only ever reads the credential through a
//! [`TokenStore`]; where the token lives (memory, a file, an env var) is the
//! host application's business.

mod dtn;

pub use dtn::{DtnTileAccess, DEFAULT_API_BASE};

use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TileAccessError {
    #[error("no access token available")]
    MissingToken,

    #[error("provider returned HTTP {status} {reason}")]
    Status { status: u16, reason: String },

    #[error("request failed: {message}")]
    Http { status: Option<u16>, message: String },

    #[error("unexpected metadata response: {0}")]
    Parse(String),
}

impl TileAccessError {
    /// Upstream HTTP status, when the failure carried one.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            TileAccessError::Status { status, .. } => Some(*status),
            TileAccessError::Http { status, .. } => *status,
            TileAccessError::MissingToken | TileAccessError::Parse(_) => None,
        }
    }
}

impl From<reqwest::Error> for TileAccessError {
    fn from(err: reqwest::Error) -> Self {
        TileAccessError::Http {
            status: err.status().map(|s| s.as_u16()),
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Error)]
#[error("token storage failed: {0}")]
pub struct TokenStoreError(pub String);

/// Read/write access to the provider credential.
pub trait TokenStore: Send + Sync {
    fn get(&self) -> Option<String>;
    fn set(&self, token: &str) -> Result<(), TokenStoreError>;
    fn clear(&self) -> Result<(), TokenStoreError>;
}

/// Token held in memory only.
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    token: Mutex<Option<String>>,
}

impl MemoryTokenStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            token: Mutex::new(Some(token.into())),
        }
    }
}

impl TokenStore for MemoryTokenStore {
    fn get(&self) -> Option<String> {
        self.token
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .filter(|t| !t.is_empty())
    }

    fn set(&self, token: &str) -> Result<(), TokenStoreError> {
        *self.token.lock().unwrap_or_else(PoisonError::into_inner) = Some(token.to_string());
        Ok(())
    }

    fn clear(&self) -> Result<(), TokenStoreError> {
        *self.token.lock().unwrap_or_else(PoisonError::into_inner) = None;
        Ok(())
    }
}

/// Strip an optional `Bearer ` prefix from a stored token.
#[must_use]
pub fn bare_token(token: &str) -> &str {
    let token = token.trim();
    token.strip_prefix("Bearer ").unwrap_or(token).trim()
}

/// How tile requests authenticate. Exactly one is in effect at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthStrategy {
    /// Token embedded as `?token=` in the tile URL template. Leaks the token
    /// into logs and caches.
    QueryParameter,
    /// Clean URL; the engine's request hook adds an `Authorization` header.
    #[default]
    BearerHeader,
}

/// Result of the request hook for one tile URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformedRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
}

/// Provider-facing collaborator of the overlay manager.
#[async_trait]
pub trait TileAccess: Send + Sync {
    /// Name of the vector-tile source layer behind a remote layer id.
    async fn resolve_source_layer(&self, remote_layer_id: &str) -> Result<String, TileAccessError>;

    /// Tile URL template with `{z}/{x}/{y}` placeholders.
    fn tile_url_template(&self, remote_layer_id: &str, tile_set_id: &str) -> Result<String, TileAccessError>;

    fn auth_strategy(&self) -> AuthStrategy;

    /// Request hook for the engine; only used with [`AuthStrategy::BearerHeader`].
    fn transform_request(&self, _url: &str) -> Option<TransformedRequest> {
        None
    }
}
