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

//! DTN map API tile access.

use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, info};
use reqwest::header::ACCEPT;
use reqwest::Url;
use serde_json::Value;

use super::{bare_token, AuthStrategy, TileAccess, TileAccessError, TokenStore, TransformedRequest};

/// Production base URL for both the style metadata and tile endpoints.
pub const DEFAULT_API_BASE: &str = "https://map.api.dtn.com";

/// Tile access against the DTN map API.
pub struct DtnTileAccess {
    client: reqwest::Client,
    tokens: Arc<dyn TokenStore>,
    style_base: String,
    tile_base: String,
    strategy: AuthStrategy,
}

impl std::fmt::Debug for DtnTileAccess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DtnTileAccess")
            .field("style_base", &self.style_base)
            .field("tile_base", &self.tile_base)
            .field("strategy", &self.strategy)
            .finish_non_exhaustive()
    }
}

impl DtnTileAccess {
    /// Create a tile access client reading its token from `tokens`.
    #[must_use]
    pub fn new(tokens: Arc<dyn TokenStore>) -> Self {
        Self {
            client: reqwest::Client::new(),
            tokens,
            style_base: DEFAULT_API_BASE.to_string(),
            tile_base: DEFAULT_API_BASE.to_string(),
            strategy: AuthStrategy::default(),
        }
    }

    /// Point the metadata and tile endpoints somewhere else.
    #[must_use]
    pub fn with_base_urls(mut self, style_base: &str, tile_base: &str) -> Self {
        self.style_base = style_base.trim_end_matches('/').to_string();
        self.tile_base = tile_base.trim_end_matches('/').to_string();
        self
    }

    #[must_use]
    pub fn with_auth_strategy(mut self, strategy: AuthStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    fn token(&self) -> Result<String, TileAccessError> {
        self.tokens
            .get()
            .map(|t| bare_token(&t).to_string())
            .filter(|t| !t.is_empty())
            .ok_or(TileAccessError::MissingToken)
    }

    /// Whether `url` points at the tile host: same scheme, host and port, with
    /// a path under the tile base path.
    fn is_tile_url(&self, url: &str) -> bool {
        let (Ok(base), Ok(target)) = (Url::parse(&self.tile_base), Url::parse(url)) else {
            return false;
        };
        if base.scheme() != target.scheme()
            || base.host_str() != target.host_str()
            || base.port_or_known_default() != target.port_or_known_default()
        {
            return false;
        }
        let prefix = base.path().trim_end_matches('/');
        prefix.is_empty() || target.path() == prefix || target.path().starts_with(&format!("{prefix}/"))
    }

    fn style_url(&self, remote_layer_id: &str) -> String {
        format!("{}/v2/styles/{}", self.style_base, remote_layer_id)
    }
}

/// Pull `[0].mapBoxStyle.layers[0]["source-layer"]` out of a styles response.
pub(crate) fn parse_source_layer(body: &Value) -> Result<String, TileAccessError> {
    body.get(0)
        .and_then(|style| style.get("mapBoxStyle"))
        .and_then(|style| style.get("layers"))
        .and_then(|layers| layers.get(0))
        .and_then(|layer| layer.get("source-layer"))
        .and_then(Value::as_str)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .ok_or_else(|| TileAccessError::Parse("missing [0].mapBoxStyle.layers[0].source-layer".to_string()))
}

#[async_trait]
impl TileAccess for DtnTileAccess {
    async fn resolve_source_layer(&self, remote_layer_id: &str) -> Result<String, TileAccessError> {
        let token = self.token()?;
        let url = self.style_url(remote_layer_id);
        info!("Fetching source layer for {}", remote_layer_id);

        let response = self
            .client
            .get(&url)
            .bearer_auth(&token)
            .header(ACCEPT, "application/json")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(TileAccessError::Status {
                status: status.as_u16(),
                reason: status.canonical_reason().unwrap_or_default().to_string(),
            });
        }

        let body: Value = response.json().await?;
        let source_layer = parse_source_layer(&body)?;
        debug!("Source layer for {}: {}", remote_layer_id, source_layer);
        Ok(source_layer)
    }

    fn tile_url_template(&self, remote_layer_id: &str, tile_set_id: &str) -> Result<String, TileAccessError> {
        let base = format!(
            "{}/v2/tiles/{}/{}/{{z}}/{{x}}/{{y}}.pbf",
            self.tile_base, remote_layer_id, tile_set_id
        );

        match self.strategy {
            AuthStrategy::QueryParameter => Ok(format!("{base}?token={}", self.token()?)),
            AuthStrategy::BearerHeader => {
                // The hook needs a token at request time; fail early instead.
                self.token()?;
                Ok(base)
            }
        }
    }

    fn auth_strategy(&self) -> AuthStrategy {
        self.strategy
    }

    fn transform_request(&self, url: &str) -> Option<TransformedRequest> {
        if self.strategy != AuthStrategy::BearerHeader || !self.is_tile_url(url) {
            return None;
        }
        let token = self.token().ok()?;
        Some(TransformedRequest {
            url: url.to_string(),
            headers: vec![("Authorization".to_string(), format!("Bearer {token}"))],
        })
    }
}
