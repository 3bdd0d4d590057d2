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

//! Access token persistence.
//!
//! The token lives in its own confy file next to the main configuration so it
//! can be cleared without touching other settings. A non-empty
//! `DTN_API_TOKEN` environment variable always wins over the file.

use std::path::{Path, PathBuf};

use log::{debug, warn};
use overlay_core::{TokenStore, TokenStoreError};
use serde::{Deserialize, Serialize};

use crate::config::APP_NAME;

/// Environment variable that overrides the stored token
pub const TOKEN_ENV_VAR: &str = "DTN_API_TOKEN";

const TOKEN_FILE_NAME: &str = "token";

#[derive(Debug, Default, Serialize, Deserialize)]
struct TokenFile {
    #[serde(default)]
    token: Option<String>,
}

/// Where the active token came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenSource {
    Environment,
    File,
}

impl TokenSource {
    pub fn label(self) -> &'static str {
        match self {
            TokenSource::Environment => "environment variable",
            TokenSource::File => "token file",
        }
    }
}

#[derive(Debug, Clone)]
pub struct FileTokenStore {
    path: PathBuf,
    env_var: Option<&'static str>,
}

impl FileTokenStore {
    /// Store in the standard configuration directory
    pub fn new() -> Result<Self, confy::ConfyError> {
        let path = confy::get_configuration_file_path(APP_NAME, TOKEN_FILE_NAME)?;
        Ok(Self::at(path).with_env_var(Some(TOKEN_ENV_VAR)))
    }

    /// Store at an explicit path with no environment override
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            env_var: None,
        }
    }

    #[must_use]
    pub fn with_env_var(mut self, env_var: Option<&'static str>) -> Self {
        self.env_var = env_var;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn from_env(&self) -> Option<String> {
        let var = self.env_var?;
        std::env::var(var).ok().filter(|token| !token.trim().is_empty())
    }

    fn from_file(&self) -> Option<String> {
        if !self.path.exists() {
            return None;
        }
        match confy::load_path::<TokenFile>(&self.path) {
            Ok(file) => file.token.filter(|token| !token.trim().is_empty()),
            Err(e) => {
                warn!("Could not read token file {}: {}", self.path.display(), e);
                None
            }
        }
    }

    /// Source of the token `get` would return
    pub fn source(&self) -> Option<TokenSource> {
        if self.from_env().is_some() {
            Some(TokenSource::Environment)
        } else if self.from_file().is_some() {
            Some(TokenSource::File)
        } else {
            None
        }
    }

    fn write(&self, token: Option<String>) -> Result<(), TokenStoreError> {
        confy::store_path(&self.path, TokenFile { token }).map_err(|e| TokenStoreError(e.to_string()))
    }
}

impl TokenStore for FileTokenStore {
    fn get(&self) -> Option<String> {
        self.from_env().or_else(|| self.from_file())
    }

    fn set(&self, token: &str) -> Result<(), TokenStoreError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(TokenStoreError("refusing to store an empty token".to_string()));
        }
        self.write(Some(token.to_string()))?;
        debug!("Stored token in {}", self.path.display());
        Ok(())
    }

    fn clear(&self) -> Result<(), TokenStoreError> {
        self.write(None)?;
        debug!("Cleared token in {}", self.path.display());
        Ok(())
    }
}

/// Shorten a token for display
pub fn mask_token(token: &str) -> String {
    let visible: String = token.chars().take(4).collect();
    if token.chars().count() <= 8 {
        "****".to_string()
    } else {
        format!("{visible}****")
    }
}
