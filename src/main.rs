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

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use log::{error, info};
use overlay_core::barb::{barb_svg, icon_name, render_barb, SPEED_BUCKETS};
use overlay_core::{
    DtnTileAccess, OverlayManager, OverlayRegistry, StyleDocument, TileAccess, TokenStore,
};

mod config;
mod token_store;

use config::AppConfig;
use token_store::{mask_token, FileTokenStore};

#[derive(Parser, Debug)]
#[command(name = "weather-overlay", version, about = "DTN weather overlays for vector-tile maps")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Export every wind barb icon
    Icons {
        /// Output directory (defaults to the user data directory)
        #[arg(long, short)]
        output: Option<PathBuf>,

        #[arg(long, value_enum, default_value_t = IconFormat::Png)]
        format: IconFormat,
    },

    /// Manage the stored access token
    Token {
        #[command(subcommand)]
        action: TokenAction,
    },

    /// Look up the source layer and tile URL of an overlay
    Resolve { overlay: String },

    /// Activate overlays against an empty style and print the resulting style JSON
    Plan {
        /// Overlays to activate (defaults to `default_active` from the config)
        overlays: Vec<String>,

        /// Write the style JSON here instead of stdout
        #[arg(long, short)]
        output: Option<PathBuf>,

        /// Add point markers under each overlay
        #[arg(long)]
        debug_markers: bool,
    },

    /// Inspect the configuration file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum TokenAction {
    Set { token: String },
    Clear,
    Show,
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the config file location
    Path,
    /// Print the effective configuration
    Show,
    /// Overwrite the config file with defaults
    Reset,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum IconFormat {
    Png,
    Svg,
}

impl IconFormat {
    fn extension(self) -> &'static str {
        match self {
            IconFormat::Png => "png",
            IconFormat::Svg => "svg",
        }
    }
}

type CliResult = Result<(), Box<dyn std::error::Error>>;

#[tokio::main]
async fn main() -> CliResult {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    match cli.command {
        Command::Icons { output, format } => export_icons(output, format),
        Command::Token { action } => token_command(action),
        Command::Resolve { overlay } => resolve(&overlay).await,
        Command::Plan {
            overlays,
            output,
            debug_markers,
        } => plan(&overlays, output.as_deref(), debug_markers).await,
        Command::Config { action } => config_command(action),
    }
}

fn default_icon_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(config::APP_NAME)
        .join("icons")
}

fn export_icons(output: Option<PathBuf>, format: IconFormat) -> CliResult {
    let dir = output.unwrap_or_else(default_icon_dir);
    std::fs::create_dir_all(&dir)?;

    for bucket in SPEED_BUCKETS {
        let path = dir.join(format!("{}.{}", icon_name(bucket), format.extension()));
        match format {
            IconFormat::Png => render_barb(f64::from(bucket)).save(&path)?,
            IconFormat::Svg => std::fs::write(&path, barb_svg(f64::from(bucket)))?,
        }
    }

    info!("Wrote {} icons to {}", SPEED_BUCKETS.len(), dir.display());
    Ok(())
}

fn token_command(action: TokenAction) -> CliResult {
    let store = FileTokenStore::new()?;
    match action {
        TokenAction::Set { token } => {
            store.set(&token)?;
            println!("Token saved to {}", store.path().display());
        }
        TokenAction::Clear => {
            store.clear()?;
            println!("Token cleared");
        }
        TokenAction::Show => match (store.get(), store.source()) {
            (Some(token), Some(source)) => println!("{} (from {})", mask_token(&token), source.label()),
            _ => println!("No token configured. Use `token set` or {}.", token_store::TOKEN_ENV_VAR),
        },
    }
    Ok(())
}

fn tile_access(config: &AppConfig) -> Result<DtnTileAccess, confy::ConfyError> {
    let tokens = Arc::new(FileTokenStore::new()?);
    Ok(DtnTileAccess::new(tokens)
        .with_base_urls(&config.style_api_base, &config.tile_api_base)
        .with_auth_strategy(config.auth_strategy))
}

/// Hide any token embedded in a tile URL
fn redact_url(url: &str) -> String {
    match url.find("token=") {
        Some(pos) => {
            let value_start = pos + "token=".len();
            let value_end = url[value_start..]
                .find('&')
                .map_or(url.len(), |offset| value_start + offset);
            format!("{}****{}", &url[..value_start], &url[value_end..])
        }
        None => url.to_string(),
    }
}

async fn resolve(overlay: &str) -> CliResult {
    let config = AppConfig::load()?;
    let registry = config.registry()?;
    let Some(def) = registry.get(overlay) else {
        return Err(format!("unknown overlay '{overlay}'").into());
    };
    let tiles = tile_access(&config)?;

    let source_layer = tokio::time::timeout(
        config.manager_config().metadata_timeout,
        tiles.resolve_source_layer(&def.remote_layer_id),
    )
    .await
    .map_err(|_elapsed| format!("metadata request for '{overlay}' timed out"))??;
    let template = tiles.tile_url_template(&def.remote_layer_id, &def.tile_set_id)?;

    println!("overlay:      {}", def.name);
    println!("source layer: {source_layer}");
    println!("tiles:        {}", redact_url(&template));
    println!("auth:         {:?}", tiles.auth_strategy());
    Ok(())
}

async fn plan(overlays: &[String], output: Option<&Path>, debug_markers: bool) -> CliResult {
    let config = AppConfig::load()?;
    let registry: OverlayRegistry = config.registry()?;
    let mut manager_config = config.manager_config();
    manager_config.debug_markers |= debug_markers;

    let mut manager = OverlayManager::new(
        StyleDocument::new(),
        registry,
        Arc::new(tile_access(&config)?),
        manager_config,
    );
    for def in &config.overlays {
        manager = manager.with_style(&def.name, config.styles.for_kind(def.kind));
    }

    let mut failures = 0;
    for (name, result) in manager.reconcile(&config.desired_set(overlays)).await {
        match result {
            Ok(outcome) => info!("{}: {:?}", name, outcome),
            Err(e) => {
                failures += 1;
                error!("{}: {}", name, e);
                eprintln!("{}", e.user_message());
            }
        }
    }

    let style = manager.with_engine(StyleDocument::to_json);
    let rendered = serde_json::to_string_pretty(&style)?;
    match output {
        Some(path) => {
            std::fs::write(path, rendered)?;
            info!("Wrote style to {}", path.display());
        }
        None => println!("{rendered}"),
    }

    if failures > 0 {
        return Err(format!("{failures} overlay(s) failed to activate").into());
    }
    Ok(())
}

fn config_command(action: ConfigAction) -> CliResult {
    match action {
        ConfigAction::Path => println!("{}", AppConfig::get_config_path()?.display()),
        ConfigAction::Show => println!("{}", serde_json::to_string_pretty(&AppConfig::load()?)?),
        ConfigAction::Reset => {
            AppConfig::default().save()?;
            println!("Configuration reset: {}", AppConfig::get_config_path()?.display());
        }
    }
    Ok(())
}
