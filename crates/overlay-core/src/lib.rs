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

//! Weather overlays for vector-tile maps.
//!
//! This library manages DTN weather tile overlays on a Mapbox-style map
//! engine. It is split into layers that can be used on their own:
//!
//! - **Barb layer**: Wind-barb decomposition and icon rasterization
//! - **Style layer**: Per-overlay style configs and the engine properties they map to
//! - **Tile access**: Metadata lookup, tile URL templates and request authorization
//! - **Lifecycle layer**: Activation, deactivation and live restyling of overlays
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use overlay_core::{
//!     DtnTileAccess, ManagerConfig, MemoryTokenStore, OverlayManager, OverlayRegistry, StyleDocument,
//! };
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() {
//!     let tokens = Arc::new(MemoryTokenStore::with_token("my-token"));
//!     let manager = OverlayManager::new(
//!         StyleDocument::new(),
//!         OverlayRegistry::default(),
//!         Arc::new(DtnTileAccess::new(tokens)),
//!         ManagerConfig::default(),
//!     );
//!
//!     match manager.activate("wind").await {
//!         Ok(outcome) => println!("wind: {outcome:?}"),
//!         Err(err) => eprintln!("{}", err.user_message()),
//!     }
//! }
//! ```
//!
//! # Barb Icons
//!
//! ```
//! use overlay_core::barb::{bucket_for_speed, icon_name, render_barb, BarbDecomposition};
//!
//! let barb = BarbDecomposition::from_knots(65.0);
//! assert_eq!((barb.pennants, barb.full_barbs, barb.half_barb), (1, 1, true));
//!
//! assert_eq!(icon_name(bucket_for_speed(22.0)), "wind-barb-20");
//! let icon = render_barb(25.0);
//! assert_eq!(icon.dimensions(), (48, 48));
//! ```

pub mod barb;
pub mod engine;
pub mod error;
pub mod lifecycle;
pub mod registry;
pub mod style;
pub mod tile_access;

pub use engine::{EngineError, LayerDescriptor, MapEngine, SourceDescriptor, StyleDocument};
pub use error::{OverlayError, PropertyUpdateFailed};
pub use lifecycle::{
    ActivationOutcome, ManagerConfig, OverlayDiagnostics, OverlayEvent, OverlayManager, OverlayState,
    StyleUpdateReport,
};
pub use registry::{OverlayDefinition, OverlayKind, OverlayRegistry, RegistryError};
pub use style::{LayerStyleConfig, StyleUpdate};
pub use tile_access::{
    AuthStrategy, DtnTileAccess, MemoryTokenStore, TileAccess, TileAccessError, TokenStore, TokenStoreError,
};
