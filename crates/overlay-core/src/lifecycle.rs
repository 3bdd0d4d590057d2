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

//! Overlay lifecycle: activation, deactivation and live restyling.
//!
//! Every overlay is in one of three states:
//!
//! ```text
//!   Inactive --activate--> Activating --resolved + registered--> Active
//!      ^                       |                                   |
//!      +------- deactivate ----+------------ deactivate -----------+
//! ```
//!
//! All engine mutations happen while holding the manager lock and the lock is
//! never held across an await. An activation that is cancelled while its
//! metadata request is in flight finds its generation gone when it resumes and
//! leaves the engine untouched.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

use crate::barb::{icon_name, render_barb, SPEED_BUCKETS};
use crate::engine::{EngineError, MapEngine, SourceDescriptor};
use crate::error::{OverlayError, PropertyUpdateFailed};
use crate::registry::{layer_id, layer_ids, source_id, OverlayDefinition, OverlayRegistry};
use crate::style::{
    debug_layer, feature_speed_knots, main_layer, probe_property, LayerStyleConfig, SpeedUnit, StyleUpdate,
    DIRECTION_PROPERTY_ALIASES, SPEED_PROPERTY_ALIASES,
};
use crate::tile_access::TileAccess;

/// Default bound on the metadata request of one activation.
pub const DEFAULT_METADATA_TIMEOUT: Duration = Duration::from_secs(10);

/// Tunables for [`OverlayManager`].
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Bound on the metadata lookup. Expiry fails the activation.
    pub metadata_timeout: Duration,
    /// Draw red point markers under each overlay.
    pub debug_markers: bool,
    /// Insert overlay layers below this engine layer instead of on top.
    pub before_layer_id: Option<String>,
    /// Capacity of the event broadcast channel.
    pub event_capacity: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            metadata_timeout: DEFAULT_METADATA_TIMEOUT,
            debug_markers: false,
            before_layer_id: None,
            event_capacity: 64,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlayState {
    Inactive,
    Activating,
    Active,
}

/// How a call to [`OverlayManager::activate`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivationOutcome {
    /// The overlay is now rendered.
    Activated,
    /// The overlay was already active or activating and has been turned off.
    Deactivated,
    /// A deactivation arrived while metadata was in flight.
    Cancelled,
}

/// What happened to each key of a style update.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StyleUpdateReport {
    /// Engine properties that were set.
    pub applied: Vec<String>,
    /// Keys that are not fields of the overlay's style.
    pub ignored: Vec<String>,
    /// Properties that could not be set. The config keeps its old value.
    pub failed: Vec<PropertyUpdateFailed>,
}

impl StyleUpdateReport {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Lifecycle notifications for hosts that render status.
#[derive(Debug, Clone)]
pub enum OverlayEvent {
    Activating(String),
    Activated(String),
    Deactivated(String),
    ActivationFailed { overlay: String, message: String },
    StyleApplied { overlay: String, report: StyleUpdateReport },
}

/// Snapshot of what the engine holds for an active overlay.
#[derive(Debug, Clone, PartialEq)]
pub struct OverlayDiagnostics {
    pub overlay: String,
    pub source_layer: String,
    pub source_present: bool,
    pub layers_present: Vec<String>,
    pub feature_count: usize,
    /// First speed alias found on a sample feature.
    pub speed_field: Option<&'static str>,
    /// First direction alias found on a sample feature.
    pub direction_field: Option<&'static str>,
    /// Speed of the sample feature in knots, read with the configured unit.
    pub sample_speed_knots: Option<f64>,
    pub icons_loaded: usize,
}

enum Slot {
    Activating { generation: u64, cancel: CancellationToken },
    Active { source_layer: String },
}

impl Slot {
    fn state(&self) -> OverlayState {
        match self {
            Slot::Activating { .. } => OverlayState::Activating,
            Slot::Active { .. } => OverlayState::Active,
        }
    }
}

struct Inner<E> {
    engine: E,
    slots: HashMap<String, Slot>,
    active_order: Vec<String>,
    styles: HashMap<String, LayerStyleConfig>,
    next_generation: u64,
}

/// Owns every overlay source and layer on one map engine.
pub struct OverlayManager<E: MapEngine> {
    inner: Mutex<Inner<E>>,
    registry: OverlayRegistry,
    tiles: Arc<dyn TileAccess>,
    config: ManagerConfig,
    event_tx: broadcast::Sender<OverlayEvent>,
}

impl<E: MapEngine> fmt::Debug for OverlayManager<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OverlayManager")
            .field("registry", &self.registry)
            .field("config", &self.config)
            .field("active", &self.active_overlays())
            .finish_non_exhaustive()
    }
}

impl<E: MapEngine> OverlayManager<E> {
    pub fn new(engine: E, registry: OverlayRegistry, tiles: Arc<dyn TileAccess>, config: ManagerConfig) -> Self {
        let styles = registry
            .iter()
            .map(|def| (def.name.clone(), LayerStyleConfig::default_for(def.kind)))
            .collect();
        let (event_tx, _) = broadcast::channel(config.event_capacity.max(1));

        Self {
            inner: Mutex::new(Inner {
                engine,
                slots: HashMap::new(),
                active_order: Vec::new(),
                styles,
                next_generation: 0,
            }),
            registry,
            tiles,
            config,
            event_tx,
        }
    }

    /// Replace the starting style of an overlay. Ignored when the name is
    /// unknown or the style kind does not match the overlay.
    #[must_use]
    pub fn with_style(self, name: &str, style: LayerStyleConfig) -> Self {
        match self.registry.get(name) {
            Some(def) if def.kind == style.kind() => {
                self.lock().styles.insert(name.to_string(), style);
            }
            Some(def) => warn!(
                "Ignoring {} style for {} overlay '{}'",
                style.kind().as_str(),
                def.kind.as_str(),
                name
            ),
            None => warn!("Ignoring style for unknown overlay '{}'", name),
        }
        self
    }

    fn lock(&self) -> MutexGuard<'_, Inner<E>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: OverlayEvent) {
        // No subscribers is fine
        let _ = self.event_tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OverlayEvent> {
        self.event_tx.subscribe()
    }

    pub fn registry(&self) -> &OverlayRegistry {
        &self.registry
    }

    /// Run `f` against the engine while holding the manager lock.
    pub fn with_engine<R>(&self, f: impl FnOnce(&E) -> R) -> R {
        f(&self.lock().engine)
    }

    /// Mutable engine access for host events such as a style reload.
    pub fn with_engine_mut<R>(&self, f: impl FnOnce(&mut E) -> R) -> R {
        f(&mut self.lock().engine)
    }

    /// Names of active overlays in activation order.
    pub fn active_overlays(&self) -> Vec<String> {
        self.lock().active_order.clone()
    }

    pub fn state(&self, name: &str) -> OverlayState {
        self.lock()
            .slots
            .get(name)
            .map_or(OverlayState::Inactive, Slot::state)
    }

    pub fn is_active(&self, name: &str) -> bool {
        self.state(name) == OverlayState::Active
    }

    /// Current style config of an overlay, active or not.
    pub fn style(&self, name: &str) -> Option<LayerStyleConfig> {
        self.lock().styles.get(name).cloned()
    }

    /// Turn an overlay on. Calling this on an overlay that is already active
    /// or activating turns it off instead.
    pub async fn activate(&self, name: &str) -> Result<ActivationOutcome, OverlayError> {
        let def = self
            .registry
            .get(name)
            .ok_or_else(|| OverlayError::UnknownOverlay(name.to_string()))?
            .clone();

        let (generation, cancel) = {
            let mut inner = self.lock();
            if !inner.engine.is_style_loaded() {
                warn!("Map style not loaded, refusing to activate '{}'", name);
                return Err(OverlayError::NotReady);
            }

            if inner.slots.contains_key(name) {
                Self::deactivate_locked(&mut inner, name);
                drop(inner);
                self.emit(OverlayEvent::Deactivated(name.to_string()));
                return Ok(ActivationOutcome::Deactivated);
            }

            let generation = inner.next_generation;
            inner.next_generation += 1;
            let cancel = CancellationToken::new();
            inner.slots.insert(
                name.to_string(),
                Slot::Activating {
                    generation,
                    cancel: cancel.clone(),
                },
            );
            (generation, cancel)
        };
        let mut pending = PendingActivation {
            manager: self,
            name,
            generation,
            armed: true,
        };

        info!("Activating overlay '{}'", name);
        self.emit(OverlayEvent::Activating(name.to_string()));

        let resolved = tokio::select! {
            () = cancel.cancelled() => None,
            result = self.resolve(&def) => Some(result),
        };

        let mut inner = self.lock();
        pending.disarm();
        let still_wanted = matches!(
            inner.slots.get(name),
            Some(Slot::Activating { generation: current, .. }) if *current == generation
        );
        let Some(resolved) = resolved.filter(|_| still_wanted) else {
            info!("Activation of '{}' was cancelled", name);
            return Ok(ActivationOutcome::Cancelled);
        };

        let (source_layer, tile_url) = match resolved {
            Ok(pair) => pair,
            Err(err) => {
                inner.slots.remove(name);
                drop(inner);
                error!("Failed to activate '{}': {}", name, err);
                self.emit(OverlayEvent::ActivationFailed {
                    overlay: name.to_string(),
                    message: err.user_message(),
                });
                return Err(err);
            }
        };

        if let Err(source) = self.register(&mut inner, &def, &source_layer, tile_url) {
            Self::remove_registrations(&mut inner.engine, name);
            inner.slots.remove(name);
            drop(inner);
            let err = OverlayError::RegistrationFailed {
                overlay: name.to_string(),
                source,
            };
            error!("Failed to activate '{}': {}", name, err);
            self.emit(OverlayEvent::ActivationFailed {
                overlay: name.to_string(),
                message: err.user_message(),
            });
            return Err(err);
        }

        inner
            .slots
            .insert(name.to_string(), Slot::Active { source_layer: source_layer.clone() });
        inner.active_order.push(name.to_string());
        drop(inner);

        info!("Overlay '{}' active (source layer '{}')", name, source_layer);
        self.emit(OverlayEvent::Activated(name.to_string()));
        Ok(ActivationOutcome::Activated)
    }

    /// Same entry point a host toggle control would call.
    pub async fn toggle(&self, name: &str) -> Result<ActivationOutcome, OverlayError> {
        self.activate(name).await
    }

    async fn resolve(&self, def: &OverlayDefinition) -> Result<(String, String), OverlayError> {
        let lookup = self.tiles.resolve_source_layer(&def.remote_layer_id);
        let source_layer = match tokio::time::timeout(self.config.metadata_timeout, lookup).await {
            Ok(Ok(layer)) => layer,
            Ok(Err(err)) => return Err(OverlayError::resolution(&def.name, &err)),
            Err(_elapsed) => {
                return Err(OverlayError::ResolutionFailed {
                    overlay: def.name.clone(),
                    status: None,
                    message: format!(
                        "metadata request timed out after {}s",
                        self.config.metadata_timeout.as_secs_f64()
                    ),
                })
            }
        };
        debug!("Resolved '{}' to source layer '{}'", def.name, source_layer);

        let tile_url = self
            .tiles
            .tile_url_template(&def.remote_layer_id, &def.tile_set_id)
            .map_err(|err| OverlayError::resolution(&def.name, &err))?;
        Ok((source_layer, tile_url))
    }

    fn register(
        &self,
        inner: &mut Inner<E>,
        def: &OverlayDefinition,
        source_layer: &str,
        tile_url: String,
    ) -> Result<(), EngineError> {
        let Inner { engine, styles, .. } = inner;

        engine.add_source(
            &def.source_id(),
            SourceDescriptor::vector(tile_url, def.min_zoom, def.max_zoom),
        )?;

        if def.kind.requires_icons() {
            Self::ensure_icons(engine)?;
        }

        let before = self.config.before_layer_id.as_deref();
        if self.config.debug_markers {
            engine.add_layer(debug_layer(def, source_layer), before)?;
        }

        let style = styles
            .get(&def.name)
            .cloned()
            .unwrap_or_else(|| LayerStyleConfig::default_for(def.kind));
        engine.add_layer(main_layer(def, source_layer, &style), before)
    }

    /// Register every barb icon the engine does not already hold. Icons are
    /// shared across activations and never removed.
    fn ensure_icons(engine: &mut E) -> Result<(), EngineError> {
        let mut added = 0;
        for bucket in SPEED_BUCKETS {
            let name = icon_name(bucket);
            if engine.has_image(&name) {
                continue;
            }
            engine.add_image(&name, render_barb(f64::from(bucket)))?;
            added += 1;
        }
        if added > 0 {
            debug!("Registered {} wind barb icons", added);
        }
        Ok(())
    }

    /// Remove every layer id the overlay could own, then its source. Missing
    /// entries are skipped.
    fn remove_registrations(engine: &mut E, name: &str) {
        for id in layer_ids(name) {
            if !engine.has_layer(&id) {
                continue;
            }
            match engine.remove_layer(&id) {
                Ok(()) => debug!("Removed layer '{}'", id),
                Err(err) => warn!("Could not remove layer '{}': {}", id, err),
            }
        }

        let source = source_id(name);
        if !engine.has_source(&source) {
            debug!("Source '{}' already absent", source);
            return;
        }
        if let Err(err) = engine.remove_source(&source) {
            warn!("Could not remove source '{}': {}", source, err);
        }
    }

    fn deactivate_locked(inner: &mut Inner<E>, name: &str) -> bool {
        match inner.slots.remove(name) {
            None => {
                debug!("Overlay '{}' is not active, nothing to remove", name);
                false
            }
            Some(Slot::Activating { cancel, .. }) => {
                cancel.cancel();
                info!("Cancelled pending activation of '{}'", name);
                true
            }
            Some(Slot::Active { .. }) => {
                Self::remove_registrations(&mut inner.engine, name);
                inner.active_order.retain(|active| active != name);
                info!("Overlay '{}' removed", name);
                true
            }
        }
    }

    /// Turn an overlay off. Returns whether it was active or activating.
    pub fn deactivate(&self, name: &str) -> bool {
        let changed = Self::deactivate_locked(&mut self.lock(), name);
        if changed {
            self.emit(OverlayEvent::Deactivated(name.to_string()));
        }
        changed
    }

    /// Deactivate everything. Returns the names that were turned off.
    pub fn remove_all(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lock().slots.keys().cloned().collect();
        names.sort();
        names.retain(|name| self.deactivate(name));
        names
    }

    /// Apply a partial style change. Returns `None` without touching anything
    /// unless the overlay is active.
    pub fn apply_style_update(&self, name: &str, update: &StyleUpdate) -> Option<StyleUpdateReport> {
        let mut inner = self.lock();
        if !matches!(inner.slots.get(name), Some(Slot::Active { .. })) {
            debug!("Overlay '{}' is not active, ignoring style update", name);
            return None;
        }
        let mut current = inner.styles.get(name)?.clone();
        let target = layer_id(name);
        let mut report = StyleUpdateReport::default();

        for (key, value) in update {
            let Some(candidate) = current.with_field(key, value) else {
                if current.has_field(key) {
                    report.failed.push(PropertyUpdateFailed {
                        overlay: name.to_string(),
                        layer_id: target.clone(),
                        property: key.clone(),
                        reason: format!("unsupported value {value}"),
                    });
                } else {
                    report.ignored.push(key.clone());
                }
                continue;
            };

            let mut accepted = true;
            let mut landed = Vec::new();
            for push in candidate.property_pushes(key) {
                match inner.engine.set_property(push.kind, &target, push.property, push.value) {
                    Ok(()) => landed.push(push.property),
                    Err(err) => {
                        warn!("Failed to update {} on '{}': {}", push.property, target, err);
                        accepted = false;
                        report.failed.push(PropertyUpdateFailed {
                            overlay: name.to_string(),
                            layer_id: target.clone(),
                            property: push.property.to_string(),
                            reason: err.to_string(),
                        });
                    }
                }
            }
            if accepted {
                report.applied.extend(landed.into_iter().map(str::to_string));
                current = candidate;
                continue;
            }

            // The key is rejected as a whole; restore what already landed
            for push in current.property_pushes(key) {
                if !landed.contains(&push.property) {
                    continue;
                }
                if let Err(err) = inner.engine.set_property(push.kind, &target, push.property, push.value) {
                    warn!("Could not restore {} on '{}': {}", push.property, target, err);
                }
            }
        }

        inner.styles.insert(name.to_string(), current);
        drop(inner);

        self.emit(OverlayEvent::StyleApplied {
            overlay: name.to_string(),
            report: report.clone(),
        });
        Some(report)
    }

    /// Bring the active set in line with `desired`. Overlays missing from the
    /// map count as unwanted. Unknown names are skipped.
    pub async fn reconcile(
        &self,
        desired: &BTreeMap<String, bool>,
    ) -> Vec<(String, Result<ActivationOutcome, OverlayError>)> {
        let mut results = Vec::new();

        let mut current: Vec<String> = self.lock().slots.keys().cloned().collect();
        current.sort();
        for name in current {
            if !desired.get(&name).copied().unwrap_or(false) && self.deactivate(&name) {
                results.push((name, Ok(ActivationOutcome::Deactivated)));
            }
        }

        for (name, &wanted) in desired {
            if !wanted {
                continue;
            }
            if !self.registry.contains(name) {
                warn!("Ignoring unknown overlay '{}' in desired set", name);
                continue;
            }
            if self.state(name) != OverlayState::Inactive {
                continue;
            }
            let outcome = self.activate(name).await;
            results.push((name.clone(), outcome));
        }

        results
    }

    /// Apply style updates from a host panel until the sender goes away.
    pub async fn pump_style_updates(&self, mut updates: mpsc::Receiver<(String, StyleUpdate)>) {
        while let Some((name, update)) = updates.recv().await {
            if let Some(report) = self.apply_style_update(&name, &update) {
                if !report.is_clean() {
                    warn!("{} style properties rejected for '{}'", report.failed.len(), name);
                }
            }
        }
        debug!("Style update channel closed");
    }

    /// Report what the engine currently holds for an active overlay.
    pub fn inspect(&self, name: &str) -> Option<OverlayDiagnostics> {
        let inner = self.lock();
        let Some(Slot::Active { source_layer }) = inner.slots.get(name) else {
            return None;
        };

        let features = inner
            .engine
            .query_source_features(&source_id(name), Some(source_layer));
        let sample = features.first();
        let unit = match inner.styles.get(name) {
            Some(LayerStyleConfig::Wind(style)) => style.speed_unit,
            _ => SpeedUnit::Knots,
        };

        Some(OverlayDiagnostics {
            overlay: name.to_string(),
            source_layer: source_layer.clone(),
            source_present: inner.engine.has_source(&source_id(name)),
            layers_present: layer_ids(name)
                .into_iter()
                .filter(|id| inner.engine.has_layer(id))
                .collect(),
            feature_count: features.len(),
            speed_field: sample
                .and_then(|props| probe_property(props, &SPEED_PROPERTY_ALIASES))
                .map(|(alias, _)| alias),
            direction_field: sample
                .and_then(|props| probe_property(props, &DIRECTION_PROPERTY_ALIASES))
                .map(|(alias, _)| alias),
            sample_speed_knots: sample.and_then(|props| feature_speed_knots(props, unit)),
            icons_loaded: SPEED_BUCKETS
                .iter()
                .filter(|bucket| inner.engine.has_image(&icon_name(**bucket)))
                .count(),
        })
    }
}

/// Clears the `Activating` slot of an activation whose future was dropped
/// before the metadata lookup finished.
struct PendingActivation<'a, E: MapEngine> {
    manager: &'a OverlayManager<E>,
    name: &'a str,
    generation: u64,
    armed: bool,
}

impl<E: MapEngine> PendingActivation<'_, E> {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl<E: MapEngine> Drop for PendingActivation<'_, E> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut inner = self.manager.lock();
        let owned = matches!(
            inner.slots.get(self.name),
            Some(Slot::Activating { generation, .. }) if *generation == self.generation
        );
        if owned {
            inner.slots.remove(self.name);
            debug!("Abandoned activation of '{}' cleared", self.name);
        }
    }
}

impl<E: MapEngine> Drop for OverlayManager<E> {
    fn drop(&mut self) {
        let inner = self.inner.get_mut().unwrap_or_else(PoisonError::into_inner);
        let names: Vec<String> = inner.slots.keys().cloned().collect();
        for name in names {
            Self::deactivate_locked(inner, &name);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use serde_json::{json, Value};
    use tokio::sync::Notify;

    use image::RgbaImage;

    use super::*;
    use crate::engine::{FeatureProperties, LayerDescriptor, StyleDocument};
    use crate::registry::{OverlayKind, WIND_REMOTE_LAYER_ID, WIND_TILE_SET_ID};
    use crate::tile_access::{AuthStrategy, TileAccessError};

    enum Behavior {
        Resolve(String),
        Fail(u16),
        Hang,
    }

    struct FakeTiles {
        behavior: Behavior,
        gate: Option<Arc<Notify>>,
        calls: AtomicUsize,
    }

    impl FakeTiles {
        fn new(behavior: Behavior) -> Self {
            Self {
                behavior,
                gate: None,
                calls: AtomicUsize::new(0),
            }
        }

        fn resolving() -> Arc<Self> {
            Arc::new(Self::new(Behavior::Resolve("wind_speed".to_string())))
        }

        fn gated(gate: Arc<Notify>) -> Arc<Self> {
            Arc::new(Self {
                gate: Some(gate),
                ..Self::new(Behavior::Resolve("wind_speed".to_string()))
            })
        }
    }

    #[async_trait]
    impl TileAccess for FakeTiles {
        async fn resolve_source_layer(&self, _remote_layer_id: &str) -> Result<String, TileAccessError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            match &self.behavior {
                Behavior::Resolve(layer) => Ok(layer.clone()),
                Behavior::Fail(status) => Err(TileAccessError::Status {
                    status: *status,
                    reason: "Unauthorized".to_string(),
                }),
                Behavior::Hang => std::future::pending().await,
            }
        }

        fn tile_url_template(&self, remote_layer_id: &str, tile_set_id: &str) -> Result<String, TileAccessError> {
            Ok(format!("https://tiles.test/{remote_layer_id}/{tile_set_id}/{{z}}/{{x}}/{{y}}.pbf"))
        }

        fn auth_strategy(&self) -> AuthStrategy {
            AuthStrategy::BearerHeader
        }
    }

    /// Engine whose document stays reachable after the manager is gone. It
    /// refuses live updates of `reject`.
    struct SharedEngine {
        doc: Arc<Mutex<StyleDocument>>,
        reject: Option<&'static str>,
    }

    impl SharedEngine {
        fn doc(&self) -> MutexGuard<'_, StyleDocument> {
            self.doc.lock().unwrap()
        }

        fn check(&self, layer_id: &str, property: &str) -> Result<(), EngineError> {
            if self.reject == Some(property) {
                return Err(EngineError::InvalidProperty {
                    layer_id: layer_id.to_string(),
                    property: property.to_string(),
                    reason: "refused".to_string(),
                });
            }
            Ok(())
        }
    }

    impl MapEngine for SharedEngine {
        fn is_style_loaded(&self) -> bool {
            self.doc().is_style_loaded()
        }

        fn add_source(&mut self, id: &str, source: SourceDescriptor) -> Result<(), EngineError> {
            self.doc().add_source(id, source)
        }

        fn remove_source(&mut self, id: &str) -> Result<(), EngineError> {
            self.doc().remove_source(id)
        }

        fn has_source(&self, id: &str) -> bool {
            self.doc().has_source(id)
        }

        fn add_layer(&mut self, layer: LayerDescriptor, before_id: Option<&str>) -> Result<(), EngineError> {
            self.doc().add_layer(layer, before_id)
        }

        fn remove_layer(&mut self, id: &str) -> Result<(), EngineError> {
            self.doc().remove_layer(id)
        }

        fn has_layer(&self, id: &str) -> bool {
            self.doc().has_layer(id)
        }

        fn set_paint_property(&mut self, layer_id: &str, property: &str, value: Value) -> Result<(), EngineError> {
            self.check(layer_id, property)?;
            self.doc().set_paint_property(layer_id, property, value)
        }

        fn set_layout_property(&mut self, layer_id: &str, property: &str, value: Value) -> Result<(), EngineError> {
            self.check(layer_id, property)?;
            self.doc().set_layout_property(layer_id, property, value)
        }

        fn has_image(&self, name: &str) -> bool {
            self.doc().has_image(name)
        }

        fn add_image(&mut self, name: &str, image: RgbaImage) -> Result<(), EngineError> {
            self.doc().add_image(name, image)
        }

        fn query_source_features(&self, source_id: &str, source_layer: Option<&str>) -> Vec<FeatureProperties> {
            self.doc().query_source_features(source_id, source_layer)
        }
    }

    fn shared_manager(
        reject: Option<&'static str>,
        config: ManagerConfig,
    ) -> (OverlayManager<SharedEngine>, Arc<Mutex<StyleDocument>>) {
        let doc = Arc::new(Mutex::new(StyleDocument::new()));
        let engine = SharedEngine {
            doc: Arc::clone(&doc),
            reject,
        };
        let manager = OverlayManager::new(engine, OverlayRegistry::default(), FakeTiles::resolving(), config);
        (manager, doc)
    }

    fn manager_with(doc: StyleDocument, tiles: Arc<FakeTiles>) -> OverlayManager<StyleDocument> {
        OverlayManager::new(doc, OverlayRegistry::default(), tiles, ManagerConfig::default())
    }

    fn manager() -> OverlayManager<StyleDocument> {
        manager_with(StyleDocument::new(), FakeTiles::resolving())
    }

    fn snapshot(manager: &OverlayManager<StyleDocument>) -> (Vec<String>, Vec<String>) {
        manager.with_engine(|doc| {
            (
                doc.layer_ids().into_iter().map(str::to_string).collect(),
                doc.source_ids().map(str::to_string).collect(),
            )
        })
    }

    fn update(pairs: &[(&str, Value)]) -> StyleUpdate {
        pairs
            .iter()
            .map(|(key, value)| ((*key).to_string(), value.clone()))
            .collect()
    }

    #[tokio::test]
    async fn test_activate_registers_source_layer_and_icons() {
        let manager = manager();
        let outcome = manager.activate("wind").await.unwrap();

        assert_eq!(outcome, ActivationOutcome::Activated);
        assert_eq!(manager.active_overlays(), vec!["wind".to_string()]);
        manager.with_engine(|doc| {
            let source = doc.source("overlay-source-wind").unwrap();
            assert_eq!(
                source.tiles,
                vec![format!(
                    "https://tiles.test/{WIND_REMOTE_LAYER_ID}/{WIND_TILE_SET_ID}/{{z}}/{{x}}/{{y}}.pbf"
                )]
            );
            let layer = doc.layer("overlay-layer-wind").unwrap();
            assert_eq!(layer.source, "overlay-source-wind");
            assert_eq!(layer.source_layer, "wind_speed");
            assert_eq!(doc.image_names().count(), SPEED_BUCKETS.len());
            assert!(doc.layer("overlay-layer-wind-debug").is_none());
        });
    }

    #[tokio::test]
    async fn test_activate_before_style_load_is_not_ready() {
        let tiles = FakeTiles::resolving();
        let manager = manager_with(StyleDocument::unloaded(), tiles.clone());

        let err = manager.activate("wind").await.unwrap_err();

        assert!(matches!(err, OverlayError::NotReady));
        assert_eq!(manager.with_engine(StyleDocument::mutations), 0);
        assert_eq!(tiles.calls.load(Ordering::SeqCst), 0);
        assert_eq!(manager.state("wind"), OverlayState::Inactive);
    }

    #[tokio::test]
    async fn test_activate_unknown_overlay() {
        let manager = manager();
        let err = manager.activate("bogus").await.unwrap_err();

        assert!(matches!(err, OverlayError::UnknownOverlay(ref name) if name == "bogus"));
        assert_eq!(manager.with_engine(StyleDocument::mutations), 0);
    }

    #[tokio::test]
    async fn test_second_activate_toggles_off() {
        let manager = manager();
        manager.activate("wind").await.unwrap();
        let outcome = manager.toggle("wind").await.unwrap();

        assert_eq!(outcome, ActivationOutcome::Deactivated);
        assert!(manager.active_overlays().is_empty());
        let (layers, sources) = snapshot(&manager);
        assert!(layers.is_empty());
        assert!(sources.is_empty());
        // Icons persist for the next activation
        assert_eq!(manager.with_engine(|doc| doc.image_names().count()), SPEED_BUCKETS.len());
    }

    #[tokio::test]
    async fn test_reactivation_reuses_icons() {
        let manager = manager();
        manager.activate("wind").await.unwrap();
        manager.deactivate("wind");
        let mutations = manager.with_engine(StyleDocument::mutations);

        assert_eq!(manager.activate("wind").await.unwrap(), ActivationOutcome::Activated);
        // Only the source and the layer were added this time
        assert_eq!(manager.with_engine(StyleDocument::mutations), mutations + 2);
    }

    #[test]
    fn test_deactivate_inactive_is_noop() {
        let manager = manager();
        assert!(!manager.deactivate("wind"));
        assert!(!manager.deactivate("bogus"));
        assert!(manager.active_overlays().is_empty());
        assert_eq!(manager.with_engine(StyleDocument::mutations), 0);
    }

    #[tokio::test]
    async fn test_unauthorized_resolution_leaves_nothing_behind() {
        let tiles = Arc::new(FakeTiles::new(Behavior::Fail(401)));
        let manager = manager_with(StyleDocument::new(), tiles);
        let mut events = manager.subscribe();

        let err = manager.activate("wind").await.unwrap_err();

        assert_eq!(err.status(), Some(401));
        assert!(matches!(err, OverlayError::ResolutionFailed { .. }));
        assert_eq!(manager.state("wind"), OverlayState::Inactive);
        assert_eq!(manager.with_engine(StyleDocument::mutations), 0);

        assert!(matches!(events.recv().await.unwrap(), OverlayEvent::Activating(_)));
        match events.recv().await.unwrap() {
            OverlayEvent::ActivationFailed { overlay, message } => {
                assert_eq!(overlay, "wind");
                assert!(message.contains("token"));
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_registration_failure_removes_partial_source() {
        let config = ManagerConfig {
            before_layer_id: Some("no-such-layer".to_string()),
            ..ManagerConfig::default()
        };
        let manager = OverlayManager::new(
            StyleDocument::new(),
            OverlayRegistry::default(),
            FakeTiles::resolving(),
            config,
        );

        let err = manager.activate("wind").await.unwrap_err();

        assert!(matches!(
            err,
            OverlayError::RegistrationFailed { source: EngineError::MissingLayer(_), .. }
        ));
        let (layers, sources) = snapshot(&manager);
        assert!(layers.is_empty());
        assert!(sources.is_empty());
        assert_eq!(manager.state("wind"), OverlayState::Inactive);
    }

    #[tokio::test]
    async fn test_deactivate_during_resolution_cancels() {
        let gate = Arc::new(Notify::new());
        let manager = manager_with(StyleDocument::new(), FakeTiles::gated(gate.clone()));

        let activation = manager.activate("wind");
        let interrupt = async {
            tokio::task::yield_now().await;
            assert_eq!(manager.state("wind"), OverlayState::Activating);
            assert!(manager.deactivate("wind"));
            gate.notify_one();
        };
        let (outcome, ()) = tokio::join!(activation, interrupt);

        assert_eq!(outcome.unwrap(), ActivationOutcome::Cancelled);
        assert_eq!(manager.state("wind"), OverlayState::Inactive);
        assert_eq!(manager.with_engine(StyleDocument::mutations), 0);
    }

    #[tokio::test]
    async fn test_toggle_during_resolution_cancels() {
        let gate = Arc::new(Notify::new());
        let manager = manager_with(StyleDocument::new(), FakeTiles::gated(gate.clone()));

        let first = manager.activate("wind");
        let second = async {
            tokio::task::yield_now().await;
            let outcome = manager.toggle("wind").await;
            gate.notify_one();
            outcome
        };
        let (first, second) = tokio::join!(first, second);

        assert_eq!(second.unwrap(), ActivationOutcome::Deactivated);
        assert_eq!(first.unwrap(), ActivationOutcome::Cancelled);
        let (layers, sources) = snapshot(&manager);
        assert!(layers.is_empty());
        assert!(sources.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_metadata_timeout_fails_activation() {
        let tiles = Arc::new(FakeTiles::new(Behavior::Hang));
        let manager = manager_with(StyleDocument::new(), tiles);

        let err = manager.activate("wind").await.unwrap_err();

        match err {
            OverlayError::ResolutionFailed { status, message, .. } => {
                assert_eq!(status, None);
                assert!(message.contains("timed out"));
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(manager.state("wind"), OverlayState::Inactive);
    }

    #[tokio::test]
    async fn test_reconcile_matches_direct_calls() {
        let reconciled = manager();
        let direct = manager();

        let on = BTreeMap::from([("wind".to_string(), true)]);
        let results = reconciled.reconcile(&on).await;
        assert_eq!(results.len(), 1);
        assert!(matches!(results[0].1, Ok(ActivationOutcome::Activated)));
        direct.activate("wind").await.unwrap();
        assert_eq!(snapshot(&reconciled), snapshot(&direct));
        assert_eq!(reconciled.active_overlays(), direct.active_overlays());

        // Already active stays active
        assert!(reconciled.reconcile(&on).await.is_empty());
        assert!(reconciled.is_active("wind"));

        let off = BTreeMap::from([("wind".to_string(), false)]);
        reconciled.reconcile(&off).await;
        direct.deactivate("wind");
        assert_eq!(snapshot(&reconciled), snapshot(&direct));
        assert!(reconciled.active_overlays().is_empty());
    }

    #[tokio::test]
    async fn test_reconcile_skips_unknown_names() {
        let manager = manager();
        let desired = BTreeMap::from([("bogus".to_string(), true), ("wind".to_string(), true)]);

        let results = manager.reconcile(&desired).await;

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0, "wind");
        assert_eq!(manager.active_overlays(), vec!["wind".to_string()]);
    }

    #[tokio::test]
    async fn test_style_update_only_touches_named_property() {
        let manager = manager();
        manager.activate("wind").await.unwrap();

        let report = manager
            .apply_style_update("wind", &update(&[("textOpacity", json!(0.5))]))
            .unwrap();

        assert!(report.is_clean());
        assert_eq!(report.applied, vec!["text-opacity".to_string(), "icon-opacity".to_string()]);
        manager.with_engine(|doc| {
            let layer = doc.layer("overlay-layer-wind").unwrap();
            assert_eq!(layer.paint["text-opacity"], json!(0.5));
            assert_eq!(layer.paint["text-color"], json!("#ffffff"));
        });
        match manager.style("wind").unwrap() {
            LayerStyleConfig::Wind(style) => assert_eq!(style.text_opacity, 0.5),
            other => panic!("unexpected style {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_style_update_on_inactive_overlay_is_noop() {
        let manager = manager();
        assert!(manager
            .apply_style_update("wind", &update(&[("textOpacity", json!(0.5))]))
            .is_none());
        assert_eq!(manager.with_engine(StyleDocument::mutations), 0);

        // Stored config is untouched, so activation uses the defaults
        manager.activate("wind").await.unwrap();
        manager.with_engine(|doc| {
            assert_eq!(doc.layer("overlay-layer-wind").unwrap().paint["text-opacity"], json!(0.9));
        });
    }

    #[tokio::test]
    async fn test_rejected_property_keeps_previous_value() {
        let manager = manager();
        manager.activate("wind").await.unwrap();

        let report = manager
            .apply_style_update(
                "wind",
                &update(&[
                    ("textOpacity", json!(1.5)),
                    ("textColor", json!("#ff0000")),
                    ("sparkle", json!(true)),
                ]),
            )
            .unwrap();

        assert_eq!(report.applied, vec!["text-color".to_string()]);
        assert_eq!(report.ignored, vec!["sparkle".to_string()]);
        assert_eq!(report.failed.len(), 2);
        assert_eq!(report.failed[0].layer_id, "overlay-layer-wind");
        match manager.style("wind").unwrap() {
            LayerStyleConfig::Wind(style) => {
                assert_eq!(style.text_opacity, 0.9);
                assert_eq!(style.text_color, "#ff0000");
            }
            other => panic!("unexpected style {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_pump_applies_queued_updates() {
        let manager = manager();
        manager.activate("wind").await.unwrap();
        let (tx, rx) = mpsc::channel(4);
        tx.send(("wind".to_string(), update(&[("haloWidth", json!(3))])))
            .await
            .unwrap();
        drop(tx);

        manager.pump_style_updates(rx).await;

        manager.with_engine(|doc| {
            assert_eq!(doc.layer("overlay-layer-wind").unwrap().paint["text-halo-width"], json!(3.0));
        });
    }

    #[tokio::test]
    async fn test_debug_markers_sit_under_main_layer() {
        let config = ManagerConfig {
            debug_markers: true,
            ..ManagerConfig::default()
        };
        let manager = OverlayManager::new(
            StyleDocument::new(),
            OverlayRegistry::default(),
            FakeTiles::resolving(),
            config,
        );
        manager.activate("wind").await.unwrap();

        let (layers, _) = snapshot(&manager);
        assert_eq!(layers, vec!["overlay-layer-wind-debug", "overlay-layer-wind"]);

        manager.deactivate("wind");
        assert!(snapshot(&manager).0.is_empty());
    }

    #[tokio::test]
    async fn test_remove_all_clears_every_overlay() {
        let registry = OverlayRegistry::new(vec![
            OverlayDefinition::wind(),
            OverlayDefinition::new("pressure", "fcst-pressure", "set-1", OverlayKind::Pressure),
        ])
        .unwrap();
        let manager = OverlayManager::new(
            StyleDocument::new(),
            registry,
            FakeTiles::resolving(),
            ManagerConfig::default(),
        );
        manager.activate("wind").await.unwrap();
        manager.activate("pressure").await.unwrap();
        assert_eq!(manager.active_overlays(), vec!["wind".to_string(), "pressure".to_string()]);

        let removed = manager.remove_all();

        assert_eq!(removed, vec!["pressure".to_string(), "wind".to_string()]);
        let (layers, sources) = snapshot(&manager);
        assert!(layers.is_empty());
        assert!(sources.is_empty());
    }

    #[tokio::test]
    async fn test_inspect_reports_feature_fields() {
        let manager = manager();
        assert!(manager.inspect("wind").is_none());
        manager.activate("wind").await.unwrap();

        let mut props = FeatureProperties::new();
        props.insert("value".to_string(), json!(12.0));
        props.insert("direction".to_string(), json!(270.0));
        manager.with_engine_mut(|doc| doc.seed_features("overlay-source-wind", Some("wind_speed"), [props]));

        let diagnostics = manager.inspect("wind").unwrap();
        assert_eq!(diagnostics.source_layer, "wind_speed");
        assert_eq!(diagnostics.feature_count, 1);
        assert_eq!(diagnostics.speed_field, Some("value"));
        assert_eq!(diagnostics.direction_field, Some("direction"));
        assert_eq!(diagnostics.icons_loaded, SPEED_BUCKETS.len());
        assert_eq!(diagnostics.layers_present, vec!["overlay-layer-wind".to_string()]);
        assert!(diagnostics.source_present);
        assert_eq!(diagnostics.sample_speed_knots, Some(12.0));
    }

    #[tokio::test]
    async fn test_with_style_seeds_activation() {
        let mut style = crate::style::WindStyle::default();
        style.text_color = "#00ff00".to_string();
        let manager = manager().with_style("wind", LayerStyleConfig::Wind(style));

        manager.activate("wind").await.unwrap();

        manager.with_engine(|doc| {
            assert_eq!(doc.layer("overlay-layer-wind").unwrap().paint["text-color"], json!("#00ff00"));
        });
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_activation_releases_slot() {
        let gate = Arc::new(Notify::new());
        let manager = manager_with(StyleDocument::new(), FakeTiles::gated(gate.clone()));

        let abandoned = tokio::time::timeout(Duration::from_millis(20), manager.activate("wind")).await;
        assert!(abandoned.is_err());
        assert_eq!(manager.state("wind"), OverlayState::Inactive);

        gate.notify_one();
        let results = manager
            .reconcile(&BTreeMap::from([("wind".to_string(), true)]))
            .await;
        assert_eq!(results.len(), 1);
        assert!(matches!(results[0].1, Ok(ActivationOutcome::Activated)));
        assert_eq!(manager.active_overlays(), vec!["wind".to_string()]);
    }

    #[tokio::test]
    async fn test_dropping_manager_removes_registrations() {
        let config = ManagerConfig {
            debug_markers: true,
            ..ManagerConfig::default()
        };
        let (manager, doc) = shared_manager(None, config);
        manager.activate("wind").await.unwrap();
        assert_eq!(doc.lock().unwrap().layer_ids().len(), 2);

        drop(manager);

        let doc = doc.lock().unwrap();
        assert!(doc.layer_ids().is_empty());
        assert_eq!(doc.source_ids().count(), 0);
        assert_eq!(doc.image_names().count(), SPEED_BUCKETS.len());
    }

    #[tokio::test]
    async fn test_partially_rejected_key_restores_landed_properties() {
        let (manager, doc) = shared_manager(Some("icon-size"), ManagerConfig::default());
        manager.activate("wind").await.unwrap();
        let before = doc.lock().unwrap().layer("overlay-layer-wind").unwrap().clone();

        let report = manager
            .apply_style_update("wind", &update(&[("textSize", json!(24)), ("haloWidth", json!(2))]))
            .unwrap();

        assert_eq!(report.applied, vec!["text-halo-width".to_string()]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].property, "icon-size");

        let after = doc.lock().unwrap().layer("overlay-layer-wind").unwrap().clone();
        assert_eq!(after.layout, before.layout);
        assert_eq!(after.paint["text-halo-width"], json!(2.0));
        match manager.style("wind").unwrap() {
            LayerStyleConfig::Wind(style) => {
                assert_eq!(style.text_size, 16.0);
                assert_eq!(style.halo_width, 2.0);
            }
            other => panic!("unexpected style {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_reconcile_after_style_loads() {
        let manager = manager_with(StyleDocument::unloaded(), FakeTiles::resolving());
        let desired = BTreeMap::from([("wind".to_string(), true)]);

        let results = manager.reconcile(&desired).await;
        assert!(matches!(results[0].1, Err(OverlayError::NotReady)));
        assert_eq!(manager.state("wind"), OverlayState::Inactive);

        manager.with_engine_mut(|doc| doc.set_loaded(true));
        let results = manager.reconcile(&desired).await;
        assert!(matches!(results[0].1, Ok(ActivationOutcome::Activated)));
        assert!(manager.is_active("wind"));
    }
}
