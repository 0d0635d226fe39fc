//! Explicit session state.
//!
//! [`SessionState`] owns the open sources, the annotation store and every
//! setting that influences derived spectra. All mutations go through it, so it
//! can keep the derived data consistent: each transition that changes what a
//! spectrum would look like marks annotations stale and bumps the session
//! generation.
//!
//! Submodules:
//! - [`snapshot`]: JSON snapshot format, save and restore
//! - [`merge`]: importing another session's annotations
//! - [`command`]: serde-deserializable commands for scripting

pub mod command;
pub mod merge;
pub mod snapshot;

#[cfg(test)]
mod tests;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::annotation::{Annotation, AnnotationId, AnnotationStore, DeriveContext, DraftStep};
use crate::cache::{BandCache, Mode};
use crate::config::AppConfig;
use crate::constants::DELETE_RADIUS_PX;
use crate::data::{CubeSource, LoaderRegistry, Pixel, SourceId, WavelengthRange};
use crate::error::{Error, GeometryError, PreprocessingError, Result};
use crate::preprocess::{Pipeline, PreprocessingConfig, PreprocessingFlags, Stage};
use crate::worker::{RecomputeRequest, RecomputeResult};

pub use command::{Command, CommandOutput};
pub use merge::MergeReport;
pub use snapshot::{LoadReport, Snapshot, UnresolvedSource};

/// What a click on the image does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputMode {
    #[default]
    Point,
    Polygon,
}

/// When derived data is recomputed after a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecomputePolicy {
    /// Synchronously, before the mutator returns
    #[default]
    Immediate,
    /// Only mark stale; the caller refreshes or uses a worker
    Deferred,
}

/// Result of a click on the image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClickOutcome {
    Point(AnnotationId),
    Polygon(DraftStep),
}

/// A source referenced by the session. `cube` is `None` when it failed to open.
#[derive(Debug, Clone)]
pub struct SourceSlot {
    pub id: SourceId,
    pub path: PathBuf,
    pub cube: Option<Arc<CubeSource>>,
    pub error: Option<String>,
}

impl SourceSlot {
    pub fn is_resolved(&self) -> bool {
        self.cube.is_some()
    }
}

/// Complete state of one analysis session.
pub struct SessionState {
    registry: LoaderRegistry,
    sources: Vec<SourceSlot>,
    next_source: u64,
    annotations: AnnotationStore,
    cache: Arc<BandCache>,
    mode: Mode,
    flags: PreprocessingFlags,
    pipeline: Pipeline,
    wavelength_range: Option<WavelengthRange>,
    input_mode: InputMode,
    recompute_policy: RecomputePolicy,
    /// Size preprocessing windows from the first opened source
    auto_window: bool,
    generation: u64,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionState {
    pub fn new() -> Self {
        Self {
            registry: LoaderRegistry::new(),
            sources: Vec::new(),
            next_source: 1,
            annotations: AnnotationStore::new(),
            cache: Arc::new(BandCache::new()),
            mode: Mode::default(),
            flags: PreprocessingFlags::default(),
            pipeline: Pipeline::default(),
            wavelength_range: None,
            input_mode: InputMode::default(),
            recompute_policy: RecomputePolicy::default(),
            auto_window: false,
            generation: 0,
        }
    }

    /// Session initialised from user configuration.
    pub fn from_config(config: &AppConfig) -> Result<Self, PreprocessingError> {
        let mut session = Self::new();
        session.pipeline = Pipeline::new(config.preprocessing)?;
        session.recompute_policy = config.preferences.recompute_policy;
        session.auto_window = config.preferences.auto_window;
        Ok(session)
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn flags(&self) -> PreprocessingFlags {
        self.flags
    }

    pub fn preprocessing_config(&self) -> &PreprocessingConfig {
        self.pipeline.config()
    }

    pub fn wavelength_range(&self) -> Option<WavelengthRange> {
        self.wavelength_range
    }

    pub fn input_mode(&self) -> InputMode {
        self.input_mode
    }

    pub fn recompute_policy(&self) -> RecomputePolicy {
        self.recompute_policy
    }

    pub fn set_recompute_policy(&mut self, policy: RecomputePolicy) {
        self.recompute_policy = policy;
    }

    pub fn set_auto_window(&mut self, enabled: bool) {
        self.auto_window = enabled;
    }

    /// Counter bumped by every invalidating transition and recompute request.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn annotations(&self) -> &AnnotationStore {
        &self.annotations
    }

    pub fn cache(&self) -> &Arc<BandCache> {
        &self.cache
    }

    pub fn registry(&self) -> &LoaderRegistry {
        &self.registry
    }

    pub fn sources(&self) -> &[SourceSlot] {
        &self.sources
    }

    pub fn slot(&self, id: &SourceId) -> Option<&SourceSlot> {
        self.sources.iter().find(|s| &s.id == id)
    }

    /// Loaded cube for a source id.
    pub fn source(&self, id: &SourceId) -> Option<&Arc<CubeSource>> {
        self.slot(id).and_then(|s| s.cube.as_ref())
    }

    /// Loaded cube, or an error naming why it is not available.
    pub fn require_source(&self, id: &SourceId) -> Result<&Arc<CubeSource>> {
        let slot = self
            .slot(id)
            .ok_or_else(|| Error::UnknownSource(id.clone()))?;
        slot.cube
            .as_ref()
            .ok_or_else(|| Error::UnresolvedSource(id.clone()))
    }

    // ========================================================================
    // Sources
    // ========================================================================

    fn allocate_source_id(&mut self) -> SourceId {
        loop {
            let id = SourceId::new(format!("src{}", self.next_source));
            self.next_source = self.next_source.checked_add(1).unwrap_or(1);
            if self.slot(&id).is_none() {
                return id;
            }
        }
    }

    /// Open a cube file. Opening a path that is already loaded returns its id.
    pub fn open_source(&mut self, path: impl AsRef<Path>) -> Result<SourceId> {
        let path = path.as_ref();
        let key = normalize_path(path);
        if let Some(slot) = self
            .sources
            .iter()
            .find(|s| s.is_resolved() && normalize_path(&s.path) == key)
        {
            log::debug!("{:?} is already open as {}", path, slot.id);
            return Ok(slot.id.clone());
        }

        let id = self.allocate_source_id();
        let cube = CubeSource::open(id.clone(), path, &self.registry)?;
        self.apply_auto_window(&cube);
        self.sources.push(SourceSlot {
            id: id.clone(),
            path: path.to_path_buf(),
            cube: Some(Arc::new(cube)),
            error: None,
        });
        Ok(id)
    }

    /// Register an in-memory cube as a source.
    ///
    /// A cube whose id is already registered replaces that source in place;
    /// its cached bands are dropped and its annotations go stale.
    pub fn add_source(&mut self, cube: CubeSource) -> SourceId {
        self.apply_auto_window(&cube);
        let id = cube.id().clone();
        if let Some(counter) = id
            .as_str()
            .strip_prefix("src")
            .and_then(|n| n.parse::<u64>().ok())
        {
            self.next_source = self.next_source.max(counter.saturating_add(1));
        }
        let slot = SourceSlot {
            id: id.clone(),
            path: cube.path().to_path_buf(),
            cube: Some(Arc::new(cube)),
            error: None,
        };
        match self.sources.iter().position(|s| s.id == id) {
            Some(index) => {
                log::info!("Replacing source {}", id);
                self.sources[index] = slot;
                self.cache.invalidate(&id);
                self.annotations.mark_source_stale(&id);
                self.invalidate();
            }
            None => self.sources.push(slot),
        }
        id
    }

    fn apply_auto_window(&mut self, cube: &CubeSource) {
        if !self.auto_window || self.sources.iter().any(SourceSlot::is_resolved) {
            return;
        }
        let sized = PreprocessingConfig::for_band_count(cube.band_count());
        let config = PreprocessingConfig {
            savgol_order: self.pipeline.config().savgol_order,
            savgol_derivative: self.pipeline.config().savgol_derivative,
            ..sized
        };
        match Pipeline::new(config) {
            Ok(pipeline) => {
                log::info!(
                    "Sized preprocessing windows for {} bands: median {}, savgol {}",
                    cube.band_count(),
                    config.median_window,
                    config.savgol_window
                );
                self.pipeline = pipeline;
            }
            Err(e) => log::warn!("Keeping preprocessing windows: {}", e),
        }
    }

    /// Re-read a source from disk, dropping its cached bands and derived data.
    pub fn reload_source(&mut self, id: &SourceId) -> Result<()> {
        let index = self
            .sources
            .iter()
            .position(|s| &s.id == id)
            .ok_or_else(|| Error::UnknownSource(id.clone()))?;
        let path = self.sources[index].path.clone();

        self.cache.invalidate(id);
        match CubeSource::open(id.clone(), &path, &self.registry) {
            Ok(cube) => {
                let slot = &mut self.sources[index];
                slot.cube = Some(Arc::new(cube));
                slot.error = None;
            }
            Err(e) => {
                let slot = &mut self.sources[index];
                slot.cube = None;
                slot.error = Some(e.to_string());
                self.annotations.mark_source_stale(id);
                self.invalidate();
                return Err(e.into());
            }
        }

        self.annotations.mark_source_stale(id);
        self.invalidate();
        Ok(())
    }

    /// Close a source. Its annotations are removed with it.
    pub fn close_source(&mut self, id: &SourceId) -> Result<()> {
        let index = self
            .sources
            .iter()
            .position(|s| &s.id == id)
            .ok_or_else(|| Error::UnknownSource(id.clone()))?;
        self.sources.remove(index);
        self.cache.invalidate(id);

        let orphaned: Vec<AnnotationId> = self
            .annotations
            .iter()
            .filter(|a| &a.source_id == id)
            .map(|a| a.id.clone())
            .collect();
        for annotation in &orphaned {
            self.annotations.remove(annotation);
        }
        log::info!(
            "Closed source {} ({} annotations removed)",
            id,
            orphaned.len()
        );
        Ok(())
    }

    // ========================================================================
    // Settings
    // ========================================================================

    /// Mark everything stale after a transition that changes derived data.
    fn invalidate(&mut self) {
        self.annotations.mark_all_stale();
        self.generation += 1;
        self.recompute_if_immediate();
    }

    fn recompute_if_immediate(&mut self) {
        if self.recompute_policy == RecomputePolicy::Immediate {
            self.refresh();
        }
    }

    pub fn set_mode(&mut self, mode: Mode) {
        if self.mode != mode {
            log::debug!("Mode {} -> {}", self.mode, mode);
            self.mode = mode;
            self.invalidate();
        }
    }

    pub fn toggle_mode(&mut self) -> Mode {
        self.set_mode(self.mode.toggled());
        self.mode
    }

    pub fn set_flags(&mut self, flags: PreprocessingFlags) {
        if self.flags != flags {
            self.flags = flags;
            self.invalidate();
        }
    }

    pub fn toggle_stage(&mut self, stage: Stage) -> PreprocessingFlags {
        let mut flags = self.flags;
        flags.toggle(stage);
        self.set_flags(flags);
        self.flags
    }

    /// Replace the preprocessing parameters; invalid parameters are rejected.
    pub fn set_preprocessing_config(
        &mut self,
        config: PreprocessingConfig,
    ) -> Result<(), PreprocessingError> {
        let pipeline = Pipeline::new(config)?;
        if pipeline != self.pipeline {
            self.pipeline = pipeline;
            self.invalidate();
        }
        Ok(())
    }

    pub fn set_wavelength_range(&mut self, range: WavelengthRange) {
        if self.wavelength_range != Some(range) {
            self.wavelength_range = Some(range);
            self.invalidate();
        }
    }

    pub fn reset_wavelength_range(&mut self) {
        if self.wavelength_range.take().is_some() {
            self.invalidate();
        }
    }

    pub fn set_input_mode(&mut self, mode: InputMode) {
        if mode == InputMode::Point {
            self.annotations.cancel_polygon();
        }
        self.input_mode = mode;
    }

    /// Switch between point and polygon input. Leaving polygon mode discards
    /// an unfinished polygon.
    pub fn toggle_input_mode(&mut self) -> InputMode {
        let next = match self.input_mode {
            InputMode::Point => InputMode::Polygon,
            InputMode::Polygon => InputMode::Point,
        };
        self.set_input_mode(next);
        next
    }

    // ========================================================================
    // Annotations
    // ========================================================================

    fn check_pixel(&self, source_id: &SourceId, pixel: Pixel) -> Result<()> {
        let slot = self
            .slot(source_id)
            .ok_or_else(|| Error::UnknownSource(source_id.clone()))?;
        match &slot.cube {
            Some(cube) if !cube.contains_pixel(pixel) => {
                let shape = cube.shape();
                Err(GeometryError::OutOfBounds {
                    row: pixel.row,
                    col: pixel.col,
                    rows: shape.rows,
                    cols: shape.cols,
                }
                .into())
            }
            _ => Ok(()),
        }
    }

    pub fn add_point(
        &mut self,
        source_id: &SourceId,
        pixel: Pixel,
        label: impl Into<String>,
    ) -> Result<AnnotationId> {
        self.check_pixel(source_id, pixel)?;
        let id = self.annotations.add_point(source_id.clone(), pixel, label);
        self.recompute_if_immediate();
        Ok(id)
    }

    pub fn add_polygon(
        &mut self,
        source_id: &SourceId,
        vertices: Vec<Pixel>,
        label: impl Into<String>,
    ) -> Result<AnnotationId> {
        for &vertex in &vertices {
            self.check_pixel(source_id, vertex)?;
        }
        let id = self
            .annotations
            .add_polygon(source_id.clone(), vertices, label)?;
        self.recompute_if_immediate();
        Ok(id)
    }

    /// Handle a click according to the input mode.
    ///
    /// In polygon mode the first click starts a polygon, later clicks add
    /// vertices, and clicking the first vertex again closes it. Clicking on
    /// another source starts a new polygon there.
    pub fn click(&mut self, source_id: &SourceId, pixel: Pixel) -> Result<ClickOutcome> {
        self.check_pixel(source_id, pixel)?;
        match self.input_mode {
            InputMode::Point => {
                let id = self.annotations.add_point(source_id.clone(), pixel, "");
                self.recompute_if_immediate();
                Ok(ClickOutcome::Point(id))
            }
            InputMode::Polygon => {
                let same_source = self
                    .annotations
                    .draft()
                    .is_some_and(|d| &d.source_id == source_id);
                let step = if same_source {
                    self.annotations.extend_polygon(pixel)?
                } else {
                    let id = self.annotations.begin_polygon(source_id.clone(), pixel);
                    DraftStep::Extended { id, vertices: 1 }
                };
                if matches!(step, DraftStep::Closed(_)) {
                    self.recompute_if_immediate();
                }
                Ok(ClickOutcome::Polygon(step))
            }
        }
    }

    pub fn close_polygon(&mut self) -> Result<AnnotationId> {
        let id = self.annotations.close_polygon()?;
        self.recompute_if_immediate();
        Ok(id)
    }

    pub fn cancel_polygon(&mut self) -> Option<Annotation> {
        self.annotations.cancel_polygon()
    }

    /// Remove the annotation nearest to a click, within the pick radius.
    pub fn delete_near(&mut self, source_id: &SourceId, pixel: Pixel) -> Option<Annotation> {
        let id = self
            .annotations
            .nearest(source_id, pixel, DELETE_RADIUS_PX)?
            .clone();
        self.annotations.remove(&id)
    }

    pub fn remove(&mut self, id: &AnnotationId) -> Result<Annotation> {
        self.annotations
            .remove(id)
            .ok_or_else(|| Error::UnknownAnnotation(id.clone()))
    }

    pub fn remove_last(&mut self) -> Option<Annotation> {
        self.annotations.remove_last()
    }

    pub fn set_label(&mut self, id: &AnnotationId, label: impl Into<String>) -> Result<()> {
        self.annotations.set_label(id, label)
    }

    pub fn set_visibility(&mut self, id: &AnnotationId, visible: bool) -> Result<()> {
        self.annotations.set_visibility(id, visible)
    }

    pub fn toggle_all_visibility(&mut self) -> bool {
        self.annotations.toggle_all_visibility()
    }

    pub fn clear_all(&mut self) {
        self.annotations.clear_all();
        log::info!("Cleared all annotations");
    }

    // ========================================================================
    // Recompute
    // ========================================================================

    /// Detached inputs for deriving spectra under the current settings.
    pub fn derive_context(&self) -> DeriveContext {
        let sources: HashMap<SourceId, Arc<CubeSource>> = self
            .sources
            .iter()
            .filter_map(|s| s.cube.as_ref().map(|c| (s.id.clone(), Arc::clone(c))))
            .collect();
        DeriveContext {
            sources,
            cache: Arc::clone(&self.cache),
            mode: self.mode,
            flags: self.flags,
            pipeline: self.pipeline,
            wavelength_range: self.wavelength_range,
        }
    }

    /// Synchronously recompute stale annotations.
    pub fn refresh(&mut self) -> usize {
        let ctx = self.derive_context();
        self.annotations.refresh(&ctx)
    }

    /// Synchronously recompute every annotation.
    pub fn recompute_all(&mut self) -> usize {
        let ctx = self.derive_context();
        self.annotations.recompute_all(&ctx)
    }

    /// Package the stale annotations for a background worker.
    ///
    /// Bumps the generation, so results of earlier requests will be discarded.
    pub fn recompute_request(&mut self) -> RecomputeRequest {
        self.generation += 1;
        RecomputeRequest {
            generation: self.generation,
            context: self.derive_context(),
            targets: self.annotations.targets(true),
        }
    }

    /// Apply a worker result if it belongs to the current generation.
    ///
    /// Returns the number of annotations updated; stale results update none.
    pub fn apply_recompute(&mut self, result: RecomputeResult) -> usize {
        if result.generation != self.generation {
            log::debug!(
                "Discarding recompute generation {} (current {})",
                result.generation,
                self.generation
            );
            return 0;
        }
        self.annotations.apply_derived(result.results)
    }
}

/// Path key used to recognise the same file across sessions.
pub fn normalize_path(path: &Path) -> PathBuf {
    if let Ok(canonical) = path.canonicalize() {
        return canonical;
    }
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    };
    absolute.components().collect()
}
