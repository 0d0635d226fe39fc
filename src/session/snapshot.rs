//! JSON session snapshots.
//!
//! A snapshot is the minimal metadata needed to rebuild a session: the source
//! locators, the global settings and the annotation geometry. Derived spectra
//! are never stored; they are recomputed from the sources after loading.
//!
//! # Versioning
//!
//! Snapshots carry a `MAJOR.MINOR` version. Files with the same major version
//! are readable; a missing version is treated as the current one.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::annotation::geometry;
use crate::annotation::{Annotation, AnnotationId, Derived, Geometry, Rgb};
use crate::cache::Mode;
use crate::constants::SNAPSHOT_VERSION;
use crate::data::{CubeSource, Pixel, SourceId, WavelengthRange};
use crate::error::{FormatError, SourceError};
use crate::preprocess::{Pipeline, PreprocessingConfig, PreprocessingFlags};
use crate::session::{SessionState, SourceSlot};

/// Serialized session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default = "default_version")]
    pub version: String,
    pub sources: Vec<SourceEntry>,
    pub mode: Mode,
    pub preprocessing: PreprocessingEntry,
    #[serde(default)]
    pub wavelength_range: Option<WavelengthRange>,
    #[serde(default)]
    pub points: Vec<PointEntry>,
    #[serde(default)]
    pub polygons: Vec<PolygonEntry>,
}

fn default_version() -> String {
    SNAPSHOT_VERSION.to_string()
}

fn default_visible() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceEntry {
    pub id: SourceId,
    pub path: PathBuf,
}

/// Preprocessing flags plus optional parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PreprocessingEntry {
    pub denoise: bool,
    pub smoothing: bool,
    pub snv: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<PreprocessingConfig>,
}

impl PreprocessingEntry {
    pub fn flags(&self) -> PreprocessingFlags {
        PreprocessingFlags {
            denoise: self.denoise,
            smoothing: self.smoothing,
            snv: self.snv,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointEntry {
    pub id: AnnotationId,
    pub source_id: SourceId,
    pub pixel: Pixel,
    #[serde(default)]
    pub label: String,
    pub color: Rgb,
    #[serde(default = "default_visible")]
    pub visible: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolygonEntry {
    pub id: AnnotationId,
    pub source_id: SourceId,
    pub vertices: Vec<Pixel>,
    #[serde(default)]
    pub label: String,
    pub color: Rgb,
    #[serde(default = "default_visible")]
    pub visible: bool,
}

/// A snapshot source that could not be opened.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnresolvedSource {
    pub id: SourceId,
    pub path: PathBuf,
    pub error: String,
}

/// Summary of a snapshot load.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LoadReport {
    pub sources_loaded: usize,
    pub unresolved: Vec<UnresolvedSource>,
    pub points: usize,
    pub polygons: usize,
}

impl LoadReport {
    pub fn is_complete(&self) -> bool {
        self.unresolved.is_empty()
    }
}

impl Snapshot {
    /// Parse a snapshot from JSON and validate it.
    pub fn from_json(json: &str) -> Result<Self, FormatError> {
        let snapshot: Self = serde_json::from_str(json)?;
        snapshot.validate()?;
        Ok(snapshot)
    }

    pub fn to_json(&self) -> Result<String, FormatError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn read(path: &Path) -> Result<Self, FormatError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    pub fn write(&self, path: &Path) -> Result<(), FormatError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }

    /// Check version, references, ids and geometry.
    pub fn validate(&self) -> Result<(), FormatError> {
        check_version(&self.version)?;

        let mut source_ids = HashSet::new();
        for source in &self.sources {
            if !source_ids.insert(&source.id) {
                return Err(FormatError::DuplicateId(source.id.to_string()));
            }
        }

        if let Some(params) = &self.preprocessing.params {
            params
                .validate()
                .map_err(|e| FormatError::invalid_value("preprocessing.params", e.to_string()))?;
        }

        let mut ids = HashSet::new();
        let references = self
            .points
            .iter()
            .map(|p| (&p.id, &p.source_id))
            .chain(self.polygons.iter().map(|p| (&p.id, &p.source_id)));
        for (id, source_id) in references {
            if !ids.insert(id) {
                return Err(FormatError::DuplicateId(id.to_string()));
            }
            if !source_ids.contains(source_id) {
                return Err(FormatError::UnknownSource {
                    annotation: id.to_string(),
                    source_id: source_id.to_string(),
                });
            }
        }

        for (i, polygon) in self.polygons.iter().enumerate() {
            geometry::validate_ring(&polygon.vertices).map_err(|e| {
                FormatError::invalid_value(format!("polygons[{}].vertices", i), e.to_string())
            })?;
        }
        Ok(())
    }
}

/// Points and polygons as one list in creation order.
///
/// Entries are ordered by the counter in their ids; the sort is stable and
/// ids without a counter keep their listed order after the numbered ones.
pub(crate) fn creation_order(
    points: Vec<PointEntry>,
    polygons: Vec<PolygonEntry>,
) -> Vec<Annotation> {
    let points = points.into_iter().map(|p| Annotation {
        id: p.id,
        source_id: p.source_id,
        label: p.label,
        color: p.color,
        visible: p.visible,
        geometry: Geometry::Point(p.pixel),
        derived: Derived::Stale,
    });
    let polygons = polygons.into_iter().map(|p| Annotation {
        id: p.id,
        source_id: p.source_id,
        label: p.label,
        color: p.color,
        visible: p.visible,
        geometry: Geometry::Polygon {
            vertices: p.vertices,
            closed: true,
        },
        derived: Derived::Stale,
    });
    let mut annotations: Vec<Annotation> = points.chain(polygons).collect();
    annotations.sort_by_key(|a| a.id.counter().unwrap_or(u64::MAX));
    annotations
}

fn check_version(version: &str) -> Result<(), FormatError> {
    let major = |v: &str| v.split('.').next().and_then(|m| m.parse::<u32>().ok());
    match (major(version), major(SNAPSHOT_VERSION)) {
        (Some(found), Some(expected)) if found == expected => Ok(()),
        _ => Err(FormatError::VersionMismatch {
            expected: SNAPSHOT_VERSION.to_string(),
            found: version.to_string(),
        }),
    }
}

/// Candidate locations for a source path written in a snapshot.
///
/// In order: the path as written, relative to the snapshot directory, the
/// file name in the snapshot directory, the file name in its parent.
pub fn candidate_paths(written: &Path, base_dir: &Path) -> Vec<PathBuf> {
    let mut candidates = vec![written.to_path_buf()];
    if written.is_relative() {
        candidates.push(base_dir.join(written));
    }
    if let Some(name) = written.file_name() {
        candidates.push(base_dir.join(name));
        if let Some(parent) = base_dir.parent() {
            candidates.push(parent.join(name));
        }
    }
    candidates
}

/// First existing candidate for a snapshot source path.
pub fn resolve_source_path(written: &Path, base_dir: &Path) -> Result<PathBuf, SourceError> {
    candidate_paths(written, base_dir)
        .into_iter()
        .find(|p| p.is_file())
        .ok_or_else(|| SourceError::NotFound {
            path: written.to_path_buf(),
        })
}

impl SessionState {
    /// Serialize the session. Open polygons are left out.
    pub fn to_snapshot(&self) -> Snapshot {
        let mut points = Vec::new();
        let mut polygons = Vec::new();
        for annotation in self.annotations.iter() {
            match &annotation.geometry {
                Geometry::Point(pixel) => points.push(PointEntry {
                    id: annotation.id.clone(),
                    source_id: annotation.source_id.clone(),
                    pixel: *pixel,
                    label: annotation.label.clone(),
                    color: annotation.color,
                    visible: annotation.visible,
                }),
                Geometry::Polygon {
                    vertices,
                    closed: true,
                } => polygons.push(PolygonEntry {
                    id: annotation.id.clone(),
                    source_id: annotation.source_id.clone(),
                    vertices: vertices.clone(),
                    label: annotation.label.clone(),
                    color: annotation.color,
                    visible: annotation.visible,
                }),
                Geometry::Polygon { closed: false, .. } => {}
            }
        }

        Snapshot {
            version: SNAPSHOT_VERSION.to_string(),
            sources: self
                .sources
                .iter()
                .map(|s| SourceEntry {
                    id: s.id.clone(),
                    path: s.path.clone(),
                })
                .collect(),
            mode: self.mode,
            preprocessing: PreprocessingEntry {
                denoise: self.flags.denoise,
                smoothing: self.flags.smoothing,
                snv: self.flags.snv,
                params: Some(*self.pipeline.config()),
            },
            wavelength_range: self.wavelength_range,
            points,
            polygons,
        }
    }

    /// Build a fresh session from a snapshot.
    pub fn from_snapshot(
        snapshot: Snapshot,
        base_dir: &Path,
    ) -> Result<(Self, LoadReport), FormatError> {
        let mut session = Self::new();
        let report = session.restore(snapshot, base_dir)?;
        Ok((session, report))
    }

    /// Replace this session's contents with a snapshot.
    ///
    /// The snapshot is fully validated before anything changes. Sources that
    /// cannot be opened are reported and their annotations derive as
    /// [`Derived::Unresolved`]; the load itself still succeeds. Settings that
    /// are not part of the snapshot (recompute policy, automatic windows) are
    /// kept.
    pub fn restore(&mut self, snapshot: Snapshot, base_dir: &Path) -> Result<LoadReport, FormatError> {
        snapshot.validate()?;
        let pipeline = match snapshot.preprocessing.params {
            Some(params) => Pipeline::new(params)
                .map_err(|e| FormatError::invalid_value("preprocessing.params", e.to_string()))?,
            None => self.pipeline,
        };

        self.cache.clear();
        self.sources.clear();
        self.annotations.clear_all();
        self.next_source = 1;

        let mut report = LoadReport::default();
        for entry in snapshot.sources {
            if let Some(n) = entry
                .id
                .as_str()
                .strip_prefix("src")
                .and_then(|n| n.parse::<u64>().ok())
            {
                self.next_source = self.next_source.max(n.saturating_add(1));
            }

            let opened = resolve_source_path(&entry.path, base_dir)
                .and_then(|path| CubeSource::open(entry.id.clone(), &path, &self.registry));
            match opened {
                Ok(cube) => {
                    report.sources_loaded += 1;
                    self.sources.push(SourceSlot {
                        id: entry.id,
                        path: entry.path,
                        cube: Some(Arc::new(cube)),
                        error: None,
                    });
                }
                Err(e) => {
                    log::warn!("Source {} ({:?}) is unresolved: {}", entry.id, entry.path, e);
                    report.unresolved.push(UnresolvedSource {
                        id: entry.id.clone(),
                        path: entry.path.clone(),
                        error: e.to_string(),
                    });
                    self.sources.push(SourceSlot {
                        id: entry.id,
                        path: entry.path,
                        cube: None,
                        error: Some(e.to_string()),
                    });
                }
            }
        }

        for annotation in creation_order(snapshot.points, snapshot.polygons) {
            match annotation.geometry {
                Geometry::Point(_) => report.points += 1,
                Geometry::Polygon { .. } => report.polygons += 1,
            }
            self.annotations.insert_restored(annotation)?;
        }

        self.mode = snapshot.mode;
        self.flags = snapshot.preprocessing.flags();
        self.pipeline = pipeline;
        self.wavelength_range = snapshot.wavelength_range;
        self.invalidate();

        log::info!(
            "Restored session: {} sources ({} unresolved), {} points, {} polygons",
            report.sources_loaded + report.unresolved.len(),
            report.unresolved.len(),
            report.points,
            report.polygons
        );
        Ok(report)
    }

    /// Load a snapshot file, resolving sources relative to its directory.
    pub fn load_snapshot(&mut self, path: &Path) -> Result<LoadReport, FormatError> {
        let snapshot = Snapshot::read(path)?;
        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        self.restore(snapshot, base_dir)
    }

    /// Write the session snapshot as pretty JSON.
    pub fn save_snapshot(&self, path: &Path) -> Result<(), FormatError> {
        self.to_snapshot().write(path)?;
        log::info!("Saved session snapshot to {:?}", path);
        Ok(())
    }
}
