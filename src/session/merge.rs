//! Importing annotations from another session.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use serde::Serialize;

use crate::annotation::geometry::canonical_ring;
use crate::annotation::{Annotation, AnnotationId, Geometry};
use crate::data::{CubeSource, Pixel, SourceId};
use crate::error::FormatError;
use crate::session::snapshot::{Snapshot, creation_order, resolve_source_path};
use crate::session::{SessionState, SourceSlot, normalize_path};

/// Summary of a merge import.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MergeReport {
    /// Imported sources that matched one of ours by path
    pub sources_matched: usize,
    /// Imported sources added to this session
    pub sources_added: Vec<SourceId>,
    /// New ids given to the imported annotations, in import order
    pub imported: Vec<AnnotationId>,
    /// Annotations skipped because an identical one already exists
    pub skipped_duplicates: usize,
}

/// Identity of an annotation's geometry, independent of vertex order.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum GeometryKey {
    Point(SourceId, Pixel),
    Polygon(SourceId, Vec<Pixel>),
}

impl GeometryKey {
    fn of(source_id: &SourceId, geometry: &Geometry) -> Option<Self> {
        match geometry {
            Geometry::Point(pixel) => Some(GeometryKey::Point(source_id.clone(), *pixel)),
            Geometry::Polygon {
                vertices,
                closed: true,
            } => Some(GeometryKey::Polygon(
                source_id.clone(),
                canonical_ring(vertices),
            )),
            Geometry::Polygon { closed: false, .. } => None,
        }
    }
}

impl SessionState {
    /// Import another session's annotations into this one.
    ///
    /// Sources are matched by normalized path; unmatched ones are opened as
    /// new sources. Annotations identical to an existing one (same source and
    /// pixel, or same source and ring) are skipped. Imported annotations get
    /// fresh ids; their color is kept when free. Existing annotations are not
    /// touched.
    pub fn merge_import(
        &mut self,
        other: Snapshot,
        base_dir: &Path,
    ) -> Result<MergeReport, FormatError> {
        other.validate()?;
        let mut report = MergeReport::default();

        let ours: HashMap<_, SourceId> = self
            .sources
            .iter()
            .map(|s| (normalize_path(&s.path), s.id.clone()))
            .collect();

        let mut source_map: HashMap<SourceId, SourceId> = HashMap::new();
        for entry in &other.sources {
            let resolved = resolve_source_path(&entry.path, base_dir);
            let key = match &resolved {
                Ok(path) => normalize_path(path),
                Err(_) => normalize_path(&entry.path),
            };
            if let Some(existing) = ours.get(&key) {
                source_map.insert(entry.id.clone(), existing.clone());
                report.sources_matched += 1;
                continue;
            }

            let id = self.allocate_source_id();
            let opened = resolved
                .and_then(|path| CubeSource::open(id.clone(), &path, &self.registry));
            let slot = match opened {
                Ok(cube) => SourceSlot {
                    id: id.clone(),
                    path: entry.path.clone(),
                    cube: Some(Arc::new(cube)),
                    error: None,
                },
                Err(e) => {
                    log::warn!("Imported source {:?} is unresolved: {}", entry.path, e);
                    SourceSlot {
                        id: id.clone(),
                        path: entry.path.clone(),
                        cube: None,
                        error: Some(e.to_string()),
                    }
                }
            };
            self.sources.push(slot);
            source_map.insert(entry.id.clone(), id.clone());
            report.sources_added.push(id);
        }

        let mut seen: HashSet<GeometryKey> = self
            .annotations
            .iter()
            .filter_map(|a| GeometryKey::of(&a.source_id, &a.geometry))
            .collect();

        let incoming = creation_order(other.points, other.polygons);
        for annotation in incoming {
            let Annotation {
                source_id,
                geometry,
                label,
                color,
                visible,
                ..
            } = annotation;
            let Some(source_id) = source_map.get(&source_id).cloned() else {
                continue;
            };
            let Some(key) = GeometryKey::of(&source_id, &geometry) else {
                continue;
            };
            if !seen.insert(key) {
                report.skipped_duplicates += 1;
                continue;
            }
            let id = self
                .annotations
                .insert_imported(source_id, geometry, label, color, visible);
            report.imported.push(id);
        }

        log::info!(
            "Merged {} annotations ({} duplicates skipped, {} new sources)",
            report.imported.len(),
            report.skipped_duplicates,
            report.sources_added.len()
        );
        self.recompute_if_immediate();
        Ok(report)
    }

    /// Merge a snapshot file into this session.
    pub fn merge_import_file(&mut self, path: &Path) -> Result<MergeReport, FormatError> {
        let other = Snapshot::read(path)?;
        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        self.merge_import(other, base_dir)
    }
}
