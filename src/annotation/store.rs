//! Annotation storage, drafting and recompute bookkeeping.

use rayon::prelude::*;
use serde::Serialize;
use web_time::Instant;

use crate::annotation::derive::{self, DeriveContext, Derived, Target};
use crate::annotation::geometry::{self, MIN_POLYGON_VERTICES};
use crate::annotation::{AnnotationId, AnnotationKind, ColorCycler, Rgb};
use crate::data::{Pixel, SourceId};
use crate::error::{Error, FormatError, GeometryError};

/// Shape of an annotation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Geometry {
    /// A single pixel
    Point(Pixel),
    /// A vertex ring; open while being drawn
    Polygon { vertices: Vec<Pixel>, closed: bool },
}

impl Geometry {
    pub fn kind(&self) -> AnnotationKind {
        match self {
            Geometry::Point(_) => AnnotationKind::Point,
            Geometry::Polygon { .. } => AnnotationKind::Polygon,
        }
    }

    /// Points are always complete; polygons once closed.
    pub fn is_complete(&self) -> bool {
        match self {
            Geometry::Point(_) => true,
            Geometry::Polygon { closed, .. } => *closed,
        }
    }
}

/// A single annotation on a source.
#[derive(Debug, Clone, PartialEq)]
pub struct Annotation {
    pub id: AnnotationId,
    pub source_id: SourceId,
    pub label: String,
    pub color: Rgb,
    pub visible: bool,
    pub geometry: Geometry,
    /// Derived spectrum or statistics; never persisted
    pub derived: Derived,
}

impl Annotation {
    pub fn kind(&self) -> AnnotationKind {
        self.geometry.kind()
    }

    /// Label, or the id when the label is empty.
    pub fn display_label(&self) -> &str {
        if self.label.trim().is_empty() {
            self.id.as_str()
        } else {
            &self.label
        }
    }

    pub fn target(&self) -> Target {
        Target {
            id: self.id.clone(),
            source_id: self.source_id.clone(),
            geometry: self.geometry.clone(),
        }
    }

    /// Distance from a pixel for hit testing; zero inside a closed polygon.
    fn hit_distance(&self, pixel: Pixel) -> f64 {
        match &self.geometry {
            Geometry::Point(p) => p.distance_to(&pixel),
            Geometry::Polygon { vertices, closed } => {
                if *closed && geometry::contains(vertices, pixel) {
                    0.0
                } else {
                    geometry::distance_to_ring(vertices, pixel)
                }
            }
        }
    }
}

/// Outcome of adding a vertex to the polygon being drawn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DraftStep {
    /// Vertex appended; the draft now has this many vertices
    Extended { id: AnnotationId, vertices: usize },
    /// The first vertex was re-selected and the polygon closed
    Closed(AnnotationId),
    /// Repeated vertex, nothing changed
    Ignored,
}

/// Storage for all annotations of a session.
///
/// Annotations keep insertion order, which is also the order used by
/// exporters and by [`remove_last`](AnnotationStore::remove_last).
#[derive(Debug, Clone)]
pub struct AnnotationStore {
    annotations: Vec<Annotation>,
    colors: ColorCycler,
    /// Shared counter for point and polygon ids
    next_id: u64,
    /// Id of the polygon currently being drawn
    draft: Option<AnnotationId>,
    /// Set when annotations change, cleared by the owner after redraw
    dirty: bool,
}

impl Default for AnnotationStore {
    fn default() -> Self {
        Self::new()
    }
}

impl AnnotationStore {
    pub fn new() -> Self {
        Self {
            annotations: Vec::new(),
            colors: ColorCycler::new(),
            next_id: 1,
            draft: None,
            dirty: true,
        }
    }

    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    #[inline]
    pub fn clear_dirty(&mut self) {
        self.dirty = false;
    }

    #[inline]
    fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn colors(&self) -> &ColorCycler {
        &self.colors
    }

    /// Counter used for the next id.
    pub fn next_id_counter(&self) -> u64 {
        self.next_id
    }

    /// Next unused id; the counter wraps back to 1 after `u64::MAX`.
    fn allocate_id(&mut self, kind: AnnotationKind) -> AnnotationId {
        loop {
            let id = AnnotationId::for_kind(kind, self.next_id);
            self.next_id = self.next_id.checked_add(1).unwrap_or(1);
            if self.get(&id).is_none() {
                return id;
            }
        }
    }

    fn push(&mut self, annotation: Annotation) -> AnnotationId {
        let id = annotation.id.clone();
        self.annotations.push(annotation);
        self.mark_dirty();
        id
    }

    // ========================================================================
    // Creation
    // ========================================================================

    /// Add a point with the next free color.
    pub fn add_point(
        &mut self,
        source_id: SourceId,
        pixel: Pixel,
        label: impl Into<String>,
    ) -> AnnotationId {
        let id = self.allocate_id(AnnotationKind::Point);
        let color = self.colors.next_color();
        log::debug!("Added point {} at ({}, {})", id, pixel.row, pixel.col);
        self.push(Annotation {
            id,
            source_id,
            label: label.into(),
            color,
            visible: true,
            geometry: Geometry::Point(pixel),
            derived: Derived::Stale,
        })
    }

    /// Add a closed polygon; fails on fewer than three vertices or crossing edges.
    pub fn add_polygon(
        &mut self,
        source_id: SourceId,
        vertices: Vec<Pixel>,
        label: impl Into<String>,
    ) -> Result<AnnotationId, GeometryError> {
        geometry::validate_ring(&vertices)?;
        let id = self.allocate_id(AnnotationKind::Polygon);
        let color = self.colors.next_color();
        log::debug!("Added polygon {} with {} vertices", id, vertices.len());
        Ok(self.push(Annotation {
            id,
            source_id,
            label: label.into(),
            color,
            visible: true,
            geometry: Geometry::Polygon {
                vertices,
                closed: true,
            },
            derived: Derived::Stale,
        }))
    }

    /// Restore an annotation with its own id and color, as read from a snapshot.
    pub fn insert_restored(&mut self, annotation: Annotation) -> Result<(), FormatError> {
        if self.get(&annotation.id).is_some() {
            return Err(FormatError::DuplicateId(annotation.id.to_string()));
        }
        if let Some(counter) = annotation.id.counter() {
            self.next_id = self.next_id.max(counter.saturating_add(1));
        }
        self.colors.take(annotation.color);
        self.push(annotation);
        Ok(())
    }

    /// Insert an annotation from another session under a fresh id.
    ///
    /// The preferred color is kept when no annotation here uses it; otherwise
    /// the next free palette color is assigned.
    pub fn insert_imported(
        &mut self,
        source_id: SourceId,
        geometry: Geometry,
        label: String,
        preferred_color: Rgb,
        visible: bool,
    ) -> AnnotationId {
        let id = self.allocate_id(geometry.kind());
        let color = if self.colors.is_taken(preferred_color) {
            self.colors.next_color()
        } else {
            self.colors.take(preferred_color);
            preferred_color
        };
        let derived = if geometry.is_complete() {
            Derived::Stale
        } else {
            Derived::Open
        };
        self.push(Annotation {
            id,
            source_id,
            label,
            color,
            visible,
            geometry,
            derived,
        })
    }

    // ========================================================================
    // Polygon drafting
    // ========================================================================

    /// Start drawing a polygon, discarding any unfinished draft.
    pub fn begin_polygon(&mut self, source_id: SourceId, first: Pixel) -> AnnotationId {
        if let Some(old) = self.cancel_polygon() {
            log::debug!("Discarded unfinished polygon {}", old.id);
        }
        let id = self.allocate_id(AnnotationKind::Polygon);
        let color = self.colors.next_color();
        self.draft = Some(id.clone());
        self.push(Annotation {
            id,
            source_id,
            label: String::new(),
            color,
            visible: true,
            geometry: Geometry::Polygon {
                vertices: vec![first],
                closed: false,
            },
            derived: Derived::Open,
        })
    }

    /// The polygon being drawn, if any.
    pub fn draft(&self) -> Option<&Annotation> {
        self.draft.as_ref().and_then(|id| self.get(id))
    }

    fn draft_vertices_mut(&mut self) -> Result<&mut Vec<Pixel>, Error> {
        let id = self.draft.clone().ok_or(Error::NoDraft)?;
        match self.get_mut(&id).map(|a| &mut a.geometry) {
            Some(Geometry::Polygon { vertices, .. }) => Ok(vertices),
            _ => Err(Error::NoDraft),
        }
    }

    /// Add a vertex to the draft. Re-selecting the first vertex closes it.
    pub fn extend_polygon(&mut self, pixel: Pixel) -> Result<DraftStep, Error> {
        let vertices = self.draft_vertices_mut()?;
        let count = vertices.len();

        if count >= MIN_POLYGON_VERTICES && vertices.first() == Some(&pixel) {
            return self.close_polygon().map(DraftStep::Closed);
        }
        if vertices.last() == Some(&pixel) || vertices.first() == Some(&pixel) {
            return Ok(DraftStep::Ignored);
        }

        vertices.push(pixel);
        let vertices = vertices.len();
        self.mark_dirty();
        let id = self.draft.clone().ok_or(Error::NoDraft)?;
        Ok(DraftStep::Extended { id, vertices })
    }

    /// Close the draft. On invalid geometry the draft stays open.
    pub fn close_polygon(&mut self) -> Result<AnnotationId, Error> {
        let vertices = self.draft_vertices_mut()?;
        geometry::validate_ring(vertices)?;

        let id = self.draft.take().ok_or(Error::NoDraft)?;
        if let Some(annotation) = self.get_mut(&id) {
            if let Geometry::Polygon { closed, .. } = &mut annotation.geometry {
                *closed = true;
            }
            annotation.derived = Derived::Stale;
        }
        self.mark_dirty();
        log::debug!("Closed polygon {}", id);
        Ok(id)
    }

    /// Drop the draft and return its color to the pool.
    pub fn cancel_polygon(&mut self) -> Option<Annotation> {
        let id = self.draft.take()?;
        self.remove(&id)
    }

    // ========================================================================
    // Removal
    // ========================================================================

    /// Remove an annotation and release its color.
    pub fn remove(&mut self, id: &AnnotationId) -> Option<Annotation> {
        let index = self.annotations.iter().position(|a| &a.id == id)?;
        let removed = self.annotations.remove(index);
        self.colors.release(removed.color);
        if self.draft.as_ref() == Some(id) {
            self.draft = None;
        }
        self.mark_dirty();
        Some(removed)
    }

    /// Remove the most recently added annotation.
    pub fn remove_last(&mut self) -> Option<Annotation> {
        let id = self.annotations.last()?.id.clone();
        self.remove(&id)
    }

    /// Remove everything, including the draft, and reset colors.
    pub fn clear_all(&mut self) {
        if !self.annotations.is_empty() {
            self.mark_dirty();
        }
        self.annotations.clear();
        self.colors.reset();
        self.draft = None;
    }

    // ========================================================================
    // Queries and edits
    // ========================================================================

    pub fn get(&self, id: &AnnotationId) -> Option<&Annotation> {
        self.annotations.iter().find(|a| &a.id == id)
    }

    fn get_mut(&mut self, id: &AnnotationId) -> Option<&mut Annotation> {
        self.annotations.iter_mut().find(|a| &a.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Annotation> {
        self.annotations.iter()
    }

    pub fn points(&self) -> impl Iterator<Item = &Annotation> {
        self.iter().filter(|a| a.kind() == AnnotationKind::Point)
    }

    pub fn polygons(&self) -> impl Iterator<Item = &Annotation> {
        self.iter().filter(|a| a.kind() == AnnotationKind::Polygon)
    }

    pub fn len(&self) -> usize {
        self.annotations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.annotations.is_empty()
    }

    /// Annotation on `source_id` closest to `pixel` within `radius`.
    ///
    /// Polygons count as distance zero anywhere inside. Ties go to the most
    /// recently added annotation.
    pub fn nearest(
        &self,
        source_id: &SourceId,
        pixel: Pixel,
        radius: f64,
    ) -> Option<&AnnotationId> {
        self.annotations
            .iter()
            .rev()
            .filter(|a| &a.source_id == source_id)
            .map(|a| (a, a.hit_distance(pixel)))
            .filter(|(_, d)| *d <= radius)
            .fold(None, |best: Option<(&Annotation, f64)>, (a, d)| match best {
                Some((_, best_d)) if best_d <= d => best,
                _ => Some((a, d)),
            })
            .map(|(a, _)| &a.id)
    }

    pub fn set_visibility(&mut self, id: &AnnotationId, visible: bool) -> Result<(), Error> {
        let annotation = self
            .get_mut(id)
            .ok_or_else(|| Error::UnknownAnnotation(id.clone()))?;
        annotation.visible = visible;
        self.mark_dirty();
        Ok(())
    }

    /// Hide everything if anything is visible, otherwise show everything.
    ///
    /// Returns the new visibility.
    pub fn toggle_all_visibility(&mut self) -> bool {
        let visible = !self.annotations.iter().any(|a| a.visible);
        for annotation in &mut self.annotations {
            annotation.visible = visible;
        }
        self.mark_dirty();
        visible
    }

    pub fn set_label(&mut self, id: &AnnotationId, label: impl Into<String>) -> Result<(), Error> {
        let annotation = self
            .get_mut(id)
            .ok_or_else(|| Error::UnknownAnnotation(id.clone()))?;
        annotation.label = label.into();
        self.mark_dirty();
        Ok(())
    }

    // ========================================================================
    // Derived data
    // ========================================================================

    /// Mark every completed annotation stale.
    pub fn mark_all_stale(&mut self) {
        for annotation in &mut self.annotations {
            if annotation.geometry.is_complete() {
                annotation.derived = Derived::Stale;
            }
        }
    }

    /// Mark completed annotations on one source stale.
    pub fn mark_source_stale(&mut self, source_id: &SourceId) {
        for annotation in &mut self.annotations {
            if &annotation.source_id == source_id && annotation.geometry.is_complete() {
                annotation.derived = Derived::Stale;
            }
        }
    }

    /// Derivation inputs for every annotation, or only the stale ones.
    pub fn targets(&self, only_stale: bool) -> Vec<Target> {
        self.annotations
            .iter()
            .filter(|a| !only_stale || a.derived.is_stale())
            .map(Annotation::target)
            .collect()
    }

    /// Write derived results back; ids that no longer exist are skipped.
    ///
    /// Returns the number of annotations updated.
    pub fn apply_derived(&mut self, results: Vec<(AnnotationId, Derived)>) -> usize {
        let mut applied = 0;
        for (id, derived) in results {
            let Some(annotation) = self.get_mut(&id) else {
                continue;
            };
            if let Derived::Invalid(reason) = &derived {
                log::warn!("Annotation {} has no derived spectrum: {}", id, reason);
            }
            annotation.derived = derived;
            applied += 1;
        }
        if applied > 0 {
            self.mark_dirty();
        }
        applied
    }

    /// Recompute every annotation.
    pub fn recompute_all(&mut self, ctx: &DeriveContext) -> usize {
        self.recompute(ctx, false)
    }

    /// Recompute only stale annotations.
    pub fn refresh(&mut self, ctx: &DeriveContext) -> usize {
        self.recompute(ctx, true)
    }

    fn recompute(&mut self, ctx: &DeriveContext, only_stale: bool) -> usize {
        let targets = self.targets(only_stale);
        if targets.is_empty() {
            return 0;
        }
        let start = Instant::now();
        let results = derive_all(ctx, &targets);
        let applied = self.apply_derived(results);
        log::debug!(
            "Recomputed {} annotations in {:.1?}",
            applied,
            start.elapsed()
        );
        applied
    }
}

/// Derive many targets in parallel, keeping input order.
pub fn derive_all(ctx: &DeriveContext, targets: &[Target]) -> Vec<(AnnotationId, Derived)> {
    targets
        .par_iter()
        .map(|t| (t.id.clone(), derive::derive(ctx, t)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotation::palette_color;

    fn src() -> SourceId {
        SourceId::new("src1")
    }

    fn px(row: u32, col: u32) -> Pixel {
        Pixel::new(row, col)
    }

    #[test]
    fn test_add_point_assigns_id_and_color() {
        let mut store = AnnotationStore::new();
        let a = store.add_point(src(), px(1, 1), "leaf");
        let b = store.add_point(src(), px(2, 2), "");
        assert_eq!(a.as_str(), "pt0001");
        assert_eq!(b.as_str(), "pt0002");
        assert_eq!(store.get(&a).unwrap().color, palette_color(0));
        assert_eq!(store.get(&b).unwrap().color, palette_color(1));
        assert_eq!(store.get(&b).unwrap().display_label(), "pt0002");
        assert!(store.get(&a).unwrap().derived.is_stale());
    }

    #[test]
    fn test_add_polygon_validation() {
        let mut store = AnnotationStore::new();
        let err = store
            .add_polygon(src(), vec![px(0, 0), px(1, 1)], "")
            .unwrap_err();
        assert_eq!(err, GeometryError::TooFewVertices { count: 2 });
        assert!(store.is_empty());

        let id = store
            .add_polygon(src(), vec![px(0, 0), px(0, 2), px(2, 0)], "tri")
            .unwrap();
        assert_eq!(id.as_str(), "pg0001");
        assert_eq!(store.polygons().count(), 1);
    }

    #[test]
    fn test_ids_never_collide_after_remove() {
        let mut store = AnnotationStore::new();
        let a = store.add_point(src(), px(0, 0), "");
        store.remove(&a);
        let b = store.add_point(src(), px(0, 0), "");
        assert_ne!(a, b);
    }

    #[test]
    fn test_remove_releases_color() {
        let mut store = AnnotationStore::new();
        let a = store.add_point(src(), px(0, 0), "");
        let color = store.get(&a).unwrap().color;
        store.remove(&a).unwrap();
        assert!(!store.colors().is_taken(color));
        let b = store.add_point(src(), px(1, 1), "");
        assert_eq!(store.get(&b).unwrap().color, palette_color(1));
    }

    #[test]
    fn test_drafting_closes_on_first_vertex() {
        let mut store = AnnotationStore::new();
        let id = store.begin_polygon(src(), px(0, 0));
        assert_eq!(store.draft().unwrap().derived, Derived::Open);

        assert_eq!(
            store.extend_polygon(px(0, 4)).unwrap(),
            DraftStep::Extended {
                id: id.clone(),
                vertices: 2
            }
        );
        assert_eq!(store.extend_polygon(px(0, 4)).unwrap(), DraftStep::Ignored);
        store.extend_polygon(px(4, 4)).unwrap();
        assert_eq!(store.extend_polygon(px(0, 0)).unwrap(), DraftStep::Closed(id.clone()));

        assert!(store.draft().is_none());
        let polygon = store.get(&id).unwrap();
        assert!(polygon.geometry.is_complete());
        assert!(polygon.derived.is_stale());
    }

    #[test]
    fn test_close_invalid_draft_keeps_it_open() {
        let mut store = AnnotationStore::new();
        store.begin_polygon(src(), px(0, 0));
        store.extend_polygon(px(1, 1)).unwrap();
        assert!(matches!(
            store.close_polygon(),
            Err(Error::Geometry(GeometryError::TooFewVertices { count: 2 }))
        ));
        assert!(store.draft().is_some());

        assert!(store.cancel_polygon().is_some());
        assert!(store.is_empty());
        assert!(matches!(store.extend_polygon(px(2, 2)), Err(Error::NoDraft)));
    }

    #[test]
    fn test_nearest() {
        let mut store = AnnotationStore::new();
        let p = store.add_point(src(), px(10, 10), "");
        let poly = store
            .add_polygon(src(), vec![px(20, 20), px(20, 30), px(30, 30), px(30, 20)], "")
            .unwrap();

        assert_eq!(store.nearest(&src(), px(12, 11), 8.0), Some(&p));
        assert_eq!(store.nearest(&src(), px(25, 25), 8.0), Some(&poly));
        assert_eq!(store.nearest(&src(), px(25, 35), 8.0), Some(&poly));
        assert_eq!(store.nearest(&src(), px(0, 60), 8.0), None);
        assert_eq!(store.nearest(&SourceId::new("other"), px(10, 10), 8.0), None);
    }

    #[test]
    fn test_remove_last_and_clear_all() {
        let mut store = AnnotationStore::new();
        store.add_point(src(), px(0, 0), "");
        let last = store.add_point(src(), px(1, 1), "");
        assert_eq!(store.remove_last().unwrap().id, last);
        assert_eq!(store.len(), 1);

        store.clear_all();
        assert!(store.is_empty());
        assert_eq!(store.colors().free_count(), 10);
    }

    #[test]
    fn test_visibility_and_labels() {
        let mut store = AnnotationStore::new();
        let a = store.add_point(src(), px(0, 0), "");
        let b = store.add_point(src(), px(1, 1), "");
        store.set_visibility(&a, false).unwrap();
        // b is still visible, so everything gets hidden
        assert!(!store.toggle_all_visibility());
        assert!(store.iter().all(|x| !x.visible));
        assert!(store.toggle_all_visibility());

        store.set_label(&b, "soil").unwrap();
        assert_eq!(store.get(&b).unwrap().label, "soil");
        assert!(matches!(
            store.set_label(&AnnotationId::new("nope"), "x"),
            Err(Error::UnknownAnnotation(_))
        ));
    }

    #[test]
    fn test_insert_restored_bumps_counter() {
        let mut store = AnnotationStore::new();
        let restored = Annotation {
            id: AnnotationId::new("pg0041"),
            source_id: src(),
            label: "x".to_string(),
            color: palette_color(2),
            visible: true,
            geometry: Geometry::Polygon {
                vertices: vec![px(0, 0), px(0, 2), px(2, 0)],
                closed: true,
            },
            derived: Derived::Stale,
        };
        store.insert_restored(restored.clone()).unwrap();
        assert!(matches!(
            store.insert_restored(restored),
            Err(FormatError::DuplicateId(_))
        ));
        assert_eq!(store.next_id_counter(), 42);
        assert!(store.colors().is_taken(palette_color(2)));
    }

    #[test]
    fn test_insert_imported_color_rule() {
        let mut store = AnnotationStore::new();
        store.add_point(src(), px(0, 0), ""); // takes color 0

        let kept = store.insert_imported(
            src(),
            Geometry::Point(px(1, 1)),
            "a".to_string(),
            palette_color(5),
            true,
        );
        assert_eq!(store.get(&kept).unwrap().color, palette_color(5));

        let reassigned = store.insert_imported(
            src(),
            Geometry::Point(px(2, 2)),
            "b".to_string(),
            palette_color(0),
            true,
        );
        assert_eq!(store.get(&reassigned).unwrap().color, palette_color(1));
    }
}
