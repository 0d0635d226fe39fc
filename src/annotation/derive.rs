//! Derived spectra: extraction through the band cache plus preprocessing.
//!
//! A point yields one spectrum; a closed polygon yields per-band mean and
//! population standard deviation over every pixel inside or on its ring.
//! Every result carries the wavelengths it is aligned to.

use std::collections::HashMap;
use std::sync::Arc;

use ndarray::{Array1, Array2, Axis};

use crate::annotation::geometry;
use crate::annotation::{AnnotationId, Geometry};
use crate::cache::{BandCache, Mode};
use crate::data::{CubeSource, Pixel, SourceId, WavelengthRange};
use crate::preprocess::{Pipeline, PreprocessingFlags};

/// Derived state of one annotation.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Derived {
    /// Needs recomputation
    #[default]
    Stale,
    /// Point spectrum
    Spectrum {
        wavelengths: Vec<f64>,
        values: Array1<f32>,
    },
    /// Polygon statistics
    Stats {
        wavelengths: Vec<f64>,
        mean: Array1<f32>,
        std: Array1<f32>,
        pixel_count: usize,
    },
    /// Polygon still being drawn
    Open,
    /// Computation failed for this annotation only
    Invalid(String),
    /// The annotation's source is not loaded
    Unresolved,
}

impl Derived {
    /// Wavelengths and main spectrum (point spectrum or polygon mean).
    pub fn spectrum(&self) -> Option<(&[f64], &Array1<f32>)> {
        match self {
            Derived::Spectrum {
                wavelengths,
                values,
            } => Some((wavelengths, values)),
            Derived::Stats {
                wavelengths, mean, ..
            } => Some((wavelengths, mean)),
            _ => None,
        }
    }

    /// Polygon standard deviation.
    pub fn std(&self) -> Option<&Array1<f32>> {
        match self {
            Derived::Stats { std, .. } => Some(std),
            _ => None,
        }
    }

    pub fn is_stale(&self) -> bool {
        matches!(self, Derived::Stale)
    }
}

/// Everything needed to derive spectra, detached from the session.
///
/// Cheap to clone and `Send`, so it can be handed to worker threads.
#[derive(Debug, Clone)]
pub struct DeriveContext {
    pub sources: HashMap<SourceId, Arc<CubeSource>>,
    pub cache: Arc<BandCache>,
    pub mode: Mode,
    pub flags: PreprocessingFlags,
    pub pipeline: Pipeline,
    pub wavelength_range: Option<WavelengthRange>,
}

/// The part of an annotation that determines its derived spectrum.
#[derive(Debug, Clone, PartialEq)]
pub struct Target {
    pub id: AnnotationId,
    pub source_id: SourceId,
    pub geometry: Geometry,
}

/// Compute the derived state of one annotation.
pub fn derive(ctx: &DeriveContext, target: &Target) -> Derived {
    let Some(source) = ctx.sources.get(&target.source_id) else {
        return Derived::Unresolved;
    };
    match &target.geometry {
        Geometry::Point(pixel) => derive_point(ctx, source, *pixel),
        Geometry::Polygon {
            closed: false, ..
        } => Derived::Open,
        Geometry::Polygon { vertices, .. } => derive_polygon(ctx, source, vertices),
    }
}

fn derive_point(ctx: &DeriveContext, source: &CubeSource, pixel: Pixel) -> Derived {
    if !source.contains_pixel(pixel) {
        let shape = source.shape();
        return Derived::Invalid(format!(
            "pixel ({}, {}) is outside the {}x{} image",
            pixel.row, pixel.col, shape.rows, shape.cols
        ));
    }

    let range = source.bands_for(ctx.wavelength_range);
    let block = match ctx.cache.get(source, range, ctx.mode) {
        Ok(block) => block,
        Err(e) => return Derived::Invalid(e.to_string()),
    };

    let raw = block
        .index_axis(Axis(0), pixel.row as usize)
        .index_axis_move(Axis(0), pixel.col as usize);
    match ctx.pipeline.apply(raw, ctx.flags) {
        Ok(values) => Derived::Spectrum {
            wavelengths: source.wavelengths_in(range).to_vec(),
            values,
        },
        Err(e) => Derived::Invalid(e.to_string()),
    }
}

fn derive_polygon(
    ctx: &DeriveContext,
    source: &CubeSource,
    vertices: &[Pixel],
) -> Derived {
    let shape = source.shape();
    let pixels = geometry::ring_pixels(vertices, shape.rows, shape.cols);
    if pixels.is_empty() {
        return Derived::Invalid("polygon covers no pixels".to_string());
    }

    let range = source.bands_for(ctx.wavelength_range);
    let block = match ctx.cache.get(source, range, ctx.mode) {
        Ok(block) => block,
        Err(e) => return Derived::Invalid(e.to_string()),
    };

    let bands = range.len();
    let raw = Array2::from_shape_fn((pixels.len(), bands), |(i, b)| {
        let p = pixels[i];
        block[[p.row as usize, p.col as usize, b]]
    });
    let processed = match ctx.pipeline.apply_batch(raw.view(), ctx.flags) {
        Ok(processed) => processed,
        Err(e) => return Derived::Invalid(e.to_string()),
    };

    let (mean, std) = nan_mean_std(&processed);
    Derived::Stats {
        wavelengths: source.wavelengths_in(range).to_vec(),
        mean,
        std,
        pixel_count: pixels.len(),
    }
}

/// Column-wise mean and population std, skipping NaN samples.
///
/// A column with no finite samples yields NaN.
fn nan_mean_std(spectra: &Array2<f32>) -> (Array1<f32>, Array1<f32>) {
    let columns = spectra.axis_iter(Axis(1));
    let mut mean = Vec::with_capacity(columns.len());
    let mut std = Vec::with_capacity(columns.len());
    for column in columns {
        let values: Vec<f64> = column
            .iter()
            .filter(|v| !v.is_nan())
            .map(|&v| f64::from(v))
            .collect();
        if values.is_empty() {
            mean.push(f32::NAN);
            std.push(f32::NAN);
            continue;
        }
        let n = values.len() as f64;
        let m = values.iter().sum::<f64>() / n;
        let var = values.iter().map(|v| (v - m) * (v - m)).sum::<f64>() / n;
        mean.push(m as f32);
        std.push(var.sqrt() as f32);
    }
    (Array1::from_vec(mean), Array1::from_vec(std))
}
