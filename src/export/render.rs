//! PNG snapshots of a band or an RGB composite, with annotation overlays.

use std::path::Path;

use image::{ImageFormat, Rgb as Pixel8, RgbImage};
use ndarray::{Array2, ArrayView2, Axis};

use crate::annotation::{Annotation, Geometry, Rgb};
use crate::cache::{BandCache, Mode};
use crate::constants::{MARKER_HALF_SIZE, PERCENTILE_HIGH, PERCENTILE_LOW};
use crate::data::{BandRange, CubeSource, Pixel};
use crate::error::{ExportError, RangeError};

/// Percentile of sorted data with linear interpolation between ranks.
fn percentile(sorted: &[f32], p: f64) -> f32 {
    match sorted.len() {
        0 => f32::NAN,
        1 => sorted[0],
        n => {
            let rank = p / 100.0 * (n - 1) as f64;
            let lo = rank.floor() as usize;
            let hi = rank.ceil() as usize;
            let t = rank - lo as f64;
            (f64::from(sorted[lo]) + t * (f64::from(sorted[hi]) - f64::from(sorted[lo]))) as f32
        }
    }
}

/// Map a plane to 8 bits with a 2-98 percentile stretch.
///
/// Non-finite samples map to 0; a flat plane maps to all zeros.
pub fn stretch(plane: ArrayView2<'_, f32>) -> Array2<u8> {
    let mut finite: Vec<f32> = plane.iter().copied().filter(|v| v.is_finite()).collect();
    finite.sort_by(f32::total_cmp);
    let lo = percentile(&finite, PERCENTILE_LOW);
    let hi = percentile(&finite, PERCENTILE_HIGH);
    let span = hi - lo;

    plane.mapv(|v| {
        if !v.is_finite() || span.is_nan() || span <= 0.0 {
            return 0;
        }
        (((v - lo) / span).clamp(0.0, 1.0) * 255.0).round() as u8
    })
}

fn band_plane(
    source: &CubeSource,
    cache: &BandCache,
    band: usize,
    mode: Mode,
) -> Result<Array2<u8>, RangeError> {
    let block = cache.get(source, BandRange::new(band, band + 1), mode)?;
    Ok(stretch(block.index_axis(Axis(2), 0)))
}

fn to_image(channels: [&Array2<u8>; 3]) -> RgbImage {
    let (rows, cols) = channels[0].dim();
    RgbImage::from_fn(cols as u32, rows as u32, |x, y| {
        let idx = [y as usize, x as usize];
        Pixel8([channels[0][idx], channels[1][idx], channels[2][idx]])
    })
}

/// Grayscale rendering of one band.
pub fn render_band(
    source: &CubeSource,
    cache: &BandCache,
    band: usize,
    mode: Mode,
) -> Result<RgbImage, RangeError> {
    let plane = band_plane(source, cache, band, mode)?;
    Ok(to_image([&plane, &plane, &plane]))
}

/// Composite of three bands, each stretched independently.
pub fn render_rgb(
    source: &CubeSource,
    cache: &BandCache,
    bands: [usize; 3],
    mode: Mode,
) -> Result<RgbImage, RangeError> {
    let r = band_plane(source, cache, bands[0], mode)?;
    let g = band_plane(source, cache, bands[1], mode)?;
    let b = band_plane(source, cache, bands[2], mode)?;
    Ok(to_image([&r, &g, &b]))
}

fn put(img: &mut RgbImage, x: i64, y: i64, color: Rgb) {
    if x < 0 || y < 0 || x >= i64::from(img.width()) || y >= i64::from(img.height()) {
        return;
    }
    img.put_pixel(x as u32, y as u32, Pixel8([color.r, color.g, color.b]));
}

/// Clip segment `a-b` to the image with Liang-Barsky; `None` when it misses.
fn clip_line(img: &RgbImage, a: Pixel, b: Pixel) -> Option<((i64, i64), (i64, i64))> {
    if img.width() == 0 || img.height() == 0 {
        return None;
    }
    let (xmax, ymax) = (f64::from(img.width() - 1), f64::from(img.height() - 1));
    let (x0, y0) = (f64::from(a.col), f64::from(a.row));
    let (dx, dy) = (f64::from(b.col) - x0, f64::from(b.row) - y0);

    let (mut t0, mut t1) = (0.0f64, 1.0f64);
    for (p, q) in [(-dx, x0), (dx, xmax - x0), (-dy, y0), (dy, ymax - y0)] {
        if p == 0.0 {
            if q < 0.0 {
                return None;
            }
        } else if p < 0.0 {
            t0 = t0.max(q / p);
        } else {
            t1 = t1.min(q / p);
        }
    }
    if t0 > t1 {
        return None;
    }
    let at = |t: f64| ((x0 + t * dx).round() as i64, (y0 + t * dy).round() as i64);
    Some((at(t0), at(t1)))
}

/// Bresenham line between two pixels, clipped to the image.
fn draw_line(img: &mut RgbImage, a: Pixel, b: Pixel, color: Rgb) {
    let Some(((mut x, mut y), (x1, y1))) = clip_line(img, a, b) else {
        return;
    };
    let dx = (x1 - x).abs();
    let dy = -(y1 - y).abs();
    let sx = if x < x1 { 1 } else { -1 };
    let sy = if y < y1 { 1 } else { -1 };
    let mut err = dx + dy;
    loop {
        put(img, x, y, color);
        if x == x1 && y == y1 {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x += sx;
        }
        if e2 <= dx {
            err += dx;
            y += sy;
        }
    }
}

fn draw_marker(img: &mut RgbImage, center: Pixel, color: Rgb) {
    let (cx, cy) = (i64::from(center.col), i64::from(center.row));
    for dy in -MARKER_HALF_SIZE..=MARKER_HALF_SIZE {
        for dx in -MARKER_HALF_SIZE..=MARKER_HALF_SIZE {
            put(img, cx + dx, cy + dy, color);
        }
    }
}

/// Draw visible annotations in their own colors.
///
/// Points become filled squares, polygons outlines; open polygons are drawn
/// without the closing edge.
pub fn draw_overlay<'a>(img: &mut RgbImage, annotations: impl IntoIterator<Item = &'a Annotation>) {
    for annotation in annotations.into_iter().filter(|a| a.visible) {
        match &annotation.geometry {
            Geometry::Point(pixel) => draw_marker(img, *pixel, annotation.color),
            Geometry::Polygon { vertices, closed } => {
                for pair in vertices.windows(2) {
                    draw_line(img, pair[0], pair[1], annotation.color);
                }
                if let (true, Some(&last), Some(&first)) =
                    (*closed, vertices.last(), vertices.first())
                {
                    draw_line(img, last, first, annotation.color);
                }
            }
        }
    }
}

pub fn save_png(img: &RgbImage, path: &Path) -> Result<(), ExportError> {
    img.save_with_format(path, ImageFormat::Png)?;
    log::info!("Saved {}x{} snapshot to {:?}", img.width(), img.height(), path);
    Ok(())
}
