//! In-memory hyperspectral cube and its band-range read contract.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use ndarray::{Array1, Array3, ArrayView3, Axis, Slice};
use serde::{Deserialize, Serialize};

use crate::constants::{SCALED_REFLECTANCE_THRESHOLD, U16_FULL_SCALE};
use crate::data::loader::LoaderRegistry;
use crate::error::{RangeError, SourceError};

/// Process-wide load counter so a reloaded source never shares cache entries
/// with the cube it replaced.
static NEXT_EPOCH: AtomicU64 = AtomicU64::new(1);

/// Unique handle of an opened data source within a session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceId(String);

impl SourceId {
    /// Create a source id from any string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SourceId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// A pixel location as (row, column). Serialized as `[row, col]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "[u32; 2]", into = "[u32; 2]")]
pub struct Pixel {
    /// Row index (image y)
    pub row: u32,
    /// Column index (image x)
    pub col: u32,
}

impl Pixel {
    pub fn new(row: u32, col: u32) -> Self {
        Self { row, col }
    }

    /// Euclidean distance to another pixel.
    pub fn distance_to(&self, other: &Pixel) -> f64 {
        let dr = f64::from(self.row) - f64::from(other.row);
        let dc = f64::from(self.col) - f64::from(other.col);
        (dr * dr + dc * dc).sqrt()
    }
}

impl From<[u32; 2]> for Pixel {
    fn from([row, col]: [u32; 2]) -> Self {
        Self { row, col }
    }
}

impl From<Pixel> for [u32; 2] {
    fn from(p: Pixel) -> Self {
        [p.row, p.col]
    }
}

impl From<(u32, u32)> for Pixel {
    fn from((row, col): (u32, u32)) -> Self {
        Self { row, col }
    }
}

/// Cube dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CubeShape {
    pub rows: usize,
    pub cols: usize,
    pub bands: usize,
}

/// Half-open band index window `start..end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BandRange {
    /// First band (inclusive)
    pub start: usize,
    /// Last band (exclusive)
    pub end: usize,
}

impl BandRange {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    /// Range covering every band of a cube.
    pub fn full(band_count: usize) -> Self {
        Self::new(0, band_count)
    }

    /// Number of bands in the range.
    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Display for BandRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

/// Visible wavelength window `[min, max]`. Serialized as `[min, max]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "[f64; 2]", into = "[f64; 2]")]
pub struct WavelengthRange {
    min: f64,
    max: f64,
}

impl WavelengthRange {
    /// Create a window; bounds must be finite and `min <= max`.
    pub fn new(min: f64, max: f64) -> Result<Self, String> {
        if !min.is_finite() || !max.is_finite() {
            return Err(format!("non-finite wavelength range [{}, {}]", min, max));
        }
        if min > max {
            return Err(format!("inverted wavelength range [{}, {}]", min, max));
        }
        Ok(Self { min, max })
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }
}

impl TryFrom<[f64; 2]> for WavelengthRange {
    type Error = String;

    fn try_from([min, max]: [f64; 2]) -> Result<Self, Self::Error> {
        Self::new(min, max)
    }
}

impl From<WavelengthRange> for [f64; 2] {
    fn from(r: WavelengthRange) -> Self {
        [r.min, r.max]
    }
}

impl fmt::Display for WavelengthRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{} nm", self.min, self.max)
    }
}

/// One opened hyperspectral dataset.
///
/// The cube is stored as `(rows, cols, bands)` reflectance values and is
/// immutable once constructed. Reloading a file produces a new `CubeSource`
/// with a fresh [`epoch`](CubeSource::epoch).
#[derive(Debug)]
pub struct CubeSource {
    id: SourceId,
    path: PathBuf,
    wavelengths: Vec<f64>,
    data: Array3<f32>,
    reflectance_scale: f32,
    epoch: u64,
}

impl CubeSource {
    /// Open a source through the loader registry.
    pub fn open(
        id: SourceId,
        path: &Path,
        registry: &LoaderRegistry,
    ) -> Result<Self, SourceError> {
        let raw = registry.load(path)?;
        let source = Self::from_array(id, path, raw.data, raw.wavelengths)?;
        let shape = source.shape();
        log::info!(
            "Opened source {} ({}x{}x{}) from {:?}",
            source.id,
            shape.rows,
            shape.cols,
            shape.bands,
            path
        );
        Ok(source)
    }

    /// Wrap an already decoded `(rows, cols, bands)` array.
    ///
    /// Without a wavelength table the band index is used as wavelength.
    pub fn from_array(
        id: SourceId,
        path: impl Into<PathBuf>,
        data: Array3<f32>,
        wavelengths: Option<Vec<f64>>,
    ) -> Result<Self, SourceError> {
        let path = path.into();
        let (_, _, bands) = data.dim();
        if bands == 0 {
            return Err(SourceError::ZeroBands { path });
        }

        let wavelengths =
            wavelengths.unwrap_or_else(|| (0..bands).map(|b| b as f64).collect());
        if wavelengths.len() != bands {
            return Err(SourceError::wavelengths(
                path,
                format!("{} wavelengths for {} bands", wavelengths.len(), bands),
            ));
        }
        if wavelengths.iter().any(|w| !w.is_finite()) {
            return Err(SourceError::wavelengths(path, "non-finite wavelength"));
        }
        if wavelengths.windows(2).any(|w| w[0] >= w[1]) {
            return Err(SourceError::wavelengths(
                path,
                "wavelengths must be strictly increasing",
            ));
        }

        let max = data
            .iter()
            .copied()
            .filter(|v| v.is_finite())
            .fold(f32::NEG_INFINITY, f32::max);
        let reflectance_scale = if max > SCALED_REFLECTANCE_THRESHOLD {
            log::debug!("Source {} looks 16-bit scaled (max {})", id, max);
            1.0 / U16_FULL_SCALE
        } else {
            1.0
        };

        Ok(Self {
            id,
            path,
            wavelengths,
            data,
            reflectance_scale,
            epoch: NEXT_EPOCH.fetch_add(1, Ordering::Relaxed),
        })
    }

    pub fn id(&self) -> &SourceId {
        &self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn shape(&self) -> CubeShape {
        let (rows, cols, bands) = self.data.dim();
        CubeShape { rows, cols, bands }
    }

    pub fn band_count(&self) -> usize {
        self.wavelengths.len()
    }

    pub fn wavelengths(&self) -> &[f64] {
        &self.wavelengths
    }

    /// Factor mapping stored values to unit reflectance.
    pub fn reflectance_scale(&self) -> f32 {
        self.reflectance_scale
    }

    /// Load counter distinguishing reloads of the same id.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Read-only view of the whole cube.
    pub fn view(&self) -> ArrayView3<'_, f32> {
        self.data.view()
    }

    /// Range covering every band.
    pub fn full_range(&self) -> BandRange {
        BandRange::full(self.band_count())
    }

    /// Validate a band range against this source.
    pub fn check_range(&self, range: BandRange) -> Result<(), RangeError> {
        if range.start >= range.end || range.end > self.band_count() {
            return Err(RangeError {
                start: range.start,
                end: range.end,
                band_count: self.band_count(),
            });
        }
        Ok(())
    }

    /// Read bands `start..end` as a `(rows, cols, end - start)` array.
    pub fn read_band_range(&self, start: usize, end: usize) -> Result<Array3<f32>, RangeError> {
        self.read_range(BandRange::new(start, end))
    }

    /// Read a band range as a `(rows, cols, range.len())` array.
    pub fn read_range(&self, range: BandRange) -> Result<Array3<f32>, RangeError> {
        self.check_range(range)?;
        Ok(self
            .data
            .slice_axis(Axis(2), Slice::from(range.start..range.end))
            .to_owned())
    }

    pub fn contains_pixel(&self, pixel: Pixel) -> bool {
        let shape = self.shape();
        (pixel.row as usize) < shape.rows && (pixel.col as usize) < shape.cols
    }

    /// Raw spectrum of one pixel, or `None` for an invalid pixel or range.
    pub fn pixel_spectrum(&self, pixel: Pixel, range: BandRange) -> Option<Array1<f32>> {
        if !self.contains_pixel(pixel) || self.check_range(range).is_err() {
            return None;
        }
        Some(
            self.data
                .index_axis(Axis(0), pixel.row as usize)
                .index_axis_move(Axis(0), pixel.col as usize)
                .slice_axis_move(Axis(0), Slice::from(range.start..range.end))
                .to_owned(),
        )
    }

    /// Wavelengths covered by a band range.
    pub fn wavelengths_in(&self, range: BandRange) -> &[f64] {
        let end = range.end.min(self.wavelengths.len());
        let start = range.start.min(end);
        &self.wavelengths[start..end]
    }

    /// Index of the band whose wavelength is closest to `wavelength`.
    ///
    /// Ties resolve to the lower band.
    pub fn nearest_band(&self, wavelength: f64) -> usize {
        nearest_band(&self.wavelengths, wavelength)
    }

    /// Inclusive nearest-band window for a wavelength interval, as a half-open range.
    pub fn band_range_for(&self, min_wl: f64, max_wl: f64) -> BandRange {
        let (lo, hi) = if max_wl < min_wl {
            (max_wl, min_wl)
        } else {
            (min_wl, max_wl)
        };
        let start = self.nearest_band(lo);
        let end = self.nearest_band(hi);
        BandRange::new(start.min(end), start.max(end) + 1)
    }

    /// Band window for an optional wavelength window; `None` means every band.
    pub fn bands_for(&self, window: Option<WavelengthRange>) -> BandRange {
        match window {
            Some(w) => self.band_range_for(w.min(), w.max()),
            None => self.full_range(),
        }
    }
}

/// Index of the wavelength closest to `target` in an increasing table.
pub fn nearest_band(wavelengths: &[f64], target: f64) -> usize {
    if wavelengths.is_empty() {
        return 0;
    }
    let upper = wavelengths.partition_point(|&w| w < target);
    if upper == 0 {
        return 0;
    }
    if upper >= wavelengths.len() {
        return wavelengths.len() - 1;
    }
    let below = target - wavelengths[upper - 1];
    let above = wavelengths[upper] - target;
    if above < below { upper } else { upper - 1 }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    fn small_cube() -> CubeSource {
        let data = Array3::from_shape_fn((5, 5, 4), |(r, c, b)| {
            (r * 100 + c * 10 + b) as f32 / 1000.0
        });
        CubeSource::from_array(
            SourceId::new("src1"),
            "mem://small",
            data,
            Some(vec![450.0, 550.0, 650.0, 750.0]),
        )
        .expect("valid cube")
    }

    #[test]
    fn test_read_band_range_shape() {
        let cube = small_cube();
        let part = cube.read_band_range(1, 3).unwrap();
        assert_eq!(part.dim(), (5, 5, 2));
        assert_eq!(part[[2, 3, 0]], cube.view()[[2, 3, 1]]);
    }

    #[test]
    fn test_read_band_range_errors() {
        let cube = small_cube();
        assert!(cube.read_band_range(2, 2).is_err());
        assert!(cube.read_band_range(3, 1).is_err());
        let err = cube.read_band_range(0, 5).unwrap_err();
        assert_eq!(err.band_count, 4);
    }

    #[test]
    fn test_read_is_bit_identical() {
        let cube = small_cube();
        let a = cube.read_band_range(0, 4).unwrap();
        let b = cube.read_band_range(0, 4).unwrap();
        assert!(
            a.iter()
                .zip(b.iter())
                .all(|(x, y)| x.to_bits() == y.to_bits())
        );
    }

    #[test]
    fn test_zero_bands_rejected() {
        let data = Array3::<f32>::zeros((2, 2, 0));
        let err = CubeSource::from_array(SourceId::new("z"), "mem://z", data, None).unwrap_err();
        assert!(matches!(err, SourceError::ZeroBands { .. }));
    }

    #[test]
    fn test_wavelength_validation() {
        let data = Array3::<f32>::zeros((2, 2, 3));
        let wrong_len = CubeSource::from_array(
            SourceId::new("w"),
            "mem://w",
            data.clone(),
            Some(vec![1.0, 2.0]),
        );
        assert!(matches!(wrong_len, Err(SourceError::Wavelengths { .. })));

        let not_increasing = CubeSource::from_array(
            SourceId::new("w"),
            "mem://w",
            data,
            Some(vec![1.0, 3.0, 2.0]),
        );
        assert!(matches!(not_increasing, Err(SourceError::Wavelengths { .. })));
    }

    #[test]
    fn test_default_wavelengths_are_band_indices() {
        let data = Array3::<f32>::zeros((1, 1, 3));
        let cube = CubeSource::from_array(SourceId::new("d"), "mem://d", data, None).unwrap();
        assert_eq!(cube.wavelengths(), &[0.0, 1.0, 2.0]);
    }

    #[test]
    fn test_scaled_reflectance_detection() {
        let cube = small_cube();
        assert_eq!(cube.reflectance_scale(), 1.0);

        let data = Array3::from_elem((1, 1, 2), 30000.0f32);
        let scaled = CubeSource::from_array(SourceId::new("s"), "mem://s", data, None).unwrap();
        assert!((scaled.reflectance_scale() - 1.0 / 65535.0).abs() < 1e-12);
    }

    #[test]
    fn test_reload_gets_new_epoch() {
        let a = small_cube();
        let b = small_cube();
        assert_ne!(a.epoch(), b.epoch());
    }

    #[test]
    fn test_nearest_band() {
        let cube = small_cube();
        assert_eq!(cube.nearest_band(300.0), 0);
        assert_eq!(cube.nearest_band(560.0), 1);
        assert_eq!(cube.nearest_band(600.0), 1); // tie resolves low
        assert_eq!(cube.nearest_band(9000.0), 3);
    }

    #[test]
    fn test_band_range_for() {
        let cube = small_cube();
        assert_eq!(cube.band_range_for(540.0, 700.0), BandRange::new(1, 3));
        assert_eq!(cube.band_range_for(700.0, 540.0), BandRange::new(1, 3));
        assert_eq!(cube.band_range_for(0.0, 10_000.0), cube.full_range());
    }

    #[test]
    fn test_bands_for_window() {
        let cube = small_cube();
        assert_eq!(cube.bands_for(None), cube.full_range());
        let window = WavelengthRange::new(500.0, 600.0).unwrap();
        assert_eq!(cube.bands_for(Some(window)), BandRange::new(0, 2));
    }

    #[test]
    fn test_wavelength_range_validation() {
        assert!(WavelengthRange::new(700.0, 400.0).is_err());
        assert!(WavelengthRange::new(f64::NAN, 400.0).is_err());
        let parsed: Result<WavelengthRange, _> = serde_json::from_str("[900.0, 400.0]");
        assert!(parsed.is_err());
        let ok: WavelengthRange = serde_json::from_str("[400.0, 900.0]").unwrap();
        assert_eq!((ok.min(), ok.max()), (400.0, 900.0));
    }

    #[test]
    fn test_pixel_spectrum() {
        let cube = small_cube();
        let spectrum = cube.pixel_spectrum(Pixel::new(2, 2), cube.full_range()).unwrap();
        assert_eq!(spectrum.len(), 4);
        assert!(cube.pixel_spectrum(Pixel::new(5, 0), cube.full_range()).is_none());

        let part = cube.pixel_spectrum(Pixel::new(3, 1), BandRange::new(1, 3)).unwrap();
        assert_eq!(part.to_vec(), vec![0.311, 0.312]);
    }

    #[test]
    fn test_pixel_serializes_as_pair() {
        let json = serde_json::to_string(&Pixel::new(3, 7)).unwrap();
        assert_eq!(json, "[3,7]");
        let back: Pixel = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Pixel::new(3, 7));
    }
}
