//! Deterministic synthetic cubes for tests and demos.

use std::path::Path;

use ndarray::Array3;

use crate::data::loaders::NpyLoader;
use crate::error::SourceError;

/// First wavelength of a synthetic cube, in nanometres.
const FIRST_WAVELENGTH: f64 = 400.0;

/// Generate a synthetic reflectance cube with `(rows, cols, bands)` shape.
///
/// The scene has four quadrants with distinct spectral signatures (a
/// vegetation-like red edge, a flat soil slope, a water-like decay and a
/// checkerboard) plus a pseudo-random texture so pixels within a region
/// differ slightly. Values stay within `0.0..=1.0`.
pub fn generate_test_cube(rows: usize, cols: usize, bands: usize) -> (Array3<f32>, Vec<f64>) {
    let wavelengths = wavelength_table(bands);
    let span = bands.max(2) as f32 - 1.0;

    let data = Array3::from_shape_fn((rows, cols, bands), |(r, c, b)| {
        let fx = c as f32 / cols.max(1) as f32;
        let fy = r as f32 / rows.max(1) as f32;
        let t = b as f32 / span;

        let base = match (fy < 0.5, fx < 0.5) {
            // Vegetation: low visible, sharp rise at the red edge
            (true, true) => 0.05 + 0.45 / (1.0 + (-(t - 0.55) * 25.0).exp()),
            // Soil: gentle linear slope
            (true, false) => 0.15 + 0.3 * t,
            // Water: decays towards the infrared
            (false, true) => 0.12 * (-3.0 * t).exp(),
            // Checkerboard alternating two flat spectra
            (false, false) => {
                if ((r / 4) + (c / 4)) % 2 == 0 { 0.8 } else { 0.2 }
            }
        };

        let noise = ((c as f32 * 12.9898 + r as f32 * 78.233).sin() * 43758.5453).fract();
        (base + noise.abs() * 0.02).clamp(0.0, 1.0)
    });

    (data, wavelengths)
}

/// Wavelength table used by synthetic cubes: 400 nm in 5 nm steps.
pub fn wavelength_table(bands: usize) -> Vec<f64> {
    (0..bands)
        .map(|b| FIRST_WAVELENGTH + 5.0 * b as f64)
        .collect()
}

/// Write a cube as `.npy` together with its wavelength sidecar.
pub fn write_npy_cube(
    path: &Path,
    data: &Array3<f32>,
    wavelengths: &[f64],
) -> Result<(), SourceError> {
    ndarray_npy::write_npy(path, data).map_err(|e| SourceError::Write {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    let sidecar = NpyLoader::sidecar_path(path);
    let json = serde_json::to_string(wavelengths).map_err(|e| SourceError::Write {
        path: sidecar.clone(),
        message: e.to_string(),
    })?;
    std::fs::write(&sidecar, json).map_err(|e| SourceError::io(&sidecar, e))?;

    let (rows, cols, bands) = data.dim();
    log::info!(
        "Wrote synthetic {}x{}x{} cube to {:?}",
        rows,
        cols,
        bands,
        path
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{CubeSource, LoaderRegistry, SourceId};

    #[test]
    fn test_generate_shape_and_range() {
        let (data, wavelengths) = generate_test_cube(16, 12, 30);
        assert_eq!(data.dim(), (16, 12, 30));
        assert_eq!(wavelengths.len(), 30);
        assert_eq!(wavelengths[0], 400.0);
        assert_eq!(wavelengths[1], 405.0);
        assert!(data.iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn test_generate_is_deterministic() {
        let (a, _) = generate_test_cube(8, 8, 10);
        let (b, _) = generate_test_cube(8, 8, 10);
        assert_eq!(a, b);
    }

    #[test]
    fn test_write_and_open_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("synthetic.npy");
        let (data, wavelengths) = generate_test_cube(6, 5, 8);
        write_npy_cube(&path, &data, &wavelengths).unwrap();

        let source = CubeSource::open(SourceId::new("src1"), &path, &LoaderRegistry::new())
            .unwrap();
        assert_eq!(source.band_count(), 8);
        assert_eq!(source.wavelengths(), wavelengths.as_slice());
        assert_eq!(source.view(), data.view());
    }
}
