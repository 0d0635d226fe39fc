//! Loader for NumPy `.npy` files.
//!
//! Arrays are read as `(rows, cols, bands)`; a 2-D `(rows, cols)` array is a
//! single-band cube. Wavelengths come from an optional
//! `<stem>.wavelengths.json` sidecar holding a JSON array of numbers.

use std::io::Cursor;
use std::path::{Path, PathBuf};

use ndarray::{Array3, ArrayD, Ix2, Ix3};
use ndarray_npy::{ReadNpyExt, ReadableElement};

use super::Sample;
use crate::data::loader::{CubeLoader, RawCube};
use crate::error::SourceError;

/// Loader for NumPy `.npy` files.
///
/// Supported data types: `f32`, `f64`, `u8`, `u16`, `i16`, `i32`.
/// Values keep their stored magnitude.
pub struct NpyLoader;

impl NpyLoader {
    /// NumPy magic bytes: \x93NUMPY
    const MAGIC: &'static [u8] = &[0x93, b'N', b'U', b'M', b'P', b'Y'];

    /// Path of the wavelength sidecar for a cube file.
    pub fn sidecar_path(path: &Path) -> PathBuf {
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        path.with_file_name(format!("{}.wavelengths.json", stem))
    }

    fn to_cube<T: Sample>(array: ArrayD<T>, path: &Path) -> Result<Array3<f32>, SourceError> {
        let shape = array.shape().to_vec();
        log::debug!("NpyLoader: array shape = {:?}", shape);

        let decode_err = |message: String| SourceError::Decode {
            path: path.to_path_buf(),
            message,
        };

        match shape.len() {
            2 => {
                let plane = array
                    .into_dimensionality::<Ix2>()
                    .map_err(|e| decode_err(e.to_string()))?;
                let (rows, cols) = plane.dim();
                Ok(plane
                    .mapv(Sample::to_f32)
                    .into_shape_with_order((rows, cols, 1))
                    .map_err(|e| decode_err(e.to_string()))?)
            }
            3 => {
                if shape[2] == 0 {
                    return Err(SourceError::ZeroBands {
                        path: path.to_path_buf(),
                    });
                }
                let cube = array
                    .into_dimensionality::<Ix3>()
                    .map_err(|e| decode_err(e.to_string()))?;
                Ok(cube.mapv(Sample::to_f32))
            }
            n => Err(decode_err(format!(
                "unsupported array dimensions: {} (expected 2 or 3)",
                n
            ))),
        }
    }

    fn read_wavelengths(path: &Path) -> Result<Option<Vec<f64>>, SourceError> {
        let sidecar = Self::sidecar_path(path);
        if !sidecar.is_file() {
            return Ok(None);
        }
        let text = std::fs::read_to_string(&sidecar).map_err(|e| SourceError::io(&sidecar, e))?;
        let wavelengths: Vec<f64> = serde_json::from_str(&text)
            .map_err(|e| SourceError::wavelengths(&sidecar, e.to_string()))?;
        log::debug!(
            "NpyLoader: {} wavelengths from {:?}",
            wavelengths.len(),
            sidecar
        );
        Ok(Some(wavelengths))
    }
}

impl CubeLoader for NpyLoader {
    fn id(&self) -> &'static str {
        "npy"
    }

    fn display_name(&self) -> &'static str {
        "NumPy Array (.npy)"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["npy"]
    }

    fn can_load(&self, head: &[u8]) -> bool {
        head.starts_with(Self::MAGIC)
    }

    fn load(&self, path: &Path) -> Result<RawCube, SourceError> {
        let bytes = std::fs::read(path).map_err(|e| SourceError::io(path, e))?;

        // Try dtypes in order of likelihood; f32 is the common case for reflectance cubes
        let data = if let Some(array) = read_as::<f32>(&bytes) {
            Self::to_cube(array, path)?
        } else if let Some(array) = read_as::<f64>(&bytes) {
            Self::to_cube(array, path)?
        } else if let Some(array) = read_as::<u16>(&bytes) {
            Self::to_cube(array, path)?
        } else if let Some(array) = read_as::<u8>(&bytes) {
            Self::to_cube(array, path)?
        } else if let Some(array) = read_as::<i16>(&bytes) {
            Self::to_cube(array, path)?
        } else if let Some(array) = read_as::<i32>(&bytes) {
            Self::to_cube(array, path)?
        } else {
            return Err(SourceError::Decode {
                path: path.to_path_buf(),
                message: "unsupported dtype or invalid NumPy format".to_string(),
            });
        };

        let wavelengths = Self::read_wavelengths(path)?;
        let (rows, cols, bands) = data.dim();
        log::info!(
            "NpyLoader: loaded {}x{} with {} bands from {:?}",
            rows,
            cols,
            bands,
            path
        );

        Ok(RawCube { data, wavelengths })
    }

    fn priority(&self) -> i32 {
        10
    }
}

fn read_as<T: ReadableElement>(bytes: &[u8]) -> Option<ArrayD<T>> {
    ArrayD::<T>::read_npy(Cursor::new(bytes)).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array2, Array3};
    use ndarray_npy::write_npy;

    #[test]
    fn test_loader_metadata() {
        let loader = NpyLoader;
        assert_eq!(loader.id(), "npy");
        assert!(loader.extensions().contains(&"npy"));
        assert_eq!(loader.priority(), 10);
    }

    #[test]
    fn test_magic_detection() {
        let loader = NpyLoader;

        let valid_magic = [0x93, b'N', b'U', b'M', b'P', b'Y', 0x01, 0x00];
        assert!(loader.can_load(&valid_magic));

        let invalid = [0x89, 0x50, 0x4E, 0x47]; // PNG magic
        assert!(!loader.can_load(&invalid));
    }

    #[test]
    fn test_sidecar_path() {
        assert_eq!(
            NpyLoader::sidecar_path(Path::new("/data/leaf.npy")),
            PathBuf::from("/data/leaf.wavelengths.json")
        );
    }

    #[test]
    fn test_load_3d_f32_with_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cube.npy");
        let array = Array3::from_shape_fn((3, 4, 2), |(r, c, b)| (r * 10 + c) as f32 + b as f32 * 0.5);
        write_npy(&path, &array).unwrap();
        std::fs::write(dir.path().join("cube.wavelengths.json"), "[500.0, 510.0]").unwrap();

        let raw = NpyLoader.load(&path).unwrap();
        assert_eq!(raw.data.dim(), (3, 4, 2));
        assert_eq!(raw.data[[2, 3, 1]], 23.5);
        assert_eq!(raw.wavelengths, Some(vec![500.0, 510.0]));
    }

    #[test]
    fn test_load_2d_u16_as_single_band() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plane.npy");
        let array = Array2::from_shape_fn((2, 3), |(r, c)| (r * 3 + c) as u16 * 1000);
        write_npy(&path, &array).unwrap();

        let raw = NpyLoader.load(&path).unwrap();
        assert_eq!(raw.data.dim(), (2, 3, 1));
        assert_eq!(raw.data[[1, 2, 0]], 5000.0);
        assert!(raw.wavelengths.is_none());
    }

    #[test]
    fn test_load_f64() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("double.npy");
        let array = Array3::<f64>::from_elem((1, 1, 3), 0.25);
        write_npy(&path, &array).unwrap();

        let raw = NpyLoader.load(&path).unwrap();
        assert_eq!(raw.data[[0, 0, 2]], 0.25);
    }

    #[test]
    fn test_bad_sidecar_is_wavelength_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cube.npy");
        write_npy(&path, &Array3::<f32>::zeros((1, 1, 2))).unwrap();
        std::fs::write(dir.path().join("cube.wavelengths.json"), "not json").unwrap();

        let err = NpyLoader.load(&path).unwrap_err();
        assert!(matches!(err, SourceError::Wavelengths { .. }));
    }

    #[test]
    fn test_garbage_is_decode_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.npy");
        std::fs::write(&path, b"\x93NUMPY garbage").unwrap();

        let err = NpyLoader.load(&path).unwrap_err();
        assert!(matches!(err, SourceError::Decode { .. }));
    }
}
