//! Trait-based cube loading system.
//!
//! Cube file formats are opaque to the rest of the engine: every format
//! implements [`CubeLoader`] and hands back a [`RawCube`], which
//! [`CubeSource`](crate::data::CubeSource) then validates.
//!
//! ## Supported Formats
//!
//! - **ENVI**: `.hdr` text header next to a raw BSQ/BIL/BIP payload
//! - **NumPy Arrays**: `.npy` files with `(rows, cols)` or `(rows, cols, bands)` arrays
//!
//! ## Usage
//!
//! ```rust,ignore
//! use hspec::data::LoaderRegistry;
//!
//! let registry = LoaderRegistry::new();
//! let raw = registry.load(Path::new("scene.hdr"))?;
//! ```

use std::io::Read;
use std::path::Path;

use ndarray::Array3;

use crate::error::SourceError;

/// Decoded cube contents before validation.
#[derive(Debug)]
pub struct RawCube {
    /// Samples as `(rows, cols, bands)`
    pub data: Array3<f32>,
    /// Wavelength per band, if the format carries one
    pub wavelengths: Option<Vec<f64>>,
}

/// Trait for hyperspectral cube format loaders.
pub trait CubeLoader: Send + Sync {
    /// Unique identifier for this loader (e.g., "envi", "npy").
    fn id(&self) -> &'static str;

    /// Human-readable name.
    fn display_name(&self) -> &'static str;

    /// File extensions this loader handles (lowercase, without dots).
    fn extensions(&self) -> &'static [&'static str];

    /// Check the first bytes of a file for this format's signature.
    fn can_load(&self, head: &[u8]) -> bool;

    /// Load a cube from the given locator.
    fn load(&self, path: &Path) -> Result<RawCube, SourceError>;

    /// Priority for format detection (higher = checked first).
    fn priority(&self) -> i32 {
        0
    }
}

/// Number of leading bytes inspected for magic detection.
const HEAD_LEN: usize = 16;

/// Registry of available cube loaders.
///
/// Provides format detection and a unified loading interface.
pub struct LoaderRegistry {
    loaders: Vec<Box<dyn CubeLoader>>,
}

impl LoaderRegistry {
    /// Create a new registry with all built-in loaders.
    pub fn new() -> Self {
        let mut registry = Self {
            loaders: Vec::new(),
        };
        registry.register(Box::new(super::loaders::EnviLoader));
        registry.register(Box::new(super::loaders::NpyLoader));
        registry
    }

    /// Register a new loader.
    pub fn register(&mut self, loader: Box<dyn CubeLoader>) {
        self.loaders.push(loader);
        self.loaders.sort_by(|a, b| b.priority().cmp(&a.priority()));
    }

    /// Get all supported file extensions.
    pub fn supported_extensions(&self) -> Vec<&'static str> {
        let mut extensions: Vec<&'static str> = self
            .loaders
            .iter()
            .flat_map(|l| l.extensions().iter().copied())
            .collect();
        extensions.sort();
        extensions.dedup();
        extensions
    }

    fn loader_for_extension(&self, ext: &str) -> Option<&dyn CubeLoader> {
        let ext_lower = ext.to_lowercase();
        self.loaders
            .iter()
            .find(|l| l.extensions().iter().any(|e| *e == ext_lower))
            .map(|l| l.as_ref())
    }

    fn detect_loader(&self, head: &[u8]) -> Option<&dyn CubeLoader> {
        self.loaders
            .iter()
            .find(|l| l.can_load(head))
            .map(|l| l.as_ref())
    }

    /// Load a cube, picking the loader by extension and then by magic bytes.
    ///
    /// The chosen loader's error is returned unchanged so callers can tell a
    /// payload size mismatch from a malformed header.
    pub fn load(&self, path: &Path) -> Result<RawCube, SourceError> {
        if !path.is_file() {
            return Err(SourceError::NotFound {
                path: path.to_path_buf(),
            });
        }

        if let Some(loader) = path
            .extension()
            .and_then(|e| e.to_str())
            .and_then(|ext| self.loader_for_extension(ext))
        {
            log::debug!("Loading {:?} with {} loader (by extension)", path, loader.id());
            return loader.load(path);
        }

        let head = read_head(path)?;
        if let Some(loader) = self.detect_loader(&head) {
            log::debug!("Loading {:?} with {} loader (by detection)", path, loader.id());
            return loader.load(path);
        }

        Err(SourceError::Unsupported {
            path: path.to_path_buf(),
        })
    }

    /// Check if a filename has a supported extension.
    pub fn is_supported_file(&self, filename: &str) -> bool {
        let lower = filename.to_lowercase();
        self.supported_extensions()
            .iter()
            .any(|ext| lower.ends_with(&format!(".{}", ext)))
    }

    /// Get all registered loaders.
    pub fn loaders(&self) -> &[Box<dyn CubeLoader>] {
        &self.loaders
    }
}

impl Default for LoaderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn read_head(path: &Path) -> Result<Vec<u8>, SourceError> {
    let file = std::fs::File::open(path).map_err(|e| SourceError::io(path, e))?;
    let mut head = Vec::with_capacity(HEAD_LEN);
    file.take(HEAD_LEN as u64)
        .read_to_end(&mut head)
        .map_err(|e| SourceError::io(path, e))?;
    Ok(head)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_has_loaders() {
        let registry = LoaderRegistry::new();
        assert_eq!(registry.loaders().len(), 2);
    }

    #[test]
    fn test_supported_extensions() {
        let registry = LoaderRegistry::new();
        let extensions = registry.supported_extensions();
        assert!(extensions.contains(&"hdr"));
        assert!(extensions.contains(&"npy"));
    }

    #[test]
    fn test_is_supported_file() {
        let registry = LoaderRegistry::new();
        assert!(registry.is_supported_file("scene.hdr"));
        assert!(registry.is_supported_file("cube.NPY"));
        assert!(!registry.is_supported_file("notes.txt"));
    }

    #[test]
    fn test_missing_file_is_not_found() {
        let registry = LoaderRegistry::new();
        let err = registry
            .load(Path::new("/definitely/not/here.hdr"))
            .unwrap_err();
        assert!(matches!(err, SourceError::NotFound { .. }));
    }

    #[test]
    fn test_unknown_format_is_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mystery.bin");
        std::fs::write(&path, b"\x00\x01\x02\x03 not a cube").unwrap();

        let err = LoaderRegistry::new().load(&path).unwrap_err();
        assert!(matches!(err, SourceError::Unsupported { .. }));
    }
}
