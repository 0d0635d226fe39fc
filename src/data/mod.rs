//! Hyperspectral cube sources and the loaders that open them.
//!
//! This module provides:
//! - [`CubeSource`]: an opened, immutable `(rows, cols, bands)` cube
//! - [`LoaderRegistry`]: extensible format detection and loading
//! - Built-in loaders for ENVI (`.hdr` + raw payload) and NumPy (`.npy`) files
//! - [`synthetic`]: deterministic test cubes
//!
//! ## Adding New Formats
//!
//! 1. Create a new loader in `loaders/` implementing [`CubeLoader`]
//! 2. Register it in `LoaderRegistry::new()`
//!
//! ```rust,ignore
//! use hspec::data::{CubeLoader, RawCube};
//! use hspec::error::SourceError;
//!
//! pub struct MyFormatLoader;
//!
//! impl CubeLoader for MyFormatLoader {
//!     fn id(&self) -> &'static str { "myformat" }
//!     fn display_name(&self) -> &'static str { "My Format" }
//!     fn extensions(&self) -> &'static [&'static str] { &["myf"] }
//!     fn can_load(&self, head: &[u8]) -> bool { /* check magic bytes */ }
//!     fn load(&self, path: &Path) -> Result<RawCube, SourceError> { /* ... */ }
//! }
//! ```

mod cube;
mod loader;
pub mod loaders;
pub mod synthetic;

pub use cube::{
    BandRange, CubeShape, CubeSource, Pixel, SourceId, WavelengthRange, nearest_band,
};
pub use loader::{CubeLoader, LoaderRegistry, RawCube};
