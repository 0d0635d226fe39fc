//! hspec - Hyperspectral Spectrum Explorer core
//!
//! The engine behind an interactive hyperspectral cube explorer: cube access,
//! cached reflectance/absorbance conversion, spectral preprocessing, point and
//! polygon annotations with derived spectra, and reproducible JSON sessions.
//!
//! ```rust,ignore
//! use hspec::{Mode, Pixel, SessionState};
//!
//! let mut session = SessionState::new();
//! let src = session.open_source("scene.hdr")?;
//! let id = session.add_point(&src, Pixel::new(10, 20), "leaf")?;
//! session.set_mode(Mode::Absorbance);
//! let spectrum = session.annotations().get(&id).and_then(|a| a.derived.spectrum());
//! ```

pub mod annotation;
pub mod cache;
pub mod config;
pub mod constants;
pub mod data;
pub mod error;
pub mod export;
pub mod preprocess;
pub mod session;
pub mod worker;

pub use annotation::{Annotation, AnnotationId, AnnotationStore, Derived, Geometry, Rgb};
pub use cache::{BandCache, Mode};
pub use config::AppConfig;
pub use data::{BandRange, CubeSource, LoaderRegistry, Pixel, SourceId, WavelengthRange};
pub use error::{Error, Result};
pub use preprocess::{Pipeline, PreprocessingConfig, PreprocessingFlags};
pub use session::{Command, CommandOutput, SessionState};
pub use worker::RecomputeWorker;
