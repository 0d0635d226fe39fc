//! Error types for cube access, preprocessing, geometry and session snapshots.
//!
//! Each concern has its own error enum so callers can match on the failure
//! they care about; [`Error`] wraps all of them for the command interface.

use std::path::PathBuf;
use thiserror::Error;

use crate::annotation::AnnotationId;
use crate::data::SourceId;

/// Errors raised while opening or reading a hyperspectral data source.
#[derive(Error, Debug)]
pub enum SourceError {
    /// I/O error while reading header or payload
    #[error("IO error reading {path:?}: {source}")]
    Io {
        /// File that failed to read
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// The referenced file does not exist
    #[error("Source not found: {path:?}")]
    NotFound {
        /// Path that did not resolve
        path: PathBuf,
    },

    /// Header could not be parsed
    #[error("Malformed header in {path:?}: {message}")]
    MalformedHeader {
        /// Header file
        path: PathBuf,
        /// What was wrong with it
        message: String,
    },

    /// Cube declares zero bands
    #[error("Source {path:?} has zero bands")]
    ZeroBands {
        /// Offending source
        path: PathBuf,
    },

    /// Binary payload does not hold exactly rows*cols*bands elements
    #[error("Payload size mismatch for {path:?}: expected {expected} bytes, found {found}")]
    PayloadSize {
        /// Payload file
        path: PathBuf,
        /// Size implied by the header
        expected: u64,
        /// Actual file size
        found: u64,
    },

    /// Wavelength table is inconsistent with the cube
    #[error("Invalid wavelength table for {path:?}: {message}")]
    Wavelengths {
        /// Offending source
        path: PathBuf,
        /// Description of the inconsistency
        message: String,
    },

    /// No registered loader accepts the file
    #[error("Unsupported source format: {path:?}")]
    Unsupported {
        /// File that no loader accepted
        path: PathBuf,
    },

    /// Cube could not be written
    #[error("Failed to write {path:?}: {message}")]
    Write {
        /// Target file
        path: PathBuf,
        /// Encoder message
        message: String,
    },

    /// Array payload could not be decoded
    #[error("Failed to decode {path:?}: {message}")]
    Decode {
        /// Offending file
        path: PathBuf,
        /// Decoder message
        message: String,
    },
}

impl SourceError {
    /// Create a malformed header error.
    pub fn malformed(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::MalformedHeader {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create an I/O error with file context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create a wavelength table error.
    pub fn wavelengths(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Wavelengths {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Invalid band range request.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Invalid band range {start}..{end} for a cube with {band_count} bands")]
pub struct RangeError {
    /// Requested first band (inclusive)
    pub start: usize,
    /// Requested end band (exclusive)
    pub end: usize,
    /// Bands available in the source
    pub band_count: usize,
}

/// Errors raised by a preprocessing transform.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PreprocessingError {
    /// Spectrum is shorter than the transform's window
    #[error("{stage} needs at least {window} bands, spectrum has {len}")]
    TooShort {
        /// Transform name
        stage: &'static str,
        /// Spectrum length
        len: usize,
        /// Required window
        window: usize,
    },

    /// Empty input spectrum
    #[error("{stage} received an empty spectrum")]
    Empty {
        /// Transform name
        stage: &'static str,
    },

    /// Window or polynomial parameters are unusable
    #[error("Invalid preprocessing parameters: {0}")]
    InvalidConfig(String),
}

/// Invalid polygon or point geometry.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GeometryError {
    /// Polygon needs at least three vertices
    #[error("Polygon needs at least 3 vertices, got {count}")]
    TooFewVertices {
        /// Number of vertices supplied
        count: usize,
    },

    /// Two non-adjacent edges of the ring cross
    #[error("Polygon edges {first} and {second} intersect")]
    SelfIntersecting {
        /// Index of the first edge
        first: usize,
        /// Index of the second edge
        second: usize,
    },

    /// Two consecutive vertices coincide
    #[error("Polygon vertex {index} repeats the next vertex")]
    RepeatedVertex {
        /// Index of the first of the two vertices
        index: usize,
    },

    /// All vertices lie on one line
    #[error("Polygon has zero area")]
    ZeroArea,

    /// Pixel lies outside the source image
    #[error("Pixel ({row}, {col}) is outside the {rows}x{cols} image")]
    OutOfBounds {
        /// Pixel row
        row: u32,
        /// Pixel column
        col: u32,
        /// Image rows
        rows: usize,
        /// Image columns
        cols: usize,
    },

    /// Operation requires a closed polygon
    #[error("Polygon {0} is not closed")]
    NotClosed(AnnotationId),
}

/// Errors that can occur while reading or writing a session snapshot.
#[derive(Error, Debug)]
pub enum FormatError {
    /// I/O error during file operations
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing or serialization error (also covers missing fields and type mismatches)
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Field present but its value is unusable
    #[error("Invalid value for '{field}': {message}")]
    InvalidValue {
        /// Field path
        field: String,
        /// Description of the problem
        message: String,
    },

    /// Two entries share the same id
    #[error("Duplicate id '{0}'")]
    DuplicateId(String),

    /// Annotation references a source that is not listed
    #[error("Annotation '{annotation}' references unknown source '{source_id}'")]
    UnknownSource {
        /// Annotation id
        annotation: String,
        /// Missing source id
        source_id: String,
    },

    /// Snapshot written by an incompatible version
    #[error("Version mismatch: expected {expected}, found {found}")]
    VersionMismatch {
        /// Supported version
        expected: String,
        /// Version in the file
        found: String,
    },
}

impl FormatError {
    /// Create an invalid value error.
    pub fn invalid_value(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Errors from CSV and image exporters.
#[derive(Error, Debug)]
pub enum ExportError {
    /// I/O error during export
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV writer error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// PNG encoder error
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    /// Nothing visible with a derived spectrum
    #[error("No spectra to export")]
    NothingToExport,

    /// Requested band does not exist
    #[error(transparent)]
    Range(#[from] RangeError),
}

/// Crate-level error returned by session operations and commands.
#[derive(Error, Debug)]
pub enum Error {
    /// Data source failure
    #[error(transparent)]
    Source(#[from] SourceError),

    /// Band range failure
    #[error(transparent)]
    Range(#[from] RangeError),

    /// Preprocessing failure
    #[error(transparent)]
    Preprocessing(#[from] PreprocessingError),

    /// Geometry failure
    #[error(transparent)]
    Geometry(#[from] GeometryError),

    /// Snapshot failure
    #[error(transparent)]
    Format(#[from] FormatError),

    /// Export failure
    #[error(transparent)]
    Export(#[from] ExportError),

    /// No annotation with this id
    #[error("Unknown annotation: {0}")]
    UnknownAnnotation(AnnotationId),

    /// No source with this id
    #[error("Unknown source: {0}")]
    UnknownSource(SourceId),

    /// Source is referenced but could not be opened
    #[error("Source {0} is unresolved")]
    UnresolvedSource(SourceId),

    /// No polygon is being drawn
    #[error("No polygon is being drawn")]
    NoDraft,
}

/// Convenience alias used across the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;
