//! Point and polygon annotations.
//!
//! This module provides:
//! - [`AnnotationStore`]: owns all annotations, the drawing draft and colors
//! - [`geometry`]: exact pixel-ring tests
//! - [`ColorCycler`]: tab10 color assignment
//! - [`derive`]: per-annotation spectra and polygon statistics

mod color;
pub mod derive;
pub mod geometry;
mod store;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use color::{ColorCycler, palette_color};
pub use derive::{DeriveContext, Derived, Target};
pub use store::{Annotation, AnnotationStore, DraftStep, Geometry, derive_all};

/// Stable annotation identifier, e.g. `pt0001` or `pg0002`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AnnotationId(String);

impl AnnotationId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Id for the `n`-th annotation of a kind.
    pub fn for_kind(kind: AnnotationKind, n: u64) -> Self {
        Self(format!("{}{:04}", kind.prefix(), n))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Trailing decimal counter, if the id has one.
    pub fn counter(&self) -> Option<u64> {
        let digits = self.0.len() - self.0.trim_end_matches(|c: char| c.is_ascii_digit()).len();
        if digits == 0 {
            return None;
        }
        self.0[self.0.len() - digits..].parse().ok()
    }
}

impl fmt::Display for AnnotationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AnnotationId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Annotation kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnnotationKind {
    Point,
    Polygon,
}

impl AnnotationKind {
    fn prefix(self) -> &'static str {
        match self {
            AnnotationKind::Point => "pt",
            AnnotationKind::Polygon => "pg",
        }
    }
}

/// An 8-bit RGB color. Serialized as `[r, g, b]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "[u8; 3]", into = "[u8; 3]")]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// `#rrggbb` form.
    pub fn to_hex(self) -> String {
        format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }
}

impl From<[u8; 3]> for Rgb {
    fn from([r, g, b]: [u8; 3]) -> Self {
        Self { r, g, b }
    }
}

impl From<Rgb> for [u8; 3] {
    fn from(c: Rgb) -> Self {
        [c.r, c.g, c.b]
    }
}
