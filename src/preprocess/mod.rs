//! Fixed spectral preprocessing pipeline.
//!
//! Three stages, each mapping N samples to N samples, always applied in the
//! order denoise → smoothing → snv:
//!
//! - [`median_filter`]: sliding median, edges clamped
//! - [`savgol_filter`]: Savitzky–Golay smoothing or derivative
//! - [`snv`]: Standard Normal Variate
//!
//! The pipeline holds no state; identical inputs give bit-identical outputs.

mod median;
mod savgol;
mod snv;

use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_MEDIAN_WINDOW, DEFAULT_SAVGOL_ORDER, DEFAULT_SAVGOL_WINDOW, MIN_AUTO_WINDOW,
};
use crate::error::PreprocessingError;

pub use median::median_filter;
pub use savgol::{SavgolParams, savgol_filter};
pub use snv::snv;

/// Which preprocessing stages are enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct PreprocessingFlags {
    pub denoise: bool,
    pub smoothing: bool,
    pub snv: bool,
}

impl PreprocessingFlags {
    /// True when no stage is enabled.
    pub fn is_identity(&self) -> bool {
        !(self.denoise || self.smoothing || self.snv)
    }

    /// Flip one stage.
    pub fn toggle(&mut self, stage: Stage) {
        match stage {
            Stage::Denoise => self.denoise = !self.denoise,
            Stage::Smoothing => self.smoothing = !self.smoothing,
            Stage::Snv => self.snv = !self.snv,
        }
    }

    /// Short tags of enabled stages, e.g. `["Median", "SG (1st)"]`.
    pub fn tags(&self, config: &PreprocessingConfig) -> Vec<String> {
        let mut tags = Vec::new();
        if self.denoise {
            tags.push("Median".to_string());
        }
        if self.smoothing {
            tags.push(format!("SG ({})", config.savgol_derivative));
        }
        if self.snv {
            tags.push("SNV".to_string());
        }
        tags
    }
}

/// A single preprocessing stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Denoise,
    Smoothing,
    Snv,
}

/// Savitzky–Golay derivative order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum SavgolDerivative {
    #[default]
    Zeroth,
    First,
    Second,
}

impl SavgolDerivative {
    pub fn order(self) -> usize {
        match self {
            SavgolDerivative::Zeroth => 0,
            SavgolDerivative::First => 1,
            SavgolDerivative::Second => 2,
        }
    }
}

impl TryFrom<u8> for SavgolDerivative {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(SavgolDerivative::Zeroth),
            1 => Ok(SavgolDerivative::First),
            2 => Ok(SavgolDerivative::Second),
            other => Err(format!("derivative must be 0, 1 or 2, got {}", other)),
        }
    }
}

impl From<SavgolDerivative> for u8 {
    fn from(d: SavgolDerivative) -> Self {
        match d {
            SavgolDerivative::Zeroth => 0,
            SavgolDerivative::First => 1,
            SavgolDerivative::Second => 2,
        }
    }
}

impl std::fmt::Display for SavgolDerivative {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            SavgolDerivative::Zeroth => "0th",
            SavgolDerivative::First => "1st",
            SavgolDerivative::Second => "2nd",
        })
    }
}

/// Window and polynomial parameters for the pipeline stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessingConfig {
    pub median_window: usize,
    pub savgol_window: usize,
    pub savgol_order: usize,
    pub savgol_derivative: SavgolDerivative,
}

impl Default for PreprocessingConfig {
    fn default() -> Self {
        Self {
            median_window: DEFAULT_MEDIAN_WINDOW,
            savgol_window: DEFAULT_SAVGOL_WINDOW,
            savgol_order: DEFAULT_SAVGOL_ORDER,
            savgol_derivative: SavgolDerivative::Zeroth,
        }
    }
}

impl PreprocessingConfig {
    /// Windows sized for a cube with `band_count` bands.
    pub fn for_band_count(band_count: usize) -> Self {
        let (median_window, savgol_window) = if band_count >= 1000 {
            (21, 51)
        } else if band_count >= 200 {
            (7, 15)
        } else {
            (
                MIN_AUTO_WINDOW.max((band_count / 10).min(7) | 1),
                MIN_AUTO_WINDOW.max((band_count / 5).min(11) | 1),
            )
        };
        Self {
            median_window,
            savgol_window,
            ..Self::default()
        }
    }

    /// Check window parity and polynomial constraints.
    pub fn validate(&self) -> Result<(), PreprocessingError> {
        if self.median_window == 0 || self.median_window % 2 == 0 {
            return Err(PreprocessingError::InvalidConfig(format!(
                "median window must be odd and positive, got {}",
                self.median_window
            )));
        }
        self.savgol_params().map(|_| ())
    }

    pub fn savgol_params(&self) -> Result<SavgolParams, PreprocessingError> {
        SavgolParams::new(
            self.savgol_window,
            self.savgol_order,
            self.savgol_derivative.order(),
        )
    }
}

/// The preprocessing pipeline for one configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Pipeline {
    config: PreprocessingConfig,
}

impl Pipeline {
    pub fn new(config: PreprocessingConfig) -> Result<Self, PreprocessingError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &PreprocessingConfig {
        &self.config
    }

    /// Apply the enabled stages to one spectrum.
    pub fn apply(
        &self,
        spectrum: ArrayView1<'_, f32>,
        flags: PreprocessingFlags,
    ) -> Result<Array1<f32>, PreprocessingError> {
        let mut out = spectrum.to_owned();
        if flags.denoise {
            out = median_filter(out.view(), self.config.median_window)?;
        }
        if flags.smoothing {
            out = savgol_filter(out.view(), self.config.savgol_params()?)?;
        }
        if flags.snv {
            out = snv(out.view())?;
        }
        Ok(out)
    }

    /// Apply the enabled stages to every row of a `(spectra, bands)` array.
    ///
    /// Rows are processed in parallel; the output keeps row order.
    pub fn apply_batch(
        &self,
        spectra: ArrayView2<'_, f32>,
        flags: PreprocessingFlags,
    ) -> Result<Array2<f32>, PreprocessingError> {
        let (count, bands) = spectra.dim();
        if flags.is_identity() {
            return Ok(spectra.to_owned());
        }

        let rows: Vec<ArrayView1<'_, f32>> = spectra.outer_iter().collect();
        let processed = rows
            .par_iter()
            .map(|row| self.apply(row.view(), flags))
            .collect::<Result<Vec<_>, _>>()?;

        let flat: Vec<f32> = processed.iter().flat_map(|row| row.iter().copied()).collect();
        Array2::from_shape_vec((count, bands), flat)
            .map_err(|e| PreprocessingError::InvalidConfig(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array2, array};

    const ALL: PreprocessingFlags = PreprocessingFlags {
        denoise: true,
        smoothing: true,
        snv: true,
    };

    fn spectrum() -> Array1<f32> {
        (0..24)
            .map(|i| {
                let x = i as f32 / 23.0;
                0.3 + 0.2 * (x * 6.0).sin() + if i == 11 { 0.5 } else { 0.0 }
            })
            .collect()
    }

    #[test]
    fn test_disabled_stages_are_identity() {
        let pipeline = Pipeline::default();
        let y = spectrum();
        let out = pipeline.apply(y.view(), PreprocessingFlags::default()).unwrap();
        assert_eq!(out, y);
    }

    #[test]
    fn test_apply_is_deterministic() {
        let pipeline = Pipeline::default();
        let y = spectrum();
        let a = pipeline.apply(y.view(), ALL).unwrap();
        let b = pipeline.apply(y.view(), ALL).unwrap();
        assert!(a.iter().zip(b.iter()).all(|(x, y)| x.to_bits() == y.to_bits()));
    }

    #[test]
    fn test_fixed_order() {
        let pipeline = Pipeline::default();
        let y = spectrum();
        let expected = {
            let d = median_filter(y.view(), DEFAULT_MEDIAN_WINDOW).unwrap();
            let s = savgol_filter(d.view(), pipeline.config().savgol_params().unwrap()).unwrap();
            snv(s.view()).unwrap()
        };
        assert_eq!(pipeline.apply(y.view(), ALL).unwrap(), expected);
    }

    #[test]
    fn test_short_spectrum_fails() {
        let pipeline = Pipeline::default();
        let y = array![0.1f32, 0.2, 0.3];
        let flags = PreprocessingFlags {
            smoothing: true,
            ..Default::default()
        };
        assert!(matches!(
            pipeline.apply(y.view(), flags),
            Err(PreprocessingError::TooShort { .. })
        ));
    }

    #[test]
    fn test_batch_matches_single() {
        let pipeline = Pipeline::default();
        let y = spectrum();
        let batch = Array2::from_shape_fn((6, y.len()), |(r, c)| y[c] * (1.0 + r as f32));
        let out = pipeline.apply_batch(batch.view(), ALL).unwrap();
        assert_eq!(out.dim(), batch.dim());
        for (row_in, row_out) in batch.outer_iter().zip(out.outer_iter()) {
            assert_eq!(pipeline.apply(row_in, ALL).unwrap(), row_out);
        }
    }

    #[test]
    fn test_for_band_count() {
        let large = PreprocessingConfig::for_band_count(1200);
        assert_eq!((large.median_window, large.savgol_window), (21, 51));
        let medium = PreprocessingConfig::for_band_count(224);
        assert_eq!((medium.median_window, medium.savgol_window), (7, 15));
        let small = PreprocessingConfig::for_band_count(40);
        assert_eq!((small.median_window, small.savgol_window), (5, 9));
        let tiny = PreprocessingConfig::for_band_count(4);
        assert_eq!((tiny.median_window, tiny.savgol_window), (3, 3));
        assert!(small.validate().is_ok());
    }

    #[test]
    fn test_derivative_serializes_as_number() {
        let config = PreprocessingConfig {
            savgol_derivative: SavgolDerivative::Second,
            ..Default::default()
        };
        let json = serde_json::to_value(config).unwrap();
        assert_eq!(json["savgol_derivative"], 2);
        assert!(serde_json::from_str::<SavgolDerivative>("3").is_err());
    }

    #[test]
    fn test_tags() {
        let flags = PreprocessingFlags {
            denoise: true,
            smoothing: true,
            snv: false,
        };
        assert_eq!(
            flags.tags(&PreprocessingConfig::default()),
            vec!["Median".to_string(), "SG (0th)".to_string()]
        );
    }
}
