//! Standard Normal Variate normalization.

use ndarray::{Array1, ArrayView1};

use crate::error::PreprocessingError;

/// `(x - mean) / std` with the population standard deviation.
///
/// A spectrum with zero (or non-finite) spread has no meaningful variate and
/// maps to the zero vector.
pub fn snv(spectrum: ArrayView1<'_, f32>) -> Result<Array1<f32>, PreprocessingError> {
    let n = spectrum.len();
    if n == 0 {
        return Err(PreprocessingError::Empty { stage: "snv" });
    }

    let mean = spectrum.iter().map(|&v| f64::from(v)).sum::<f64>() / n as f64;
    let variance = spectrum
        .iter()
        .map(|&v| {
            let d = f64::from(v) - mean;
            d * d
        })
        .sum::<f64>()
        / n as f64;
    let std = variance.sqrt();

    if !std.is_finite() || std == 0.0 {
        return Ok(Array1::zeros(n));
    }
    Ok(spectrum.mapv(|v| ((f64::from(v) - mean) / std) as f32))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_constant_spectrum_is_zero() {
        let y = array![5.0f32, 5.0, 5.0, 5.0];
        let out = snv(y.view()).unwrap();
        assert_eq!(out, array![0.0, 0.0, 0.0, 0.0]);
        assert!(out.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_mean_zero_std_one() {
        let y = array![1.0f32, 2.0, 3.0, 4.0, 10.0];
        let out = snv(y.view()).unwrap();
        let n = out.len() as f32;
        let mean = out.sum() / n;
        let std = (out.mapv(|v| (v - mean) * (v - mean)).sum() / n).sqrt();
        assert!(mean.abs() < 1e-6);
        assert!((std - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_idempotent() {
        let y = array![0.2f32, 0.4, 0.35, 0.9, 0.1, 0.55];
        let once = snv(y.view()).unwrap();
        let twice = snv(once.view()).unwrap();
        for (a, b) in once.iter().zip(twice.iter()) {
            assert!((a - b).abs() < 1e-5);
        }
    }

    #[test]
    fn test_empty_fails() {
        let y = Array1::<f32>::zeros(0);
        assert_eq!(
            snv(y.view()).unwrap_err(),
            PreprocessingError::Empty { stage: "snv" }
        );
    }
}
