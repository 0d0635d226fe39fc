//! Savitzky–Golay smoothing and differentiation.
//!
//! Weights come from the least-squares polynomial fit over a window. Interior
//! samples use the centered window; the first and last `window / 2` samples
//! evaluate the polynomial fitted to the first or last full window at their
//! own offset, so every output sample comes from a real fit.

use ndarray::{Array1, ArrayView1};

use crate::error::PreprocessingError;

const STAGE: &str = "savgol";

/// Validated Savitzky–Golay parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SavgolParams {
    pub window: usize,
    pub order: usize,
    pub derivative: usize,
}

impl SavgolParams {
    pub fn new(window: usize, order: usize, derivative: usize) -> Result<Self, PreprocessingError> {
        if window == 0 || window % 2 == 0 {
            return Err(PreprocessingError::InvalidConfig(format!(
                "Savitzky-Golay window must be odd and positive, got {}",
                window
            )));
        }
        if window <= order {
            return Err(PreprocessingError::InvalidConfig(format!(
                "Savitzky-Golay window {} must exceed polynomial order {}",
                window, order
            )));
        }
        if derivative > order {
            return Err(PreprocessingError::InvalidConfig(format!(
                "derivative {} exceeds polynomial order {}",
                derivative, order
            )));
        }
        Ok(Self {
            window,
            order,
            derivative,
        })
    }
}

/// Filter a spectrum. The second derivative is returned sign-flipped so
/// absorption features point up.
pub fn savgol_filter(
    spectrum: ArrayView1<'_, f32>,
    params: SavgolParams,
) -> Result<Array1<f32>, PreprocessingError> {
    let n = spectrum.len();
    let SavgolParams {
        window,
        order,
        derivative,
    } = params;
    if n == 0 {
        return Err(PreprocessingError::Empty { stage: STAGE });
    }
    if n < window {
        return Err(PreprocessingError::TooShort {
            stage: STAGE,
            len: n,
            window,
        });
    }

    let half = window / 2;
    let fit = pseudo_inverse(window, order)?;
    let center = evaluation_weights(&fit, derivative, 0.0);
    let sign = if derivative == 2 { -1.0 } else { 1.0 };

    let apply = |weights: &[f64], start: usize| -> f32 {
        let acc: f64 = weights
            .iter()
            .zip(spectrum.iter().skip(start))
            .map(|(w, &y)| w * f64::from(y))
            .sum();
        (sign * acc) as f32
    };

    let mut out = Array1::<f32>::zeros(n);
    for i in half..n - half {
        out[i] = apply(&center, i - half);
    }
    let tail_start = n - window;
    for k in 0..half {
        let at = k as f64 - half as f64;
        out[k] = apply(&evaluation_weights(&fit, derivative, at), 0);
        let at_end = (window - half + k) as f64 - half as f64;
        out[n - half + k] = apply(&evaluation_weights(&fit, derivative, at_end), tail_start);
    }
    Ok(out)
}

/// `(AᵀA)⁻¹Aᵀ` for the Vandermonde matrix over offsets `-half..=half`.
///
/// Row `j` maps window samples to polynomial coefficient `j`.
fn pseudo_inverse(window: usize, order: usize) -> Result<Vec<Vec<f64>>, PreprocessingError> {
    let half = (window / 2) as f64;
    let terms = order + 1;
    let xs: Vec<f64> = (0..window).map(|k| k as f64 - half).collect();

    // Normal matrix augmented with Aᵀ, reduced in place by Gauss-Jordan
    let mut rows: Vec<Vec<f64>> = (0..terms)
        .map(|i| {
            let mut row: Vec<f64> = (0..terms)
                .map(|j| xs.iter().map(|x| x.powi((i + j) as i32)).sum())
                .collect();
            row.extend(xs.iter().map(|x| x.powi(i as i32)));
            row
        })
        .collect();

    for col in 0..terms {
        let pivot = (col..terms)
            .max_by(|&a, &b| rows[a][col].abs().total_cmp(&rows[b][col].abs()))
            .unwrap_or(col);
        if rows[pivot][col].abs() < 1e-12 {
            return Err(PreprocessingError::InvalidConfig(
                "singular Savitzky-Golay system".to_string(),
            ));
        }
        rows.swap(col, pivot);

        let p = rows[col][col];
        rows[col].iter_mut().for_each(|v| *v /= p);
        let pivot_row = rows[col].clone();
        for (r, row) in rows.iter_mut().enumerate() {
            if r == col {
                continue;
            }
            let factor = row[col];
            if factor != 0.0 {
                row.iter_mut()
                    .zip(&pivot_row)
                    .for_each(|(v, p)| *v -= factor * p);
            }
        }
    }

    Ok(rows.into_iter().map(|row| row[terms..].to_vec()).collect())
}

/// Weights producing the `derivative`-th derivative of the fit at offset `at`.
fn evaluation_weights(fit: &[Vec<f64>], derivative: usize, at: f64) -> Vec<f64> {
    let window = fit.first().map_or(0, Vec::len);
    let mut weights = vec![0.0; window];
    for (j, coeffs) in fit.iter().enumerate().skip(derivative) {
        // d^k/dx^k x^j = j!/(j-k)! x^(j-k)
        let falling: f64 = ((j - derivative + 1)..=j).map(|v| v as f64).product();
        let factor = falling * at.powi((j - derivative) as i32);
        for (w, c) in weights.iter_mut().zip(coeffs) {
            *w += factor * c;
        }
    }
    weights
}
