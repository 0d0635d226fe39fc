//! Sliding-window median filter.

use ndarray::{Array1, ArrayView1};

use crate::error::PreprocessingError;

const STAGE: &str = "median";

/// Median-filter a spectrum with an odd window.
///
/// Positions past either end read the edge value (clamp). NaN samples sort
/// last, so a window containing a few NaNs still has a finite median.
pub fn median_filter(
    spectrum: ArrayView1<'_, f32>,
    window: usize,
) -> Result<Array1<f32>, PreprocessingError> {
    let n = spectrum.len();
    if window == 0 || window % 2 == 0 {
        return Err(PreprocessingError::InvalidConfig(format!(
            "median window must be odd and positive, got {}",
            window
        )));
    }
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
    let last = n - 1;
    let mut buf = vec![0.0f32; window];
    let out = (0..n)
        .map(|i| {
            for (k, slot) in buf.iter_mut().enumerate() {
                let j = (i + k).saturating_sub(half).min(last);
                *slot = spectrum[j];
            }
            buf.sort_unstable_by(f32::total_cmp);
            buf[half]
        })
        .collect();
    Ok(Array1::from_vec(out))
}
