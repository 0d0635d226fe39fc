//! Session-level tests.
//!
//! These exercise the engine end to end: sources, annotations, derived
//! spectra, snapshots, merge import and background recompute.

mod snapshot_tests;

use std::path::{Path, PathBuf};

use ndarray::Array3;

use crate::data::{CubeSource, SourceId, synthetic};
use crate::session::SessionState;

/// 5x5x4 cube with distinct values in `0.1..0.6`.
pub(super) fn ramp_cube() -> Array3<f32> {
    Array3::from_shape_fn((5, 5, 4), |(r, c, b)| {
        0.1 + 0.01 * (r * 5 + c) as f32 + 0.1 * b as f32
    })
}

/// Session with one in-memory source `src1`.
pub(super) fn memory_session(data: Array3<f32>) -> (SessionState, SourceId) {
    let wavelengths = synthetic::wavelength_table(data.dim().2);
    let cube = CubeSource::from_array(SourceId::new("src1"), "mem://scene", data, Some(wavelengths))
        .unwrap();
    let mut session = SessionState::new();
    let id = session.add_source(cube);
    (session, id)
}

/// Write a cube as `.npy` with a wavelength sidecar.
pub(super) fn write_cube(dir: &Path, name: &str, data: &Array3<f32>) -> PathBuf {
    let path = dir.join(name);
    let wavelengths = synthetic::wavelength_table(data.dim().2);
    synthetic::write_npy_cube(&path, data, &wavelengths).unwrap();
    path
}
