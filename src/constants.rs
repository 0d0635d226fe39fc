//! Global constants for the hspec engine

/// Number of colors in the annotation palette
pub const PALETTE_SIZE: usize = 10;

/// Matplotlib "tab10" palette used for annotation colors
pub const TAB10: [[u8; 3]; PALETTE_SIZE] = [
    [31, 119, 180],
    [255, 127, 14],
    [44, 160, 44],
    [214, 39, 40],
    [148, 103, 189],
    [140, 86, 75],
    [227, 119, 194],
    [127, 127, 127],
    [188, 189, 34],
    [23, 190, 207],
];

/// Lower bound applied to reflectance before taking the logarithm
pub const ABSORBANCE_FLOOR: f32 = 1e-8;

/// Cubes whose maximum exceeds this are treated as 16-bit scaled reflectance
pub const SCALED_REFLECTANCE_THRESHOLD: f32 = 1.5;

/// Full scale of 16-bit reflectance data
pub const U16_FULL_SCALE: f32 = 65535.0;

/// Default median filter window
pub const DEFAULT_MEDIAN_WINDOW: usize = 5;

/// Default Savitzky-Golay window
pub const DEFAULT_SAVGOL_WINDOW: usize = 7;

/// Default Savitzky-Golay polynomial order
pub const DEFAULT_SAVGOL_ORDER: usize = 2;

/// Smallest window the automatic sizing will pick
pub const MIN_AUTO_WINDOW: usize = 3;

/// Default pick radius for deleting annotations near a click (pixels)
pub const DELETE_RADIUS_PX: f64 = 8.0;

/// Lower percentile for display stretching
pub const PERCENTILE_LOW: f64 = 2.0;

/// Upper percentile for display stretching
pub const PERCENTILE_HIGH: f64 = 98.0;

/// Half-size of the square drawn for point markers in image snapshots
pub const MARKER_HALF_SIZE: i64 = 2;

/// Version written into session snapshots
pub const SNAPSHOT_VERSION: &str = "1.0";
