//! Built-in cube loaders.

mod envi_loader;
mod npy_loader;

pub use envi_loader::EnviLoader;
pub use npy_loader::NpyLoader;

/// Conversion of stored sample types to the engine's `f32` values.
///
/// Samples keep their raw magnitude; scaled integer reflectance is handled by
/// the absorbance conversion.
pub(crate) trait Sample: Copy {
    fn to_f32(self) -> f32;
}

impl Sample for f32 {
    fn to_f32(self) -> f32 {
        self
    }
}

impl Sample for f64 {
    fn to_f32(self) -> f32 {
        self as f32
    }
}

impl Sample for u8 {
    fn to_f32(self) -> f32 {
        f32::from(self)
    }
}

impl Sample for u16 {
    fn to_f32(self) -> f32 {
        f32::from(self)
    }
}

impl Sample for i16 {
    fn to_f32(self) -> f32 {
        f32::from(self)
    }
}

impl Sample for i32 {
    fn to_f32(self) -> f32 {
        self as f32
    }
}
