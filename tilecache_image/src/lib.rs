//! In-memory raster image type and operations for map tiles: decode/encode,
//! resample, reproject, merge, band-combine, color-to-alpha and watermark.

mod image;
pub mod mode;
pub mod format;
mod resample;
mod watermark;

pub use image::Image;
pub use mode::Mode;
pub use resample::ResamplingMethod;
