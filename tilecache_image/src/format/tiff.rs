//! TIFF encoder/decoder bridging [`Image`] and [`Blob`].
//!
//! Used mainly for process-source round trips and archival caches where a
//! losslessly-encoded, widely tool-compatible raster is preferred.

use crate::Image;
use crate::mode::Mode;
use anyhow::{Result, anyhow};
use image::{ImageFormat, load_from_memory_with_format};
use std::io::Cursor;
use tilecache_core::Blob;
use tilecache_derive::context;

#[context("encoding {}x{} image as TIFF", image.width(), image.height())]
pub fn encode(image: &Image) -> Result<Blob> {
	let mut out = Vec::new();
	image.buffer().write_to(&mut Cursor::new(&mut out), ImageFormat::Tiff)?;
	Ok(Blob::from(out))
}

#[context("decoding TIFF image ({} bytes)", blob.len())]
pub fn decode(blob: &Blob) -> Result<Image> {
	let decoded = load_from_memory_with_format(blob.as_slice(), ImageFormat::Tiff).map_err(|e| anyhow!("failed to decode TIFF image: {e}"))?;
	let had_alpha = decoded.color().has_alpha();
	let mode = if had_alpha { Mode::Rgba } else { Mode::Rgb };
	Ok(Image::from_buffer(decoded.to_rgba8(), mode))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn round_trips_image() {
		let mut image = Image::new(4, 4, Mode::Rgb);
		image.buffer_mut().put_pixel(1, 1, image::Rgba([10, 20, 30, 255]));
		let blob = encode(&image).unwrap();
		let decoded = decode(&blob).unwrap();
		assert_eq!(*decoded.buffer().get_pixel(1, 1), image::Rgba([10, 20, 30, 255]));
	}
}
