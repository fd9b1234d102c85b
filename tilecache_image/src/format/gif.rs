//! GIF encoder/decoder bridging [`Image`] and [`Blob`].
//!
//! GIF only carries a 256-color palette with binary transparency; the
//! `image` crate's encoder handles the quantization, so this module is a
//! thin bridge like [`crate::format::tiff`].

use crate::Image;
use crate::mode::Mode;
use anyhow::{Result, anyhow};
use image::{ImageFormat, load_from_memory_with_format};
use std::io::Cursor;
use tilecache_core::Blob;
use tilecache_derive::context;

#[context("encoding {}x{} image as GIF", image.width(), image.height())]
pub fn encode(image: &Image) -> Result<Blob> {
	let mut out = Vec::new();
	image.buffer().write_to(&mut Cursor::new(&mut out), ImageFormat::Gif)?;
	Ok(Blob::from(out))
}

#[context("decoding GIF image ({} bytes)", blob.len())]
pub fn decode(blob: &Blob) -> Result<Image> {
	let decoded = load_from_memory_with_format(blob.as_slice(), ImageFormat::Gif).map_err(|e| anyhow!("failed to decode GIF image: {e}"))?;
	Ok(Image::from_buffer(decoded.to_rgba8(), Mode::Paletted8))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn round_trips_a_flat_color_image() {
		let image = Image::new(4, 4, Mode::Paletted8);
		let blob = encode(&image).unwrap();
		let decoded = decode(&blob).unwrap();
		assert_eq!(decoded.width(), 4);
		assert_eq!(decoded.height(), 4);
	}
}
