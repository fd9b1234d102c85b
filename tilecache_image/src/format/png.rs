//! PNG encoder/decoder bridging [`Image`] and [`Blob`].
//!
//! PNG is treated as the lossless tile format. If an image carries an
//! alpha channel but is fully opaque, alpha is dropped before encoding to
//! save bytes, mirroring how other lossless codecs in this crate behave.

use crate::Image;
use crate::mode::Mode;
use anyhow::{Result, anyhow};
use image::codecs::png::{self, CompressionType, FilterType};
use image::{ColorType, DynamicImage, ImageEncoder, ImageFormat, load_from_memory_with_format};
use tilecache_core::Blob;
use tilecache_derive::context;

#[context("encoding {}x{} image as PNG (speed={speed:?})", image.width(), image.height())]
pub fn encode(image: &Image, speed: Option<u8>) -> Result<Blob> {
	let speed = speed.unwrap_or(10).clamp(0, 100);
	let (compression_type, filter_type) = match speed {
		0..20 => (CompressionType::Best, FilterType::Adaptive),
		20..40 => (CompressionType::Default, FilterType::Adaptive),
		40..60 => (CompressionType::Default, FilterType::Paeth),
		60..80 => (CompressionType::Default, FilterType::Avg),
		80..90 => (CompressionType::Fast, FilterType::Avg),
		_ => (CompressionType::Fast, FilterType::NoFilter),
	};

	let drop_alpha = image.has_alpha() && image.is_opaque();
	let buffer = image.buffer();
	let mut out = Vec::new();
	let encoder = png::PngEncoder::new_with_quality(&mut out, compression_type, filter_type);
	if drop_alpha {
		let rgb = DynamicImage::ImageRgba8(buffer.clone()).to_rgb8();
		encoder.write_image(rgb.as_raw(), rgb.width(), rgb.height(), ColorType::Rgb8.into())?;
	} else {
		encoder.write_image(buffer.as_raw(), buffer.width(), buffer.height(), ColorType::Rgba8.into())?;
	}
	Ok(Blob::from(out))
}

#[context("decoding PNG image ({} bytes)", blob.len())]
pub fn decode(blob: &Blob) -> Result<Image> {
	let decoded = load_from_memory_with_format(blob.as_slice(), ImageFormat::Png).map_err(|e| anyhow!("failed to decode PNG image: {e}"))?;
	let had_alpha = decoded.color().has_alpha();
	let buffer = decoded.to_rgba8();
	let mode = if had_alpha { Mode::Rgba } else { Mode::Rgb };
	Ok(Image::from_buffer(buffer, mode))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn round_trips_opaque_image() {
		let image = Image::new(16, 16, Mode::Rgb);
		let blob = encode(&image, None).unwrap();
		let decoded = decode(&blob).unwrap();
		assert_eq!(decoded.width(), 16);
		assert_eq!(decoded.height(), 16);
	}

	#[test]
	fn opaque_rgba_image_encodes_without_alpha_channel() {
		let image = Image::new(4, 4, Mode::Rgba);
		let blob = encode(&image, Some(80)).unwrap();
		let decoded_raw = load_from_memory_with_format(blob.as_slice(), ImageFormat::Png).unwrap();
		assert!(!decoded_raw.color().has_alpha());
	}

	#[test]
	fn transparent_rgba_image_keeps_alpha_channel() {
		let mut image = Image::new(4, 4, Mode::Rgba);
		image.buffer_mut().put_pixel(0, 0, image::Rgba([1, 2, 3, 0]));
		let blob = encode(&image, Some(80)).unwrap();
		let decoded_raw = load_from_memory_with_format(blob.as_slice(), ImageFormat::Png).unwrap();
		assert!(decoded_raw.color().has_alpha());
	}
}
