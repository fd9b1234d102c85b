//! JPEG encoder/decoder bridging [`Image`] and [`Blob`].
//!
//! JPEG carries no alpha channel, so images with transparency are
//! flattened onto a background color before encoding (white unless the
//! caller specifies otherwise).

use crate::Image;
use crate::mode::Mode;
use anyhow::{Result, anyhow, bail};
use image::{ImageEncoder, ImageFormat, Rgb, codecs::jpeg::JpegEncoder, load_from_memory_with_format};
use tilecache_core::Blob;
use tilecache_derive::context;

/// Flattens `image`'s alpha channel onto `background` (`alpha * src +
/// (1-alpha) * background`, per channel).
pub fn flatten(image: &Image, background: Rgb<u8>) -> image::RgbImage {
	image::RgbImage::from_fn(image.width(), image.height(), |x, y| {
		let p = image.buffer().get_pixel(x, y).0;
		let a = f32::from(p[3]) / 255.0;
		let blend = |src: u8, bg: u8| (f32::from(src) * a + f32::from(bg) * (1.0 - a)).round() as u8;
		Rgb([blend(p[0], background.0[0]), blend(p[1], background.0[1]), blend(p[2], background.0[2])])
	})
}

#[context("encoding {}x{} image as JPEG (quality={quality:?})", image.width(), image.height())]
pub fn encode(image: &Image, quality: Option<u8>, background: Rgb<u8>) -> Result<Blob> {
	let quality = quality.unwrap_or(85);
	if quality >= 100 {
		bail!("JPEG does not support lossless compression, use a quality below 100");
	}
	let rgb = flatten(image, background);
	let mut out = Vec::new();
	JpegEncoder::new_with_quality(&mut out, quality).write_image(rgb.as_raw(), rgb.width(), rgb.height(), image::ExtendedColorType::Rgb8)?;
	Ok(Blob::from(out))
}

#[context("decoding JPEG image ({} bytes)", blob.len())]
pub fn decode(blob: &Blob) -> Result<Image> {
	let decoded = load_from_memory_with_format(blob.as_slice(), ImageFormat::Jpeg).map_err(|e| anyhow!("failed to decode JPEG image: {e}"))?;
	Ok(Image::from_buffer(decoded.to_rgba8(), Mode::Rgb))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn round_trips_opaque_image() {
		let image = Image::new(8, 8, Mode::Rgb);
		let blob = encode(&image, None, Rgb([255, 255, 255])).unwrap();
		let decoded = decode(&blob).unwrap();
		assert_eq!(decoded.width(), 8);
	}

	#[test]
	fn rejects_lossless_quality() {
		let image = Image::new(2, 2, Mode::Rgb);
		assert!(encode(&image, Some(100), Rgb([0, 0, 0])).is_err());
	}

	#[test]
	fn flatten_blends_transparent_pixel_toward_background() {
		let mut image = Image::new(1, 1, Mode::Rgba);
		image.buffer_mut().put_pixel(0, 0, image::Rgba([255, 0, 0, 0]));
		let flattened = flatten(&image, Rgb([0, 255, 0]));
		assert_eq!(*flattened.get_pixel(0, 0), Rgb([0, 255, 0]));
	}
}
