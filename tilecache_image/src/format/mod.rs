//! Image format handlers (PNG, JPEG, TIFF, GIF) plus the "mixed" policy
//! used by caches that want lossy tiles where possible and lossless tiles
//! where transparency demands it (spec §4.2, §6 `cache.format`).

pub mod gif;
pub mod jpeg;
pub mod png;
pub mod tiff;

use crate::Image;
use anyhow::{Result, bail};
use image::Rgb;
use tilecache_core::Blob;

/// An on-the-wire tile image format, as named in cache/source config.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
	Png,
	Jpeg,
	Tiff,
	Gif,
	/// JPEG for fully opaque tiles, PNG otherwise.
	Mixed,
}

impl ImageFormat {
	pub fn parse(name: &str) -> Result<Self> {
		Ok(match name {
			"image/png" | "png" => ImageFormat::Png,
			"image/jpeg" | "jpeg" | "jpg" => ImageFormat::Jpeg,
			"image/tiff" | "tiff" => ImageFormat::Tiff,
			"image/gif" | "gif" => ImageFormat::Gif,
			"mixed" => ImageFormat::Mixed,
			other => bail!("unknown image format '{other}'"),
		})
	}

	/// The format actually used once `Mixed` resolves against `image`.
	pub fn resolve(self, image: &Image) -> ImageFormat {
		match self {
			ImageFormat::Mixed => {
				if image.is_opaque() {
					ImageFormat::Jpeg
				} else {
					ImageFormat::Png
				}
			}
			other => other,
		}
	}

	pub fn content_type(self) -> &'static str {
		match self {
			ImageFormat::Png => "image/png",
			ImageFormat::Jpeg => "image/jpeg",
			ImageFormat::Tiff => "image/tiff",
			ImageFormat::Gif => "image/gif",
			ImageFormat::Mixed => "image/*",
		}
	}
}

/// Encodes `image` as `format`, resolving `Mixed` first. Returns the blob
/// plus the concrete format actually written (`Mixed` never appears here).
pub fn encode(image: &Image, format: ImageFormat) -> Result<(Blob, ImageFormat)> {
	let resolved = format.resolve(image);
	let blob = match resolved {
		ImageFormat::Png => png::encode(image, None)?,
		ImageFormat::Jpeg => jpeg::encode(image, None, Rgb([255, 255, 255]))?,
		ImageFormat::Tiff => tiff::encode(image)?,
		ImageFormat::Gif => gif::encode(image)?,
		ImageFormat::Mixed => unreachable!("resolve() never returns Mixed"),
	};
	Ok((blob, resolved))
}

/// Decodes `blob` as `format`. `Mixed` is rejected: decoding needs the
/// concrete format a tile was actually stored as.
pub fn decode(blob: &Blob, format: ImageFormat) -> Result<Image> {
	match format {
		ImageFormat::Png => png::decode(blob),
		ImageFormat::Jpeg => jpeg::decode(blob),
		ImageFormat::Tiff => tiff::decode(blob),
		ImageFormat::Gif => gif::decode(blob),
		ImageFormat::Mixed => bail!("cannot decode a blob declared as the 'mixed' format; store the resolved format instead"),
	}
}
