use crate::image::Image;
use anyhow::{Context, Result};
use fast_image_resize::{FilterType, ResizeAlg, ResizeOptions, Resizer};
use image::RgbaImage;

/// Resampling method used when rescaling a tile image (spec §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResamplingMethod {
	Nearest,
	Bilinear,
	Bicubic,
}

impl ResamplingMethod {
	fn resize_alg(self) -> ResizeAlg {
		match self {
			ResamplingMethod::Nearest => ResizeAlg::Nearest,
			ResamplingMethod::Bilinear => ResizeAlg::Convolution(FilterType::Bilinear),
			ResamplingMethod::Bicubic => ResizeAlg::Convolution(FilterType::CatmullRom),
		}
	}
}

pub(crate) fn resample(image: &Image, width: u32, height: u32, method: ResamplingMethod) -> Result<Image> {
	let mut dst = RgbaImage::new(width, height);
	Resizer::new()
		.resize(image.buffer(), &mut dst, &ResizeOptions::default().resize_alg(method.resize_alg()))
		.context("running resizer")?;
	Ok(Image::from_buffer(dst, image.mode()))
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::mode::Mode;

	#[test]
	fn resample_changes_size_but_keeps_mode() {
		let src = Image::new(8, 8, Mode::Rgb);
		let out = resample(&src, 4, 4, ResamplingMethod::Bilinear).unwrap();
		assert_eq!(out.width(), 4);
		assert_eq!(out.height(), 4);
		assert_eq!(out.mode(), Mode::Rgb);
	}

	#[test]
	fn nearest_resample_preserves_exact_colors() {
		let mut src = Image::new(2, 2, Mode::Rgb);
		src.buffer_mut().put_pixel(0, 0, image::Rgba([200, 10, 10, 255]));
		let out = resample(&src, 4, 4, ResamplingMethod::Nearest).unwrap();
		assert_eq!(out.buffer().get_pixel(0, 0).0[0], 200);
	}
}
