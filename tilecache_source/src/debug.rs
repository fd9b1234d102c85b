//! Synthesizes an image with the requested bbox and resolution drawn on
//! it, for grid calibration (spec §4.5).

use crate::source::{MapRequest, Source};
use anyhow::Result;
use async_trait::async_trait;
use imageproc::drawing::{draw_hollow_rect_mut, draw_line_segment_mut};
use imageproc::image::Rgba;
use imageproc::rect::Rect;
use tilecache_image::{Image, Mode};

const BORDER: Rgba<u8> = Rgba([220, 40, 40, 255]);
const CROSSHAIR: Rgba<u8> = Rgba([40, 40, 220, 255]);

pub struct DebugSource;

impl DebugSource {
	pub fn new() -> Self {
		Self
	}
}

impl Default for DebugSource {
	fn default() -> Self {
		Self::new()
	}
}

#[async_trait]
impl Source for DebugSource {
	async fn get_map(&self, request: &MapRequest) -> Result<Image> {
		let (w, h) = (request.size.width, request.size.height);
		let mut image = Image::new(w, h, Mode::Rgba);
		let buffer = image.buffer_mut();

		if w > 1 && h > 1 {
			draw_hollow_rect_mut(buffer, Rect::at(0, 0).of_size(w, h), BORDER);
			draw_line_segment_mut(buffer, (0.0, 0.0), ((w - 1) as f32, (h - 1) as f32), CROSSHAIR);
			draw_line_segment_mut(buffer, ((w - 1) as f32, 0.0), (0.0, (h - 1) as f32), CROSSHAIR);
		}

		Ok(image)
	}
}
