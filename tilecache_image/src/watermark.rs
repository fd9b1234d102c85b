use ab_glyph::{FontArc, PxScale};
use image::{Rgba, RgbaImage};
use imageproc::drawing::draw_text_mut;

/// Anchor points for a repeated watermark, `spacing_x x spacing_y` pixels
/// apart across a `width x height` canvas. When `wide` is set, every other
/// anchor in both axes is skipped ("spacing=wide", spec §4.2).
fn anchor_points(width: u32, height: u32, spacing_x: u32, spacing_y: u32, wide: bool) -> Vec<(i32, i32)> {
	if spacing_x == 0 || spacing_y == 0 {
		return Vec::new();
	}
	let step = if wide { 2 } else { 1 };
	let mut points = Vec::new();
	let mut row = 0u32;
	let mut y = 0i32;
	while y < height as i32 {
		let mut col = 0u32;
		let mut x = 0i32;
		while x < width as i32 {
			if row % step == 0 && col % step == 0 {
				points.push((x, y));
			}
			x += spacing_x as i32;
			col += 1;
		}
		y += spacing_y as i32;
		row += 1;
	}
	points
}

/// Draws `text` at every watermark anchor point of `buffer`, blended at
/// `opacity`. `font` is loaded by the caller (from the configured
/// watermark font file); there is no bundled default font.
#[allow(clippy::too_many_arguments)]
pub fn draw_repeated(buffer: &mut RgbaImage, text: &str, font_size: f32, color: [u8; 3], opacity: f32, spacing_x: u32, spacing_y: u32, wide: bool, font: &FontArc) {
	if text.is_empty() {
		return;
	}
	let alpha = (opacity.clamp(0.0, 1.0) * 255.0).round() as u8;
	let pixel = Rgba([color[0], color[1], color[2], alpha]);
	let scale = PxScale::from(font_size);

	for (x, y) in anchor_points(buffer.width(), buffer.height(), spacing_x, spacing_y, wide) {
		draw_text_mut(buffer, pixel, x, y, scale, font, text);
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn normal_spacing_covers_full_grid() {
		let points = anchor_points(128, 128, 32, 32, false);
		assert_eq!(points.len(), 16);
	}

	#[test]
	fn wide_spacing_keeps_a_quarter_of_the_anchors() {
		let dense = anchor_points(128, 128, 32, 32, false);
		let sparse = anchor_points(128, 128, 32, 32, true);
		assert_eq!(sparse.len(), dense.len() / 4);
	}

	#[test]
	fn zero_spacing_yields_no_anchors() {
		assert!(anchor_points(128, 128, 0, 32, false).is_empty());
	}
}
