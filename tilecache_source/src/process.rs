//! Renders a map image by invoking a local external renderer process
//! (Mapnik-style), passing the request as command-line arguments and
//! reading the rendered image from its stdout (spec §4.5, §6
//! `source.mapnik`).

use crate::source::{MapRequest, Source};
use anyhow::Context;
use async_trait::async_trait;
use imageproc::image::load_from_memory;
use tilecache_core::error::{TileErrorKind, tile_error};
use tilecache_image::Image;
use tokio::process::Command;

/// An external renderer invoked once per request:
/// `{program} {args...} --bbox x_min,y_min,x_max,y_max --size WxH --srs SRS
/// --scale-factor S`, expecting the rendered image on stdout.
pub struct ProcessSource {
	pub program: String,
	pub args: Vec<String>,
	pub scale_factor: f32,
}

impl ProcessSource {
	pub fn new(program: impl Into<String>) -> Self {
		Self { program: program.into(), args: Vec::new(), scale_factor: 1.0 }
	}

	#[must_use]
	pub fn with_args(mut self, args: Vec<String>) -> Self {
		self.args = args;
		self
	}

	#[must_use]
	pub fn with_scale_factor(mut self, scale_factor: f32) -> Self {
		self.scale_factor = scale_factor;
		self
	}

	fn command_for(&self, request: &MapRequest) -> Command {
		let bbox = request.bbox;
		let scaled_width = (request.size.width as f32 * self.scale_factor).round() as u32;
		let scaled_height = (request.size.height as f32 * self.scale_factor).round() as u32;

		let mut command = Command::new(&self.program);
		command
			.args(&self.args)
			.arg("--bbox")
			.arg(format!("{},{},{},{}", bbox.x_min, bbox.y_min, bbox.x_max, bbox.y_max))
			.arg("--size")
			.arg(format!("{scaled_width}x{scaled_height}"))
			.arg("--srs")
			.arg(&request.srs)
			.arg("--scale-factor")
			.arg(self.scale_factor.to_string());
		command
	}
}

#[async_trait]
impl Source for ProcessSource {
	async fn get_map(&self, request: &MapRequest) -> anyhow::Result<Image> {
		let output = self.command_for(request).output().await.context("spawning renderer process")?;

		if !output.status.success() {
			let stderr = String::from_utf8_lossy(&output.stderr);
			return Err(tile_error(TileErrorKind::SourcePermanent, format!("renderer exited with {}: {}", output.status, stderr.trim())));
		}

		let decoded = load_from_memory(&output.stdout).map_err(|err| tile_error(TileErrorKind::SourcePermanent, format!("decoding renderer output: {err}")))?;
		Ok(Image::from_buffer(decoded.to_rgba8(), tilecache_image::Mode::Rgba))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use tilecache_core::{GroundBBox, Size};

	fn request() -> MapRequest {
		MapRequest {
			bbox: GroundBBox::new(0.0, 0.0, 10.0, 10.0).unwrap(),
			size: Size::new(256, 256),
			srs: "EPSG:3857".into(),
			format: None,
			dims: Default::default(),
		}
	}

	#[test]
	fn scale_factor_enlarges_requested_pixel_size() {
		let source = ProcessSource::new("render").with_scale_factor(2.0);
		let command = source.command_for(&request());
		let args: Vec<String> = command.as_std().get_args().map(|a| a.to_string_lossy().to_string()).collect();
		let size_index = args.iter().position(|a| a == "--size").unwrap();
		assert_eq!(args[size_index + 1], "512x512");
	}

	#[test]
	fn bbox_and_srs_are_passed_through() {
		let source = ProcessSource::new("render");
		let command = source.command_for(&request());
		let args: Vec<String> = command.as_std().get_args().map(|a| a.to_string_lossy().to_string()).collect();
		assert!(args.contains(&"0,0,10,10".to_string()));
		assert!(args.contains(&"EPSG:3857".to_string()));
	}

	#[tokio::test]
	async fn nonexistent_program_surfaces_as_a_permanent_error() {
		let source = ProcessSource::new("tilecache-test-renderer-that-does-not-exist");
		let err = source.get_map(&request()).await.unwrap_err();
		assert_eq!(tilecache_core::error::error_kind(&err), None);
	}
}
