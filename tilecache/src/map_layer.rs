//! Answers an arbitrary bbox/size/SRS request against one cache or direct
//! source (spec §4.7): resolves which tiles cover the request, reads them
//! through the [`TileManager`], stitches them into a canvas, then
//! resamples or reprojects to the exact requested window.

use crate::manager::TileManager;
use anyhow::Result;
use std::sync::Arc;
use tilecache_core::error::{TileErrorKind, error_kind};
use tilecache_core::grid::Origin;
use tilecache_core::{GroundBBox, Size};
use tilecache_geometry::Coverage;
use tilecache_geometry::srs::{transform_bbox, transform_point};
use tilecache_image::format;
use tilecache_image::{Image, Mode, ResamplingMethod};
use tilecache_source::{MapRequest, Source, get_map_checked};
use tilecache_storage::{DimensionValues, TileCoord};

/// When a cached layer should skip its own grid entirely and render the
/// sources directly at the requested resolution (spec §9): cheap overview
/// zoom levels aren't worth meta-tiling and storing.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectBypass {
	pub from_level: Option<u32>,
	pub from_res: Option<f64>,
}

enum Backend {
	Cached { manager: Arc<TileManager>, bypass: DirectBypass },
	Direct(Arc<dyn Source>),
}

pub struct MapLayer {
	backend: Backend,
	resampling_method: ResamplingMethod,
	limited_to: Option<Coverage>,
	/// Pixel margin added around the reprojected window before sampling, so
	/// the resampler always has real source pixels just outside the
	/// requested edge to interpolate against (spec §9, default 1px).
	reprojection_margin_px: u32,
}

impl MapLayer {
	pub fn cached(manager: Arc<TileManager>, bypass: DirectBypass) -> Self {
		Self { backend: Backend::Cached { manager, bypass }, resampling_method: ResamplingMethod::Bilinear, limited_to: None, reprojection_margin_px: 1 }
	}

	pub fn direct(source: Arc<dyn Source>) -> Self {
		Self { backend: Backend::Direct(source), resampling_method: ResamplingMethod::Bilinear, limited_to: None, reprojection_margin_px: 1 }
	}

	#[must_use]
	pub fn with_resampling_method(mut self, method: ResamplingMethod) -> Self {
		self.resampling_method = method;
		self
	}

	#[must_use]
	pub fn with_limited_to(mut self, coverage: Option<Coverage>) -> Self {
		self.limited_to = coverage;
		self
	}

	#[must_use]
	pub fn with_reprojection_margin_px(mut self, margin_px: u32) -> Self {
		self.reprojection_margin_px = margin_px;
		self
	}

	pub async fn get_map(&self, request: &MapRequest, dims: &DimensionValues) -> Result<Image> {
		let mut image = match &self.backend {
			Backend::Direct(source) => get_map_checked(source.as_ref(), request).await?,
			Backend::Cached { manager, bypass } => {
				if self.should_bypass(manager, bypass, request) {
					manager.compose_direct(request).await?
				} else {
					match self.get_map_tiled(manager, request, dims).await {
						Ok(image) => image,
						Err(err) if error_kind(&err) == Some(TileErrorKind::InvalidRequest) => Image::new(request.size.width, request.size.height, Mode::Rgba),
						Err(err) => return Err(err),
					}
				}
			}
		};

		if let Some(coverage) = &self.limited_to {
			coverage.clip(&mut image, &request.bbox, &request.srs)?;
		}
		Ok(image)
	}

	fn should_bypass(&self, manager: &TileManager, bypass: &DirectBypass, request: &MapRequest) -> bool {
		let resolution = request_resolution(&request.bbox, request.size);
		if let Some(from_res) = bypass.from_res {
			if resolution >= from_res {
				return true;
			}
		}
		if let Some(from_level) = bypass.from_level {
			if manager.grid().closest_level(resolution) >= from_level as usize {
				return true;
			}
		}
		false
	}

	async fn get_map_tiled(&self, manager: &TileManager, request: &MapRequest, dims: &DimensionValues) -> Result<Image> {
		let grid = manager.grid();
		let needs_reprojection = grid.srs() != request.srs;

		let grid_bbox = if needs_reprojection { transform_bbox(&request.srs, grid.srs(), &request.bbox)? } else { request.bbox };

		let margin_px = f64::from(self.reprojection_margin_px);
		let margin_x = grid_bbox.width() / f64::from(request.size.width.max(1)) * margin_px;
		let margin_y = grid_bbox.height() / f64::from(request.size.height.max(1)) * margin_px;
		let buffered = grid_bbox.buffered(margin_x, margin_y);

		let affected = grid.affected_tiles(&buffered, request.size)?;
		let tile_size = grid.tile_size();
		let nx = affected.x_range.len() as u32;
		let ny = affected.y_range.len() as u32;

		let coords: Vec<TileCoord> = affected.y_range.iter().flat_map(|y| affected.x_range.iter().map(move |x| TileCoord::new(affected.level, x, y))).collect();
		let tiles = manager.load_tiles(&coords, dims).await?;

		let mut canvas = Image::new(nx * tile_size.width, ny * tile_size.height, Mode::Rgba);
		for tile in &tiles {
			let Some(blob) = &tile.image else { continue };
			let decoded = format::decode(blob, manager.format())?;
			let col = (tile.coord.x - affected.x_range.min) as i64;
			let row = match grid.origin() {
				Origin::UpperLeft => tile.coord.y - affected.y_range.min,
				Origin::LowerLeft => (affected.y_range.max - 1) - tile.coord.y,
			};
			canvas.paste(&decoded, col * i64::from(tile_size.width), row * i64::from(tile_size.height));
		}

		let corner_a = grid.tile_bbox(affected.level, affected.x_range.min, affected.y_range.min);
		let corner_b = grid.tile_bbox(affected.level, affected.x_range.max - 1, affected.y_range.max - 1);
		let canvas_bbox = GroundBBox::from_corners(corner_a.x_min.min(corner_b.x_min), corner_a.y_min.min(corner_b.y_min), corner_a.x_max.max(corner_b.x_max), corner_a.y_max.max(corner_b.y_max));

		if !needs_reprojection {
			let resolution = affected.resolution;
			let crop_x = ((grid_bbox.x_min - canvas_bbox.x_min) / resolution).round() as i64;
			let crop_y = ((canvas_bbox.y_max - grid_bbox.y_max) / resolution).round() as i64;
			let crop_w = (grid_bbox.width() / resolution).round().max(1.0) as u32;
			let crop_h = (grid_bbox.height() / resolution).round().max(1.0) as u32;
			let cropped = canvas.crop(crop_x, crop_y, crop_w, crop_h)?;
			return cropped.resample(request.size.width, request.size.height, self.resampling_method);
		}

		let (out_w, out_h) = (request.size.width, request.size.height);
		let (canvas_w, canvas_h) = (f64::from(canvas.width()), f64::from(canvas.height()));
		let request_bbox = request.bbox;
		let request_srs = request.srs.clone();
		let grid_srs = grid.srs().to_string();
		let reprojected = canvas.reproject(out_w, out_h, self.resampling_method, move |x, y| {
			let gx = request_bbox.x_min + (f64::from(x) + 0.5) / f64::from(out_w) * request_bbox.width();
			let gy = request_bbox.y_max - (f64::from(y) + 0.5) / f64::from(out_h) * request_bbox.height();
			let (cx, cy) = transform_point(&request_srs, &grid_srs, gx, gy).ok()?;
			let sx = (cx - canvas_bbox.x_min) / canvas_bbox.width() * canvas_w;
			let sy = (canvas_bbox.y_max - cy) / canvas_bbox.height() * canvas_h;
			Some((sx, sy))
		});
		Ok(reprojected)
	}
}

fn request_resolution(bbox: &GroundBBox, size: Size) -> f64 {
	(bbox.width() / f64::from(size.width.max(1))).max(bbox.height() / f64::from(size.height.max(1)))
}
