mod origin;

pub use origin::Origin;

use crate::error::{TileErrorKind, tile_error};
use crate::geometry_basic::{GroundBBox, IndexRange, Size};
use anyhow::{Result, ensure};
use tilecache_derive::context;

/// The tile level and index ranges a query resolves to, as returned by
/// [`Grid::affected_tiles`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AffectedTiles {
	pub level: usize,
	pub x_range: IndexRange,
	pub y_range: IndexRange,
	/// The resolution actually in effect at `level` (ground units/pixel).
	pub resolution: f64,
}

/// A discrete tile pyramid: SRS, resolutions, origin, tile pixel size and
/// the tile↔bbox math built on top of them.
///
/// `Grid` is an immutable value; all mutating-looking operations return new
/// values or plain computed results.
#[derive(Debug, Clone, PartialEq)]
pub struct Grid {
	srs: String,
	/// Ground units per pixel, strictly decreasing; index == level.
	resolutions: Vec<f64>,
	tile_size: Size,
	origin: Origin,
	bbox: GroundBBox,
	/// Explicit level-transition resolutions. When non-empty, has
	/// `resolutions.len() - 1` entries, each the boundary between
	/// consecutive levels, also strictly decreasing.
	threshold_res: Vec<f64>,
	stretch_factor: f64,
	max_shrink_factor: f64,
}

impl Grid {
	#[context("building grid for srs {srs}")]
	#[allow(clippy::too_many_arguments)]
	pub fn new(
		srs: impl Into<String>,
		resolutions: Vec<f64>,
		tile_size: Size,
		origin: Origin,
		bbox: GroundBBox,
		threshold_res: Vec<f64>,
		stretch_factor: f64,
		max_shrink_factor: f64,
	) -> Result<Self> {
		let srs = srs.into();
		ensure!(!resolutions.is_empty(), "a grid needs at least one resolution level");
		ensure!(
			resolutions.windows(2).all(|w| w[0] > w[1]),
			"resolutions must be strictly decreasing, got {resolutions:?}"
		);
		ensure!(resolutions.iter().all(|r| r.is_finite() && *r > 0.0), "resolutions must be finite and positive");
		ensure!(tile_size.width > 0 && tile_size.height > 0, "tile size must be positive");
		ensure!(stretch_factor >= 1.0, "stretch_factor must be >= 1.0, got {stretch_factor}");
		ensure!(max_shrink_factor >= 1.0, "max_shrink_factor must be >= 1.0, got {max_shrink_factor}");
		if !threshold_res.is_empty() {
			ensure!(
				threshold_res.len() == resolutions.len() - 1,
				"threshold_res must have exactly resolutions.len() - 1 entries, got {} for {} levels",
				threshold_res.len(),
				resolutions.len()
			);
			ensure!(
				threshold_res.windows(2).all(|w| w[0] > w[1]),
				"threshold_res must be strictly decreasing, got {threshold_res:?}"
			);
		}

		Ok(Self {
			srs,
			resolutions,
			tile_size,
			origin,
			bbox,
			threshold_res,
			stretch_factor,
			max_shrink_factor,
		})
	}

	pub fn srs(&self) -> &str {
		&self.srs
	}

	pub fn bbox(&self) -> GroundBBox {
		self.bbox
	}

	pub fn origin(&self) -> Origin {
		self.origin
	}

	pub fn tile_size(&self) -> Size {
		self.tile_size
	}

	pub fn resolutions(&self) -> &[f64] {
		&self.resolutions
	}

	pub fn num_levels(&self) -> usize {
		self.resolutions.len()
	}

	pub fn resolution(&self, level: usize) -> Option<f64> {
		self.resolutions.get(level).copied()
	}

	/// Deterministic tile↔bbox mapping for `(level, x, y)`. Does not check
	/// that `x`/`y` fall within the grid's own bbox — callers that need
	/// that guarantee should intersect against [`Grid::bbox`] themselves.
	pub fn tile_bbox(&self, level: usize, x: i64, y: i64) -> GroundBBox {
		let res = self.resolutions[level];
		let tile_w = res * f64::from(self.tile_size.width);
		let tile_h = res * f64::from(self.tile_size.height);
		let x_min = self.bbox.x_min + x as f64 * tile_w;
		let x_max = x_min + tile_w;
		let (y_min, y_max) = match self.origin {
			Origin::LowerLeft => {
				let y_min = self.bbox.y_min + y as f64 * tile_h;
				(y_min, y_min + tile_h)
			}
			Origin::UpperLeft => {
				let y_max = self.bbox.y_max - y as f64 * tile_h;
				(y_max - tile_h, y_max)
			}
		};
		GroundBBox { x_min, y_min, x_max, y_max }
	}

	/// The level whose resolution is nearest `resolution` on a logarithmic
	/// scale, ignoring the stretch/shrink envelope entirely.
	pub fn closest_level(&self, resolution: f64) -> usize {
		self.resolutions
			.iter()
			.enumerate()
			.min_by(|(_, a), (_, b)| {
				let da = (resolution.ln() - a.ln()).abs();
				let db = (resolution.ln() - b.ln()).abs();
				da.total_cmp(&db)
			})
			.map(|(i, _)| i)
			.expect("Grid::new guarantees resolutions is non-empty")
	}

	fn level_from_thresholds(&self, target_res: f64) -> Option<usize> {
		if self.threshold_res.is_empty() {
			return None;
		}
		for (i, &t) in self.threshold_res.iter().enumerate() {
			if target_res >= t {
				return Some(i);
			}
		}
		Some(self.resolutions.len() - 1)
	}

	/// Picks the level for a requested resolution, honoring `threshold_res`
	/// when set and otherwise the nearest level subject to the
	/// stretch/shrink envelope (`max_shrink_factor` only at level 0, and
	/// only when the request is coarser than that level provides).
	fn level_for_resolution(&self, target_res: f64) -> Result<usize> {
		let level = self.level_from_thresholds(target_res).unwrap_or_else(|| self.closest_level(target_res));
		let res = self.resolutions[level];
		let ratio = if target_res >= res { target_res / res } else { res / target_res };
		let limit = if level == 0 && target_res > res { self.max_shrink_factor } else { self.stretch_factor };
		if ratio > limit {
			return Err(tile_error(
				TileErrorKind::InvalidRequest,
				format!("no grid level satisfies stretch/shrink limits for resolution {target_res}"),
			));
		}
		Ok(level)
	}

	/// Chooses the cache level and tile index ranges covering `bbox` at
	/// `size`, per the algorithm in [`Grid::level_for_resolution`].
	///
	/// Returns an `InvalidRequest` error when `bbox` is entirely outside the
	/// grid bbox, or when no level satisfies the stretch/shrink limits;
	/// callers map that to a blank response, not a service error.
	pub fn affected_tiles(&self, bbox: &GroundBBox, size: Size) -> Result<AffectedTiles> {
		if !self.bbox.intersects(bbox) {
			log::debug!("request bbox {bbox:?} does not intersect grid bbox {:?} for srs {}", self.bbox, self.srs);
			return Err(tile_error(TileErrorKind::InvalidRequest, "request bbox is entirely outside the grid bounds"));
		}
		let target_res =
			(bbox.width() / f64::from(size.width.max(1))).max(bbox.height() / f64::from(size.height.max(1)));
		let level = self.level_for_resolution(target_res)?;
		let resolution = self.resolutions[level];
		let tile_w = resolution * f64::from(self.tile_size.width);
		let tile_h = resolution * f64::from(self.tile_size.height);

		let x0 = ((bbox.x_min - self.bbox.x_min) / tile_w).floor() as i64;
		let x1 = (((bbox.x_max - self.bbox.x_min) / tile_w).ceil() as i64).max(x0 + 1);

		let (y0, y1) = match self.origin {
			Origin::LowerLeft => {
				let y0 = ((bbox.y_min - self.bbox.y_min) / tile_h).floor() as i64;
				let y1 = (((bbox.y_max - self.bbox.y_min) / tile_h).ceil() as i64).max(y0 + 1);
				(y0, y1)
			}
			Origin::UpperLeft => {
				let y0 = ((self.bbox.y_max - bbox.y_max) / tile_h).floor() as i64;
				let y1 = (((self.bbox.y_max - bbox.y_min) / tile_h).ceil() as i64).max(y0 + 1);
				(y0, y1)
			}
		};

		Ok(AffectedTiles {
			level,
			x_range: IndexRange::new(x0, x1),
			y_range: IndexRange::new(y0, y1),
			resolution,
		})
	}

	/// True iff every tile of `self` coincides exactly with a tile of
	/// `other`: same SRS and origin, tile sizes match, `self`'s resolutions
	/// are a subset of `other`'s (exact float match), and `self`'s bbox
	/// origin aligns with `other`'s tile grid at the corresponding level.
	pub fn is_subset(&self, other: &Grid) -> bool {
		if self.srs != other.srs || self.origin != other.origin || self.tile_size != other.tile_size {
			return false;
		}
		self.resolutions.iter().all(|res| match other.resolutions.iter().position(|o| close(*o, *res)) {
			Some(other_level) => self.aligned_at(other, other_level),
			None => false,
		})
	}

	fn aligned_at(&self, other: &Grid, other_level: usize) -> bool {
		let res = other.resolutions[other_level];
		let tile_w = res * f64::from(other.tile_size.width);
		let tile_h = res * f64::from(other.tile_size.height);
		let dx = (self.bbox.x_min - other.bbox.x_min) / tile_w;
		let dy = match self.origin {
			Origin::UpperLeft => (other.bbox.y_max - self.bbox.y_max) / tile_h,
			Origin::LowerLeft => (self.bbox.y_min - other.bbox.y_min) / tile_h,
		};
		is_close_to_integer(dx) && is_close_to_integer(dy)
	}
}

fn close(a: f64, b: f64) -> bool {
	(a - b).abs() < 1e-9 * a.abs().max(b.abs()).max(1.0)
}

fn is_close_to_integer(v: f64) -> bool {
	(v - v.round()).abs() < 1e-6
}

#[cfg(test)]
mod tests {
	use super::*;
	use pretty_assertions::assert_eq;

	fn webmercator_bbox() -> GroundBBox {
		let r = 20_037_508.342_789_244;
		GroundBBox::new(-r, -r, r, r).unwrap()
	}

	fn webmercator_grid(num_levels: usize) -> Grid {
		let resolutions: Vec<f64> = (0..num_levels).map(|z| 156_543.033_928_041 / 2f64.powi(z as i32)).collect();
		Grid::new(
			"EPSG:3857",
			resolutions,
			Size::new(256, 256),
			Origin::UpperLeft,
			webmercator_bbox(),
			vec![],
			1.1,
			4.0,
		)
		.unwrap()
	}

	#[test]
	fn rejects_non_monotone_resolutions() {
		let err = Grid::new(
			"EPSG:3857",
			vec![10.0, 20.0],
			Size::new(256, 256),
			Origin::UpperLeft,
			webmercator_bbox(),
			vec![],
			1.1,
			4.0,
		)
		.unwrap_err();
		assert!(err.to_string().contains("srs EPSG:3857"));
	}

	#[test]
	fn tile_bbox_round_trips_through_affected_tiles() {
		let grid = webmercator_grid(6);
		for level in 0..grid.num_levels() {
			let bbox = grid.tile_bbox(level, 2, 3);
			let affected = grid.affected_tiles(&bbox, grid.tile_size()).unwrap();
			assert_eq!(affected.level, level);
			assert_eq!(affected.x_range, IndexRange::new(2, 3));
			assert_eq!(affected.y_range, IndexRange::new(3, 4));
		}
	}

	#[test]
	fn upper_left_origin_tile_zero_is_top_left() {
		let grid = webmercator_grid(1);
		let bbox = grid.tile_bbox(0, 0, 0);
		assert_eq!(bbox.y_max, grid.bbox().y_max);
		assert_eq!(bbox.x_min, grid.bbox().x_min);
	}

	#[test]
	fn lower_left_origin_tile_zero_is_bottom_left() {
		let grid = Grid::new(
			"EPSG:3857",
			vec![100.0, 50.0],
			Size::new(256, 256),
			Origin::LowerLeft,
			GroundBBox::new(0.0, 0.0, 25_600.0, 25_600.0).unwrap(),
			vec![],
			1.1,
			4.0,
		)
		.unwrap();
		let bbox = grid.tile_bbox(0, 0, 0);
		assert_eq!(bbox.y_min, 0.0);
		assert_eq!(bbox.y_max, 25_600.0);
	}

	#[test]
	fn affected_tiles_rejects_bbox_outside_grid() {
		let grid = webmercator_grid(3);
		let far_away = GroundBBox::new(1e9, 1e9, 1.1e9, 1.1e9).unwrap();
		let err = grid.affected_tiles(&far_away, Size::new(256, 256)).unwrap_err();
		assert_eq!(crate::error::error_kind(&err), Some(TileErrorKind::InvalidRequest));
	}

	#[test]
	fn affected_tiles_rejects_resolution_outside_stretch_envelope() {
		let grid = webmercator_grid(2);
		// request a resolution far finer than level 1 can provide and far
		// coarser than level 0's shrink envelope allows
		let tiny = GroundBBox::new(0.0, 0.0, 1.0, 1.0).unwrap();
		let err = grid.affected_tiles(&tiny, Size::new(1, 1)).unwrap_err();
		assert_eq!(crate::error::error_kind(&err), Some(TileErrorKind::InvalidRequest));
	}

	#[test]
	fn is_subset_true_for_identical_grid() {
		let grid = webmercator_grid(4);
		assert!(grid.is_subset(&grid));
	}

	#[test]
	fn is_subset_false_for_mismatched_origin() {
		let a = webmercator_grid(4);
		let b = Grid::new(
			"EPSG:3857",
			a.resolutions().to_vec(),
			a.tile_size(),
			Origin::LowerLeft,
			a.bbox(),
			vec![],
			1.1,
			4.0,
		)
		.unwrap();
		assert!(!a.is_subset(&b));
	}

	#[test]
	fn is_subset_true_for_coarser_subpyramid() {
		let full = webmercator_grid(6);
		let coarse = Grid::new(
			"EPSG:3857",
			full.resolutions()[0..3].to_vec(),
			full.tile_size(),
			full.origin(),
			full.bbox(),
			vec![],
			1.1,
			4.0,
		)
		.unwrap();
		assert!(coarse.is_subset(&full));
	}
}
