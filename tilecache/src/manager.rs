//! Per-cache meta-tile orchestration (spec §4.6, §5): groups a requested
//! tile batch by meta-tile, regenerates whichever meta-tiles are missing
//! or stale (one upstream request per meta-tile, composited bottom-to-top
//! over all of the cache's sources, then split and encoded per tile), and
//! reads the rest straight from storage.

use anyhow::{Context, Result};
use futures::future::try_join_all;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::SystemTime;
use tilecache_core::error::{TileErrorKind, tile_error};
use tilecache_core::grid::{Grid, Origin};
use tilecache_core::{RefreshPolicy, Size};
use tilecache_image::format::{self, ImageFormat};
use tilecache_image::{Image, Mode};
use tilecache_source::{ErrorResponse, MapRequest, OnErrorFallback, Source, get_map_checked};
use tilecache_storage::{DimensionValues, LockManager, Storage, StoredTile, Tile, TileCoord};

/// A source feeding one cache, composited bottom-to-top over the others
/// (spec §3, Cache.sources). Coverage/opacity per source are not modeled
/// here: this engine treats `coverage` as resolved by the builder into the
/// source itself, and per-layer opacity is a dispatcher-level concern
/// (spec §4.8), not a per-source one.
pub struct SourceEntry {
	pub source: Arc<dyn Source>,
}

/// A resolved watermark: text, rendering parameters and the loaded font
/// (spec §6 `watermark`). Built once at startup since font bytes are not
/// cheap to reparse per tile.
pub struct WatermarkSpec {
	pub text: String,
	pub font_size: f32,
	pub color: [u8; 3],
	pub opacity: f32,
	pub spacing_x: u32,
	pub spacing_y: u32,
	pub wide: bool,
	pub font: Arc<ab_glyph::FontArc>,
}

/// Produces and stores meta-tiles for one cache, and serves requested
/// tile batches by reading storage after regenerating whatever is stale.
pub struct TileManager {
	grid: Grid,
	sources: Vec<SourceEntry>,
	storage: Arc<dyn Storage>,
	locks: LockManager,
	meta_size: (u32, u32),
	meta_buffer: u32,
	bulk_meta_tiles: bool,
	disable_storage: bool,
	minimize_meta_requests: bool,
	format: ImageFormat,
	watermark: Option<WatermarkSpec>,
	refresh: RefreshPolicy,
	creator_semaphore: Arc<tokio::sync::Semaphore>,
}

impl TileManager {
	pub fn new(grid: Grid, sources: Vec<SourceEntry>, storage: Arc<dyn Storage>) -> Self {
		let locks = LockManager::new(storage.lock_directory());
		Self {
			grid,
			sources,
			storage,
			locks,
			meta_size: (4, 4),
			meta_buffer: 0,
			bulk_meta_tiles: false,
			disable_storage: false,
			minimize_meta_requests: false,
			format: ImageFormat::Png,
			watermark: None,
			refresh: RefreshPolicy::Never,
			creator_semaphore: Arc::new(tokio::sync::Semaphore::new(4)),
		}
	}

	#[must_use]
	pub fn with_meta_size(mut self, meta_size: (u32, u32)) -> Self {
		self.meta_size = meta_size;
		self
	}

	#[must_use]
	pub fn with_meta_buffer(mut self, meta_buffer: u32) -> Self {
		self.meta_buffer = meta_buffer;
		self
	}

	#[must_use]
	pub fn with_bulk_meta_tiles(mut self, bulk_meta_tiles: bool) -> Self {
		self.bulk_meta_tiles = bulk_meta_tiles;
		self
	}

	#[must_use]
	pub fn with_disable_storage(mut self, disable_storage: bool) -> Self {
		self.disable_storage = disable_storage;
		self
	}

	#[must_use]
	pub fn with_minimize_meta_requests(mut self, minimize_meta_requests: bool) -> Self {
		self.minimize_meta_requests = minimize_meta_requests;
		self
	}

	#[must_use]
	pub fn with_format(mut self, format: ImageFormat) -> Self {
		self.format = format;
		self
	}

	#[must_use]
	pub fn with_watermark(mut self, watermark: Option<WatermarkSpec>) -> Self {
		self.watermark = watermark;
		self
	}

	#[must_use]
	pub fn with_refresh(mut self, refresh: RefreshPolicy) -> Self {
		self.refresh = refresh;
		self
	}

	#[must_use]
	pub fn with_concurrent_tile_creators(mut self, count: usize) -> Self {
		self.creator_semaphore = Arc::new(tokio::sync::Semaphore::new(count.max(1)));
		self
	}

	pub fn grid(&self) -> &Grid {
		&self.grid
	}

	pub fn format(&self) -> ImageFormat {
		self.format
	}

	/// Ensures every requested tile is fresh in storage, then reads them
	/// all back. Coordinates are grouped by the meta-tile block they
	/// belong to, and each stale block is regenerated once regardless of
	/// how many of its members were actually requested.
	pub async fn load_tiles(&self, coords: &[TileCoord], dims: &DimensionValues) -> Result<Vec<Tile>> {
		let mut groups: HashMap<(usize, i64, i64), Vec<TileCoord>> = HashMap::new();
		for &coord in coords {
			let (mx, my) = (i64::from(self.meta_size.0), i64::from(self.meta_size.1));
			let key = (coord.level, coord.x.div_euclid(mx), coord.y.div_euclid(my));
			groups.entry(key).or_default().push(coord);
		}

		let ensures = groups.iter().map(|(&(level, meta_x, meta_y), requested)| self.ensure_meta_tile(level, meta_x, meta_y, requested, dims));
		try_join_all(ensures).await?;

		let stored = self.storage.load_tiles(coords, dims).await?;
		Ok(coords
			.iter()
			.zip(stored)
			.map(|(&coord, stored)| {
				let mut tile = Tile::new(coord).with_dimensions(dims.clone());
				if let Some(StoredTile { blob, timestamp }) = stored {
					tile.image = Some(blob);
					tile.timestamp = Some(timestamp);
				}
				tile
			})
			.collect())
	}

	/// Renders the given request directly against this cache's sources,
	/// bypassing meta-tiling and storage entirely (spec §9
	/// `use_direct_from_level`/`use_direct_from_res`).
	pub async fn compose_direct(&self, request: &MapRequest) -> Result<Image> {
		self.composite(request).await
	}

	/// Regenerates the meta-tile containing `requested`. When
	/// `minimize_meta_requests` is set and `requested` is a strict subset of
	/// the meta-tile's members, only the bounding area of `requested` is
	/// fetched from the sources instead of the whole meta-tile block, trading
	/// away the batching benefit for adjacent tiles in exchange for a smaller
	/// upstream request (spec §6 `minimize_meta_requests`).
	async fn ensure_meta_tile(&self, level: usize, meta_x: i64, meta_y: i64, requested: &[TileCoord], dims: &DimensionValues) -> Result<()> {
		let members = self.meta_tile_members(level, meta_x, meta_y);

		if !self.disable_storage && self.is_fresh(&members, dims).await? {
			return Ok(());
		}

		let _permit = self.creator_semaphore.acquire().await.context("creator semaphore closed")?;
		let _lock = self.locks.acquire(&format!("{level}-{meta_x}-{meta_y}")).await?;

		if !self.disable_storage && self.is_fresh(&members, dims).await? {
			return Ok(());
		}

		let tile_size = self.grid.tile_size();
		let (origin_x, origin_y, block_w, block_h) = if self.minimize_meta_requests && requested.len() < members.len() {
			let min_x = requested.iter().map(|c| c.x).min().unwrap();
			let max_x = requested.iter().map(|c| c.x).max().unwrap();
			let min_y = requested.iter().map(|c| c.y).min().unwrap();
			let max_y = requested.iter().map(|c| c.y).max().unwrap();
			(min_x, min_y, u32::try_from(max_x - min_x + 1).unwrap_or(1), u32::try_from(max_y - min_y + 1).unwrap_or(1))
		} else {
			let (mx, my) = self.meta_size;
			(meta_x * i64::from(mx), meta_y * i64::from(my), mx, my)
		};

		let corner_a = self.grid.tile_bbox(level, origin_x, origin_y);
		let corner_b = self.grid.tile_bbox(level, origin_x + i64::from(block_w) - 1, origin_y + i64::from(block_h) - 1);
		let block_bbox =
			tilecache_core::GroundBBox::from_corners(corner_a.x_min.min(corner_b.x_min), corner_a.y_min.min(corner_b.y_min), corner_a.x_max.max(corner_b.x_max), corner_a.y_max.max(corner_b.y_max));

		let resolution = self.grid.resolution(level).unwrap_or(corner_a.width() / f64::from(tile_size.width));
		let buffer_ground = f64::from(self.meta_buffer) * resolution;
		let request_bbox = block_bbox.buffered(buffer_ground, buffer_ground);
		let pixel_width = block_w * tile_size.width + 2 * self.meta_buffer;
		let pixel_height = block_h * tile_size.height + 2 * self.meta_buffer;

		let request = MapRequest { bbox: request_bbox, size: Size::new(pixel_width, pixel_height), srs: self.grid.srs().to_string(), format: None, dims: dims.clone() };
		let mut composed = match self.composite(&request).await {
			Ok(image) => image,
			Err(err) => {
				let Some(fallback) = err.chain().find_map(|cause| cause.downcast_ref::<OnErrorFallback>()) else {
					return Err(err);
				};
				let ErrorResponse { color, cache, authorize_stale } = fallback.0.clone();
				if authorize_stale {
					// Leave whatever is already in storage (fresh or not) untouched.
					return Ok(());
				}
				if !cache {
					// Don't persist the fallback; this request itself reads back as a miss.
					return Ok(());
				}
				let mut image = Image::new(pixel_width, pixel_height, Mode::Rgba);
				if let Some(color) = color {
					for pixel in image.buffer_mut().pixels_mut() {
						*pixel = imageproc::image::Rgba(color);
					}
				}
				image
			}
		};

		if let Some(watermark) = &self.watermark {
			composed.watermark(&watermark.text, watermark.font_size, watermark.color, watermark.opacity, watermark.spacing_x, watermark.spacing_y, watermark.wide, &watermark.font);
		}

		let pieces = composed.split_into_tiles(tile_size.width, tile_size.height, block_w, block_h, self.meta_buffer);
		let mut encoded = Vec::with_capacity((block_w * block_h) as usize);
		for (ty, row) in pieces.iter().enumerate() {
			for (tx, image) in row.iter().enumerate() {
				let coord = self.block_tile_coord(level, origin_x, origin_y, i64::from(block_h), tx as u32, ty as u32);
				let (blob, _) = format::encode(image, self.format)?;
				encoded.push((coord, blob));
			}
		}

		if !self.disable_storage {
			self.storage.store_tiles(&encoded, dims).await?;
		}

		Ok(())
	}

	fn meta_tile_members(&self, level: usize, meta_x: i64, meta_y: i64) -> Vec<TileCoord> {
		let (mx, my) = (i64::from(self.meta_size.0), i64::from(self.meta_size.1));
		let mut members = Vec::with_capacity((mx * my) as usize);
		for ty in 0..my {
			for tx in 0..mx {
				members.push(TileCoord::new(level, meta_x * mx + tx, meta_y * my + ty));
			}
		}
		members
	}

	/// Maps a piece's position in a composed block (`tx` across, `ty` down,
	/// both image-space row order, `block_height` tiles tall) back to its
	/// tile coordinate, given the block's origin tile. For an
	/// [`Origin::UpperLeft`] grid, tile `y` increases in the same direction
	/// as image rows, so `ty` maps straight through. For [`Origin::LowerLeft`]
	/// (TMS), tile `y` increases upward while image rows increase downward,
	/// so the block's row order is reversed.
	fn block_tile_coord(&self, level: usize, origin_x: i64, origin_y: i64, block_height: i64, tx: u32, ty: u32) -> TileCoord {
		let x = origin_x + i64::from(tx);
		let y = match self.grid.origin() {
			Origin::UpperLeft => origin_y + i64::from(ty),
			Origin::LowerLeft => origin_y + (block_height - 1 - i64::from(ty)),
		};
		TileCoord::new(level, x, y)
	}

	async fn is_fresh(&self, members: &[TileCoord], dims: &DimensionValues) -> Result<bool> {
		let stored = self.storage.load_tiles(members, dims).await?;
		Ok(stored.into_iter().all(|tile| match tile {
			Some(StoredTile { timestamp, .. }) => !self.refresh.is_stale(timestamp),
			None => false,
		}))
	}

	async fn composite(&self, request: &MapRequest) -> Result<Image> {
		if self.sources.is_empty() {
			return Err(tile_error(TileErrorKind::ConfigurationInvariantViolated, "cache has no sources configured"));
		}
		let mut layers = Vec::with_capacity(self.sources.len());
		for entry in &self.sources {
			let image = get_map_checked(entry.source.as_ref(), request).await?;
			layers.push((image, 1.0_f32));
		}
		Image::merge(&layers)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use async_trait::async_trait;
	use std::sync::atomic::{AtomicUsize, Ordering};
	use tilecache_core::GroundBBox;
	use tilecache_storage::backends::FilesystemStorage;
	use tilecache_storage::DirectoryLayout;

	struct CountingSource {
		calls: AtomicUsize,
		color: [u8; 4],
	}

	#[async_trait]
	impl Source for CountingSource {
		async fn get_map(&self, request: &MapRequest) -> Result<Image> {
			self.calls.fetch_add(1, Ordering::SeqCst);
			let mut image = Image::new(request.size.width, request.size.height, Mode::Rgba);
			for pixel in image.buffer_mut().pixels_mut() {
				*pixel = imageproc::image::Rgba(self.color);
			}
			Ok(image)
		}
	}

	fn webmercator_grid() -> Grid {
		let bbox = GroundBBox::new(-20_037_508.34, -20_037_508.34, 20_037_508.34, 20_037_508.34).unwrap();
		Grid::new("EPSG:3857", vec![156_543.033_928, 78_271.516_964], Size::new(256, 256), Origin::UpperLeft, bbox, vec![], 1.15, 4.0).unwrap()
	}

	#[tokio::test]
	async fn generates_once_then_serves_from_storage() {
		let dir = tempfile::tempdir().unwrap();
		let storage = Arc::new(FilesystemStorage::new(dir.path(), DirectoryLayout::Tms, "png"));
		let source = Arc::new(CountingSource { calls: AtomicUsize::new(0), color: [10, 20, 30, 255] });
		let manager = TileManager::new(webmercator_grid(), vec![SourceEntry { source: source.clone() }], storage).with_meta_size((2, 2));

		let coords = vec![TileCoord::new(0, 0, 0)];
		let dims = DimensionValues::new();
		let first = manager.load_tiles(&coords, &dims).await.unwrap();
		assert!(first[0].is_hit());
		assert_eq!(source.calls.load(Ordering::SeqCst), 1);

		let second = manager.load_tiles(&coords, &dims).await.unwrap();
		assert!(second[0].is_hit());
		assert_eq!(source.calls.load(Ordering::SeqCst), 1, "second request must be served from storage, not regenerated");
	}

	#[tokio::test]
	async fn sibling_members_of_a_meta_tile_are_all_populated() {
		let dir = tempfile::tempdir().unwrap();
		let storage = Arc::new(FilesystemStorage::new(dir.path(), DirectoryLayout::Tms, "png"));
		let source = Arc::new(CountingSource { calls: AtomicUsize::new(0), color: [1, 2, 3, 255] });
		let manager = TileManager::new(webmercator_grid(), vec![SourceEntry { source }], storage.clone()).with_meta_size((2, 2));

		manager.load_tiles(&[TileCoord::new(0, 0, 0)], &DimensionValues::new()).await.unwrap();

		let sibling = storage.load_tile(TileCoord::new(0, 1, 1), &DimensionValues::new()).await.unwrap();
		assert!(sibling.is_some(), "requesting one tile must populate its whole meta-tile block");
	}

	struct BoundedSource {
		calls: AtomicUsize,
		bounds: (f64, f64),
	}

	#[async_trait]
	impl Source for BoundedSource {
		async fn get_map(&self, request: &MapRequest) -> Result<Image> {
			self.calls.fetch_add(1, Ordering::SeqCst);
			Ok(Image::new(request.size.width, request.size.height, Mode::Rgba))
		}

		fn resolution_bounds(&self) -> (f64, f64) {
			self.bounds
		}
	}

	#[tokio::test]
	async fn composite_skips_a_source_outside_its_resolution_bounds() {
		let dir = tempfile::tempdir().unwrap();
		let storage = Arc::new(FilesystemStorage::new(dir.path(), DirectoryLayout::Tms, "png"));
		let source = Arc::new(BoundedSource { calls: AtomicUsize::new(0), bounds: (0.0, 1.0) });
		let manager = TileManager::new(webmercator_grid(), vec![SourceEntry { source: source.clone() }], storage);

		let request =
			MapRequest { bbox: GroundBBox::new(0.0, 0.0, 256_000.0, 256_000.0).unwrap(), size: Size::new(256, 256), srs: "EPSG:3857".into(), format: None, dims: Default::default() };
		let image = manager.compose_direct(&request).await.unwrap();

		assert_eq!(source.calls.load(Ordering::SeqCst), 0, "a request whose resolution falls outside the source's bounds must not reach it");
		assert!(image.buffer().pixels().all(|p| p.0[3] == 0), "a skipped source must contribute a transparent layer");
	}

	#[tokio::test]
	async fn composite_skips_a_source_outside_its_coverage() {
		let dir = tempfile::tempdir().unwrap();
		let storage = Arc::new(FilesystemStorage::new(dir.path(), DirectoryLayout::Tms, "png"));
		let covered_bbox = GroundBBox::new(1_000_000.0, 1_000_000.0, 1_001_000.0, 1_001_000.0).unwrap();
		let source =
			Arc::new(tilecache_source::TileSource { coverage: Some(tilecache_geometry::Coverage::bbox("EPSG:3857", covered_bbox)), ..tilecache_source::TileSource::new("https://tiles.example/{z}/{x}/{y}.png") });
		let manager = TileManager::new(webmercator_grid(), vec![SourceEntry { source }], storage);

		let request = MapRequest { bbox: GroundBBox::new(0.0, 0.0, 256.0, 256.0).unwrap(), size: Size::new(256, 256), srs: "EPSG:3857".into(), format: None, dims: Default::default() };
		let image = manager.compose_direct(&request).await.unwrap();

		assert!(image.buffer().pixels().all(|p| p.0[3] == 0), "a request outside the source's coverage must contribute a transparent layer, not hit the network");
	}

	struct SizeRecordingSource {
		calls: AtomicUsize,
		last_size: std::sync::Mutex<Option<Size>>,
	}

	#[async_trait]
	impl Source for SizeRecordingSource {
		async fn get_map(&self, request: &MapRequest) -> Result<Image> {
			self.calls.fetch_add(1, Ordering::SeqCst);
			*self.last_size.lock().unwrap() = Some(request.size);
			Ok(Image::new(request.size.width, request.size.height, Mode::Rgba))
		}
	}

	#[tokio::test]
	async fn minimize_meta_requests_shrinks_the_upstream_request_to_the_requested_tile() {
		let dir = tempfile::tempdir().unwrap();
		let storage = Arc::new(FilesystemStorage::new(dir.path(), DirectoryLayout::Tms, "png"));
		let source = Arc::new(SizeRecordingSource { calls: AtomicUsize::new(0), last_size: std::sync::Mutex::new(None) });
		let manager =
			TileManager::new(webmercator_grid(), vec![SourceEntry { source: source.clone() }], storage.clone()).with_meta_size((2, 2)).with_minimize_meta_requests(true);

		manager.load_tiles(&[TileCoord::new(0, 0, 0)], &DimensionValues::new()).await.unwrap();

		let size = source.last_size.lock().unwrap().unwrap();
		assert_eq!(size, Size::new(256, 256), "a single requested tile should not pull in the full 2x2 meta-tile block");

		let sibling = storage.load_tile(TileCoord::new(0, 1, 1), &DimensionValues::new()).await.unwrap();
		assert!(sibling.is_none(), "minimized requests must not populate siblings outside the requested area");
	}

	struct FailingSource {
		response: ErrorResponse,
	}

	#[async_trait]
	impl Source for FailingSource {
		async fn get_map(&self, _request: &MapRequest) -> Result<Image> {
			Err(tilecache_source::fallback_error(self.response.clone()))
		}
	}

	#[tokio::test]
	async fn on_error_authorize_stale_keeps_previously_stored_bytes() {
		let dir = tempfile::tempdir().unwrap();
		let storage = Arc::new(FilesystemStorage::new(dir.path(), DirectoryLayout::Tms, "png"));
		let good = Arc::new(CountingSource { calls: AtomicUsize::new(0), color: [9, 9, 9, 255] });
		let manager = TileManager::new(webmercator_grid(), vec![SourceEntry { source: good }], storage.clone()).with_meta_size((1, 1));
		manager.load_tiles(&[TileCoord::new(0, 0, 0)], &DimensionValues::new()).await.unwrap();
		let original = storage.load_tile(TileCoord::new(0, 0, 0), &DimensionValues::new()).await.unwrap().unwrap();

		let failing = Arc::new(FailingSource { response: ErrorResponse { color: None, cache: true, authorize_stale: true } });
		let manager = TileManager::new(webmercator_grid(), vec![SourceEntry { source: failing }], storage.clone())
			.with_meta_size((1, 1))
			.with_refresh(RefreshPolicy::Absolute(SystemTime::now()));
		manager.load_tiles(&[TileCoord::new(0, 0, 0)], &DimensionValues::new()).await.unwrap();

		let after = storage.load_tile(TileCoord::new(0, 0, 0), &DimensionValues::new()).await.unwrap().unwrap();
		assert_eq!(after.blob, original.blob, "authorize_stale must serve previously stored bytes rather than regenerate");
	}

	#[tokio::test]
	async fn on_error_fallback_without_cache_is_not_persisted() {
		let dir = tempfile::tempdir().unwrap();
		let storage = Arc::new(FilesystemStorage::new(dir.path(), DirectoryLayout::Tms, "png"));
		let failing = Arc::new(FailingSource { response: ErrorResponse { color: Some([255, 0, 0, 255]), cache: false, authorize_stale: false } });
		let manager = TileManager::new(webmercator_grid(), vec![SourceEntry { source: failing }], storage.clone()).with_meta_size((1, 1));

		manager.load_tiles(&[TileCoord::new(0, 0, 0)], &DimensionValues::new()).await.unwrap();

		let stored = storage.load_tile(TileCoord::new(0, 0, 0), &DimensionValues::new()).await.unwrap();
		assert!(stored.is_none(), "an uncached on_error fallback must not be written to storage");
	}
}
