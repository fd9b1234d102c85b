use std::collections::BTreeMap;
use std::time::SystemTime;
use tilecache_core::Blob;

/// Identifies a single tile within one cache's grid: level plus tile index.
/// Index ranges and sign follow [`tilecache_core::Grid`]'s own convention
/// for the grid's origin corner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileCoord {
	pub level: usize,
	pub x: i64,
	pub y: i64,
}

impl TileCoord {
	pub fn new(level: usize, x: i64, y: i64) -> Self {
		Self { level, x, y }
	}
}

/// The selected value for every dimension axis a cache is queried with
/// (spec §3, Dimension), ordered for deterministic storage keys.
pub type DimensionValues = BTreeMap<String, String>;

/// A tile coordinate together with whatever the backend knows about it.
/// `image` is `None` until a backend populates it on a cache hit.
#[derive(Debug, Clone)]
pub struct Tile {
	pub coord: TileCoord,
	pub dimensions: DimensionValues,
	pub image: Option<Blob>,
	pub timestamp: Option<SystemTime>,
}

impl Tile {
	pub fn new(coord: TileCoord) -> Self {
		Self { coord, dimensions: DimensionValues::new(), image: None, timestamp: None }
	}

	pub fn with_dimensions(mut self, dimensions: DimensionValues) -> Self {
		self.dimensions = dimensions;
		self
	}

	pub fn is_hit(&self) -> bool {
		self.image.is_some()
	}
}
