use crate::tile::{DimensionValues, TileCoord};
use anyhow::Result;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tilecache_core::Blob;

/// A stored tile's bytes plus the time it was written, as returned by a
/// [`Storage`] on a cache hit.
#[derive(Debug, Clone)]
pub struct StoredTile {
	pub blob: Blob,
	pub timestamp: SystemTime,
}

/// The storage contract every backend implements (spec §4.4): load/store/
/// remove single tiles or batches, iterate a level for cleanup/rebuild, and
/// expose the tile-lock directory every backend shares regardless of where
/// the tile bytes themselves live.
#[async_trait]
pub trait Storage: Send + Sync {
	async fn load_tile(&self, coord: TileCoord, dims: &DimensionValues) -> Result<Option<StoredTile>>;

	/// Bulk optimization point; the default just loops `load_tile`.
	async fn load_tiles(&self, coords: &[TileCoord], dims: &DimensionValues) -> Result<Vec<Option<StoredTile>>> {
		let mut out = Vec::with_capacity(coords.len());
		for coord in coords {
			out.push(self.load_tile(*coord, dims).await?);
		}
		Ok(out)
	}

	async fn store_tile(&self, coord: TileCoord, dims: &DimensionValues, blob: &Blob) -> Result<()>;

	async fn store_tiles(&self, tiles: &[(TileCoord, Blob)], dims: &DimensionValues) -> Result<()> {
		for (coord, blob) in tiles {
			self.store_tile(*coord, dims, blob).await?;
		}
		Ok(())
	}

	async fn remove_tile(&self, coord: TileCoord, dims: &DimensionValues) -> Result<()>;

	async fn remove_level(&self, level: usize) -> Result<()>;

	async fn is_cached(&self, coord: TileCoord, dims: &DimensionValues) -> Result<bool> {
		Ok(self.load_tile(coord, dims).await?.is_some())
	}

	/// A lazy sequence of tile coordinates stored at `level`, used by
	/// cleanup and rebuild sweeps.
	fn iterate_tiles(&self, level: usize) -> Result<Box<dyn Iterator<Item = TileCoord> + Send>>;

	/// The filesystem directory where meta-tile lock files for this backend
	/// should be created; always local even for remote backends (spec §5).
	fn lock_directory(&self) -> &Path;
}

pub(crate) fn dimension_suffix(dims: &DimensionValues) -> String {
	if dims.is_empty() {
		return String::new();
	}
	let mut parts: Vec<String> = dims.iter().map(|(k, v)| format!("{k}={v}")).collect();
	parts.sort();
	format!("@{}", parts.join(","))
}

pub(crate) fn default_lock_dir(base: &Path) -> PathBuf {
	base.join(".locks")
}
