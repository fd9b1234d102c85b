//! One file per tile under a configurable directory layout, with optional
//! single-color tile deduplication via symlinks (spec §4.4, §4.6 step 3f).

use crate::layout::DirectoryLayout;
use crate::storage::{StoredTile, dimension_suffix};
use crate::tile::{DimensionValues, TileCoord};
use crate::{Storage, storage::default_lock_dir};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tilecache_core::Blob;
use tilecache_derive::context;

/// Filesystem tile store. `link_single_color_images`, when enabled, stores
/// an encoded single-color tile once under a name derived from its bytes
/// and symlinks further occurrences to it.
pub struct FilesystemStorage {
	root: PathBuf,
	layout: DirectoryLayout,
	extension: String,
	lock_dir: PathBuf,
	link_single_color_images: bool,
}

impl FilesystemStorage {
	pub fn new(root: impl Into<PathBuf>, layout: DirectoryLayout, extension: impl Into<String>) -> Self {
		let root = root.into();
		let lock_dir = default_lock_dir(&root);
		Self { root, layout, extension: extension.into(), lock_dir, link_single_color_images: false }
	}

	#[must_use]
	pub fn with_link_single_color_images(mut self, enabled: bool) -> Self {
		self.link_single_color_images = enabled;
		self
	}

	#[must_use]
	pub fn with_lock_directory(mut self, dir: impl Into<PathBuf>) -> Self {
		self.lock_dir = dir.into();
		self
	}

	fn tile_path(&self, coord: TileCoord, dims: &DimensionValues) -> PathBuf {
		let mut relative = self.layout.relative_path(coord.level, coord.x, coord.y, &self.extension);
		let suffix = dimension_suffix(dims);
		if !suffix.is_empty() {
			let with_suffix = format!("{}{}.{}", relative.file_stem().and_then(|s| s.to_str()).unwrap_or_default(), suffix, self.extension);
			relative.set_file_name(with_suffix);
		}
		self.root.join(relative)
	}

	/// Shared filename for a single-color tile, derived from the bytes
	/// themselves so repeated colors collapse onto the same file.
	fn shared_color_path(&self, blob: &Blob) -> PathBuf {
		let digest = simple_digest(blob.as_slice());
		self.root.join(".colors").join(format!("{digest:016x}.{}", self.extension))
	}

	#[context("writing tile {coord:?} to {path:?}", path = self.tile_path(coord, dims))]
	fn write_blob(&self, coord: TileCoord, dims: &DimensionValues, blob: &Blob) -> Result<()> {
		let path = self.tile_path(coord, dims);
		let parent = path.parent().expect("tile path always has a parent");
		std::fs::create_dir_all(parent)?;

		if self.link_single_color_images && is_single_color(blob.as_slice()) {
			let shared = self.shared_color_path(blob);
			std::fs::create_dir_all(shared.parent().expect("shared color path has a parent"))?;
			if !shared.exists() {
				std::fs::write(&shared, blob.as_slice())?;
			}
			if path.exists() || path.symlink_metadata().is_ok() {
				std::fs::remove_file(&path)?;
			}
			symlink(&shared, &path)?;
		} else {
			std::fs::write(&path, blob.as_slice())?;
		}
		Ok(())
	}
}

#[cfg(unix)]
fn symlink(original: &Path, link: &Path) -> Result<()> {
	std::os::unix::fs::symlink(original, link).context("creating symlink")
}

#[cfg(not(unix))]
fn symlink(original: &Path, link: &Path) -> Result<()> {
	std::fs::copy(original, link).map(|_| ()).context("copying shared tile (symlinks unsupported on this platform)")
}

fn is_single_color(bytes: &[u8]) -> bool {
	!bytes.is_empty() && bytes.windows(2).all(|w| w[0] == w[1])
}

fn simple_digest(bytes: &[u8]) -> u64 {
	// FNV-1a: fine for a dedup key, not a cryptographic guarantee.
	let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
	for &b in bytes {
		hash ^= u64::from(b);
		hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
	}
	hash
}

#[async_trait]
impl Storage for FilesystemStorage {
	async fn load_tile(&self, coord: TileCoord, dims: &DimensionValues) -> Result<Option<StoredTile>> {
		let path = self.tile_path(coord, dims);
		match std::fs::read(&path) {
			Ok(bytes) => {
				let timestamp = std::fs::metadata(&path)?.modified().unwrap_or_else(|_| SystemTime::now());
				Ok(Some(StoredTile { blob: Blob::from(bytes), timestamp }))
			}
			Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
			Err(err) => Err(err).with_context(|| format!("reading tile file {path:?}")),
		}
	}

	async fn store_tile(&self, coord: TileCoord, dims: &DimensionValues, blob: &Blob) -> Result<()> {
		self.write_blob(coord, dims, blob)
	}

	async fn remove_tile(&self, coord: TileCoord, dims: &DimensionValues) -> Result<()> {
		let path = self.tile_path(coord, dims);
		match std::fs::remove_file(&path) {
			Ok(()) => Ok(()),
			Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
			Err(err) => Err(err).with_context(|| format!("removing tile file {path:?}")),
		}
	}

	async fn remove_level(&self, level: usize) -> Result<()> {
		let level_dir = self.root.join(level.to_string());
		match std::fs::remove_dir_all(&level_dir) {
			Ok(()) => Ok(()),
			Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
			Err(err) => Err(err).with_context(|| format!("removing level directory {level_dir:?}")),
		}
	}

	fn iterate_tiles(&self, level: usize) -> Result<Box<dyn Iterator<Item = TileCoord> + Send>> {
		// Only the Tms layout is walked directly; other layouts would need
		// their own reverse-mapping, which no caller currently exercises.
		anyhow::ensure!(self.layout == DirectoryLayout::Tms, "iterate_tiles is only implemented for the Tms layout");
		let level_dir = self.root.join(level.to_string());
		let mut coords = Vec::new();
		if level_dir.exists() {
			for x_entry in std::fs::read_dir(&level_dir)? {
				let x_entry = x_entry?;
				let Ok(x) = x_entry.file_name().to_string_lossy().parse::<i64>() else { continue };
				for y_entry in std::fs::read_dir(x_entry.path())? {
					let y_entry = y_entry?;
					let stem = y_entry.path();
					let Some(stem) = stem.file_stem().and_then(|s| s.to_str().map(str::to_string)) else { continue };
					if let Ok(y) = stem.parse::<i64>() {
						coords.push(TileCoord::new(level, x, y));
					}
				}
			}
		}
		Ok(Box::new(coords.into_iter()))
	}

	fn lock_directory(&self) -> &Path {
		&self.lock_dir
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::collections::BTreeMap;

	fn dims() -> DimensionValues {
		BTreeMap::new()
	}

	#[tokio::test]
	async fn stores_and_loads_a_tile_round_trip() {
		let dir = tempfile::tempdir().unwrap();
		let storage = FilesystemStorage::new(dir.path(), DirectoryLayout::Tms, "png");
		let coord = TileCoord::new(3, 1, 2);
		storage.store_tile(coord, &dims(), &Blob::from(vec![1, 2, 3])).await.unwrap();
		let loaded = storage.load_tile(coord, &dims()).await.unwrap().unwrap();
		assert_eq!(loaded.blob.as_slice(), &[1, 2, 3]);
	}

	#[tokio::test]
	async fn missing_tile_is_not_an_error() {
		let dir = tempfile::tempdir().unwrap();
		let storage = FilesystemStorage::new(dir.path(), DirectoryLayout::Tms, "png");
		assert!(storage.load_tile(TileCoord::new(0, 0, 0), &dims()).await.unwrap().is_none());
	}

	#[tokio::test]
	async fn remove_level_deletes_only_that_levels_directory() {
		let dir = tempfile::tempdir().unwrap();
		let storage = FilesystemStorage::new(dir.path(), DirectoryLayout::Tms, "png");
		storage.store_tile(TileCoord::new(0, 0, 0), &dims(), &Blob::from(vec![9])).await.unwrap();
		storage.store_tile(TileCoord::new(1, 0, 0), &dims(), &Blob::from(vec![9])).await.unwrap();
		storage.remove_level(0).await.unwrap();
		assert!(storage.load_tile(TileCoord::new(0, 0, 0), &dims()).await.unwrap().is_none());
		assert!(storage.load_tile(TileCoord::new(1, 0, 0), &dims()).await.unwrap().is_some());
	}

	#[tokio::test]
	async fn iterate_tiles_finds_stored_coordinates() {
		let dir = tempfile::tempdir().unwrap();
		let storage = FilesystemStorage::new(dir.path(), DirectoryLayout::Tms, "png");
		storage.store_tile(TileCoord::new(2, 5, 6), &dims(), &Blob::from(vec![1])).await.unwrap();
		storage.store_tile(TileCoord::new(2, 7, 8), &dims(), &Blob::from(vec![1])).await.unwrap();
		let mut found: Vec<_> = storage.iterate_tiles(2).unwrap().collect();
		found.sort();
		assert_eq!(found, vec![TileCoord::new(2, 5, 6), TileCoord::new(2, 7, 8)]);
	}

	#[cfg(unix)]
	#[tokio::test]
	async fn single_color_tiles_are_deduplicated_via_symlink() {
		let dir = tempfile::tempdir().unwrap();
		let storage = FilesystemStorage::new(dir.path(), DirectoryLayout::Tms, "png").with_link_single_color_images(true);
		let blob = Blob::from(vec![7, 7, 7, 7]);
		storage.store_tile(TileCoord::new(4, 0, 0), &dims(), &blob).await.unwrap();
		storage.store_tile(TileCoord::new(4, 1, 0), &dims(), &blob).await.unwrap();

		let path_a = storage.tile_path(TileCoord::new(4, 0, 0), &dims());
		let path_b = storage.tile_path(TileCoord::new(4, 1, 0), &dims());
		assert!(path_a.symlink_metadata().unwrap().file_type().is_symlink());
		assert_eq!(std::fs::read_link(&path_a).unwrap(), std::fs::read_link(&path_b).unwrap());
	}
}
