//! One SQLite database per cache, every tile a row keyed by
//! `(level, x, y, dims)` (spec §4.4 "Single-file SQLite").

use crate::storage::{StoredTile, default_lock_dir, dimension_suffix};
use crate::tile::{DimensionValues, TileCoord};
use crate::Storage;
use anyhow::{Context, Result};
use async_trait::async_trait;
use r2d2::Pool;
use r2d2_sqlite::{SqliteConnectionManager, rusqlite::OptionalExtension, rusqlite::params};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tilecache_core::Blob;

pub struct SqliteSingleFileStorage {
	pool: Pool<SqliteConnectionManager>,
	lock_dir: PathBuf,
}

impl SqliteSingleFileStorage {
	pub fn open(path: impl AsRef<Path>) -> Result<Self> {
		let path = path.as_ref();
		if let Some(parent) = path.parent() {
			std::fs::create_dir_all(parent).context("creating parent directory for sqlite cache")?;
		}
		let manager = SqliteConnectionManager::file(path);
		let pool = Pool::builder().max_size(8).build(manager).context("building sqlite connection pool")?;
		pool.get()?.execute_batch(
			"CREATE TABLE IF NOT EXISTS tiles (
				level INTEGER NOT NULL,
				x INTEGER NOT NULL,
				y INTEGER NOT NULL,
				dims TEXT NOT NULL DEFAULT '',
				data BLOB NOT NULL,
				timestamp INTEGER NOT NULL,
				PRIMARY KEY (level, x, y, dims)
			);",
		)?;
		let lock_dir = default_lock_dir(path.parent().unwrap_or_else(|| Path::new(".")));
		Ok(Self { pool, lock_dir })
	}

	#[must_use]
	pub fn with_lock_directory(mut self, dir: impl Into<PathBuf>) -> Self {
		self.lock_dir = dir.into();
		self
	}
}

fn now_unix() -> i64 {
	SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs() as i64).unwrap_or(0)
}

#[async_trait]
impl Storage for SqliteSingleFileStorage {
	async fn load_tile(&self, coord: TileCoord, dims: &DimensionValues) -> Result<Option<StoredTile>> {
		let conn = self.pool.get()?;
		let key = dimension_suffix(dims);
		let row: Option<(Vec<u8>, i64)> = conn
			.query_row(
				"SELECT data, timestamp FROM tiles WHERE level = ?1 AND x = ?2 AND y = ?3 AND dims = ?4",
				params![coord.level, coord.x, coord.y, key],
				|row| Ok((row.get(0)?, row.get(1)?)),
			)
			.optional()?;
		Ok(row.map(|(data, ts)| StoredTile { blob: Blob::from(data), timestamp: UNIX_EPOCH + std::time::Duration::from_secs(ts.max(0) as u64) }))
	}

	async fn store_tile(&self, coord: TileCoord, dims: &DimensionValues, blob: &Blob) -> Result<()> {
		let conn = self.pool.get()?;
		let key = dimension_suffix(dims);
		conn.execute(
			"INSERT INTO tiles (level, x, y, dims, data, timestamp) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
			 ON CONFLICT(level, x, y, dims) DO UPDATE SET data = excluded.data, timestamp = excluded.timestamp",
			params![coord.level, coord.x, coord.y, key, blob.as_slice(), now_unix()],
		)?;
		Ok(())
	}

	async fn remove_tile(&self, coord: TileCoord, dims: &DimensionValues) -> Result<()> {
		let conn = self.pool.get()?;
		let key = dimension_suffix(dims);
		conn.execute("DELETE FROM tiles WHERE level = ?1 AND x = ?2 AND y = ?3 AND dims = ?4", params![coord.level, coord.x, coord.y, key])?;
		Ok(())
	}

	async fn remove_level(&self, level: usize) -> Result<()> {
		let conn = self.pool.get()?;
		conn.execute("DELETE FROM tiles WHERE level = ?1", params![level])?;
		Ok(())
	}

	fn iterate_tiles(&self, level: usize) -> Result<Box<dyn Iterator<Item = TileCoord> + Send>> {
		let conn = self.pool.get()?;
		let mut stmt = conn.prepare("SELECT x, y FROM tiles WHERE level = ?1")?;
		let coords: Vec<TileCoord> = stmt
			.query_map(params![level], |row| Ok(TileCoord::new(level, row.get(0)?, row.get(1)?)))?
			.collect::<std::result::Result<Vec<_>, _>>()?;
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
	async fn stores_and_loads_a_tile() {
		let dir = tempfile::tempdir().unwrap();
		let storage = SqliteSingleFileStorage::open(dir.path().join("cache.sqlite")).unwrap();
		let coord = TileCoord::new(1, 2, 3);
		storage.store_tile(coord, &dims(), &Blob::from(vec![10, 20, 30])).await.unwrap();
		let loaded = storage.load_tile(coord, &dims()).await.unwrap().unwrap();
		assert_eq!(loaded.blob.as_slice(), &[10, 20, 30]);
	}

	#[tokio::test]
	async fn overwriting_a_tile_updates_in_place() {
		let dir = tempfile::tempdir().unwrap();
		let storage = SqliteSingleFileStorage::open(dir.path().join("cache.sqlite")).unwrap();
		let coord = TileCoord::new(0, 0, 0);
		storage.store_tile(coord, &dims(), &Blob::from(vec![1])).await.unwrap();
		storage.store_tile(coord, &dims(), &Blob::from(vec![2])).await.unwrap();
		let loaded = storage.load_tile(coord, &dims()).await.unwrap().unwrap();
		assert_eq!(loaded.blob.as_slice(), &[2]);
	}

	#[tokio::test]
	async fn remove_level_only_clears_that_level() {
		let dir = tempfile::tempdir().unwrap();
		let storage = SqliteSingleFileStorage::open(dir.path().join("cache.sqlite")).unwrap();
		storage.store_tile(TileCoord::new(0, 0, 0), &dims(), &Blob::from(vec![1])).await.unwrap();
		storage.store_tile(TileCoord::new(1, 0, 0), &dims(), &Blob::from(vec![1])).await.unwrap();
		storage.remove_level(0).await.unwrap();
		assert!(storage.load_tile(TileCoord::new(0, 0, 0), &dims()).await.unwrap().is_none());
		assert!(storage.load_tile(TileCoord::new(1, 0, 0), &dims()).await.unwrap().is_some());
	}
}
