//! One SQLite database per level (spec §4.4 "Per-level SQLite"): supports
//! an explicit per-tile timestamp for partial refresh and efficient
//! per-level deletion (the whole file is simply removed).

use crate::storage::{StoredTile, default_lock_dir, dimension_suffix};
use crate::tile::{DimensionValues, TileCoord};
use crate::Storage;
use anyhow::{Context, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use r2d2::Pool;
use r2d2_sqlite::{SqliteConnectionManager, rusqlite::OptionalExtension, rusqlite::params};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tilecache_core::Blob;

pub struct SqlitePerLevelStorage {
	dir: PathBuf,
	lock_dir: PathBuf,
	pools: DashMap<usize, Pool<SqliteConnectionManager>>,
}

impl SqlitePerLevelStorage {
	pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
		let dir = dir.into();
		std::fs::create_dir_all(&dir).context("creating per-level sqlite directory")?;
		let lock_dir = default_lock_dir(&dir);
		Ok(Self { dir, lock_dir, pools: DashMap::new() })
	}

	#[must_use]
	pub fn with_lock_directory(mut self, dir: impl Into<PathBuf>) -> Self {
		self.lock_dir = dir.into();
		self
	}

	fn level_path(&self, level: usize) -> PathBuf {
		self.dir.join(format!("level_{level}.sqlite"))
	}

	fn pool_for(&self, level: usize) -> Result<Pool<SqliteConnectionManager>> {
		if let Some(pool) = self.pools.get(&level) {
			return Ok(pool.clone());
		}
		let manager = SqliteConnectionManager::file(self.level_path(level));
		let pool = Pool::builder().max_size(4).build(manager).context("building per-level sqlite pool")?;
		pool.get()?.execute_batch(
			"CREATE TABLE IF NOT EXISTS tiles (
				x INTEGER NOT NULL,
				y INTEGER NOT NULL,
				dims TEXT NOT NULL DEFAULT '',
				data BLOB NOT NULL,
				timestamp INTEGER NOT NULL,
				PRIMARY KEY (x, y, dims)
			);",
		)?;
		self.pools.insert(level, pool.clone());
		Ok(pool)
	}
}

fn now_unix() -> i64 {
	SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs() as i64).unwrap_or(0)
}

#[async_trait]
impl Storage for SqlitePerLevelStorage {
	async fn load_tile(&self, coord: TileCoord, dims: &DimensionValues) -> Result<Option<StoredTile>> {
		if !self.level_path(coord.level).exists() {
			return Ok(None);
		}
		let pool = self.pool_for(coord.level)?;
		let conn = pool.get()?;
		let key = dimension_suffix(dims);
		let row: Option<(Vec<u8>, i64)> = conn
			.query_row("SELECT data, timestamp FROM tiles WHERE x = ?1 AND y = ?2 AND dims = ?3", params![coord.x, coord.y, key], |row| {
				Ok((row.get(0)?, row.get(1)?))
			})
			.optional()?;
		Ok(row.map(|(data, ts)| StoredTile { blob: Blob::from(data), timestamp: UNIX_EPOCH + std::time::Duration::from_secs(ts.max(0) as u64) }))
	}

	async fn store_tile(&self, coord: TileCoord, dims: &DimensionValues, blob: &Blob) -> Result<()> {
		let pool = self.pool_for(coord.level)?;
		let conn = pool.get()?;
		let key = dimension_suffix(dims);
		conn.execute(
			"INSERT INTO tiles (x, y, dims, data, timestamp) VALUES (?1, ?2, ?3, ?4, ?5)
			 ON CONFLICT(x, y, dims) DO UPDATE SET data = excluded.data, timestamp = excluded.timestamp",
			params![coord.x, coord.y, key, blob.as_slice(), now_unix()],
		)?;
		Ok(())
	}

	async fn remove_tile(&self, coord: TileCoord, dims: &DimensionValues) -> Result<()> {
		if !self.level_path(coord.level).exists() {
			return Ok(());
		}
		let pool = self.pool_for(coord.level)?;
		let conn = pool.get()?;
		let key = dimension_suffix(dims);
		conn.execute("DELETE FROM tiles WHERE x = ?1 AND y = ?2 AND dims = ?3", params![coord.x, coord.y, key])?;
		Ok(())
	}

	async fn remove_level(&self, level: usize) -> Result<()> {
		self.pools.remove(&level);
		let path = self.level_path(level);
		match std::fs::remove_file(&path) {
			Ok(()) => Ok(()),
			Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
			Err(err) => Err(err).with_context(|| format!("removing level database {path:?}")),
		}
	}

	fn iterate_tiles(&self, level: usize) -> Result<Box<dyn Iterator<Item = TileCoord> + Send>> {
		if !self.level_path(level).exists() {
			return Ok(Box::new(std::iter::empty()));
		}
		let pool = self.pool_for(level)?;
		let conn = pool.get()?;
		let mut stmt = conn.prepare("SELECT x, y FROM tiles")?;
		let coords: Vec<TileCoord> = stmt
			.query_map([], |row| Ok(TileCoord::new(level, row.get(0)?, row.get(1)?)))?
			.collect::<std::result::Result<Vec<_>, _>>()?;
		Ok(Box::new(coords.into_iter()))
	}

	fn lock_directory(&self) -> &Path {
		&self.lock_dir
	}
}
