//! Distributed key-value tile store (spec §4.4, Riak-style): one binary
//! value per `(bucket, tile-id)` key, the timestamp carried as user
//! metadata, with an optional secondary index on level for cleanup.

use crate::storage::{StoredTile, default_lock_dir, dimension_suffix};
use crate::tile::{DimensionValues, TileCoord};
use crate::Storage;
use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tilecache_core::Blob;

const TIMESTAMP_HEADER: &str = "X-Riak-Meta-Timestamp";
const LEVEL_HEADER: &str = "X-Riak-Meta-Level";
const LEVEL_INDEX: &str = "level_bin";

pub struct DistributedKvStorage {
	base_url: String,
	bucket: String,
	client: Client,
	lock_dir: PathBuf,
	secondary_index_on_level: bool,
}

impl DistributedKvStorage {
	pub fn new(base_url: impl Into<String>, bucket: impl Into<String>, lock_dir: impl Into<PathBuf>) -> Result<Self> {
		let client = Client::builder().timeout(Duration::from_secs(30)).build().context("building HTTP client")?;
		Ok(Self {
			base_url: base_url.into().trim_end_matches('/').to_string(),
			bucket: bucket.into(),
			client,
			lock_dir: lock_dir.into(),
			secondary_index_on_level: true,
		})
	}

	#[must_use]
	pub fn with_secondary_index_on_level(mut self, enabled: bool) -> Self {
		self.secondary_index_on_level = enabled;
		self
	}

	fn key(&self, coord: TileCoord, dims: &DimensionValues) -> String {
		format!("{}-{}-{}{}", coord.level, coord.x, coord.y, dimension_suffix(dims))
	}

	fn object_url(&self, coord: TileCoord, dims: &DimensionValues) -> String {
		format!("{}/buckets/{}/keys/{}", self.base_url, self.bucket, self.key(coord, dims))
	}
}

#[derive(Deserialize)]
struct IndexQueryResult {
	keys: Vec<String>,
}

#[async_trait]
impl Storage for DistributedKvStorage {
	async fn load_tile(&self, coord: TileCoord, dims: &DimensionValues) -> Result<Option<StoredTile>> {
		let response = self.client.get(self.object_url(coord, dims)).send().await.context("GET tile object")?;
		if response.status() == StatusCode::NOT_FOUND {
			return Ok(None);
		}
		let response = response.error_for_status().context("kv store returned an error status")?;
		let timestamp = response
			.headers()
			.get(TIMESTAMP_HEADER)
			.and_then(|v| v.to_str().ok())
			.and_then(|v| v.parse::<i64>().ok())
			.unwrap_or(0);
		let bytes = response.bytes().await.context("reading tile object body")?;
		Ok(Some(StoredTile { blob: Blob::from(bytes.to_vec()), timestamp: UNIX_EPOCH + Duration::from_secs(timestamp.max(0) as u64) }))
	}

	async fn store_tile(&self, coord: TileCoord, dims: &DimensionValues, blob: &Blob) -> Result<()> {
		let timestamp = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs() as i64).unwrap_or(0);
		let mut request = self
			.client
			.put(self.object_url(coord, dims))
			.header(TIMESTAMP_HEADER, timestamp.to_string())
			.header("Content-Type", "application/octet-stream")
			.body(blob.as_slice().to_vec());
		if self.secondary_index_on_level {
			request = request.header(LEVEL_HEADER, coord.level.to_string());
		}
		request.send().await.context("PUT tile object")?.error_for_status().context("kv store rejected the write")?;
		Ok(())
	}

	async fn remove_tile(&self, coord: TileCoord, dims: &DimensionValues) -> Result<()> {
		let response = self.client.delete(self.object_url(coord, dims)).send().await.context("DELETE tile object")?;
		if response.status() == StatusCode::NOT_FOUND {
			return Ok(());
		}
		response.error_for_status().context("kv store rejected the delete")?;
		Ok(())
	}

	async fn remove_level(&self, level: usize) -> Result<()> {
		for coord in self.level_keys(level).await? {
			self.remove_tile(coord, &DimensionValues::new()).await?;
		}
		Ok(())
	}

	fn iterate_tiles(&self, level: usize) -> Result<Box<dyn Iterator<Item = TileCoord> + Send>> {
		bail!(
			"iterating tile coordinates for level {level} requires an async secondary-index query; \
			 use DistributedKvStorage::level_keys instead"
		)
	}

	fn lock_directory(&self) -> &Path {
		&self.lock_dir
	}
}

impl DistributedKvStorage {
	/// Looks up every tile key indexed under `level` via the secondary
	/// index, used by [`Storage::remove_level`] and by cleanup sweeps.
	pub async fn level_keys(&self, level: usize) -> Result<Vec<TileCoord>> {
		anyhow::ensure!(self.secondary_index_on_level, "secondary index on level is disabled for this bucket");
		let url = format!("{}/buckets/{}/index/{}/{}", self.base_url, self.bucket, LEVEL_INDEX, level);
		let result: IndexQueryResult = self.client.get(url).send().await.context("querying level index")?.json().await.context("parsing index query result")?;
		Ok(result
			.keys
			.into_iter()
			.filter_map(|key| {
				let mut parts = key.splitn(3, '-');
				let level: usize = parts.next()?.parse().ok()?;
				let x: i64 = parts.next()?.parse().ok()?;
				let y: i64 = parts.next()?.split('@').next()?.parse().ok()?;
				Some(TileCoord::new(level, x, y))
			})
			.collect())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn key_format_includes_level_x_y() {
		let storage = DistributedKvStorage::new("http://localhost:8098", "tiles", "/tmp/locks").unwrap();
		let key = storage.key(TileCoord::new(4, 5, 6), &DimensionValues::new());
		assert_eq!(key, "4-5-6");
	}

	#[test]
	fn object_url_includes_bucket_and_key() {
		let storage = DistributedKvStorage::new("http://localhost:8098/", "tiles", "/tmp/locks").unwrap();
		let url = storage.object_url(TileCoord::new(0, 1, 2), &DimensionValues::new());
		assert_eq!(url, "http://localhost:8098/buckets/tiles/keys/0-1-2");
	}
}
