//! CouchDB-style HTTP document store (spec §4.4): one JSON document per
//! tile, the encoded bytes as a base64 attachment plus coordinate and
//! timestamp metadata.

use crate::storage::{StoredTile, default_lock_dir, dimension_suffix};
use crate::tile::{DimensionValues, TileCoord};
use crate::Storage;
use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tilecache_core::Blob;

#[derive(Debug, Serialize, Deserialize)]
struct TileDocument {
	level: usize,
	x: i64,
	y: i64,
	dims: String,
	timestamp: i64,
	#[serde(rename = "tile_data_base64")]
	tile_data: String,
}

pub struct HttpDocumentStorage {
	base_url: String,
	client: Client,
	lock_dir: PathBuf,
}

impl HttpDocumentStorage {
	pub fn new(base_url: impl Into<String>, lock_dir: impl Into<PathBuf>) -> Result<Self> {
		let client = Client::builder().timeout(Duration::from_secs(30)).build().context("building HTTP client")?;
		Ok(Self { base_url: base_url.into().trim_end_matches('/').to_string(), client, lock_dir: lock_dir.into() })
	}

	fn document_id(&self, coord: TileCoord, dims: &DimensionValues) -> String {
		format!("{}-{}-{}{}", coord.level, coord.x, coord.y, dimension_suffix(dims))
	}

	fn document_url(&self, coord: TileCoord, dims: &DimensionValues) -> String {
		format!("{}/{}", self.base_url, self.document_id(coord, dims))
	}
}

#[async_trait]
impl Storage for HttpDocumentStorage {
	async fn load_tile(&self, coord: TileCoord, dims: &DimensionValues) -> Result<Option<StoredTile>> {
		let response = self.client.get(self.document_url(coord, dims)).send().await.context("GET tile document")?;
		if response.status() == StatusCode::NOT_FOUND {
			return Ok(None);
		}
		let response = response.error_for_status().context("tile document store returned an error status")?;
		let doc: TileDocument = response.json().await.context("parsing tile document JSON")?;
		let bytes = BASE64.decode(doc.tile_data).context("decoding base64 tile attachment")?;
		Ok(Some(StoredTile { blob: Blob::from(bytes), timestamp: UNIX_EPOCH + Duration::from_secs(doc.timestamp.max(0) as u64) }))
	}

	async fn store_tile(&self, coord: TileCoord, dims: &DimensionValues, blob: &Blob) -> Result<()> {
		let timestamp = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs() as i64).unwrap_or(0);
		let doc = TileDocument {
			level: coord.level,
			x: coord.x,
			y: coord.y,
			dims: dimension_suffix(dims),
			timestamp,
			tile_data: BASE64.encode(blob.as_slice()),
		};
		self.client
			.put(self.document_url(coord, dims))
			.json(&doc)
			.send()
			.await
			.context("PUT tile document")?
			.error_for_status()
			.context("tile document store rejected the write")?;
		Ok(())
	}

	async fn remove_tile(&self, coord: TileCoord, dims: &DimensionValues) -> Result<()> {
		let response = self.client.delete(self.document_url(coord, dims)).send().await.context("DELETE tile document")?;
		if response.status() == StatusCode::NOT_FOUND {
			return Ok(());
		}
		response.error_for_status().context("tile document store rejected the delete")?;
		Ok(())
	}

	async fn remove_level(&self, _level: usize) -> Result<()> {
		bail!("HTTP document store has no bulk level-delete endpoint; remove tiles individually via iterate_tiles")
	}

	fn iterate_tiles(&self, _level: usize) -> Result<Box<dyn Iterator<Item = TileCoord> + Send>> {
		bail!("HTTP document store does not support iteration without a view/index endpoint")
	}

	fn lock_directory(&self) -> &Path {
		&self.lock_dir
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::collections::BTreeMap;

	#[test]
	fn document_id_includes_dimension_suffix() {
		let storage = HttpDocumentStorage::new("http://localhost:5984/tiles", "/tmp/locks").unwrap();
		let mut dims = BTreeMap::new();
		dims.insert("time".to_string(), "2020".to_string());
		let id = storage.document_id(TileCoord::new(3, 1, 2), &dims);
		assert_eq!(id, "3-1-2@time=2020");
	}

	#[test]
	fn document_url_strips_trailing_slash_on_base() {
		let storage = HttpDocumentStorage::new("http://localhost:5984/tiles/", "/tmp/locks").unwrap();
		let url = storage.document_url(TileCoord::new(0, 0, 0), &BTreeMap::new());
		assert_eq!(url, "http://localhost:5984/tiles/0-0-0");
	}
}
