//! Fetches pre-rendered tiles from a templated URL (XYZ/TMS/quadkey/ArcGIS
//! tile servers), one HTTP request per tile, with no reprojection — the
//! upstream tile grid is assumed to match the cache's own (spec §4.5, §6
//! `source.tile`).

use crate::host_limiter::HostLimiter;
use crate::on_error::OnErrorPolicy;
use crate::source::{MapRequest, Source};
use crate::template::{TemplateContext, expand};
use anyhow::Context;
use async_trait::async_trait;
use imageproc::image::load_from_memory;
use reqwest::Client;
use std::time::Duration;
use tilecache_core::error::{TileErrorKind, tile_error};
use tilecache_geometry::Coverage;
use tilecache_image::Image;

/// The level/x/y a templated tile request addresses. Distinct from the
/// grid's own `TileCoord` since a source may be queried for a tile
/// outside the grid's own tiling scheme (e.g. during reprojection).
#[derive(Debug, Clone, Copy)]
pub struct TileAddress {
	pub level: usize,
	pub x: i64,
	pub y: i64,
}

pub struct TileSource {
	pub url_template: String,
	pub format: String,
	pub client: Client,
	pub timeout: Duration,
	pub concurrent_requests: usize,
	pub on_error: OnErrorPolicy,
	pub coverage: Option<Coverage>,
	pub min_res: f64,
	pub max_res: f64,
	limiter: HostLimiter,
}

impl TileSource {
	pub fn new(url_template: impl Into<String>) -> Self {
		Self {
			url_template: url_template.into(),
			format: "png".to_string(),
			client: Client::new(),
			timeout: Duration::from_secs(30),
			concurrent_requests: 0,
			on_error: OnErrorPolicy::new(),
			coverage: None,
			min_res: 0.0,
			max_res: f64::INFINITY,
			limiter: HostLimiter::new(),
		}
	}

	fn host(&self) -> &str {
		self.url_template.split("://").next_back().unwrap_or(&self.url_template).split('/').next().unwrap_or(&self.url_template)
	}

	/// Fetches one addressed tile. The request bbox/size in [`MapRequest`]
	/// are used only for `on_error`'s substitute image size.
	pub async fn fetch_tile(&self, address: TileAddress, request: &MapRequest) -> anyhow::Result<Image> {
		let ctx = TemplateContext { level: address.level, x: address.x, y: address.y, format: &self.format, bbox: request.bbox };
		let url = expand(&self.url_template, &ctx);

		let _permit = self.limiter.acquire(self.host(), self.concurrent_requests).await;

		let response = self.client.get(&url).timeout(self.timeout).send().await.map_err(|err| {
			if err.is_timeout() || err.is_connect() {
				tile_error(TileErrorKind::SourceTransient, err.to_string())
			} else {
				tile_error(TileErrorKind::SourcePermanent, err.to_string())
			}
		})?;

		let status = response.status();
		if !status.is_success() {
			if let Some(fallback) = self.on_error.resolve(Some(status.as_u16())) {
				let mut image = Image::new(request.size.width, request.size.height, tilecache_image::Mode::Rgba);
				if let Some(color) = fallback.color {
					for pixel in image.buffer_mut().pixels_mut() {
						*pixel = imageproc::image::Rgba(color);
					}
				}
				return Ok(image);
			}
			let kind = if status.is_server_error() { TileErrorKind::SourceTransient } else { TileErrorKind::SourcePermanent };
			return Err(tile_error(kind, format!("tile fetch returned HTTP {status} for {url}")));
		}

		let bytes = response.bytes().await.context("reading tile response body")?;
		let decoded = load_from_memory(&bytes).map_err(|err| tile_error(TileErrorKind::SourcePermanent, format!("decoding tile from {url}: {err}")))?;
		Ok(Image::from_buffer(decoded.to_rgba8(), tilecache_image::Mode::Rgba))
	}
}

#[async_trait]
impl Source for TileSource {
	/// A bare `get_map` address is undefined for a tile source: callers
	/// (the meta-tile manager) address it via [`TileSource::fetch_tile`]
	/// instead, one request per grid tile.
	async fn get_map(&self, _request: &MapRequest) -> anyhow::Result<Image> {
		Err(tile_error(TileErrorKind::ConfigurationInvariantViolated, "TileSource must be queried per tile address via fetch_tile, not get_map"))
	}

	fn resolution_bounds(&self) -> (f64, f64) {
		(self.min_res, self.max_res)
	}

	fn coverage(&self) -> Option<&Coverage> {
		self.coverage.as_ref()
	}
}
