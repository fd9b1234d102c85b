//! Fetches a map image from an upstream WMS, negotiating SRS when the
//! server doesn't support the request's SRS directly (spec §4.5).

use crate::host_limiter::HostLimiter;
use crate::on_error::OnErrorPolicy;
use crate::source::{MapRequest, Source, request_resolution};
use anyhow::{Context, Result};
use async_trait::async_trait;
use imageproc::image::load_from_memory;
use reqwest::{Client, Method};
use std::collections::BTreeMap;
use std::time::Duration;
use tilecache_core::error::{TileErrorKind, tile_error};
use tilecache_core::{GroundBBox, Size};
use tilecache_derive::context;
use tilecache_geometry::Coverage;
use tilecache_geometry::srs::transform_bbox;
use tilecache_image::{Image, ResamplingMethod};
use tilecache_storage::DimensionValues;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
	Get,
	Post,
}

#[derive(Debug, Clone)]
pub enum Credentials {
	None,
	Basic { username: String, password: String },
}

/// A WMS `GetMap` upstream (spec §4.5, §6 `source.wms`).
pub struct WmsSource {
	pub base_url: String,
	pub layers: String,
	pub version: String,
	pub transparent: bool,
	pub image_format: String,
	pub request_params: BTreeMap<String, String>,
	pub method: HttpMethod,
	pub supported_srs: Option<Vec<String>>,
	pub preferred_srs: String,
	pub credentials: Credentials,
	pub verify_tls: bool,
	pub proxy: Option<String>,
	pub timeout: Duration,
	pub concurrent_requests: usize,
	pub on_error: OnErrorPolicy,
	pub coverage: Option<Coverage>,
	pub min_res: f64,
	pub max_res: f64,
	limiter: HostLimiter,
}

impl WmsSource {
	#[context("building WMS source for {base_url}")]
	pub fn new(base_url: impl Into<String>, layers: impl Into<String>) -> Result<Self> {
		let base_url = base_url.into();
		reqwest::Url::parse(&base_url).context("base_url is not a valid URL")?;
		Ok(Self {
			base_url,
			layers: layers.into(),
			version: "1.3.0".to_string(),
			transparent: true,
			image_format: "image/png".to_string(),
			request_params: BTreeMap::new(),
			method: HttpMethod::Get,
			supported_srs: None,
			preferred_srs: "EPSG:4326".to_string(),
			credentials: Credentials::None,
			verify_tls: true,
			proxy: None,
			timeout: Duration::from_secs(60),
			concurrent_requests: 0,
			on_error: OnErrorPolicy::new(),
			coverage: None,
			min_res: 0.0,
			max_res: f64::INFINITY,
			limiter: HostLimiter::new(),
		})
	}

	#[must_use]
	pub fn with_supported_srs(mut self, srs: Vec<String>) -> Self {
		self.supported_srs = Some(srs);
		self
	}

	#[must_use]
	pub fn with_coverage(mut self, coverage: Coverage) -> Self {
		self.coverage = Some(coverage);
		self
	}

	#[must_use]
	pub fn with_resolution_bounds(mut self, min_res: f64, max_res: f64) -> Self {
		self.min_res = min_res;
		self.max_res = max_res;
		self
	}

	#[must_use]
	pub fn with_credentials(mut self, credentials: Credentials) -> Self {
		self.credentials = credentials;
		self
	}

	#[must_use]
	pub fn with_verify_tls(mut self, verify_tls: bool) -> Self {
		self.verify_tls = verify_tls;
		self
	}

	fn client_for(&self) -> Result<Client> {
		let mut builder = Client::builder().timeout(self.timeout).danger_accept_invalid_certs(!self.verify_tls);
		if let Some(proxy) = &self.proxy {
			builder = builder.proxy(reqwest::Proxy::all(proxy).context("parsing proxy URL")?);
		}
		builder.build().context("building HTTP client")
	}

	fn host(&self) -> &str {
		self.base_url.split("://").next_back().unwrap_or(&self.base_url).split('/').next().unwrap_or(&self.base_url)
	}

	/// Picks the SRS to request from the upstream: `request.srs` if the
	/// server supports it, otherwise the configured `preferred_srs`.
	fn upstream_srs(&self, requested: &str) -> &str {
		match &self.supported_srs {
			Some(list) if !list.iter().any(|s| s.eq_ignore_ascii_case(requested)) => &self.preferred_srs,
			_ => requested,
		}
	}

	fn build_request(&self, client: &Client, bbox: GroundBBox, size: Size, srs: &str, dims: &DimensionValues) -> reqwest::RequestBuilder {
		let mut params = self.request_params.clone();
		params.insert("SERVICE".into(), "WMS".into());
		params.insert("REQUEST".into(), "GetMap".into());
		params.insert("VERSION".into(), self.version.clone());
		params.insert("LAYERS".into(), self.layers.clone());
		params.insert("STYLES".into(), String::new());
		params.insert("CRS".into(), srs.to_string());
		params.insert("BBOX".into(), format!("{},{},{},{}", bbox.x_min, bbox.y_min, bbox.x_max, bbox.y_max));
		params.insert("WIDTH".into(), size.width.to_string());
		params.insert("HEIGHT".into(), size.height.to_string());
		params.insert("FORMAT".into(), self.image_format.clone());
		params.insert("TRANSPARENT".into(), if self.transparent { "TRUE".into() } else { "FALSE".into() });
		for (dimension, value) in dims {
			params.insert(dimension.to_uppercase(), value.clone());
		}

		let builder = match self.method {
			HttpMethod::Get => client.request(Method::GET, &self.base_url).query(&params),
			HttpMethod::Post => client.request(Method::POST, &self.base_url).form(&params),
		};
		match &self.credentials {
			Credentials::None => builder,
			Credentials::Basic { username, password } => builder.basic_auth(username, Some(password)),
		}
	}
}

#[async_trait]
impl Source for WmsSource {
	async fn get_map(&self, request: &MapRequest) -> Result<Image> {
		let upstream_srs = self.upstream_srs(&request.srs);
		let needs_reprojection = upstream_srs != request.srs;

		let upstream_bbox = if needs_reprojection { transform_bbox(&request.srs, upstream_srs, &request.bbox)? } else { request.bbox };

		let client = self.client_for()?;
		let _permit = self.limiter.acquire(self.host(), self.concurrent_requests).await;

		let response = self
			.build_request(&client, upstream_bbox, request.size, upstream_srs, &request.dims)
			.send()
			.await
			.map_err(|err| {
				if err.is_timeout() || err.is_connect() {
					tile_error(TileErrorKind::SourceTransient, err.to_string())
				} else {
					tile_error(TileErrorKind::SourcePermanent, err.to_string())
				}
			})?;

		let status = response.status();
		if !status.is_success() {
			if let Some(fallback) = self.on_error.resolve(Some(status.as_u16())) {
				return Err(crate::on_error::fallback_error(fallback.clone()));
			}
			let kind = if status.is_server_error() { TileErrorKind::SourceTransient } else { TileErrorKind::SourcePermanent };
			return Err(tile_error(kind, format!("WMS returned HTTP {status}")));
		}

		let content_type = response.headers().get(reqwest::header::CONTENT_TYPE).and_then(|v| v.to_str().ok()).unwrap_or("").to_string();
		let bytes = response.bytes().await.context("reading WMS response body")?;

		if !content_type.starts_with("image/") {
			return Err(tile_error(TileErrorKind::SourcePermanent, format!("WMS responded with non-image content-type '{content_type}'")));
		}

		let decoded = load_from_memory(&bytes).map_err(|err| tile_error(TileErrorKind::SourcePermanent, format!("decoding WMS response: {err}")))?;
		let fetched = Image::from_buffer(decoded.to_rgba8(), tilecache_image::Mode::Rgba);

		if !needs_reprojection {
			return Ok(fetched);
		}

		let (out_w, out_h) = (request.size.width, request.size.height);
		let src_w = f64::from(fetched.width());
		let src_h = f64::from(fetched.height());
		let reprojected = fetched.reproject(out_w, out_h, ResamplingMethod::Bilinear, |x, y| {
			let gx = request.bbox.x_min + (f64::from(x) + 0.5) / f64::from(out_w) * request.bbox.width();
			let gy = request.bbox.y_max - (f64::from(y) + 0.5) / f64::from(out_h) * request.bbox.height();
			let (ux, uy) = tilecache_geometry::srs::transform_point(&request.srs, upstream_srs, gx, gy).ok()?;
			let sx = (ux - upstream_bbox.x_min) / upstream_bbox.width() * src_w;
			let sy = (upstream_bbox.y_max - uy) / upstream_bbox.height() * src_h;
			Some((sx, sy))
		});
		Ok(reprojected)
	}

	fn supported_srs(&self) -> Option<&[String]> {
		self.supported_srs.as_deref()
	}

	fn resolution_bounds(&self) -> (f64, f64) {
		(self.min_res, self.max_res)
	}

	fn coverage(&self) -> Option<&Coverage> {
		self.coverage.as_ref()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn upstream_srs_falls_back_to_preferred_when_unsupported() {
		let source = WmsSource::new("https://wms.example/ows", "basemap").unwrap().with_supported_srs(vec!["EPSG:4326".into()]);
		assert_eq!(source.upstream_srs("EPSG:3857"), "EPSG:4326");
		assert_eq!(source.upstream_srs("EPSG:4326"), "EPSG:4326");
	}

	#[test]
	fn unrestricted_source_keeps_requested_srs() {
		let source = WmsSource::new("https://wms.example/ows", "basemap").unwrap();
		assert_eq!(source.upstream_srs("EPSG:3857"), "EPSG:3857");
	}

	#[test]
	fn host_is_extracted_from_base_url() {
		let source = WmsSource::new("https://wms.example:8443/ows?service=wms", "basemap").unwrap();
		assert_eq!(source.host(), "wms.example:8443");
	}

	#[test]
	fn request_resolution_helper_is_reused() {
		let request = MapRequest {
			bbox: GroundBBox::new(0.0, 0.0, 256.0, 256.0).unwrap(),
			size: Size::new(256, 256),
			srs: "EPSG:3857".into(),
			format: None,
			dims: Default::default(),
		};
		assert_eq!(request_resolution(&request), 1.0);
	}

	#[test]
	fn dimension_values_are_appended_as_extra_query_params() {
		let source = WmsSource::new("https://wms.example/ows", "basemap").unwrap();
		let client = Client::new();
		let mut dims = DimensionValues::new();
		dims.insert("time".into(), "T1".into());
		dims.insert("elevation".into(), "1000".into());
		let request = source.build_request(&client, GroundBBox::new(0.0, 0.0, 1.0, 1.0).unwrap(), Size::new(256, 256), "EPSG:3857", &dims).build().unwrap();
		let query = request.url().query().unwrap_or_default();
		assert!(query.contains("TIME=T1"));
		assert!(query.contains("ELEVATION=1000"));
	}

	#[test]
	fn resolution_bounds_default_to_unrestricted() {
		let source = WmsSource::new("https://wms.example/ows", "basemap").unwrap();
		assert_eq!(source.resolution_bounds(), (0.0, f64::INFINITY));
		let bounded = source.with_resolution_bounds(10.0, 100.0);
		assert_eq!(bounded.resolution_bounds(), (10.0, 100.0));
	}

	#[test]
	fn coverage_defaults_to_unrestricted() {
		let source = WmsSource::new("https://wms.example/ows", "basemap").unwrap();
		assert!(source.coverage().is_none());
		let covered = source.with_coverage(Coverage::bbox("EPSG:3857", GroundBBox::new(0.0, 0.0, 10.0, 10.0).unwrap()));
		assert!(covered.coverage().is_some());
	}
}
