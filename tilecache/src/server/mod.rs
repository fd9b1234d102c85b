//! Minimal tile-only HTTP surface for smoke-testing a built [`Dispatcher`]:
//! a WMS-style GetMap endpoint, KVP and RESTful WMTS GetTile, a plain TMS
//! tree, and an OSM-style slippy-map tree. No capabilities documents
//! (WMS/WMTS/TMS/KML) are served; that XML/JSON generation is out of scope
//! here.
//!
//! Kept deliberately thin: every handler parses its request into a
//! [`MapRequest`] or [`TileCoord`] and hands it straight to the
//! [`Dispatcher`]; response framing (status codes, `Content-Type`,
//! `Cache-Control`) lives in the small helpers at the bottom of this file.

use crate::dispatcher::{AllowAll, AuthorizeCallback, Dispatcher};
use axum::extract::{Path, Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use std::collections::HashMap;
use std::sync::Arc;
use tilecache_core::error::{TileErrorKind, error_kind};
use tilecache_core::{GroundBBox, Size};
use tilecache_image::format::{self, ImageFormat};
use tilecache_source::MapRequest;
use tilecache_storage::{DimensionValues, TileCoord};
use tokio::net::TcpListener;
use tokio::sync::oneshot;

struct AppState {
	dispatcher: Arc<Dispatcher>,
	auth: Arc<dyn AuthorizeCallback>,
}

/// Owns the listening socket and the graceful-shutdown handshake.
pub struct TileServer {
	ip: String,
	port: u16,
	state: Arc<AppState>,
	exit_signal: Option<oneshot::Sender<()>>,
	join: Option<tokio::task::JoinHandle<()>>,
}

impl TileServer {
	pub fn new(ip: impl Into<String>, port: u16, dispatcher: Arc<Dispatcher>) -> Self {
		Self::with_auth(ip, port, dispatcher, Arc::new(AllowAll))
	}

	pub fn with_auth(ip: impl Into<String>, port: u16, dispatcher: Arc<Dispatcher>, auth: Arc<dyn AuthorizeCallback>) -> Self {
		Self { ip: ip.into(), port, state: Arc::new(AppState { dispatcher, auth }), exit_signal: None, join: None }
	}

	pub fn get_port(&self) -> u16 {
		self.port
	}

	pub async fn start(&mut self) -> anyhow::Result<()> {
		if self.exit_signal.is_some() || self.join.is_some() {
			self.stop().await;
		}

		let router = build_router().with_state(self.state.clone()).layer(tower_http::cors::CorsLayer::permissive());

		let addr = format!("{}:{}", self.ip, self.port);
		let listener = TcpListener::bind(&addr).await?;
		if self.port == 0 {
			self.port = listener.local_addr()?.port();
		}

		let (tx, rx) = oneshot::channel::<()>();
		let handle = tokio::spawn(async move {
			if let Err(err) = axum::serve(listener, router.into_make_service()).with_graceful_shutdown(async { rx.await.ok(); }).await {
				log::error!("server task exited with error: {err}");
			}
		});

		self.exit_signal = Some(tx);
		self.join = Some(handle);
		log::info!("listening on {addr}");
		Ok(())
	}

	pub async fn stop(&mut self) {
		if let Some(tx) = self.exit_signal.take() {
			let _ = tx.send(());
		}
		if let Some(handle) = self.join.take() {
			let _ = tokio::time::timeout(std::time::Duration::from_secs(10), handle).await;
		}
	}
}

fn build_router() -> Router<Arc<AppState>> {
	Router::new()
		.route("/status", get(|| async { "ready!" }))
		.route("/service", get(wms_kvp))
		.route("/wmts", get(wmts_kvp))
		.route("/tms/1.0.0/{*rest}", get(tms_tile))
		.route("/tiles/{*rest}", get(slippy_tile))
		.route("/wmts/1.0.0/{*rest}", get(wmts_restful_tile))
}

/// Splits a `layer/z/x/y.ext`-shaped catch-all tail into its segments,
/// separating the trailing `y` from its file extension. Mirrors how the
/// teacher's dynamic tile handler parses `Url::as_vec()` itself rather than
/// relying on per-segment path captures (axum can't capture two values,
/// `{y}` and `{ext}`, out of one `y.ext` path segment).
fn split_tile_path(rest: &str) -> Option<Vec<&str>> {
	let rest = rest.trim_start_matches('/');
	if rest.is_empty() {
		return None;
	}
	let mut segments: Vec<&str> = rest.split('/').collect();
	let (y, ext) = segments.pop()?.rsplit_once('.')?;
	segments.push(y);
	segments.push(ext);
	Some(segments)
}

#[derive(serde::Deserialize)]
struct WmsQuery {
	#[serde(default, rename = "REQUEST", alias = "request")]
	request: Option<String>,
	#[serde(default, rename = "LAYERS", alias = "layers")]
	layers: Option<String>,
	#[serde(default, rename = "BBOX", alias = "bbox")]
	bbox: Option<String>,
	#[serde(default, rename = "WIDTH", alias = "width")]
	width: Option<u32>,
	#[serde(default, rename = "HEIGHT", alias = "height")]
	height: Option<u32>,
	#[serde(default, rename = "SRS", alias = "srs")]
	srs: Option<String>,
	#[serde(default, rename = "CRS", alias = "crs")]
	crs: Option<String>,
	#[serde(default, rename = "FORMAT", alias = "format")]
	format: Option<String>,
}

async fn wms_kvp(State(state): State<Arc<AppState>>, Query(query): Query<WmsQuery>) -> Response {
	match query.request.as_deref().unwrap_or("").to_ascii_lowercase().as_str() {
		"getmap" => {
			let Some(layers) = query.layers.as_deref() else { return bad_request("LAYERS is required") };
			let Some(bbox_str) = query.bbox.as_deref() else { return bad_request("BBOX is required") };
			let (Some(width), Some(height)) = (query.width, query.height) else { return bad_request("WIDTH and HEIGHT are required") };
			let srs = query.srs.or(query.crs).unwrap_or_else(|| "EPSG:3857".to_string());
			let Ok(bbox) = parse_bbox(bbox_str) else { return bad_request("BBOX must be four comma-separated numbers") };

			let layer_names: Vec<String> = layers.split(',').map(str::to_string).collect();
			let request = MapRequest { bbox, size: Size::new(width, height), srs, format: query.format.clone(), dims: DimensionValues::new() };
			match state.dispatcher.get_map(&layer_names, &request, &DimensionValues::new(), state.auth.as_ref()).await {
				Ok(image) => encode_image_response(&image, query.format.as_deref()),
				Err(err) => error_response(&err),
			}
		}
		other => bad_request(&format!("unsupported REQUEST {other:?}")),
	}
}

async fn wmts_kvp(State(state): State<Arc<AppState>>, Query(query): Query<HashMap<String, String>>) -> Response {
	let request = query.get("REQUEST").or_else(|| query.get("request")).map(String::as_str).unwrap_or("");
	if !request.eq_ignore_ascii_case("gettile") {
		return bad_request(&format!("unsupported REQUEST {request:?}"));
	}

	let get = |key: &str| query.get(key).or_else(|| query.get(&key.to_ascii_lowercase()));
	let (Some(layer), Some(z), Some(x), Some(y)) = (get("LAYER"), get("TILEMATRIX"), get("TILECOL"), get("TILEROW")) else {
		return bad_request("LAYER, TILEMATRIX, TILECOL and TILEROW are required");
	};
	let ext = get("FORMAT").map(|f| format_to_extension(f)).unwrap_or("png");
	fetch_tile_response(&state, layer, z, x, y, ext, TileYConvention::Native).await
}

async fn tms_tile(State(state): State<Arc<AppState>>, Path(rest): Path<String>) -> Response {
	let Some(segments) = split_tile_path(&rest) else { return not_found() };
	if segments.len() != 5 {
		return not_found();
	}
	fetch_tile_response(&state, segments[0], segments[1], segments[2], segments[3], segments[4], TileYConvention::Native).await
}

async fn slippy_tile(State(state): State<Arc<AppState>>, Path(rest): Path<String>) -> Response {
	let Some(segments) = split_tile_path(&rest) else { return not_found() };
	if segments.len() != 5 {
		return not_found();
	}
	fetch_tile_response(&state, segments[0], segments[1], segments[2], segments[3], segments[4], TileYConvention::SlippyMap).await
}

async fn wmts_restful_tile(State(state): State<Arc<AppState>>, Path(rest): Path<String>) -> Response {
	let Some(segments) = split_tile_path(&rest) else { return not_found() };
	if segments.len() != 7 {
		return not_found();
	}
	// segments: layer, style, tilematrixset, z, x, y, ext
	fetch_tile_response(&state, segments[0], segments[3], segments[4], segments[5], segments[6], TileYConvention::Native).await
}

/// Whether `y` in the request is already in the layer's own grid
/// convention (`Native`, TMS/WMTS default) or in the slippy-map convention
/// (`SlippyMap`, y increases downward from the north) and needs flipping
/// before it addresses the grid's own tiles.
enum TileYConvention {
	Native,
	SlippyMap,
}

async fn fetch_tile_response(state: &Arc<AppState>, layer: &str, z: &str, x: &str, y: &str, ext: &str, convention: TileYConvention) -> Response {
	let (Ok(level), Ok(x), Ok(y)) = (z.parse::<usize>(), x.parse::<i64>(), y.parse::<i64>()) else {
		return bad_request("z/x/y must be integers");
	};

	let y = match convention {
		TileYConvention::Native => y,
		TileYConvention::SlippyMap => {
			let Some(grid) = state.dispatcher.grid_for_layer(layer) else { return not_found() };
			match grid.origin() {
				tilecache_core::grid::Origin::UpperLeft => y,
				tilecache_core::grid::Origin::LowerLeft => {
					let tiles_at_level = 1i64 << level;
					tiles_at_level - 1 - y
				}
			}
		}
	};

	let coord = TileCoord::new(level, x, y);
	match state.dispatcher.get_tile(layer, coord, &DimensionValues::new(), state.auth.as_ref()).await {
		Ok(tile) => match tile.image {
			Some(blob) => {
				let content_type = ImageFormat::parse(ext).map(|f| f.content_type()).unwrap_or("application/octet-stream");
				([(header::CONTENT_TYPE, content_type), (header::CACHE_CONTROL, "public, max-age=3600")], blob.into_vec()).into_response()
			}
			None => not_found(),
		},
		Err(err) => error_response(&err),
	}
}

fn encode_image_response(image: &tilecache_image::Image, requested_format: Option<&str>) -> Response {
	let format = requested_format.and_then(|f| ImageFormat::parse(f).ok()).unwrap_or(ImageFormat::Png);
	match format::encode(image, format) {
		Ok((blob, format)) => ([(header::CONTENT_TYPE, format.content_type())], blob.into_vec()).into_response(),
		Err(err) => error_response(&err),
	}
}

fn parse_bbox(value: &str) -> anyhow::Result<GroundBBox> {
	let parts: Vec<f64> = value.split(',').map(str::parse).collect::<Result<_, _>>()?;
	anyhow::ensure!(parts.len() == 4, "BBOX needs exactly four values");
	GroundBBox::new(parts[0], parts[1], parts[2], parts[3])
}

fn format_to_extension(format: &str) -> &str {
	match format {
		"image/jpeg" | "jpeg" | "jpg" => "jpeg",
		"image/gif" | "gif" => "gif",
		"image/tiff" | "tiff" => "tiff",
		_ => "png",
	}
}

fn bad_request(message: &str) -> Response {
	(StatusCode::BAD_REQUEST, message.to_string()).into_response()
}

fn not_found() -> Response {
	(StatusCode::NOT_FOUND, "Not Found").into_response()
}

fn error_response(err: &anyhow::Error) -> Response {
	let status = match error_kind(err) {
		Some(TileErrorKind::InvalidRequest) => StatusCode::BAD_REQUEST,
		Some(TileErrorKind::Unauthorized) => StatusCode::FORBIDDEN,
		Some(TileErrorKind::Unauthenticated) => StatusCode::UNAUTHORIZED,
		Some(TileErrorKind::SourceTransient | TileErrorKind::SourcePermanent) => StatusCode::BAD_GATEWAY,
		Some(TileErrorKind::BackendFull | TileErrorKind::BackendUnavailable | TileErrorKind::LockTimeout) => StatusCode::SERVICE_UNAVAILABLE,
		Some(TileErrorKind::ConfigurationInvariantViolated) | None => StatusCode::INTERNAL_SERVER_ERROR,
	};
	log::warn!("request failed: {err:#}");
	(status, err.to_string()).into_response()
}
