//! Converts a loaded [`crate::config::Document`] into the runtime layer
//! tree (spec §3/§6): `GridConfig` → [`Grid`], `SourceConfig` → a boxed
//! [`Source`], `StorageConfig` → a boxed [`Storage`], `CacheConfig` → a
//! [`TileManager`], and the `LayerConfig` tree → a runtime [`Layer`] tree
//! the [`crate::dispatcher::Dispatcher`] walks.

use crate::color;
use crate::config::Document;
use crate::manager::{SourceEntry, TileManager, WatermarkSpec};
use crate::map_layer::{DirectBypass, MapLayer};
use anyhow::{Context, Result, bail, ensure};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tilecache_core::config::{
	CacheConfig, GridConfig, LayerConfig, LayerEntryConfig, OnErrorResponse, OriginConfig, ResolutionSpec, SourceConfig,
	StorageConfig,
};
use tilecache_core::{Environment, GroundBBox, Origin, RefreshPolicy, Size};
use tilecache_core::grid::Grid;
use tilecache_image::Mode;
use tilecache_image::format::ImageFormat;
use tilecache_geometry::Coverage;
use tilecache_source::{BlankSource, DebugSource, OnErrorPolicy, ProcessSource, Source, TileSource, WmsSource};
use tilecache_storage::backends::{
	DistributedKvStorage, FilesystemStorage, HttpDocumentStorage, SqlitePerLevelStorage, SqliteSingleFileStorage,
};
use tilecache_storage::{DirectoryLayout, Storage};

/// The fully resolved layer tree, ready to answer requests.
pub struct Runtime {
	pub caches: HashMap<String, Arc<TileManager>>,
	pub sources: HashMap<String, Arc<dyn Source>>,
	pub layers: Vec<Layer>,
}

/// A named entry a [`Layer`] composites bottom-to-top. `Cache` entries
/// carry both the [`MapLayer`] (for arbitrary bbox/SRS requests) and the
/// underlying [`TileManager`] (so the dispatcher can bypass `MapLayer`
/// entirely when a tile request's grid matches the cache's own), plus the
/// cache's configured `image.opacity` for the bottom-to-top merge.
pub enum LayerEntry {
	Source(Arc<MapLayer>),
	Cache { map_layer: Arc<MapLayer>, manager: Arc<TileManager>, opacity: f32 },
}

pub struct Layer {
	pub name: String,
	pub title: Option<String>,
	pub entries: Vec<LayerEntry>,
	pub min_res: Option<f64>,
	pub max_res: Option<f64>,
	pub metadata: HashMap<String, String>,
	pub children: Vec<Layer>,
}

/// Turns the document's `globals` block into the runtime [`Environment`]
/// every source's HTTP client and the SRS machinery read from.
pub fn build_environment(globals: &tilecache_core::config::GlobalsConfig) -> Result<Environment> {
	use tilecache_core::{HttpDefaults, HttpMethod, SrsDefaults};

	let http = HttpDefaults {
		client_timeout: globals.http.client_timeout.map(std::time::Duration::from_secs_f64).unwrap_or(std::time::Duration::from_secs(60)),
		ssl_ca_certs: globals.http.ssl_ca_certs.clone().map(PathBuf::from),
		ssl_no_cert_checks: globals.http.ssl_no_cert_checks,
		method: match globals.http.method.as_deref() {
			Some("post") | Some("POST") => HttpMethod::Post,
			_ => HttpMethod::Get,
		},
		headers: globals.http.headers.clone(),
		access_control_allow_origin: globals.http.access_control_allow_origin.clone(),
		proxy: std::env::var("HTTPS_PROXY").ok().or_else(|| std::env::var("HTTP_PROXY").ok()),
	};

	let srs = SrsDefaults {
		proj_data_dir: globals.srs.proj_data_dir.clone().map(PathBuf::from),
		axis_order_ne: globals.srs.axis_order_ne.clone(),
		axis_order_en: globals.srs.axis_order_en.clone(),
	};

	Ok(Environment::new(http, srs))
}

pub fn build(document: &Document, env: &Environment) -> Result<Runtime> {
	let mut grids = HashMap::new();
	for (name, config) in &document.grids {
		let grid = build_grid(name, config).with_context(|| format!("building grid {name:?}"))?;
		grids.insert(name.clone(), Arc::new(grid));
	}

	let mut sources = HashMap::new();
	for (name, config) in &document.sources {
		let source = build_source(config, env).with_context(|| format!("building source {name:?}"))?;
		sources.insert(name.clone(), source);
	}

	let mut caches = HashMap::new();
	let mut cache_bypass = HashMap::new();
	let mut cache_opacity = HashMap::new();
	let mut cache_margin = HashMap::new();
	for (name, config) in &document.caches {
		let manager = build_cache(name, config, &grids, &sources)?;
		caches.insert(name.clone(), Arc::new(manager));
		cache_bypass.insert(name.clone(), DirectBypass { from_level: config.use_direct_from_level, from_res: config.use_direct_from_res });
		cache_opacity.insert(name.clone(), config.image.opacity);
		cache_margin.insert(name.clone(), config.reprojection_margin_px);
	}

	let map_layers_by_source: HashMap<String, Arc<MapLayer>> = sources.iter().map(|(name, source)| (name.clone(), Arc::new(MapLayer::direct(source.clone())))).collect();
	let map_layers_by_cache: HashMap<String, Arc<MapLayer>> = caches
		.iter()
		.map(|(name, manager)| (name.clone(), Arc::new(MapLayer::cached(manager.clone(), cache_bypass[name]).with_reprojection_margin_px(cache_margin[name]))))
		.collect();

	let layers =
		document.layers.iter().map(|layer| build_layer(layer, &map_layers_by_source, &map_layers_by_cache, &caches, &cache_opacity)).collect::<Result<_>>()?;

	Ok(Runtime { caches, sources, layers })
}

fn build_grid(name: &str, config: &GridConfig) -> Result<Grid> {
	ensure!(config.base.is_none(), "grid {name:?} sets `base`; grid inheritance is resolved by the YAML loader, not this engine");

	let bbox = GroundBBox::new(config.bbox[0], config.bbox[1], config.bbox[2], config.bbox[3])?;
	let bbox = match &config.bbox_srs {
		Some(bbox_srs) if bbox_srs != &config.srs => tilecache_geometry::srs::transform_bbox(bbox_srs, &config.srs, &bbox)?,
		_ => bbox,
	};

	let tile_size = Size::new(config.tile_size.0, config.tile_size.1);
	let resolutions = resolve_resolutions(&config.res, &bbox, tile_size);
	let origin = match config.origin {
		Some(OriginConfig::Ll) => Origin::LowerLeft,
		Some(OriginConfig::Ul) | None => Origin::UpperLeft,
	};

	Grid::new(config.srs.clone(), resolutions, tile_size, origin, bbox, config.threshold_res.clone(), config.stretch_factor, config.max_shrink_factor)
}

/// Expands [`ResolutionSpec::Factor`] into a concrete decreasing list,
/// starting from the resolution that fits the whole grid bbox into one
/// tile. A `factor` of `0.0` is the conventional placeholder for
/// sqrt(2)-stepped quarter grids.
fn resolve_resolutions(spec: &ResolutionSpec, bbox: &GroundBBox, tile_size: Size) -> Vec<f64> {
	match spec {
		ResolutionSpec::List(list) => list.clone(),
		ResolutionSpec::Factor { factor, num_levels } => {
			let factor = if *factor == 0.0 { std::f64::consts::SQRT_2 } else { *factor };
			let start_res = (bbox.width() / f64::from(tile_size.width)).max(bbox.height() / f64::from(tile_size.height));
			(0..*num_levels).map(|level| start_res / factor.powi(level as i32)).collect()
		}
	}
}

fn build_source(config: &SourceConfig, env: &Environment) -> Result<Arc<dyn Source>> {
	Ok(match config {
		SourceConfig::Wms(wms) => {
			let mut source = WmsSource::new(wms.url.clone(), wms.layers.clone())?;
			source.version = wms.version.clone();
			source.transparent = wms.transparent;
			source.image_format = wms.format.clone();
			source.concurrent_requests = wms.concurrent_requests as usize;
			source.timeout = wms.http.client_timeout.unwrap_or(env.http.client_timeout);
			source.verify_tls = !wms.http.ssl_no_cert_checks && !env.http.ssl_no_cert_checks;
			if !wms.supported_srs.is_empty() {
				source = source.with_supported_srs(wms.supported_srs.clone());
			}
			source.on_error = build_on_error_policy(&wms.on_error)?;
			if let Some(coverage) = wms.coverage.as_deref().map(build_coverage).transpose()? {
				source = source.with_coverage(coverage);
			}
			source = source.with_resolution_bounds(wms.min_res.unwrap_or(0.0), wms.max_res.unwrap_or(f64::INFINITY));
			Arc::new(source)
		}
		SourceConfig::Tile(tile) => {
			let mut source = TileSource::new(tile.url.clone());
			source.timeout = tile.http.client_timeout.unwrap_or(env.http.client_timeout);
			source.on_error = build_on_error_policy(&tile.on_error)?;
			source.coverage = tile.coverage.as_deref().map(build_coverage).transpose()?;
			source.min_res = tile.min_res.unwrap_or(0.0);
			source.max_res = tile.max_res.unwrap_or(f64::INFINITY);
			Arc::new(source)
		}
		SourceConfig::Process(process) => {
			let source = ProcessSource::new(process.command.clone()).with_args(process.args.clone()).with_scale_factor(process.scale_factor as f32);
			Arc::new(source)
		}
		SourceConfig::Debug(_) => Arc::new(DebugSource::new()),
		SourceConfig::Blank => Arc::new(BlankSource::new().with_seed_only(false)),
	})
}

/// Resolves a `coverage` config string into a [`Coverage`] (spec §6
/// `source.wms.coverage`/`source.tile.coverage`): four comma-separated
/// numbers are read as a `EPSG:4326` bbox, anything else is treated as a
/// path to a shapefile or GeoJSON feature file depending on its extension.
fn build_coverage(value: &str) -> Result<Coverage> {
	let parts: Vec<&str> = value.split(',').map(str::trim).collect();
	if let [x_min, y_min, x_max, y_max] = parts[..] {
		if let (Ok(x_min), Ok(y_min), Ok(x_max), Ok(y_max)) = (x_min.parse(), y_min.parse(), x_max.parse(), y_max.parse()) {
			return Ok(Coverage::bbox("EPSG:4326", GroundBBox::new(x_min, y_min, x_max, y_max)?));
		}
	}
	let path = std::path::Path::new(value);
	match path.extension().and_then(|ext| ext.to_str()) {
		Some("shp") => Coverage::from_shapefile("EPSG:4326", path),
		_ => Coverage::from_geojson_file("EPSG:4326", path),
	}
}

fn build_on_error_policy(rules: &[tilecache_core::config::OnErrorRule]) -> Result<OnErrorPolicy> {
	let mut policy = OnErrorPolicy::new();
	for rule in rules {
		let response = match &rule.response {
			OnErrorResponse::Transparent => tilecache_source::ErrorResponse { color: None, cache: rule.cache, authorize_stale: rule.authorize_stale },
			OnErrorResponse::Color(value) => {
				tilecache_source::ErrorResponse { color: Some(color::parse_rgba(value)?), cache: rule.cache, authorize_stale: rule.authorize_stale }
			}
		};
		policy = if rule.status == "other" { policy.with_other(response) } else { policy.with_status(rule.status.parse().context("on_error status must be numeric or 'other'")?, response) };
	}
	Ok(policy)
}

fn build_storage(config: &StorageConfig, link_single_color_images: bool) -> Result<Arc<dyn Storage>> {
	Ok(match config {
		StorageConfig::Filesystem { directory, directory_layout, tile_lock_dir } => {
			let layout = parse_directory_layout(directory_layout)?;
			let mut storage = FilesystemStorage::new(directory.clone(), layout, "bin").with_link_single_color_images(link_single_color_images);
			if let Some(dir) = tile_lock_dir {
				storage = storage.with_lock_directory(dir.clone());
			}
			Arc::new(storage)
		}
		StorageConfig::SqliteSingleFile { filename, tile_lock_dir } => {
			let mut storage = SqliteSingleFileStorage::open(filename)?;
			if let Some(dir) = tile_lock_dir {
				storage = storage.with_lock_directory(dir.clone());
			}
			Arc::new(storage)
		}
		StorageConfig::SqlitePerLevel { dirname, tile_lock_dir } => {
			let mut storage = SqlitePerLevelStorage::new(dirname)?;
			if let Some(dir) = tile_lock_dir {
				storage = storage.with_lock_directory(dir.clone());
			}
			Arc::new(storage)
		}
		StorageConfig::HttpDocument { url, tile_lock_dir, .. } => {
			let lock_dir = tile_lock_dir.clone().map(PathBuf::from).unwrap_or_else(|| PathBuf::from(".locks"));
			Arc::new(HttpDocumentStorage::new(url.clone(), lock_dir)?)
		}
		StorageConfig::DistributedKv { nodes, bucket, tile_lock_dir, .. } => {
			let node = nodes.first().context("distributed_kv storage needs at least one node")?;
			let lock_dir = tile_lock_dir.clone().map(PathBuf::from).unwrap_or_else(|| PathBuf::from(".locks"));
			Arc::new(DistributedKvStorage::new(node.clone(), bucket.clone(), lock_dir)?)
		}
	})
}

fn parse_directory_layout(name: &str) -> Result<DirectoryLayout> {
	Ok(match name {
		"tc" | "tilecache" => DirectoryLayout::TileCache,
		"tms" => DirectoryLayout::Tms,
		"quadkey" => DirectoryLayout::Quadkey,
		"arcgis" => DirectoryLayout::ArcGis,
		other => bail!("unknown directory_layout {other:?}"),
	})
}

fn build_cache(
	name: &str,
	config: &CacheConfig,
	grids: &HashMap<String, Arc<Grid>>,
	sources: &HashMap<String, Arc<dyn Source>>,
) -> Result<TileManager> {
	let grid_name = config.grids.first().context("cache needs at least one grid")?;
	let grid = grids.get(grid_name).cloned().with_context(|| format!("cache {name:?} references unknown grid {grid_name:?}"))?;

	let source_entries = config
		.sources
		.iter()
		.map(|source_name| -> Result<SourceEntry> {
			let source = sources.get(source_name).cloned().with_context(|| format!("cache {name:?} references unknown source {source_name:?}"))?;
			Ok(SourceEntry { source })
		})
		.collect::<Result<Vec<_>>>()?;

	let storage = build_storage(&config.cache, config.link_single_color_images)?;
	let format = ImageFormat::parse(&config.format)?;
	// `image.mode` only matters once palette/grayscale output is wired up;
	// for now it's validated here so a bad config fails at build time.
	parse_mode(&config.image.mode)?;

	let watermark = config.watermark.as_ref().map(build_watermark).transpose()?;
	let refresh = config.refresh_before.as_ref().map(build_refresh).transpose()?.unwrap_or(RefreshPolicy::Never);

	Ok(TileManager::new(grid, source_entries, storage)
		.with_meta_size(config.meta_size)
		.with_meta_buffer(config.meta_buffer)
		.with_bulk_meta_tiles(config.bulk_meta_tiles)
		.with_disable_storage(config.disable_storage)
		.with_minimize_meta_requests(config.minimize_meta_requests)
		.with_format(format)
		.with_watermark(watermark)
		.with_refresh(refresh)
		.with_concurrent_tile_creators(config.concurrent_tile_creators.unwrap_or(4) as usize))
}

fn parse_mode(name: &str) -> Result<Mode> {
	Ok(match name {
		"rgb" => Mode::Rgb,
		"rgba" => Mode::Rgba,
		"palette" | "paletted" => Mode::Paletted8,
		"gray" | "luminance" => Mode::Luminance,
		"gray_alpha" | "luminance_alpha" => Mode::LuminanceAlpha,
		other => bail!("unknown image mode {other:?}"),
	})
}

/// Builds the watermark's font from `TILECACHE_WATERMARK_FONT`. No font is
/// bundled with this crate (ab_glyph needs real font bytes, not a
/// generated stub); an unset variable disables watermarking with a loud
/// warning rather than silently drawing nothing.
fn build_watermark(config: &tilecache_core::config::WatermarkConfig) -> Result<WatermarkSpec> {
	let font_path = std::env::var("TILECACHE_WATERMARK_FONT").context("watermark configured but TILECACHE_WATERMARK_FONT is not set; no font is bundled")?;
	let bytes = std::fs::read(&font_path).with_context(|| format!("reading watermark font {font_path:?}"))?;
	let font = ab_glyph::FontArc::try_from_vec(bytes).context("parsing watermark font")?;
	let (spacing_x, spacing_y, wide) = match config.spacing {
		tilecache_core::config::WatermarkSpacing::Normal => (100, 100, false),
		tilecache_core::config::WatermarkSpacing::Wide => (100, 100, true),
	};
	Ok(WatermarkSpec {
		text: config.text.clone(),
		font_size: config.font_size,
		color: color::parse_rgb(&config.color)?,
		opacity: config.opacity,
		spacing_x,
		spacing_y,
		wide,
		font: Arc::new(font),
	})
}

fn build_refresh(config: &tilecache_core::config::RefreshBeforeConfig) -> Result<RefreshPolicy> {
	use tilecache_core::config::RefreshBeforeConfig as Cfg;
	Ok(match config {
		Cfg::Absolute(timestamp) => tilecache_core::absolute_from_rfc3339(timestamp)?,
		Cfg::Relative { seconds } => RefreshPolicy::Relative(std::time::Duration::from_secs(*seconds)),
		Cfg::MtimeOfFile { mtime_of_file } => RefreshPolicy::MtimeOfFile(mtime_of_file.into()),
	})
}

fn build_layer(
	config: &LayerConfig,
	map_layers_by_source: &HashMap<String, Arc<MapLayer>>,
	map_layers_by_cache: &HashMap<String, Arc<MapLayer>>,
	caches: &HashMap<String, Arc<TileManager>>,
	cache_opacity: &HashMap<String, f32>,
) -> Result<Layer> {
	let entries = config
		.sources
		.iter()
		.map(|entry| match entry {
			LayerEntryConfig::Source(name) => map_layers_by_source
				.get(name)
				.cloned()
				.map(LayerEntry::Source)
				.with_context(|| format!("layer {:?} references unknown source {name:?}", config.name)),
			LayerEntryConfig::Cache(name) => {
				let map_layer = map_layers_by_cache.get(name).cloned().with_context(|| format!("layer {:?} references unknown cache {name:?}", config.name))?;
				let manager = caches[name].clone();
				let opacity = cache_opacity[name];
				Ok(LayerEntry::Cache { map_layer, manager, opacity })
			}
		})
		.collect::<Result<Vec<_>>>()?;

	let children =
		config.layers.iter().map(|child| build_layer(child, map_layers_by_source, map_layers_by_cache, caches, cache_opacity)).collect::<Result<_>>()?;

	Ok(Layer {
		name: config.name.clone(),
		title: config.title.clone(),
		entries,
		min_res: config.min_res,
		max_res: config.max_res,
		metadata: config.metadata.clone(),
		children,
	})
}
