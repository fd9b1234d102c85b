use serde::Deserialize;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResamplingMethod {
	Nearest,
	Bilinear,
	Bicubic,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WatermarkConfig {
	pub text: String,
	#[serde(default = "default_watermark_opacity")]
	pub opacity: f32,
	#[serde(default = "default_watermark_font_size")]
	pub font_size: f32,
	#[serde(default = "default_watermark_color")]
	pub color: String,
	#[serde(default)]
	pub spacing: WatermarkSpacing,
}

fn default_watermark_opacity() -> f32 {
	0.2
}

fn default_watermark_font_size() -> f32 {
	10.0
}

fn default_watermark_color() -> String {
	"#000000".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum WatermarkSpacing {
	#[default]
	Normal,
	Wide,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ImageConfig {
	#[serde(default = "default_image_mode")]
	pub mode: String,
	#[serde(default)]
	pub colors: Option<u16>,
	#[serde(default)]
	pub transparent: bool,
	#[serde(default = "default_resampling_method")]
	pub resampling_method: ResamplingMethod,
	#[serde(default)]
	pub encoding_options: HashMap<String, String>,
	#[serde(default = "default_opacity")]
	pub opacity: f32,
}

fn default_image_mode() -> String {
	"rgba".to_string()
}

fn default_resampling_method() -> ResamplingMethod {
	ResamplingMethod::Bilinear
}

fn default_opacity() -> f32 {
	1.0
}

/// The three ways a cached tile can be declared stale (spec §9,
/// `refresh_before`).
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RefreshBeforeConfig {
	/// RFC 3339 timestamp; tiles stored before it are stale.
	Absolute(String),
	/// `{ seconds: N }`; tiles older than `now - N seconds` are stale.
	Relative { seconds: u64 },
	/// `{ mtime_of_file: "path" }`; tiles older than that file's mtime are
	/// stale.
	MtimeOfFile { mtime_of_file: String },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
	Filesystem {
		directory: String,
		#[serde(default = "default_directory_layout")]
		directory_layout: String,
		#[serde(default)]
		tile_lock_dir: Option<String>,
	},
	SqliteSingleFile {
		filename: String,
		#[serde(default)]
		tile_lock_dir: Option<String>,
	},
	SqlitePerLevel {
		dirname: String,
		#[serde(default)]
		tile_lock_dir: Option<String>,
	},
	HttpDocument {
		url: String,
		#[serde(default)]
		tile_metadata: HashMap<String, String>,
		#[serde(default)]
		tile_lock_dir: Option<String>,
	},
	DistributedKv {
		nodes: Vec<String>,
		bucket: String,
		#[serde(default)]
		tile_id: Option<String>,
		#[serde(default)]
		tile_lock_dir: Option<String>,
	},
}

fn default_directory_layout() -> String {
	"tc".to_string()
}

/// As-loaded shape of a `Cache` record (spec §3/§6).
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
	pub grids: Vec<String>,
	pub sources: Vec<String>,
	#[serde(default = "default_image_format")]
	pub format: String,
	#[serde(default)]
	pub request_format: Option<String>,
	#[serde(default = "default_meta_size")]
	pub meta_size: (u32, u32),
	#[serde(default)]
	pub meta_buffer: u32,
	#[serde(default)]
	pub bulk_meta_tiles: bool,
	#[serde(default)]
	pub link_single_color_images: bool,
	#[serde(default)]
	pub minimize_meta_requests: bool,
	#[serde(default)]
	pub watermark: Option<WatermarkConfig>,
	#[serde(default)]
	pub disable_storage: bool,
	#[serde(default)]
	pub use_direct_from_level: Option<u32>,
	#[serde(default)]
	pub use_direct_from_res: Option<f64>,
	pub cache: StorageConfig,
	#[serde(default)]
	pub image: ImageConfig,
	#[serde(default)]
	pub refresh_before: Option<RefreshBeforeConfig>,
	#[serde(default)]
	pub concurrent_tile_creators: Option<u32>,
	#[serde(default = "default_reprojection_margin_px")]
	pub reprojection_margin_px: u32,
}

fn default_reprojection_margin_px() -> u32 {
	1
}

fn default_image_format() -> String {
	"image/png".to_string()
}

fn default_meta_size() -> (u32, u32) {
	(4, 4)
}

impl Default for ImageConfig {
	fn default() -> Self {
		Self {
			mode: default_image_mode(),
			colors: None,
			transparent: false,
			resampling_method: default_resampling_method(),
			encoding_options: HashMap::new(),
			opacity: default_opacity(),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_filesystem_cache_with_defaults() {
		let yaml = "
grids: [webmercator]
sources: [base_wms]
cache:
  type: filesystem
  directory: /var/cache/tiles
";
		let cfg: CacheConfig = serde_yaml_ng::from_str(yaml).unwrap();
		assert_eq!(cfg.meta_size, (4, 4));
		assert!(!cfg.disable_storage);
		assert_eq!(cfg.reprojection_margin_px, 1);
		match cfg.cache {
			StorageConfig::Filesystem { directory, .. } => assert_eq!(directory, "/var/cache/tiles"),
			_ => panic!("expected Filesystem"),
		}
	}

	#[test]
	fn parses_refresh_before_variants() {
		let relative: RefreshBeforeConfig = serde_yaml_ng::from_str("seconds: 3600").unwrap();
		assert!(matches!(relative, RefreshBeforeConfig::Relative { seconds: 3600 }));

		let mtime: RefreshBeforeConfig = serde_yaml_ng::from_str("mtime_of_file: /etc/seed.flag").unwrap();
		assert!(matches!(mtime, RefreshBeforeConfig::MtimeOfFile { .. }));

		let absolute: RefreshBeforeConfig = serde_yaml_ng::from_str("\"2024-01-01T00:00:00Z\"").unwrap();
		assert!(matches!(absolute, RefreshBeforeConfig::Absolute(_)));
	}
}
