use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

/// A single `on_error` mapping entry: an HTTP status code (or the literal
/// `"other"`) to a fixed response and cache policy (spec §6,
/// `source.tile.on_error`, and spec §4.5's `on_error` policy generally).
#[derive(Debug, Clone, Deserialize)]
pub struct OnErrorRule {
	/// `"404"`, `"500"`, ... or `"other"` as a catch-all.
	pub status: String,
	pub response: OnErrorResponse,
	#[serde(default)]
	pub cache: bool,
	#[serde(default)]
	pub authorize_stale: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OnErrorResponse {
	Transparent,
	/// An `"#rrggbb"` or `"#rrggbbaa"` color string.
	Color(String),
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct HttpRequestConfig {
	#[serde(default)]
	pub method: Option<String>,
	#[serde(default)]
	pub headers: HashMap<String, String>,
	#[serde(default, with = "humantime_seconds")]
	pub client_timeout: Option<Duration>,
	#[serde(default)]
	pub ssl_ca_certs: Option<String>,
	#[serde(default)]
	pub ssl_no_cert_checks: bool,
	#[serde(default)]
	pub manage_cookies: bool,
}

mod humantime_seconds {
	use serde::{Deserialize, Deserializer};
	use std::time::Duration;

	pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
	where
		D: Deserializer<'de>,
	{
		let secs: Option<f64> = Option::deserialize(deserializer)?;
		Ok(secs.map(Duration::from_secs_f64))
	}
}

#[derive(Debug, Clone, Deserialize)]
pub struct WmsSourceConfig {
	pub url: String,
	pub layers: String,
	#[serde(default)]
	pub transparent: bool,
	#[serde(default = "default_image_png")]
	pub format: String,
	#[serde(default)]
	pub sld: Option<String>,
	#[serde(default)]
	pub sld_body: Option<String>,
	#[serde(default = "default_wms_version")]
	pub version: String,
	#[serde(default)]
	pub supported_srs: Vec<String>,
	#[serde(default)]
	pub supported_formats: Vec<String>,
	#[serde(default)]
	pub coverage: Option<String>,
	#[serde(default)]
	pub seed_only: bool,
	#[serde(default)]
	pub min_res: Option<f64>,
	#[serde(default)]
	pub max_res: Option<f64>,
	#[serde(default)]
	pub transparent_color: Option<String>,
	#[serde(default)]
	pub transparent_color_tolerance: u8,
	#[serde(default)]
	pub concurrent_requests: u32,
	#[serde(default)]
	pub http: HttpRequestConfig,
	#[serde(default)]
	pub on_error: Vec<OnErrorRule>,
}

fn default_image_png() -> String {
	"image/png".to_string()
}

fn default_wms_version() -> String {
	"1.1.1".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct TileSourceConfig {
	/// URL template with placeholders `{x}`, `{y}`, `{z}`, `{format}`,
	/// `{quadkey}`, `{tc_path}`, `{tms_path}`, `{arcgiscache_path}`,
	/// `{bbox}`.
	pub url: String,
	pub grid: String,
	#[serde(default)]
	pub coverage: Option<String>,
	#[serde(default)]
	pub transparent: bool,
	#[serde(default)]
	pub http: HttpRequestConfig,
	#[serde(default)]
	pub seed_only: bool,
	#[serde(default)]
	pub min_res: Option<f64>,
	#[serde(default)]
	pub max_res: Option<f64>,
	#[serde(default)]
	pub on_error: Vec<OnErrorRule>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProcessSourceConfig {
	pub command: String,
	#[serde(default)]
	pub args: Vec<String>,
	#[serde(default = "default_scale_factor")]
	pub scale_factor: f64,
}

fn default_scale_factor() -> f64 {
	1.0
}

#[derive(Debug, Clone, Deserialize)]
pub struct DebugSourceConfig {
	#[serde(default)]
	pub grid_color: Option<String>,
}

/// As-loaded shape of a `Source` record (spec §3/§4.5/§6), tagged by the
/// `type` field the loader attaches.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SourceConfig {
	Wms(WmsSourceConfig),
	Tile(TileSourceConfig),
	Process(ProcessSourceConfig),
	Debug(DebugSourceConfig),
	Blank,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_tagged_wms_source() {
		let yaml = "
type: wms
url: https://example.org/wms
layers: base
format: image/png
concurrent_requests: 4
";
		let cfg: SourceConfig = serde_yaml_ng::from_str(yaml).unwrap();
		match cfg {
			SourceConfig::Wms(wms) => {
				assert_eq!(wms.layers, "base");
				assert_eq!(wms.concurrent_requests, 4);
			}
			_ => panic!("expected Wms"),
		}
	}

	#[test]
	fn parses_blank_source_without_fields() {
		let cfg: SourceConfig = serde_yaml_ng::from_str("type: blank").unwrap();
		assert!(matches!(cfg, SourceConfig::Blank));
	}
}
