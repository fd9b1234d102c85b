use serde::Deserialize;
use std::collections::HashMap;

/// As-loaded shape of `globals.http` (spec §6).
#[derive(Debug, Clone, Deserialize, Default)]
pub struct HttpGlobalsConfig {
	#[serde(default)]
	pub client_timeout: Option<f64>,
	#[serde(default)]
	pub ssl_ca_certs: Option<String>,
	#[serde(default)]
	pub ssl_no_cert_checks: bool,
	#[serde(default)]
	pub method: Option<String>,
	#[serde(default)]
	pub headers: HashMap<String, String>,
	#[serde(default)]
	pub access_control_allow_origin: Option<String>,
}

/// As-loaded shape of `globals.srs` (spec §6).
#[derive(Debug, Clone, Deserialize, Default)]
pub struct SrsGlobalsConfig {
	#[serde(default)]
	pub proj_data_dir: Option<String>,
	#[serde(default)]
	pub axis_order_ne: Vec<String>,
	#[serde(default)]
	pub axis_order_en: Vec<String>,
}

/// As-loaded shape of the `globals` configuration group.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct GlobalsConfig {
	#[serde(default)]
	pub http: HttpGlobalsConfig,
	#[serde(default)]
	pub srs: SrsGlobalsConfig,
}
