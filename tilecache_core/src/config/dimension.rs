use serde::Deserialize;

/// As-loaded shape of a `Dimension` record (spec §3, Dimension).
#[derive(Debug, Clone, Deserialize)]
pub struct DimensionConfig {
	pub name: String,
	pub values: Vec<String>,
	pub default: String,
}
