use serde::Deserialize;
use std::collections::HashMap;

/// A named entry a layer composites bottom-to-top: either a source or a
/// cache, referenced by name (spec §3, Layer).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayerEntryConfig {
	Source(String),
	Cache(String),
}

/// As-loaded shape of a `Layer` record (spec §3/§6). Recursive: a layer may
/// have child layers forming a tree; cycles are a configuration error
/// detected at load time (spec §9), not by this record type.
#[derive(Debug, Clone, Deserialize)]
pub struct LayerConfig {
	pub name: String,
	#[serde(default)]
	pub title: Option<String>,
	#[serde(default)]
	pub sources: Vec<LayerEntryConfig>,
	#[serde(default)]
	pub min_res: Option<f64>,
	#[serde(default)]
	pub max_res: Option<f64>,
	#[serde(default)]
	pub metadata: HashMap<String, String>,
	#[serde(default)]
	pub layers: Vec<LayerConfig>,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_nested_layer_tree() {
		let yaml = "
name: root
title: Root layer
sources:
  - !source base_wms
  - !cache overlay_cache
layers:
  - name: child
    sources: []
";
		let cfg: LayerConfig = serde_yaml_ng::from_str(yaml).unwrap();
		assert_eq!(cfg.layers.len(), 1);
		assert_eq!(cfg.layers[0].name, "child");
		assert_eq!(cfg.sources.len(), 2);
	}
}
