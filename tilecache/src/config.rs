//! The top-level, already-loaded configuration document the layer-tree
//! builder consumes (spec §6): named grids/caches/sources plus a layer
//! tree and global defaults. The YAML loader that produces this document
//! (recursive `base:` merging, anchors, schema validation) is out of
//! scope; this struct is only the shape the engine deserializes.

use serde::Deserialize;
use std::collections::HashMap;
use tilecache_core::config::{CacheConfig, DimensionConfig, GlobalsConfig, GridConfig, LayerConfig, SourceConfig};

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Document {
	#[serde(default)]
	pub grids: HashMap<String, GridConfig>,
	#[serde(default)]
	pub caches: HashMap<String, CacheConfig>,
	#[serde(default)]
	pub sources: HashMap<String, SourceConfig>,
	#[serde(default)]
	pub layers: Vec<LayerConfig>,
	#[serde(default)]
	pub dimensions: Vec<DimensionConfig>,
	#[serde(default)]
	pub globals: GlobalsConfig,
}
