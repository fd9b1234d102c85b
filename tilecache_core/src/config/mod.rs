//! Configuration record types consumed from the YAML loader collaborator
//! (spec §1/§6). The loader itself — recursive `base:` merging, anchors,
//! schema validation — is out of scope; the engine only ever sees these
//! already-resolved, serde-derived records.

mod cache;
mod dimension;
mod environment;
mod grid;
mod layer;
mod source;

pub use cache::{
	CacheConfig, ImageConfig, RefreshBeforeConfig, ResamplingMethod, StorageConfig, WatermarkConfig, WatermarkSpacing,
};
pub use dimension::DimensionConfig;
pub use environment::{GlobalsConfig, HttpGlobalsConfig, SrsGlobalsConfig};
pub use grid::{GridConfig, OriginConfig, ResolutionSpec};
pub use layer::{LayerConfig, LayerEntryConfig};
pub use source::{
	DebugSourceConfig, HttpRequestConfig, OnErrorResponse, OnErrorRule, ProcessSourceConfig, SourceConfig,
	TileSourceConfig, WmsSourceConfig,
};
