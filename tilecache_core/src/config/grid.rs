use serde::Deserialize;

/// The grid-origin corner as it appears in configuration (spec §6,
/// `grid.origin ∈ {ll/sw, ul/nw}`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OriginConfig {
	#[serde(alias = "sw")]
	Ll,
	#[serde(alias = "nw")]
	Ul,
}

/// How a grid's resolution list is specified in configuration. The loader
/// (out of scope) is expected to have already resolved `min_res`/`max_res`/
/// `num_levels` combinations into one of these two forms by the time the
/// engine sees it.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ResolutionSpec {
	/// An explicit, already-ordered resolution list.
	List(Vec<f64>),
	/// Start at `min_res` (or the grid bbox's own full-extent resolution)
	/// and repeatedly divide by `factor` for `num_levels` steps. `factor`
	/// of `0.0` is the conventional placeholder for "the square root of 2"
	/// used by some legacy quarter-step grids.
	Factor { factor: f64, num_levels: u32 },
}

/// The as-loaded shape of a grid record (spec §6, `grids`). The engine
/// converts this into a [`crate::grid::Grid`] after resolving
/// [`ResolutionSpec`] into a concrete list; that conversion lives with the
/// layer-tree builder, not here, since it requires SRS-aware bbox handling
/// this crate intentionally does not own.
#[derive(Debug, Clone, Deserialize)]
pub struct GridConfig {
	pub srs: String,
	pub bbox: [f64; 4],
	#[serde(default)]
	pub bbox_srs: Option<String>,
	pub tile_size: (u32, u32),
	pub res: ResolutionSpec,
	#[serde(default)]
	pub origin: Option<OriginConfig>,
	#[serde(default)]
	pub threshold_res: Vec<f64>,
	#[serde(default = "default_stretch_factor")]
	pub stretch_factor: f64,
	#[serde(default = "default_max_shrink_factor")]
	pub max_shrink_factor: f64,
	/// Name of another grid record this one is derived from, mirroring
	/// `grid.base` in configuration. Resolved by the loader, not here.
	#[serde(default)]
	pub base: Option<String>,
}

fn default_stretch_factor() -> f64 {
	1.15
}

fn default_max_shrink_factor() -> f64 {
	4.0
}
