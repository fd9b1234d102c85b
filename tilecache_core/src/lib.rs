//! Grid, bounding-box, compression and config-record types shared across
//! the tilecache workspace.

pub mod config;
mod dimension;
mod environment;
mod error;
mod geometry_basic;
pub mod grid;
mod refresh;

pub mod blob;
pub mod compression;

pub use blob::Blob;
pub use dimension::Dimension;
pub use environment::{Environment, HttpDefaults, HttpMethod, SrsDefaults};
pub use error::{TileError, TileErrorKind, error_kind, tile_error};
pub use geometry_basic::{GroundBBox, IndexRange, Size};
pub use grid::{AffectedTiles, Grid, Origin};
pub use refresh::{RefreshPolicy, absolute_from_rfc3339};
