//! Pluggable tile storage backends and meta-tile locking (spec §4.4, §5, §6).

pub mod backends;
mod layout;
mod lock;
mod storage;
mod tile;

pub use layout::DirectoryLayout;
pub use lock::{LockManager, MetaTileLock};
pub use storage::{Storage, StoredTile};
pub use tile::{DimensionValues, Tile, TileCoord};
