//! A caching, transforming map-tile proxy: sources produce imagery, caches
//! persist it by grid coordinate, and layers composite sources and caches
//! bottom-to-top before handing the result to whichever external interface
//! (WMS, WMTS, TMS, slippy-map) asked for it.
//!
//! ## Feature Flags
//!
//! - **cli** *(default)*: enables the `tilecache` binary's HTTP server
//!   ([`server`]) built on `axum`.

pub mod build;
pub mod color;
pub mod config;
pub mod dispatcher;
pub mod manager;
pub mod map_layer;

#[cfg(feature = "cli")]
pub mod server;

pub use tilecache_core as core;
pub use tilecache_geometry as geometry;
pub use tilecache_image as image;
pub use tilecache_source as source;
pub use tilecache_storage as storage;
