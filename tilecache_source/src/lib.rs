//! Upstream tile sources (spec §4.5): WMS, URL-templated tile servers,
//! external renderer processes, and the debug/blank calibration sources,
//! with shared per-host concurrency limiting and error-response policy.

mod blank;
mod debug;
mod host_limiter;
mod on_error;
mod process;
mod source;
pub mod template;
mod tile;
mod wms;

pub use blank::BlankSource;
pub use debug::DebugSource;
pub use host_limiter::{HostLimiter, HostPermit};
pub use on_error::{OnErrorFallback, OnErrorPolicy, fallback_error};
pub use process::ProcessSource;
pub use source::{ErrorResponse, MapRequest, Source, get_map_checked};
pub use tile::{TileAddress, TileSource};
pub use wms::{Credentials, HttpMethod, WmsSource};
