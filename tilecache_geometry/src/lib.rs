//! Geometric coverages (bounding box, polygon, feature file, and recursive
//! boolean combinations) with SRS transforms and image-alpha clipping.

mod coverage;
mod index;
mod load;
pub mod srs;

pub use coverage::Coverage;
pub use load::{load_geojson, load_shapefile};
