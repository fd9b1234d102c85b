//! Spatial reference system transforms, used by [`crate::Coverage::transform_to`]
//! and by map layers reprojecting a request into a cache's grid SRS.

use anyhow::{Context, Result};
use proj::Proj;
use tilecache_core::GroundBBox;
use tilecache_derive::context;

#[context("building SRS transform {from} -> {to}")]
fn transformer(from: &str, to: &str) -> Result<Proj> {
	Proj::new_known_crs(from, to, None).with_context(|| format!("PROJ does not recognize '{from}' or '{to}'"))
}

/// Transforms a single `(x, y)` point from `from` to `to`. A no-op when the
/// two SRS strings are identical.
#[context("transforming point ({x}, {y}) from {from} to {to}")]
pub fn transform_point(from: &str, to: &str, x: f64, y: f64) -> Result<(f64, f64)> {
	if from == to {
		return Ok((x, y));
	}
	let proj = transformer(from, to)?;
	proj.convert((x, y)).context("PROJ transform failed")
}

/// Transforms a bounding box by projecting its four corners and taking their
/// envelope. This is exact for axis-aligned transforms (e.g. unit scaling)
/// and a reasonable approximation for general projections over small boxes,
/// matching how map tile proxies typically reproject query bboxes.
pub fn transform_bbox(from: &str, to: &str, bbox: &GroundBBox) -> Result<GroundBBox> {
	if from == to {
		return Ok(*bbox);
	}
	let proj = transformer(from, to)?;
	let corners = [
		(bbox.x_min, bbox.y_min),
		(bbox.x_min, bbox.y_max),
		(bbox.x_max, bbox.y_min),
		(bbox.x_max, bbox.y_max),
	];
	let mut transformed = corners.into_iter().map(|(x, y)| proj.convert((x, y)).context("PROJ transform failed"));
	let first = transformed.next().expect("four corners")?;
	let mut out = GroundBBox::from_corners(first.0, first.1, first.0, first.1);
	for corner in transformed {
		let (x, y) = corner?;
		out = out.extended(&GroundBBox::from_corners(x, y, x, y));
	}
	Ok(out)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn identity_transform_is_a_no_op() {
		let (x, y) = transform_point("EPSG:3857", "EPSG:3857", 12.0, 34.0).unwrap();
		assert_eq!((x, y), (12.0, 34.0));
	}

	#[test]
	fn identity_bbox_transform_is_a_no_op() {
		let bbox = GroundBBox::new(0.0, 0.0, 10.0, 10.0).unwrap();
		let out = transform_bbox("EPSG:4326", "EPSG:4326", &bbox).unwrap();
		assert_eq!(out, bbox);
	}
}
