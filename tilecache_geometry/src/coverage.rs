use crate::index::PolygonIndex;
use crate::{load, srs};
use anyhow::{Result, ensure};
use geo_types::{Coord, MultiPolygon, Rect};
use std::path::Path;
use std::sync::Arc;
use tilecache_core::GroundBBox;
use tilecache_image::Image;

enum Geometry {
	Bbox(GroundBBox),
	Polygon { polygons: MultiPolygon<f64>, index: Arc<PolygonIndex> },
	Intersection(Vec<Coverage>),
	Union(Vec<Coverage>),
}

/// An immutable geometric predicate with an SRS (spec §3/§4.3): bbox, WKT
/// polygon/multipolygon, feature file, or a recursive boolean combination.
pub struct Coverage {
	srs: String,
	geometry: Geometry,
}

impl Coverage {
	pub fn bbox(srs: impl Into<String>, bbox: GroundBBox) -> Self {
		Self { srs: srs.into(), geometry: Geometry::Bbox(bbox) }
	}

	pub fn polygon(srs: impl Into<String>, polygons: MultiPolygon<f64>) -> Self {
		let index = Arc::new(PolygonIndex::build(&polygons));
		Self { srs: srs.into(), geometry: Geometry::Polygon { polygons, index } }
	}

	pub fn from_geojson_file(srs: impl Into<String>, path: impl AsRef<Path>) -> Result<Self> {
		Ok(Self::polygon(srs, load::load_geojson(path.as_ref())?))
	}

	pub fn from_shapefile(srs: impl Into<String>, path: impl AsRef<Path>) -> Result<Self> {
		Ok(Self::polygon(srs, load::load_shapefile(path.as_ref())?))
	}

	pub fn intersection(parts: Vec<Coverage>) -> Result<Self> {
		ensure!(!parts.is_empty(), "intersection coverage needs at least one part");
		let srs = parts[0].srs.clone();
		Ok(Self { srs, geometry: Geometry::Intersection(parts) })
	}

	pub fn union(parts: Vec<Coverage>) -> Result<Self> {
		ensure!(!parts.is_empty(), "union coverage needs at least one part");
		let srs = parts[0].srs.clone();
		Ok(Self { srs, geometry: Geometry::Union(parts) })
	}

	pub fn srs(&self) -> &str {
		&self.srs
	}

	/// Reprojects this coverage (and, recursively, any boolean-combination
	/// children) into `target_srs`.
	pub fn transform_to(&self, target_srs: &str) -> Result<Coverage> {
		if self.srs == target_srs {
			return self.clone_shallow();
		}
		let geometry = match &self.geometry {
			Geometry::Bbox(bbox) => Geometry::Bbox(srs::transform_bbox(&self.srs, target_srs, bbox)?),
			Geometry::Polygon { polygons, .. } => {
				let transformed = transform_multipolygon(&self.srs, target_srs, polygons)?;
				let index = Arc::new(PolygonIndex::build(&transformed));
				Geometry::Polygon { polygons: transformed, index }
			}
			Geometry::Intersection(parts) => Geometry::Intersection(parts.iter().map(|p| p.transform_to(target_srs)).collect::<Result<_>>()?),
			Geometry::Union(parts) => Geometry::Union(parts.iter().map(|p| p.transform_to(target_srs)).collect::<Result<_>>()?),
		};
		Ok(Coverage { srs: target_srs.to_string(), geometry })
	}

	fn clone_shallow(&self) -> Result<Coverage> {
		let geometry = match &self.geometry {
			Geometry::Bbox(bbox) => Geometry::Bbox(*bbox),
			Geometry::Polygon { polygons, index } => Geometry::Polygon { polygons: polygons.clone(), index: index.clone() },
			Geometry::Intersection(parts) => Geometry::Intersection(parts.iter().map(Coverage::clone_shallow).collect::<Result<_>>()?),
			Geometry::Union(parts) => Geometry::Union(parts.iter().map(Coverage::clone_shallow).collect::<Result<_>>()?),
		};
		Ok(Coverage { srs: self.srs.clone(), geometry })
	}

	/// True if `bbox` (given in `bbox_srs`) overlaps this coverage at all.
	pub fn intersects(&self, bbox: &GroundBBox, bbox_srs: &str) -> Result<bool> {
		let local = srs::transform_bbox(bbox_srs, &self.srs, bbox)?;
		Ok(self.intersects_local(&local))
	}

	/// True if `bbox` (given in `bbox_srs`) is entirely inside this coverage.
	pub fn contains(&self, bbox: &GroundBBox, bbox_srs: &str) -> Result<bool> {
		let local = srs::transform_bbox(bbox_srs, &self.srs, bbox)?;
		Ok(self.contains_local(&local))
	}

	fn intersects_local(&self, bbox: &GroundBBox) -> bool {
		match &self.geometry {
			Geometry::Bbox(own) => own.intersects(bbox),
			Geometry::Polygon { index, .. } => index.intersects_rect(&to_rect(bbox)),
			Geometry::Intersection(parts) => parts.iter().all(|p| p.intersects_local(bbox)),
			Geometry::Union(parts) => parts.iter().any(|p| p.intersects_local(bbox)),
		}
	}

	fn contains_local(&self, bbox: &GroundBBox) -> bool {
		match &self.geometry {
			Geometry::Bbox(own) => own.contains_bbox(bbox),
			Geometry::Polygon { index, .. } => index.contains_rect(&to_rect(bbox)),
			Geometry::Intersection(parts) => parts.iter().all(|p| p.contains_local(bbox)),
			Geometry::Union(parts) => parts.iter().any(|p| p.contains_local(bbox)),
		}
	}

	fn contains_point_local(&self, x: f64, y: f64) -> bool {
		match &self.geometry {
			Geometry::Bbox(own) => own.contains_point(x, y),
			Geometry::Polygon { index, .. } => index.contains_point(x, y),
			Geometry::Intersection(parts) => parts.iter().all(|p| p.contains_point_local(x, y)),
			Geometry::Union(parts) => parts.iter().any(|p| p.contains_point_local(x, y)),
		}
	}

	/// Clears the alpha of every pixel of `image` whose ground position
	/// (within `bbox`, given in `bbox_srs`) falls outside this coverage
	/// (spec §4.3, §8 coverage clip).
	pub fn clip(&self, image: &mut Image, bbox: &GroundBBox, bbox_srs: &str) -> Result<()> {
		let local_bbox = srs::transform_bbox(bbox_srs, &self.srs, bbox)?;
		let (width, height) = (image.width(), image.height());
		let px_w = local_bbox.width() / f64::from(width);
		let px_h = local_bbox.height() / f64::from(height);

		for py in 0..height {
			let y = local_bbox.y_max - (f64::from(py) + 0.5) * px_h;
			for px in 0..width {
				let x = local_bbox.x_min + (f64::from(px) + 0.5) * px_w;
				if !self.contains_point_local(x, y) {
					image.buffer_mut().get_pixel_mut(px, py).0[3] = 0;
				}
			}
		}
		Ok(())
	}
}

fn to_rect(bbox: &GroundBBox) -> Rect<f64> {
	Rect::new(Coord { x: bbox.x_min, y: bbox.y_min }, Coord { x: bbox.x_max, y: bbox.y_max })
}

fn transform_multipolygon(from: &str, to: &str, multi: &MultiPolygon<f64>) -> Result<MultiPolygon<f64>> {
	use geo_types::{LineString, Polygon};

	let transform_ring = |ring: &LineString<f64>| -> Result<LineString<f64>> {
		let coords = ring
			.coords()
			.map(|c| srs::transform_point(from, to, c.x, c.y).map(|(x, y)| Coord { x, y }))
			.collect::<Result<Vec<_>>>()?;
		Ok(LineString(coords))
	};

	let polygons = multi
		.0
		.iter()
		.map(|polygon| -> Result<Polygon<f64>> {
			let exterior = transform_ring(polygon.exterior())?;
			let interiors = polygon.interiors().iter().map(transform_ring).collect::<Result<Vec<_>>>()?;
			Ok(Polygon::new(exterior, interiors))
		})
		.collect::<Result<Vec<_>>>()?;

	Ok(MultiPolygon(polygons))
}

#[cfg(test)]
mod tests {
	use super::*;
	use geo_types::polygon;
	use tilecache_image::Mode;

	fn square(x0: f64, y0: f64, x1: f64, y1: f64) -> MultiPolygon<f64> {
		MultiPolygon(vec![polygon![
			(x: x0, y: y0),
			(x: x1, y: y0),
			(x: x1, y: y1),
			(x: x0, y: y1),
			(x: x0, y: y0),
		]])
	}

	#[test]
	fn bbox_coverage_intersects_overlapping_bbox() {
		let coverage = Coverage::bbox("EPSG:3857", GroundBBox::new(0.0, 0.0, 10.0, 10.0).unwrap());
		let request = GroundBBox::new(5.0, 5.0, 15.0, 15.0).unwrap();
		assert!(coverage.intersects(&request, "EPSG:3857").unwrap());
	}

	#[test]
	fn bbox_coverage_does_not_intersect_disjoint_bbox() {
		let coverage = Coverage::bbox("EPSG:3857", GroundBBox::new(0.0, 0.0, 10.0, 10.0).unwrap());
		let request = GroundBBox::new(100.0, 100.0, 110.0, 110.0).unwrap();
		assert!(!coverage.intersects(&request, "EPSG:3857").unwrap());
	}

	#[test]
	fn polygon_coverage_contains_checks_full_overlap() {
		let coverage = Coverage::polygon("EPSG:3857", square(0.0, 0.0, 100.0, 100.0));
		let inside = GroundBBox::new(10.0, 10.0, 20.0, 20.0).unwrap();
		let straddling = GroundBBox::new(90.0, 90.0, 110.0, 110.0).unwrap();
		assert!(coverage.contains(&inside, "EPSG:3857").unwrap());
		assert!(!coverage.contains(&straddling, "EPSG:3857").unwrap());
	}

	#[test]
	fn union_is_satisfied_if_any_part_matches() {
		let a = Coverage::bbox("EPSG:3857", GroundBBox::new(0.0, 0.0, 10.0, 10.0).unwrap());
		let b = Coverage::bbox("EPSG:3857", GroundBBox::new(100.0, 100.0, 110.0, 110.0).unwrap());
		let union = Coverage::union(vec![a, b]).unwrap();
		let request = GroundBBox::new(100.0, 100.0, 105.0, 105.0).unwrap();
		assert!(union.intersects(&request, "EPSG:3857").unwrap());
	}

	#[test]
	fn intersection_requires_every_part_to_match() {
		let a = Coverage::bbox("EPSG:3857", GroundBBox::new(0.0, 0.0, 10.0, 10.0).unwrap());
		let b = Coverage::bbox("EPSG:3857", GroundBBox::new(5.0, 5.0, 20.0, 20.0).unwrap());
		let intersection = Coverage::intersection(vec![a, b]).unwrap();
		let inside_both = GroundBBox::new(6.0, 6.0, 8.0, 8.0).unwrap();
		let inside_a_only = GroundBBox::new(1.0, 1.0, 3.0, 3.0).unwrap();
		assert!(intersection.intersects(&inside_both, "EPSG:3857").unwrap());
		assert!(!intersection.intersects(&inside_a_only, "EPSG:3857").unwrap());
	}

	#[test]
	fn clip_clears_alpha_outside_coverage() {
		let coverage = Coverage::bbox("EPSG:3857", GroundBBox::new(0.0, 0.0, 5.0, 10.0).unwrap());
		let bbox = GroundBBox::new(0.0, 0.0, 10.0, 10.0).unwrap();
		let mut image = Image::new(10, 10, Mode::Rgba);
		for p in image.buffer_mut().pixels_mut() {
			p.0[3] = 255;
		}
		coverage.clip(&mut image, &bbox, "EPSG:3857").unwrap();
		assert_eq!(image.buffer().get_pixel(1, 5).0[3], 255);
		assert_eq!(image.buffer().get_pixel(8, 5).0[3], 0);
	}
}
