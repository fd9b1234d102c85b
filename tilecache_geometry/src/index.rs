//! R-tree index over a [`MultiPolygon`]'s individual rings, used to skip
//! the expensive point-in-polygon/polygon-intersects test for rings whose
//! bounding box cannot possibly match (spec §4.3, feature-file coverages).

use geo::{Contains, Intersects};
use geo_types::{Coord, MultiPolygon, Point, Polygon, Rect};
use rstar::{AABB, RTree, RTreeObject};

struct IndexedPolygon(Polygon<f64>);

impl RTreeObject for IndexedPolygon {
	type Envelope = AABB<[f64; 2]>;

	fn envelope(&self) -> Self::Envelope {
		let rect = bounding_rect(&self.0);
		AABB::from_corners([rect.min().x, rect.min().y], [rect.max().x, rect.max().y])
	}
}

fn bounding_rect(polygon: &Polygon<f64>) -> Rect<f64> {
	use geo::BoundingRect;
	polygon.bounding_rect().unwrap_or(Rect::new(Coord { x: 0.0, y: 0.0 }, Coord { x: 0.0, y: 0.0 }))
}

/// A bulk-loaded spatial index over the polygons of a single coverage,
/// accelerating `contains(point)` and `intersects(bbox)` queries.
pub struct PolygonIndex {
	tree: RTree<IndexedPolygon>,
}

impl PolygonIndex {
	pub fn build(multi: &MultiPolygon<f64>) -> Self {
		let entries = multi.0.iter().cloned().map(IndexedPolygon).collect();
		Self { tree: RTree::bulk_load(entries) }
	}

	pub fn contains_point(&self, x: f64, y: f64) -> bool {
		let point = Point::new(x, y);
		let query = AABB::from_corners([x, y], [x, y]);
		self.tree.locate_in_envelope_intersecting(&query).any(|candidate| candidate.0.contains(&point))
	}

	pub fn intersects_rect(&self, rect: &Rect<f64>) -> bool {
		let query = AABB::from_corners([rect.min().x, rect.min().y], [rect.max().x, rect.max().y]);
		self.tree.locate_in_envelope_intersecting(&query).any(|candidate| candidate.0.intersects(rect))
	}

	pub fn contains_rect(&self, rect: &Rect<f64>) -> bool {
		let query = AABB::from_corners([rect.min().x, rect.min().y], [rect.max().x, rect.max().y]);
		self.tree.locate_in_envelope_intersecting(&query).any(|candidate| candidate.0.contains(rect))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use geo_types::polygon;

	fn square(x0: f64, y0: f64, x1: f64, y1: f64) -> Polygon<f64> {
		polygon![
			(x: x0, y: y0),
			(x: x1, y: y0),
			(x: x1, y: y1),
			(x: x0, y: y1),
			(x: x0, y: y0),
		]
	}

	#[test]
	fn contains_point_inside_one_of_several_polygons() {
		let index = PolygonIndex::build(&MultiPolygon(vec![square(0.0, 0.0, 10.0, 10.0), square(100.0, 100.0, 110.0, 110.0)]));
		assert!(index.contains_point(5.0, 5.0));
		assert!(index.contains_point(105.0, 105.0));
		assert!(!index.contains_point(50.0, 50.0));
	}

	#[test]
	fn intersects_rect_true_for_overlapping_box() {
		let index = PolygonIndex::build(&MultiPolygon(vec![square(0.0, 0.0, 10.0, 10.0)]));
		let overlapping = Rect::new(Coord { x: 5.0, y: 5.0 }, Coord { x: 15.0, y: 15.0 });
		let disjoint = Rect::new(Coord { x: 50.0, y: 50.0 }, Coord { x: 60.0, y: 60.0 });
		assert!(index.intersects_rect(&overlapping));
		assert!(!index.intersects_rect(&disjoint));
	}
}
