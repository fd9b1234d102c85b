use anyhow::{Result, ensure};
use tilecache_derive::context;

/// An axis-aligned bounding box in the ground units of some SRS.
///
/// Unlike a geographic bbox clamped to `[-180,180] x [-90,90]`, a
/// `GroundBBox` carries no range restriction: it is used for grids in
/// projected SRSs (meters) as much as geographic ones (degrees).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GroundBBox {
	pub x_min: f64,
	pub y_min: f64,
	pub x_max: f64,
	pub y_max: f64,
}

impl GroundBBox {
	#[context("building bbox ({x_min}, {y_min}, {x_max}, {y_max})")]
	pub fn new(x_min: f64, y_min: f64, x_max: f64, y_max: f64) -> Result<Self> {
		Self { x_min, y_min, x_max, y_max }.checked()
	}

	/// Builds a bbox from two arbitrary corners, sorting min/max per axis.
	/// Never fails; used for reverse-reprojected polygons where caller
	/// cannot guarantee corner order.
	pub fn from_corners(x0: f64, y0: f64, x1: f64, y1: f64) -> Self {
		Self {
			x_min: x0.min(x1),
			y_min: y0.min(y1),
			x_max: x0.max(x1),
			y_max: y0.max(y1),
		}
	}

	fn checked(self) -> Result<Self> {
		ensure!(self.x_min.is_finite(), "x_min ({}) must be finite", self.x_min);
		ensure!(self.y_min.is_finite(), "y_min ({}) must be finite", self.y_min);
		ensure!(self.x_max.is_finite(), "x_max ({}) must be finite", self.x_max);
		ensure!(self.y_max.is_finite(), "y_max ({}) must be finite", self.y_max);
		ensure!(self.x_min <= self.x_max, "x_min ({}) must be <= x_max ({})", self.x_min, self.x_max);
		ensure!(self.y_min <= self.y_max, "y_min ({}) must be <= y_max ({})", self.y_min, self.y_max);
		Ok(self)
	}

	pub fn as_tuple(&self) -> (f64, f64, f64, f64) {
		(self.x_min, self.y_min, self.x_max, self.y_max)
	}

	pub fn width(&self) -> f64 {
		self.x_max - self.x_min
	}

	pub fn height(&self) -> f64 {
		self.y_max - self.y_min
	}

	pub fn center(&self) -> (f64, f64) {
		((self.x_min + self.x_max) / 2.0, (self.y_min + self.y_max) / 2.0)
	}

	/// Grows `self` to also cover `other`.
	pub fn extend(&mut self, other: &GroundBBox) {
		self.x_min = self.x_min.min(other.x_min);
		self.y_min = self.y_min.min(other.y_min);
		self.x_max = self.x_max.max(other.x_max);
		self.y_max = self.y_max.max(other.y_max);
	}

	#[must_use]
	pub fn extended(mut self, other: &GroundBBox) -> GroundBBox {
		self.extend(other);
		self
	}

	pub fn intersects(&self, other: &GroundBBox) -> bool {
		self.x_min < other.x_max && self.x_max > other.x_min && self.y_min < other.y_max && self.y_max > other.y_min
	}

	/// Returns `None` when the two boxes don't overlap (or only touch at an
	/// edge, which carries zero area and is not useful for tile math).
	pub fn intersection(&self, other: &GroundBBox) -> Option<GroundBBox> {
		let x_min = self.x_min.max(other.x_min);
		let y_min = self.y_min.max(other.y_min);
		let x_max = self.x_max.min(other.x_max);
		let y_max = self.y_max.min(other.y_max);
		if x_min < x_max && y_min < y_max {
			Some(GroundBBox { x_min, y_min, x_max, y_max })
		} else {
			None
		}
	}

	pub fn contains_point(&self, x: f64, y: f64) -> bool {
		x >= self.x_min && x <= self.x_max && y >= self.y_min && y <= self.y_max
	}

	pub fn contains_bbox(&self, other: &GroundBBox) -> bool {
		self.x_min <= other.x_min && self.y_min <= other.y_min && self.x_max >= other.x_max && self.y_max >= other.y_max
	}

	/// Expands the bbox outward by `dx`/`dy` on every side. Used to add a
	/// pixel margin around reprojected requests.
	#[must_use]
	pub fn buffered(&self, dx: f64, dy: f64) -> GroundBBox {
		GroundBBox {
			x_min: self.x_min - dx,
			y_min: self.y_min - dy,
			x_max: self.x_max + dx,
			y_max: self.y_max + dy,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use pretty_assertions::assert_eq;

	#[test]
	fn new_rejects_inverted_bounds() {
		assert!(GroundBBox::new(10.0, 0.0, 0.0, 10.0).is_err());
	}

	#[test]
	fn from_corners_sorts_regardless_of_order() {
		let bbox = GroundBBox::from_corners(10.0, 10.0, -5.0, -5.0);
		assert_eq!(bbox.as_tuple(), (-5.0, -5.0, 10.0, 10.0));
	}

	#[test]
	fn extend_grows_to_cover_both() {
		let mut a = GroundBBox::new(-10.0, -5.0, 10.0, 5.0).unwrap();
		let b = GroundBBox::new(-12.0, -3.0, 8.0, 6.0).unwrap();
		a.extend(&b);
		assert_eq!(a.as_tuple(), (-12.0, -5.0, 10.0, 6.0));
	}

	#[test]
	fn intersection_of_disjoint_boxes_is_none() {
		let a = GroundBBox::new(0.0, 0.0, 1.0, 1.0).unwrap();
		let b = GroundBBox::new(2.0, 2.0, 3.0, 3.0).unwrap();
		assert!(a.intersection(&b).is_none());
		assert!(!a.intersects(&b));
	}

	#[test]
	fn intersection_of_overlapping_boxes() {
		let a = GroundBBox::new(0.0, 0.0, 10.0, 10.0).unwrap();
		let b = GroundBBox::new(5.0, -5.0, 15.0, 5.0).unwrap();
		let i = a.intersection(&b).unwrap();
		assert_eq!(i.as_tuple(), (5.0, 0.0, 10.0, 5.0));
	}

	#[test]
	fn buffered_expands_every_side() {
		let a = GroundBBox::new(0.0, 0.0, 10.0, 10.0).unwrap();
		let b = a.buffered(1.0, 2.0);
		assert_eq!(b.as_tuple(), (-1.0, -2.0, 11.0, 12.0));
	}
}
