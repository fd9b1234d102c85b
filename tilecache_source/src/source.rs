use anyhow::Result;
use async_trait::async_trait;
use tilecache_core::{GroundBBox, Size};
use tilecache_geometry::Coverage;
use tilecache_image::{Image, Mode};
use tilecache_storage::DimensionValues;

/// A request to a [`Source`]: the ground bbox and pixel size to render at,
/// the request SRS, an optional requested format hint, and the dimension
/// values in effect (spec §4.5, §8 scenario 6) so a source can fold them
/// into the outgoing upstream request.
#[derive(Debug, Clone)]
pub struct MapRequest {
	pub bbox: GroundBBox,
	pub size: Size,
	pub srs: String,
	pub format: Option<String>,
	pub dims: DimensionValues,
}

/// What to do when a source call fails in a way `on_error` recognizes
/// (spec §4.5, §7): substitute a fixed response and optionally cache it.
#[derive(Debug, Clone)]
pub struct ErrorResponse {
	pub color: Option<[u8; 4]>,
	pub cache: bool,
	pub authorize_stale: bool,
}

impl ErrorResponse {
	pub fn transparent() -> Self {
		Self { color: None, cache: false, authorize_stale: false }
	}
}

/// Every tile/map source answers `getMap` with an image or a typed
/// failure (spec §4.5).
#[async_trait]
pub trait Source: Send + Sync {
	async fn get_map(&self, request: &MapRequest) -> Result<Image>;

	/// The SRSs this source can natively answer in, used by
	/// [`crate::wms::WmsSource`]'s SRS negotiation. `None` means "any".
	fn supported_srs(&self) -> Option<&[String]> {
		None
	}

	/// Resolution bounds outside which the source should not be called at
	/// all (caller returns blank instead, spec §4.6 step 3b).
	fn resolution_bounds(&self) -> (f64, f64) {
		(0.0, f64::INFINITY)
	}

	/// The area this source is allowed to answer for (spec §4.3, §4.5).
	/// `None` means unrestricted.
	fn coverage(&self) -> Option<&Coverage> {
		None
	}

	/// True for sources configured `seed_only`: answered only during
	/// explicit seeding, never for live traffic (spec §4.5 Blank source).
	fn seed_only(&self) -> bool {
		false
	}
}

pub(crate) fn request_resolution(request: &MapRequest) -> f64 {
	(request.bbox.width() / f64::from(request.size.width.max(1))).max(request.bbox.height() / f64::from(request.size.height.max(1)))
}

/// Calls `source.get_map`, but short-circuits to a transparent image with
/// no upstream I/O when the request's resolution falls outside the
/// source's bounds or its bbox misses the source's coverage (spec §4.3,
/// §4.5, §4.6 step 3b). Every caller that invokes a [`Source`] on behalf
/// of a configured cache or layer entry should go through this instead of
/// calling `get_map` directly.
pub async fn get_map_checked(source: &dyn Source, request: &MapRequest) -> Result<Image> {
	let (min_res, max_res) = source.resolution_bounds();
	let resolution = request_resolution(request);
	if resolution < min_res || resolution > max_res {
		return Ok(Image::new(request.size.width, request.size.height, Mode::Rgba));
	}

	if let Some(coverage) = source.coverage() {
		if !coverage.intersects(&request.bbox, &request.srs)? {
			return Ok(Image::new(request.size.width, request.size.height, Mode::Rgba));
		}
	}

	source.get_map(request).await
}

#[cfg(test)]
mod tests {
	use super::*;
	use async_trait::async_trait;

	fn request() -> MapRequest {
		MapRequest {
			bbox: GroundBBox::new(0.0, 0.0, 100.0, 50.0).unwrap(),
			size: Size::new(100, 100),
			srs: "EPSG:3857".into(),
			format: None,
			dims: DimensionValues::new(),
		}
	}

	#[test]
	fn request_resolution_is_the_coarser_axis() {
		assert_eq!(request_resolution(&request()), 1.0);
	}

	struct PanicsIfCalled;

	#[async_trait]
	impl Source for PanicsIfCalled {
		async fn get_map(&self, _request: &MapRequest) -> Result<Image> {
			panic!("get_map must not be called when coverage or resolution bounds exclude the request")
		}

		fn resolution_bounds(&self) -> (f64, f64) {
			(0.0, 0.5)
		}
	}

	#[tokio::test]
	async fn out_of_resolution_bounds_short_circuits_without_calling_the_source() {
		let image = get_map_checked(&PanicsIfCalled, &request()).await.unwrap();
		assert_eq!((image.width(), image.height()), (100, 100));
		assert!(!image.is_opaque());
	}

	struct OutsideCoverage(Coverage);

	#[async_trait]
	impl Source for OutsideCoverage {
		async fn get_map(&self, _request: &MapRequest) -> Result<Image> {
			panic!("get_map must not be called when coverage excludes the request")
		}

		fn coverage(&self) -> Option<&Coverage> {
			Some(&self.0)
		}
	}

	#[tokio::test]
	async fn coverage_miss_short_circuits_without_calling_the_source() {
		let source = OutsideCoverage(Coverage::bbox("EPSG:3857", GroundBBox::new(1_000.0, 1_000.0, 1_010.0, 1_010.0).unwrap()));
		let image = get_map_checked(&source, &request()).await.unwrap();
		assert!(!image.is_opaque());
	}
}
