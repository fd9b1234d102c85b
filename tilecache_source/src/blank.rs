//! Returns a fully transparent image at the requested size; used for
//! sources in `seed_only` mode during live traffic (spec §4.5).

use crate::source::{MapRequest, Source};
use anyhow::Result;
use async_trait::async_trait;
use tilecache_image::{Image, Mode};

pub struct BlankSource {
	seed_only: bool,
}

impl BlankSource {
	pub fn new() -> Self {
		Self { seed_only: true }
	}

	#[must_use]
	pub fn with_seed_only(mut self, seed_only: bool) -> Self {
		self.seed_only = seed_only;
		self
	}
}

impl Default for BlankSource {
	fn default() -> Self {
		Self::new()
	}
}

#[async_trait]
impl Source for BlankSource {
	async fn get_map(&self, request: &MapRequest) -> Result<Image> {
		Ok(Image::new(request.size.width, request.size.height, Mode::Rgba))
	}

	fn seed_only(&self) -> bool {
		self.seed_only
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use tilecache_core::{GroundBBox, Size};

	#[tokio::test]
	async fn produces_a_transparent_image_at_the_requested_size() {
		let source = BlankSource::new();
		let request = MapRequest {
			bbox: GroundBBox::new(0.0, 0.0, 1.0, 1.0).unwrap(),
			size: Size::new(16, 8),
			srs: "EPSG:3857".into(),
			format: None,
			dims: Default::default(),
		};
		let image = source.get_map(&request).await.unwrap();
		assert_eq!((image.width(), image.height()), (16, 8));
		assert!(!image.is_opaque());
	}
}
