//! Resolves named layers and service operations into [`MapLayer`]
//! operations, consulting the authorization callback first (spec §4.8,
//! §6 "Authorization callback").

use crate::build::{Layer, LayerEntry, Runtime};
use anyhow::Result;
use std::collections::HashMap;
use tilecache_core::error::{TileErrorKind, tile_error};
use tilecache_geometry::Coverage;
use tilecache_image::Image;
use tilecache_source::MapRequest;
use tilecache_storage::{DimensionValues, Tile, TileCoord};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceTag {
	Map,
	FeatureInfo,
	Tile,
	LegendGraphic,
	Capabilities,
}

/// What a `partial` authorization grants one named layer (spec §6).
#[derive(Debug, Clone, Default)]
pub struct LayerPermission {
	pub map: bool,
	pub featureinfo: bool,
	pub tile: bool,
	pub legendgraphic: bool,
	pub limited_to: Option<Coverage>,
}

impl LayerPermission {
	fn allows(&self, service: ServiceTag) -> bool {
		match service {
			ServiceTag::Map => self.map,
			ServiceTag::FeatureInfo => self.featureinfo,
			ServiceTag::Tile => self.tile,
			ServiceTag::LegendGraphic => self.legendgraphic,
			ServiceTag::Capabilities => true,
		}
	}
}

/// The result of consulting the injected `authorize` callable (spec §6).
pub enum Authorization {
	Full,
	Partial(HashMap<String, LayerPermission>),
	None,
	Unauthenticated,
}

pub trait AuthorizeCallback: Send + Sync {
	fn authorize(&self, service: ServiceTag, layers: &[String]) -> Authorization;
}

/// Grants every request, unconditionally. The default when no
/// authorization callback is configured.
pub struct AllowAll;

impl AuthorizeCallback for AllowAll {
	fn authorize(&self, _service: ServiceTag, _layers: &[String]) -> Authorization {
		Authorization::Full
	}
}

pub struct Dispatcher {
	runtime: Runtime,
}

impl Dispatcher {
	pub fn new(runtime: Runtime) -> Self {
		Self { runtime }
	}

	fn find_layer<'a>(layers: &'a [Layer], name: &str) -> Option<&'a Layer> {
		for layer in layers {
			if layer.name == name {
				return Some(layer);
			}
			if let Some(found) = Self::find_layer(&layer.children, name) {
				return Some(found);
			}
		}
		None
	}

	/// Checks authorization for `service` against the named layers,
	/// returning the per-layer permission to apply (an always-allowing,
	/// unrestricted permission when authorization is `Full`).
	fn check(&self, service: ServiceTag, layer_names: &[String], auth: &dyn AuthorizeCallback) -> Result<HashMap<String, LayerPermission>> {
		match auth.authorize(service, layer_names) {
			Authorization::None => Err(tile_error(TileErrorKind::Unauthorized, "access denied")),
			Authorization::Unauthenticated => Err(tile_error(TileErrorKind::Unauthenticated, "authentication required")),
			Authorization::Full => Ok(layer_names.iter().map(|name| (name.clone(), LayerPermission { map: true, featureinfo: true, tile: true, legendgraphic: true, limited_to: None })).collect()),
			Authorization::Partial(permissions) => {
				for name in layer_names {
					let allowed = permissions.get(name).is_some_and(|p| p.allows(service));
					if !allowed {
						return Err(tile_error(TileErrorKind::Unauthorized, format!("layer {name:?} is not permitted for {service:?}")));
					}
				}
				Ok(permissions)
			}
		}
	}

	/// WMS-style GetMap (spec §4.8): composites every named layer's own
	/// entries bottom-to-top, then composites across layers in request
	/// order, clipping each layer to its authorized `limited_to` geometry
	/// first if one was granted.
	pub async fn get_map(&self, layer_names: &[String], request: &MapRequest, dims: &DimensionValues, auth: &dyn AuthorizeCallback) -> Result<Image> {
		let permissions = self.check(ServiceTag::Map, layer_names, auth)?;

		let mut layers = Vec::with_capacity(layer_names.len());
		for name in layer_names {
			let layer = Self::find_layer(&self.runtime.layers, name).ok_or_else(|| tile_error(TileErrorKind::InvalidRequest, format!("no such layer {name:?}")))?;
			let mut image = self.composite_layer(layer, request, dims).await?;
			if let Some(coverage) = permissions.get(name).and_then(|p| p.limited_to.as_ref()) {
				coverage.clip(&mut image, &request.bbox, &request.srs)?;
			}
			layers.push((image, 1.0_f32));
		}
		Image::merge(&layers)
	}

	async fn composite_layer(&self, layer: &Layer, request: &MapRequest, dims: &DimensionValues) -> Result<Image> {
		let mut images = Vec::with_capacity(layer.entries.len());
		for entry in &layer.entries {
			let (map_layer, opacity) = match entry {
				LayerEntry::Source(map_layer) => (map_layer, 1.0),
				LayerEntry::Cache { map_layer, opacity, .. } => (map_layer, *opacity),
			};
			images.push((map_layer.get_map(request, dims).await?, opacity));
		}
		Image::merge(&images)
	}

	/// Direct tile fetch (spec §4.8): bypasses `MapLayer` and reads
	/// straight from the layer's cache, since the caller is already
	/// addressing that cache's own grid.
	pub async fn get_tile(&self, layer_name: &str, coord: TileCoord, dims: &DimensionValues, auth: &dyn AuthorizeCallback) -> Result<Tile> {
		self.check(ServiceTag::Tile, std::slice::from_ref(&layer_name.to_string()), auth)?;

		let layer = Self::find_layer(&self.runtime.layers, layer_name).ok_or_else(|| tile_error(TileErrorKind::InvalidRequest, format!("no such layer {layer_name:?}")))?;
		let manager = layer
			.entries
			.iter()
			.find_map(|entry| match entry {
				LayerEntry::Cache { manager, .. } => Some(manager),
				LayerEntry::Source(_) => None,
			})
			.ok_or_else(|| tile_error(TileErrorKind::ConfigurationInvariantViolated, format!("layer {layer_name:?} has no cache to serve tiles from")))?;

		let mut tiles = manager.load_tiles(&[coord], dims).await?;
		Ok(tiles.pop().expect("load_tiles returns one entry per requested coordinate"))
	}

	/// The grid backing a layer's cache, for servers that need to validate
	/// `{z}/{x}/{y}` path parameters before calling [`Self::get_tile`].
	pub fn grid_for_layer(&self, layer_name: &str) -> Option<&tilecache_core::grid::Grid> {
		let layer = Self::find_layer(&self.runtime.layers, layer_name)?;
		layer.entries.iter().find_map(|entry| match entry {
			LayerEntry::Cache { manager, .. } => Some(manager.grid()),
			LayerEntry::Source(_) => None,
		})
	}

	pub fn layers(&self) -> &[Layer] {
		&self.runtime.layers
	}

	/// Filters the layer tree for a Capabilities document (spec §4.8,
	/// §6): `None`/`Unauthenticated` short-circuit the whole document;
	/// `Partial` drops unpermitted layers and records their `limited_to`
	/// geometry for later GetMap/GetTile calls in the same session.
	pub fn capabilities(&self, auth: &dyn AuthorizeCallback) -> Result<Vec<&Layer>> {
		let all_names: Vec<String> = Self::flatten_names(&self.runtime.layers);
		match auth.authorize(ServiceTag::Capabilities, &all_names) {
			Authorization::None => Err(tile_error(TileErrorKind::Unauthorized, "access denied")),
			Authorization::Unauthenticated => Err(tile_error(TileErrorKind::Unauthenticated, "authentication required")),
			Authorization::Full => Ok(self.runtime.layers.iter().collect()),
			Authorization::Partial(permissions) => {
				Ok(self.runtime.layers.iter().filter(|layer| permissions.get(&layer.name).is_some_and(|p| p.map || p.tile)).collect())
			}
		}
	}

	fn flatten_names(layers: &[Layer]) -> Vec<String> {
		let mut names = Vec::new();
		for layer in layers {
			names.push(layer.name.clone());
			names.extend(Self::flatten_names(&layer.children));
		}
		names
	}
}
