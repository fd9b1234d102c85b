//! Loads feature-file coverages (GeoJSON, shapefile) into [`geo_types`]
//! polygons, used by [`crate::Coverage::from_geojson_file`] and
//! [`crate::Coverage::from_shapefile`].

use anyhow::{Context, Result, bail};
use geo_types::{Geometry, MultiPolygon, Polygon};
use std::path::Path;

fn flatten_into(geometry: Geometry<f64>, out: &mut Vec<Polygon<f64>>) {
	match geometry {
		Geometry::Polygon(p) => out.push(p),
		Geometry::MultiPolygon(mp) => out.extend(mp.0),
		Geometry::GeometryCollection(collection) => {
			for g in collection {
				flatten_into(g, out);
			}
		}
		_ => {}
	}
}

pub fn load_geojson(path: &Path) -> Result<MultiPolygon<f64>> {
	let raw = std::fs::read_to_string(path).with_context(|| format!("reading GeoJSON file {path:?}"))?;
	let parsed: geojson::GeoJson = raw.parse().with_context(|| format!("parsing GeoJSON file {path:?}"))?;
	let collection = geojson::quick_collection(&parsed).with_context(|| format!("converting GeoJSON file {path:?} to geometry"))?;

	let mut polygons = Vec::new();
	for geometry in collection {
		flatten_into(geometry, &mut polygons);
	}
	if polygons.is_empty() {
		bail!("GeoJSON file {path:?} contains no polygon geometry");
	}
	Ok(MultiPolygon(polygons))
}

pub fn load_shapefile(path: &Path) -> Result<MultiPolygon<f64>> {
	let mut reader = shapefile::Reader::from_path(path).with_context(|| format!("opening shapefile {path:?}"))?;
	let mut polygons = Vec::new();
	for shape in reader.iter_shapes() {
		let shape = shape.with_context(|| format!("reading shape from {path:?}"))?;
		if let shapefile::Shape::Polygon(polygon) = shape {
			for part in polygon.parts() {
				let coords: Vec<geo_types::Coord<f64>> = part.iter().map(|p| geo_types::Coord { x: p.x, y: p.y }).collect();
				polygons.push(Polygon::new(geo_types::LineString::from(coords), vec![]));
			}
		}
	}
	if polygons.is_empty() {
		bail!("shapefile {path:?} contains no polygon shapes");
	}
	Ok(MultiPolygon(polygons))
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::io::Write;

	#[test]
	fn loads_a_simple_geojson_polygon() {
		let mut file = tempfile::NamedTempFile::with_suffix(".geojson").unwrap();
		write!(
			file,
			r#"{{"type":"Feature","geometry":{{"type":"Polygon","coordinates":[[[0,0],[0,10],[10,10],[10,0],[0,0]]]}},"properties":{{}}}}"#
		)
		.unwrap();
		let polygons = load_geojson(file.path()).unwrap();
		assert_eq!(polygons.0.len(), 1);
	}

	#[test]
	fn rejects_geojson_with_no_polygons() {
		let mut file = tempfile::NamedTempFile::with_suffix(".geojson").unwrap();
		write!(file, r#"{{"type":"Point","coordinates":[0,0]}}"#).unwrap();
		assert!(load_geojson(file.path()).is_err());
	}
}
