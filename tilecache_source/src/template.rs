//! URL template expansion for tile sources (spec §4.5, §6): `x`, `y`, `z`,
//! `format`, `quadkey`, TMS/TileCache/ArcGIS paths, or `bbox`.

use tilecache_core::GroundBBox;

/// The inputs a tile-source URL template may reference.
pub struct TemplateContext<'a> {
	pub level: usize,
	pub x: i64,
	pub y: i64,
	pub format: &'a str,
	pub bbox: GroundBBox,
}

/// Replaces every recognized `{placeholder}` in `template` with the value
/// it names. Unknown placeholders are left untouched.
pub fn expand(template: &str, ctx: &TemplateContext) -> String {
	let quadkey = quadkey(ctx.level, ctx.x, ctx.y);
	let tms_path = format!("{}/{}/{}", ctx.level, ctx.x, ctx.y);
	let tc_path = tilecache_dirs(ctx.x, ctx.y);
	let arcgis_path = format!("L{:02}/R{:08x}/C{:08x}", ctx.level, ctx.y, ctx.x);
	let bbox = ctx.bbox;

	template
		.replace("{x}", &ctx.x.to_string())
		.replace("{y}", &ctx.y.to_string())
		.replace("{z}", &ctx.level.to_string())
		.replace("{format}", ctx.format)
		.replace("{quadkey}", &quadkey)
		.replace("{tms_path}", &tms_path)
		.replace("{tc_path}", &tc_path)
		.replace("{arcgiscache_path}", &arcgis_path)
		.replace("{bbox}", &format!("{},{},{},{}", bbox.x_min, bbox.y_min, bbox.x_max, bbox.y_max))
}

fn quadkey(level: usize, x: i64, y: i64) -> String {
	let mut key = String::with_capacity(level);
	for i in (0..level).rev() {
		let mask = 1i64 << i;
		let mut digit = 0u8;
		if x & mask != 0 {
			digit += 1;
		}
		if y & mask != 0 {
			digit += 2;
		}
		key.push((b'0' + digit) as char);
	}
	key
}

fn tilecache_dirs(x: i64, y: i64) -> String {
	let xs = format!("{:06}", x.unsigned_abs());
	let ys = format!("{:06}", y.unsigned_abs());
	format!("{}/{}/{}/{}/{}/{}", &xs[0..2], &xs[2..4], &xs[4..6], &ys[0..2], &ys[2..4], &ys[4..6])
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn expands_xyz_and_format() {
		let ctx = TemplateContext { level: 4, x: 3, y: 2, format: "png", bbox: GroundBBox::new(0.0, 0.0, 10.0, 10.0).unwrap() };
		let url = expand("https://tiles.example/{z}/{x}/{y}.{format}", &ctx);
		assert_eq!(url, "https://tiles.example/4/3/2.png");
	}

	#[test]
	fn expands_quadkey() {
		let ctx = TemplateContext { level: 3, x: 3, y: 5, format: "jpg", bbox: GroundBBox::new(0.0, 0.0, 10.0, 10.0).unwrap() };
		let url = expand("https://tiles.example/{quadkey}.png", &ctx);
		assert_eq!(url, "https://tiles.example/213.png");
	}

	#[test]
	fn expands_bbox() {
		let ctx = TemplateContext { level: 0, x: 0, y: 0, format: "png", bbox: GroundBBox::new(1.0, 2.0, 3.0, 4.0).unwrap() };
		let url = expand("https://wms.example/?BBOX={bbox}", &ctx);
		assert_eq!(url, "https://wms.example/?BBOX=1,2,3,4");
	}
}
