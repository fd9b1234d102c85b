//! Directory layouts for the filesystem backend (spec §4.4): deep-nested
//! TileCache-style, flat TMS, quadkey, and ArcGIS exploded-cache.

use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectoryLayout {
	/// `{level}/{x}/{y}.{ext}`
	Tms,
	/// `{level}/{x-pair}/{x-pair}/{x-pair}/{y-pair}/{y-pair}/{y-pair}.{ext}`,
	/// matching the original TileCache project's deep-nested scheme.
	TileCache,
	/// `{quadkey}.{ext}`, Bing/Virtual Earth style.
	Quadkey,
	/// `L{level:02}/R{y:08x}/C{x:08x}.{ext}`, Esri ArcGIS exploded cache.
	ArcGis,
}

impl DirectoryLayout {
	pub fn relative_path(self, level: usize, x: i64, y: i64, extension: &str) -> PathBuf {
		match self {
			DirectoryLayout::Tms => PathBuf::from(format!("{level}/{x}/{y}.{extension}")),
			DirectoryLayout::TileCache => {
				let xs = pad_triplet(x);
				let ys = pad_triplet(y);
				PathBuf::from(format!("{level}/{}/{}/{}/{}/{}/{}.{extension}", xs[0], xs[1], xs[2], ys[0], ys[1], ys[2]))
			}
			DirectoryLayout::Quadkey => PathBuf::from(format!("{}.{extension}", quadkey(level, x, y))),
			DirectoryLayout::ArcGis => PathBuf::from(format!("L{level:02}/R{y:08x}/C{x:08x}.{extension}")),
		}
	}
}

/// Zero-pads `n` to 6 digits and splits into three 2-digit groups, e.g.
/// `12` -> `["00", "00", "12"]`.
fn pad_triplet(n: i64) -> [String; 3] {
	let padded = format!("{:06}", n.unsigned_abs());
	let bytes = padded.as_bytes();
	[
		String::from_utf8_lossy(&bytes[0..2]).into_owned(),
		String::from_utf8_lossy(&bytes[2..4]).into_owned(),
		String::from_utf8_lossy(&bytes[4..6]).into_owned(),
	]
}

/// Standard quadkey encoding, assuming `x`/`y` are non-negative tile
/// indices in the XYZ/slippy-map addressing this layout is meant for.
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

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn tms_layout_is_flat() {
		let path = DirectoryLayout::Tms.relative_path(4, 3, 7, "png");
		assert_eq!(path, PathBuf::from("4/3/7.png"));
	}

	#[test]
	fn tilecache_layout_nests_padded_pairs() {
		let path = DirectoryLayout::TileCache.relative_path(2, 1, 130000, "png");
		assert_eq!(path, PathBuf::from("2/00/00/01/13/00/00.png"));
	}

	#[test]
	fn quadkey_of_origin_at_level_zero_is_empty() {
		assert_eq!(quadkey(0, 0, 0), "");
	}

	#[test]
	fn quadkey_matches_known_value() {
		// level 3, x=3, y=5 -> well-known Bing Maps reference quadkey "213"
		assert_eq!(quadkey(3, 3, 5), "213");
	}

	#[test]
	fn arcgis_layout_uses_hex_level_row_column() {
		let path = DirectoryLayout::ArcGis.relative_path(9, 255, 16, "jpg");
		assert_eq!(path, PathBuf::from("L09/R00000010/C000000ff.jpg"));
	}
}
