//! Parses `#rrggbb`/`#rrggbbaa` color strings used by watermark, `on_error`
//! substitute responses, and WMS `transparent_color` matching.

use anyhow::{Result, bail};

pub fn parse_rgba(value: &str) -> Result<[u8; 4]> {
	let hex = value.strip_prefix('#').unwrap_or(value);
	let byte = |s: &str| -> Result<u8> { Ok(u8::from_str_radix(s, 16)?) };
	match hex.len() {
		6 => Ok([byte(&hex[0..2])?, byte(&hex[2..4])?, byte(&hex[4..6])?, 255]),
		8 => Ok([byte(&hex[0..2])?, byte(&hex[2..4])?, byte(&hex[4..6])?, byte(&hex[6..8])?]),
		_ => bail!("color {value:?} must be '#rrggbb' or '#rrggbbaa'"),
	}
}

pub fn parse_rgb(value: &str) -> Result<[u8; 3]> {
	let [r, g, b, _] = parse_rgba(value)?;
	Ok([r, g, b])
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_six_digit_color_as_opaque() {
		assert_eq!(parse_rgba("#ff0080").unwrap(), [255, 0, 128, 255]);
	}

	#[test]
	fn parses_eight_digit_color_with_alpha() {
		assert_eq!(parse_rgba("#ff008040").unwrap(), [255, 0, 128, 0x40]);
	}

	#[test]
	fn rejects_wrong_length() {
		assert!(parse_rgba("#fff").is_err());
	}
}
