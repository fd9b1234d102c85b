//! Compression of encoded tile bytes. Every storage backend and the HTTP
//! source/demo-server layers above it exchange [`Blob`]s tagged with the
//! [`TileCompression`] they're encoded in; [`optimize_compression`] picks
//! the best allowed compression for a blob, and [`recompress`] converts
//! between two fixed ones.

use crate::blob::Blob;
use anyhow::{Context, Result, bail};
use enumset::{EnumSet, EnumSetType, enum_set};
use std::fmt::{self, Debug, Display};
use tilecache_derive::context;

/// A compression algorithm applied to an encoded tile's bytes.
#[derive(Debug, EnumSetType)]
pub enum TileCompression {
	Uncompressed,
	Gzip,
	Brotli,
}

impl Display for TileCompression {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(match self {
			TileCompression::Uncompressed => "none",
			TileCompression::Gzip => "gzip",
			TileCompression::Brotli => "brotli",
		})
	}
}

/// Whether to favor compression ratio or speed when more than one
/// compression is allowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionGoal {
	UseFastCompression,
	UseBestCompression,
	IsIncompressible,
}

/// The set of compressions a caller will accept, plus a goal used to break
/// ties when more than one is allowed.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetCompression {
	pub compressions: EnumSet<TileCompression>,
	pub compression_goal: CompressionGoal,
}

impl TargetCompression {
	#[must_use]
	pub fn from_set(compressions: EnumSet<TileCompression>) -> Self {
		Self { compressions, compression_goal: CompressionGoal::UseBestCompression }
	}

	#[must_use]
	pub fn from_one(compression: TileCompression) -> Self {
		Self::from_set(EnumSet::only(compression))
	}

	#[must_use]
	pub fn none() -> Self {
		Self::from_one(TileCompression::Uncompressed)
	}

	pub fn set_fast_compression(&mut self) {
		self.compression_goal = CompressionGoal::UseFastCompression;
	}

	pub fn set_incompressible(&mut self) {
		self.compression_goal = CompressionGoal::IsIncompressible;
	}

	#[must_use]
	pub fn contains(&self, compression: TileCompression) -> bool {
		self.compressions.contains(compression)
	}
}

#[context("compressing blob with {compression}")]
pub fn compress(blob: Blob, compression: &TileCompression) -> Result<Blob> {
	match compression {
		TileCompression::Uncompressed => Ok(blob),
		TileCompression::Gzip => compress_gzip(&blob),
		TileCompression::Brotli => compress_brotli(&blob),
	}
}

#[context("decompressing blob with {compression}")]
pub fn decompress(blob: Blob, compression: &TileCompression) -> Result<Blob> {
	match compression {
		TileCompression::Uncompressed => Ok(blob),
		TileCompression::Gzip => decompress_gzip(&blob),
		TileCompression::Brotli => decompress_brotli(&blob),
	}
}

#[context("recompressing blob from {input_compression} to {output_compression}")]
pub fn recompress(blob: Blob, input_compression: &TileCompression, output_compression: &TileCompression) -> Result<Blob> {
	if input_compression == output_compression {
		return Ok(blob);
	}
	let decompressed = decompress(blob, input_compression)?;
	compress(decompressed, output_compression)
}

/// Converts `blob` (currently in `input_compression`) to whichever allowed
/// compression in `target` best matches its goal, returning the resulting
/// blob and the compression it ended up in.
#[context("optimizing compression from {input_compression} toward {target:?}")]
pub fn optimize_compression(
	blob: Blob,
	input_compression: &TileCompression,
	target: &TargetCompression,
) -> Result<(Blob, TileCompression)> {
	if target.compressions.is_empty() {
		bail!("at least one compression algorithm must be allowed");
	}
	if !target.compressions.contains(TileCompression::Uncompressed) {
		bail!("'Uncompressed' must always be an allowed target compression");
	}

	use CompressionGoal::{IsIncompressible, UseBestCompression};

	if target.compression_goal != UseBestCompression && target.compressions.contains(*input_compression) {
		return Ok((blob, *input_compression));
	}

	match input_compression {
		TileCompression::Uncompressed => {
			if target.compression_goal != IsIncompressible {
				if target.compressions.contains(TileCompression::Brotli) {
					return Ok((compress_brotli(&blob)?, TileCompression::Brotli));
				}
				if target.compressions.contains(TileCompression::Gzip) {
					return Ok((compress_gzip(&blob)?, TileCompression::Gzip));
				}
			}
			Ok((blob, TileCompression::Uncompressed))
		}
		TileCompression::Gzip => {
			if target.compression_goal != IsIncompressible && target.compressions.contains(TileCompression::Brotli) {
				let decompressed = decompress_gzip(&blob)?;
				return Ok((compress_brotli(&decompressed)?, TileCompression::Brotli));
			}
			if target.compressions.contains(TileCompression::Gzip) {
				return Ok((blob, TileCompression::Gzip));
			}
			Ok((decompress_gzip(&blob)?, TileCompression::Uncompressed))
		}
		TileCompression::Brotli => {
			if target.compressions.contains(TileCompression::Brotli) {
				return Ok((blob, TileCompression::Brotli));
			}
			let decompressed = decompress_brotli(&blob)?;
			if target.compression_goal != IsIncompressible && target.compressions.contains(TileCompression::Gzip) {
				return Ok((compress_gzip(&decompressed)?, TileCompression::Gzip));
			}
			Ok((decompressed, TileCompression::Uncompressed))
		}
	}
}

fn compress_gzip(blob: &Blob) -> Result<Blob> {
	use flate2::Compression;
	use flate2::bufread::GzEncoder;
	use std::io::Read;
	let mut encoder = GzEncoder::new(blob.as_slice(), Compression::best());
	let mut out = Vec::new();
	encoder.read_to_end(&mut out).context("gzip compression failed")?;
	Ok(Blob::from(out))
}

fn decompress_gzip(blob: &Blob) -> Result<Blob> {
	use flate2::bufread::GzDecoder;
	use std::io::Read;
	let mut decoder = GzDecoder::new(blob.as_slice());
	let mut out = Vec::new();
	decoder.read_to_end(&mut out).context("gzip decompression failed")?;
	Ok(Blob::from(out))
}

fn compress_brotli(blob: &Blob) -> Result<Blob> {
	use brotli::enc::BrotliEncoderParams;
	use std::io::Cursor;
	let params = BrotliEncoderParams { quality: 10, lgwin: 19, size_hint: blob.len(), ..Default::default() };
	let mut input = Cursor::new(blob.as_slice());
	let mut out = Vec::new();
	brotli::BrotliCompress(&mut input, &mut out, &params).context("brotli compression failed")?;
	Ok(Blob::from(out))
}

fn decompress_brotli(blob: &Blob) -> Result<Blob> {
	use std::io::Cursor;
	let mut input = Cursor::new(blob.as_slice());
	let mut out = Vec::new();
	brotli::BrotliDecompress(&mut input, &mut out).context("brotli decompression failed")?;
	Ok(Blob::from(out))
}

#[cfg(test)]
mod tests {
	use super::*;
	use pretty_assertions::assert_eq;

	fn sample() -> Blob {
		Blob::from(vec![b'x'; 4096])
	}

	#[test]
	fn gzip_round_trips() {
		let data = sample();
		let compressed = compress(data.clone(), &TileCompression::Gzip).unwrap();
		assert_ne!(compressed.len(), data.len());
		let restored = decompress(compressed, &TileCompression::Gzip).unwrap();
		assert_eq!(restored, data);
	}

	#[test]
	fn brotli_round_trips() {
		let data = sample();
		let compressed = compress(data.clone(), &TileCompression::Brotli).unwrap();
		let restored = decompress(compressed, &TileCompression::Brotli).unwrap();
		assert_eq!(restored, data);
	}

	#[test]
	fn optimize_picks_brotli_when_best_and_allowed() {
		let target = TargetCompression::from_set(enum_set!(
			TileCompression::Uncompressed | TileCompression::Gzip | TileCompression::Brotli
		));
		let (_, result) = optimize_compression(sample(), &TileCompression::Uncompressed, &target).unwrap();
		assert_eq!(result, TileCompression::Brotli);
	}

	#[test]
	fn optimize_keeps_current_when_not_seeking_best() {
		let mut target =
			TargetCompression::from_set(enum_set!(TileCompression::Uncompressed | TileCompression::Gzip));
		target.set_fast_compression();
		let (_, result) = optimize_compression(sample(), &TileCompression::Gzip, &target).unwrap();
		assert_eq!(result, TileCompression::Gzip);
	}

	#[test]
	fn optimize_rejects_target_without_uncompressed() {
		let target = TargetCompression::from_one(TileCompression::Gzip);
		let err = optimize_compression(sample(), &TileCompression::Uncompressed, &target).unwrap_err();
		assert!(err.to_string().contains("Uncompressed"));
	}

	#[test]
	fn recompress_is_noop_for_same_compression() {
		let data = sample();
		let out = recompress(data.clone(), &TileCompression::Gzip, &TileCompression::Gzip).unwrap();
		assert_eq!(out, data);
	}
}
