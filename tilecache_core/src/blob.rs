use std::fmt::Debug;

/// A simple wrapper around `Vec<u8>` for encoded tile bytes moving through
/// the storage and compression layers.
#[derive(Clone, PartialEq, Eq)]
pub struct Blob(Vec<u8>);

impl Blob {
	pub fn empty() -> Self {
		Self(Vec::new())
	}

	pub fn as_slice(&self) -> &[u8] {
		&self.0
	}

	pub fn into_vec(self) -> Vec<u8> {
		self.0
	}

	pub fn len(&self) -> usize {
		self.0.len()
	}

	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}

	pub fn as_str(&self) -> std::borrow::Cow<'_, str> {
		String::from_utf8_lossy(&self.0)
	}
}

impl From<Vec<u8>> for Blob {
	fn from(v: Vec<u8>) -> Self {
		Self(v)
	}
}

impl From<&[u8]> for Blob {
	fn from(v: &[u8]) -> Self {
		Self(v.to_vec())
	}
}

impl From<&str> for Blob {
	fn from(v: &str) -> Self {
		Self(v.as_bytes().to_vec())
	}
}

impl From<String> for Blob {
	fn from(v: String) -> Self {
		Self(v.into_bytes())
	}
}

impl AsRef<[u8]> for Blob {
	fn as_ref(&self) -> &[u8] {
		&self.0
	}
}

impl Debug for Blob {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "Blob({} bytes)", self.0.len())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn round_trips_through_vec() {
		let blob = Blob::from(vec![1, 2, 3]);
		assert_eq!(blob.len(), 3);
		assert_eq!(blob.clone().into_vec(), vec![1, 2, 3]);
	}

	#[test]
	fn round_trips_through_str() {
		let blob = Blob::from("hello");
		assert_eq!(blob.as_str(), "hello");
	}
}
