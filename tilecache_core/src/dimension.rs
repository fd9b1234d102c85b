use anyhow::{Result, ensure};

/// A named axis with a discrete value list and a default, used to
/// distinguish otherwise-identical tiles (e.g. `time`, `elevation`).
///
/// A `Cache` is normally dimensionless; layers that expose dimensions
/// typically also disable storage (spec §3, Dimension).
#[derive(Debug, Clone, PartialEq)]
pub struct Dimension {
	name: String,
	values: Vec<String>,
	default: String,
}

impl Dimension {
	pub fn new(name: impl Into<String>, values: Vec<String>, default: impl Into<String>) -> Result<Self> {
		let name = name.into();
		let default = default.into();
		ensure!(!values.is_empty(), "dimension {name:?} must have at least one value");
		ensure!(values.contains(&default), "dimension {name:?} default {default:?} not among its values {values:?}");
		Ok(Self { name, values, default })
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	pub fn values(&self) -> &[String] {
		&self.values
	}

	pub fn default_value(&self) -> &str {
		&self.default
	}

	pub fn is_valid(&self, value: &str) -> bool {
		self.values.iter().any(|v| v == value)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn rejects_default_not_in_values() {
		let err = Dimension::new("time", vec!["T1".into(), "T2".into()], "T3").unwrap_err();
		assert!(err.to_string().contains("not among"));
	}

	#[test]
	fn accepts_valid_default() {
		let dim = Dimension::new("elevation", vec!["0".into(), "1000".into()], "0").unwrap();
		assert_eq!(dim.default_value(), "0");
		assert!(dim.is_valid("1000"));
		assert!(!dim.is_valid("2000"));
	}
}
