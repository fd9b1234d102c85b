use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// Replaces the original system's global process state (projection data
/// directory, HTTP proxy, cookie jars) with one explicit value, constructed
/// once at startup and passed to every component that needs it. No
/// component mutates process-global state after construction.
#[derive(Debug, Clone, Default)]
pub struct Environment {
	pub http: HttpDefaults,
	pub srs: SrsDefaults,
}

/// Defaults applied to every outgoing source HTTP request unless a source
/// overrides them (spec §6, `globals.http`).
#[derive(Debug, Clone)]
pub struct HttpDefaults {
	pub client_timeout: Duration,
	pub ssl_ca_certs: Option<PathBuf>,
	pub ssl_no_cert_checks: bool,
	pub method: HttpMethod,
	pub headers: HashMap<String, String>,
	pub access_control_allow_origin: Option<String>,
	/// `HTTP(S)_PROXY`-style proxy URL; read once at `Environment`
	/// construction rather than from the process environment on every
	/// request.
	pub proxy: Option<String>,
}

impl Default for HttpDefaults {
	fn default() -> Self {
		Self {
			client_timeout: Duration::from_secs(60),
			ssl_ca_certs: None,
			ssl_no_cert_checks: false,
			method: HttpMethod::Get,
			headers: HashMap::new(),
			access_control_allow_origin: None,
			proxy: None,
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
	Get,
	Post,
}

/// SRS-related globals (spec §6, `globals.srs`).
#[derive(Debug, Clone, Default)]
pub struct SrsDefaults {
	pub proj_data_dir: Option<PathBuf>,
	pub axis_order_ne: Vec<String>,
	pub axis_order_en: Vec<String>,
}

impl Environment {
	pub fn new(http: HttpDefaults, srs: SrsDefaults) -> Self {
		Self { http, srs }
	}

	/// Builds a blocking HTTP client from the environment's defaults. A
	/// fresh client is constructed per call (sources cache their own
	/// clients); this exists so sources never touch `reqwest::blocking`
	/// builder knobs directly.
	pub fn build_http_client(&self) -> anyhow::Result<reqwest::blocking::Client> {
		let mut builder = reqwest::blocking::Client::builder()
			.timeout(self.http.client_timeout)
			.danger_accept_invalid_certs(self.http.ssl_no_cert_checks);
		if let Some(proxy) = &self.http.proxy {
			builder = builder.proxy(reqwest::Proxy::all(proxy)?);
		}
		Ok(builder.build()?)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn default_environment_has_sane_http_defaults() {
		let env = Environment::default();
		assert_eq!(env.http.client_timeout, Duration::from_secs(60));
		assert!(!env.http.ssl_no_cert_checks);
	}

	#[test]
	fn build_http_client_succeeds_with_defaults() {
		let env = Environment::default();
		assert!(env.build_http_client().is_ok());
	}
}
