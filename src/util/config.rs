//! Contains type and functions related to Ferry configuration file

use std::io::Read;
use std::path::PathBuf;

use serde::Deserialize;

use crate::error::Error;

/// Complete configuration for a Ferry replication worker process
#[derive(Deserialize, Debug, Clone)]
pub struct Config {
	/// Name of the replication site this process replicates to
	pub replication_site: String,

	/// Number of queue workers hosted by this process
	#[serde(default = "default_worker_count")]
	pub worker_count: usize,
	/// Number of in-flight entries per queue worker
	#[serde(default = "default_worker_concurrency")]
	pub worker_concurrency: usize,

	/// Bucket name prefix used by the metadata mirror projection
	#[serde(default = "default_mirror_prefix")]
	pub mirror_prefix: String,

	/// Log bus topics and backend
	pub bus: BusConfig,
	/// Source object service
	pub source: SourceConfig,
	/// Cross-backend destination surface
	pub destination: DestinationConfig,
	/// Retry bounds for gateway calls
	#[serde(default)]
	pub retry: RetryConfig,
}

/// Configuration for the log bus binding
#[derive(Deserialize, Debug, Clone)]
pub struct BusConfig {
	/// Bus backend; only "memory" is built in, production deployments
	/// bind an external implementation of the bus traits
	pub backend: String,
	/// Topic carrying replication log entries
	pub entry_topic: String,
	/// Topic receiving per-site status publications
	pub status_topic: String,
	/// Topic receiving metric events
	pub metrics_topic: String,
}

/// Configuration for the source object service gateway
#[derive(Deserialize, Debug, Clone)]
pub struct SourceConfig {
	/// Endpoint URL of the source service
	pub endpoint: String,
	/// Signing region
	pub region: String,
	pub access_key_id: String,
	pub secret_access_key: String,
	/// Per-request timeout, in milliseconds
	#[serde(default = "default_request_timeout_ms")]
	pub request_timeout_ms: u64,
}

/// Configuration for the destination gateway
#[derive(Deserialize, Debug, Clone)]
pub struct DestinationConfig {
	/// Destination family: "generic", "gcp" or "azure"
	pub family: String,
	/// Storage type advertised to the cross-backend surface (e.g. "aws_s3")
	pub storage_type: String,
	/// Ordered list of destination hosts, tried round-robin on failover
	pub hosts: Vec<String>,
	/// Signing region
	pub region: String,
	pub access_key_id: String,
	pub secret_access_key: String,
	/// Per-request timeout, in milliseconds
	#[serde(default = "default_request_timeout_ms")]
	pub request_timeout_ms: u64,
}

/// Retry bounds for gateway calls
#[derive(Deserialize, Debug, Clone)]
pub struct RetryConfig {
	#[serde(default = "default_max_retries")]
	pub max_retries: u32,
	#[serde(default = "default_timeout_s")]
	pub timeout_s: u64,
	#[serde(default = "default_min_backoff_ms")]
	pub min_backoff_ms: u64,
	#[serde(default = "default_max_backoff_ms")]
	pub max_backoff_ms: u64,
	#[serde(default = "default_backoff_factor")]
	pub factor: f64,
	#[serde(default = "default_backoff_jitter")]
	pub jitter: f64,
}

impl Default for RetryConfig {
	fn default() -> Self {
		Self {
			max_retries: default_max_retries(),
			timeout_s: default_timeout_s(),
			min_backoff_ms: default_min_backoff_ms(),
			max_backoff_ms: default_max_backoff_ms(),
			factor: default_backoff_factor(),
			jitter: default_backoff_jitter(),
		}
	}
}

fn default_worker_count() -> usize {
	1
}
fn default_worker_concurrency() -> usize {
	10
}
fn default_mirror_prefix() -> String {
	"mirror".to_string()
}
fn default_request_timeout_ms() -> u64 {
	90_000
}
fn default_max_retries() -> u32 {
	5
}
fn default_timeout_s() -> u64 {
	300
}
fn default_min_backoff_ms() -> u64 {
	1000
}
fn default_max_backoff_ms() -> u64 {
	300_000
}
fn default_backoff_factor() -> f64 {
	1.5
}
fn default_backoff_jitter() -> f64 {
	0.1
}

/// Read and parse configuration
pub fn read_config(config_file: PathBuf) -> Result<Config, Error> {
	let mut file = std::fs::OpenOptions::new()
		.read(true)
		.open(config_file.as_path())?;

	let mut config = String::new();
	file.read_to_string(&mut config)?;

	Ok(toml::from_str(&config)?)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_parse_config() {
		let config: Config = toml::from_str(
			r#"
			replication_site = "aws-east-1"

			[bus]
			backend = "memory"
			entry_topic = "entries"
			status_topic = "status"
			metrics_topic = "metrics"

			[source]
			endpoint = "http://127.0.0.1:8000"
			region = "us-east-1"
			access_key_id = "AK"
			secret_access_key = "SK"

			[destination]
			family = "gcp"
			storage_type = "gcp"
			hosts = ["127.0.0.1:9000", "127.0.0.1:9001"]
			region = "us-east-1"
			access_key_id = "AK"
			secret_access_key = "SK"
			"#,
		)
		.unwrap();

		assert_eq!(config.replication_site, "aws-east-1");
		assert_eq!(config.worker_count, 1);
		assert_eq!(config.worker_concurrency, 10);
		assert_eq!(config.destination.hosts.len(), 2);
		assert_eq!(config.retry.max_retries, 5);
		assert_eq!(config.retry.timeout_s, 300);
	}
}
