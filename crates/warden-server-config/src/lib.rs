// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Configuration for the warden server.
//!
//! This crate provides:
//! - Layered configuration from multiple sources (defaults, TOML file, environment)
//! - Type-safe configuration with validation
//! - Consistent environment variable naming (`WARDEN_*`)
//!
//! # Usage
//!
//! ```ignore
//! use warden_server_config::load_config;
//!
//! let config = load_config()?;
//! println!("managing {} on {}", config.wireguard.network, config.wireguard.interface);
//! ```

pub mod error;
pub mod layer;
pub mod sections;
pub mod sources;

pub use error::ConfigError;
pub use layer::ServerConfigLayer;
pub use sections::*;
pub use sources::{ConfigSource, DefaultsSource, EnvSource, Precedence, TomlSource};

use tracing::{debug, info};
use warden_wg_common::AddressPool;

/// Fully resolved server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
	pub database: DatabaseConfig,
	pub logging: LoggingConfig,
	pub wireguard: WireguardConfig,
	pub remote: RemoteConfig,
	pub accounting: AccountingConfig,
	pub reconcile: ReconcileConfig,
	pub jobs: JobsConfig,
}

impl ServerConfig {
	/// The address pool peers are allocated from.
	pub fn address_pool(&self) -> Result<AddressPool, ConfigError> {
		AddressPool::new(self.wireguard.network, self.wireguard.first_host).map_err(|e| {
			ConfigError::InvalidValue {
				key: "wireguard.first_host".to_string(),
				message: e.to_string(),
			}
		})
	}
}

/// Load configuration from all sources with standard precedence.
///
/// Precedence (highest to lowest):
/// 1. Environment variables (`WARDEN_*`)
/// 2. Config file (`/etc/warden/warden.toml`)
/// 3. Built-in defaults
pub fn load_config() -> Result<ServerConfig, ConfigError> {
	load_from_sources(vec![
		Box::new(DefaultsSource),
		Box::new(TomlSource::system()),
		Box::new(EnvSource),
	])
}

/// Load configuration with a custom config file path.
pub fn load_config_with_file(
	config_path: impl Into<std::path::PathBuf>,
) -> Result<ServerConfig, ConfigError> {
	load_from_sources(vec![
		Box::new(DefaultsSource),
		Box::new(TomlSource::new(config_path)),
		Box::new(EnvSource),
	])
}

/// Load configuration from environment only (for testing or simple deployments).
pub fn load_config_from_env() -> Result<ServerConfig, ConfigError> {
	let mut merged = ServerConfigLayer::default();
	merged.merge(EnvSource.load()?);
	finalize(merged)
}

fn load_from_sources(mut sources: Vec<Box<dyn ConfigSource>>) -> Result<ServerConfig, ConfigError> {
	sources.sort_by_key(|s| s.precedence());

	let mut merged = ServerConfigLayer::default();
	for source in sources {
		debug!(source = source.name(), "loading configuration source");
		let layer = source.load()?;
		merged.merge(layer);
	}

	finalize(merged)
}

/// Finalize configuration layer into resolved config.
pub fn finalize(layer: ServerConfigLayer) -> Result<ServerConfig, ConfigError> {
	let database = layer.database.unwrap_or_default().finalize();
	let logging = layer.logging.unwrap_or_default().finalize();
	let wireguard = layer.wireguard.unwrap_or_default().finalize()?;
	let remote = layer.remote.unwrap_or_default().finalize(&wireguard.interface);
	let accounting = layer.accounting.unwrap_or_default().finalize();
	let reconcile = layer.reconcile.unwrap_or_default().finalize();
	let jobs = layer.jobs.unwrap_or_default().finalize();

	let config = ServerConfig {
		database,
		logging,
		wireguard,
		remote,
		accounting,
		reconcile,
		jobs,
	};
	validate_config(&config)?;

	info!(
		database = %config.database.url,
		interface = %config.wireguard.interface,
		network = %config.wireguard.network,
		suspend_mode = %config.wireguard.suspend_mode,
		remote_enabled = config.remote.enabled,
		remote_host = config.remote.host.as_deref().unwrap_or("-"),
		resume_policy = %config.accounting.resume_policy,
		"Server configuration loaded"
	);

	Ok(config)
}

/// Validate cross-field configuration rules.
fn validate_config(config: &ServerConfig) -> Result<(), ConfigError> {
	if config.remote.enabled && config.remote.host.is_none() {
		return Err(ConfigError::Validation(
			"remote.enabled is set but remote.host is empty. Set WARDEN_REMOTE_HOST or disable \
			 the remote node."
				.to_string(),
		));
	}

	let ratio = config.accounting.warn_ratio;
	if !(ratio > 0.0 && ratio <= 1.0) {
		return Err(ConfigError::Validation(format!(
			"accounting.warn_ratio must be in (0, 1], got {ratio}"
		)));
	}

	config.address_pool()?;

	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	fn layer(toml_str: &str) -> ServerConfigLayer {
		toml::from_str(toml_str).unwrap()
	}

	#[test]
	fn test_defaults_finalize() {
		let config = finalize(ServerConfigLayer::default()).unwrap();
		assert_eq!(config.wireguard.interface, "wg0");
		assert!(!config.remote.enabled);
		assert_eq!(config.remote.interface, "wg0");
		assert_eq!(config.reconcile.max_retries, 3);
	}

	#[test]
	fn test_remote_requires_host() {
		let result = finalize(layer("[remote]\nenabled = true\n"));
		assert!(matches!(result, Err(ConfigError::Validation(msg)) if msg.contains("remote.host")));
	}

	#[test]
	fn test_remote_with_host_ok() {
		let config = finalize(layer(
			"[remote]\nenabled = true\nhost = \"vpn-2.example.net\"\n",
		))
		.unwrap();
		assert!(config.remote.enabled);
	}

	#[test]
	fn test_warn_ratio_bounds() {
		assert!(finalize(layer("[accounting]\nwarn_ratio = 0.0\n")).is_err());
		assert!(finalize(layer("[accounting]\nwarn_ratio = 1.5\n")).is_err());
		assert!(finalize(layer("[accounting]\nwarn_ratio = 1.0\n")).is_ok());
	}

	#[test]
	fn test_first_host_outside_network() {
		let result = finalize(layer(
			"[wireguard]\nnetwork = \"10.0.0.0/30\"\nfirst_host = 10\n",
		));
		assert!(result.is_err());
	}

	#[test]
	fn test_file_overrides_defaults() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("warden.toml");
		std::fs::write(
			&path,
			r#"
[wireguard]
interface = "wg5"
endpoint = "vpn.example.net"

[accounting]
interval_secs = 120
"#,
		)
		.unwrap();

		let mut merged = DefaultsSource.load().unwrap();
		merged.merge(TomlSource::new(&path).load().unwrap());
		let config = finalize(merged).unwrap();
		assert_eq!(config.wireguard.interface, "wg5");
		assert_eq!(config.remote.interface, "wg5");
		assert_eq!(config.accounting.interval.as_secs(), 120);
	}
}
