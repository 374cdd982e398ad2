// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Configuration sources: environment variables and TOML files.

use std::path::PathBuf;
use std::str::FromStr;

use tracing::{debug, trace};

use crate::error::ConfigError;
use crate::layer::ServerConfigLayer;
use crate::sections::{
	AccountingConfigLayer, DatabaseConfigLayer, JobsConfigLayer, LoggingConfigLayer,
	ReconcileConfigLayer, RemoteConfigLayer, WireguardConfigLayer,
};

pub const SYSTEM_CONFIG_PATH: &str = "/etc/warden/warden.toml";

/// Source precedence levels (higher = overrides lower).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Precedence {
	Defaults = 10,
	ConfigFile = 20,
	Environment = 50,
}

/// Trait for configuration sources.
pub trait ConfigSource: Send + Sync {
	fn name(&self) -> &'static str;
	fn precedence(&self) -> Precedence;
	fn load(&self) -> Result<ServerConfigLayer, ConfigError>;
}

/// Built-in defaults source.
pub struct DefaultsSource;

impl ConfigSource for DefaultsSource {
	fn name(&self) -> &'static str {
		"defaults"
	}

	fn precedence(&self) -> Precedence {
		Precedence::Defaults
	}

	fn load(&self) -> Result<ServerConfigLayer, ConfigError> {
		debug!("loading defaults");
		Ok(ServerConfigLayer::default())
	}
}

/// TOML file configuration source. A missing file is an empty layer.
pub struct TomlSource {
	path: PathBuf,
}

impl TomlSource {
	pub fn new(path: impl Into<PathBuf>) -> Self {
		Self { path: path.into() }
	}

	pub fn system() -> Self {
		Self::new(SYSTEM_CONFIG_PATH)
	}
}

impl ConfigSource for TomlSource {
	fn name(&self) -> &'static str {
		"toml-config"
	}

	fn precedence(&self) -> Precedence {
		Precedence::ConfigFile
	}

	fn load(&self) -> Result<ServerConfigLayer, ConfigError> {
		if !self.path.exists() {
			debug!(path = %self.path.display(), "config file not found, skipping");
			return Ok(ServerConfigLayer::default());
		}

		debug!(path = %self.path.display(), "loading config file");
		let content = std::fs::read_to_string(&self.path).map_err(|e| ConfigError::FileRead {
			path: self.path.clone(),
			source: e,
		})?;

		let layer: ServerConfigLayer =
			toml::from_str(&content).map_err(|e| ConfigError::TomlParse {
				path: self.path.clone(),
				source: e,
			})?;

		trace!("parsed config layer from TOML");
		Ok(layer)
	}
}

/// Environment variable source.
///
/// Convention: WARDEN_<SECTION>_<FIELD>
pub struct EnvSource;

impl ConfigSource for EnvSource {
	fn name(&self) -> &'static str {
		"environment"
	}

	fn precedence(&self) -> Precedence {
		Precedence::Environment
	}

	fn load(&self) -> Result<ServerConfigLayer, ConfigError> {
		debug!("loading environment variables");
		load_env_layer(&Env(|name: &str| std::env::var(name).ok()))
	}
}

/// Variable lookup, swappable so the mapping can be tested without touching
/// the process environment.
pub(crate) struct Env<F: Fn(&str) -> Option<String>>(pub(crate) F);

impl<F: Fn(&str) -> Option<String>> Env<F> {
	fn var(&self, name: &str) -> Option<String> {
		(self.0)(name).filter(|s| !s.is_empty())
	}

	fn flag(&self, name: &str) -> Option<bool> {
		self.var(name)
			.map(|v| v.eq_ignore_ascii_case("true") || v == "1")
	}

	fn parse<T>(&self, name: &str, kind: &str) -> Result<Option<T>, ConfigError>
	where
		T: FromStr,
	{
		match self.var(name) {
			Some(v) => v.trim().parse().map(Some).map_err(|_| ConfigError::InvalidValue {
				key: name.to_string(),
				message: format!("invalid {kind} value '{v}'"),
			}),
			None => Ok(None),
		}
	}

	fn list(&self, name: &str) -> Option<Vec<String>> {
		self.var(name).map(|s| {
			s.split(',')
				.map(|s| s.trim().to_string())
				.filter(|s| !s.is_empty())
				.collect()
		})
	}
}

pub(crate) fn load_env_layer<F>(env: &Env<F>) -> Result<ServerConfigLayer, ConfigError>
where
	F: Fn(&str) -> Option<String>,
{
	Ok(ServerConfigLayer {
		database: Some(DatabaseConfigLayer {
			url: env.var("WARDEN_DATABASE_URL"),
		}),
		logging: Some(LoggingConfigLayer {
			level: env.var("WARDEN_LOG_LEVEL"),
			format: env.parse("WARDEN_LOG_FORMAT", "log format")?,
		}),
		wireguard: Some(WireguardConfigLayer {
			interface: env.var("WARDEN_WG_INTERFACE"),
			network: env.var("WARDEN_WG_NETWORK"),
			first_host: env.parse("WARDEN_WG_FIRST_HOST", "u32")?,
			endpoint: env.var("WARDEN_WG_ENDPOINT"),
			endpoint_port: env.parse("WARDEN_WG_ENDPOINT_PORT", "u16")?,
			dns: env.list("WARDEN_WG_DNS"),
			client_allowed_ips: env.var("WARDEN_WG_CLIENT_ALLOWED_IPS"),
			keepalive: env.parse("WARDEN_WG_KEEPALIVE", "u16")?,
			server_public_key_file: env.var("WARDEN_WG_SERVER_PUBLIC_KEY_FILE").map(PathBuf::from),
			suspend_mode: env.parse("WARDEN_WG_SUSPEND_MODE", "suspend mode")?,
			command_timeout_secs: env.parse("WARDEN_WG_COMMAND_TIMEOUT_SECS", "u64")?,
		}),
		remote: Some(RemoteConfigLayer {
			enabled: env.flag("WARDEN_REMOTE_ENABLED"),
			host: env.var("WARDEN_REMOTE_HOST"),
			user: env.var("WARDEN_REMOTE_USER"),
			port: env.parse("WARDEN_REMOTE_PORT", "u16")?,
			identity_file: env.var("WARDEN_REMOTE_IDENTITY_FILE").map(PathBuf::from),
			interface: env.var("WARDEN_REMOTE_INTERFACE"),
			connect_timeout_secs: env.parse("WARDEN_REMOTE_CONNECT_TIMEOUT_SECS", "u64")?,
			command_timeout_secs: env.parse("WARDEN_REMOTE_COMMAND_TIMEOUT_SECS", "u64")?,
			counts_traffic: env.flag("WARDEN_REMOTE_COUNTS_TRAFFIC"),
		}),
		accounting: Some(AccountingConfigLayer {
			interval_secs: env.parse("WARDEN_ACCOUNTING_INTERVAL_SECS", "u64")?,
			warn_ratio: env.parse("WARDEN_ACCOUNTING_WARN_RATIO", "ratio")?,
			resume_policy: env.parse("WARDEN_ACCOUNTING_RESUME_POLICY", "resume policy")?,
			monthly_reset: env.flag("WARDEN_ACCOUNTING_MONTHLY_RESET"),
		}),
		reconcile: Some(ReconcileConfigLayer {
			interval_secs: env.parse("WARDEN_RECONCILE_INTERVAL_SECS", "u64")?,
			max_retries: env.parse("WARDEN_RECONCILE_MAX_RETRIES", "u32")?,
			base_backoff_ms: env.parse("WARDEN_RECONCILE_BASE_BACKOFF_MS", "u64")?,
			max_backoff_ms: env.parse("WARDEN_RECONCILE_MAX_BACKOFF_MS", "u64")?,
		}),
		jobs: Some(JobsConfigLayer {
			history_retention_days: env.parse("WARDEN_JOBS_HISTORY_RETENTION_DAYS", "u32")?,
		}),
	})
}
