// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Remote enforcement node reached over ssh.

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use super::merge_option;

#[derive(Debug, Clone)]
pub struct RemoteConfig {
	pub enabled: bool,
	pub host: Option<String>,
	pub user: String,
	pub port: u16,
	pub identity_file: Option<PathBuf>,
	pub interface: String,
	pub connect_timeout: Duration,
	pub command_timeout: Duration,
	/// Whether the remote node forwards client traffic itself and so has to
	/// be sampled by the accountant.
	pub counts_traffic: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RemoteConfigLayer {
	#[serde(default)]
	pub enabled: Option<bool>,
	#[serde(default)]
	pub host: Option<String>,
	#[serde(default)]
	pub user: Option<String>,
	#[serde(default)]
	pub port: Option<u16>,
	#[serde(default)]
	pub identity_file: Option<PathBuf>,
	#[serde(default)]
	pub interface: Option<String>,
	#[serde(default)]
	pub connect_timeout_secs: Option<u64>,
	#[serde(default)]
	pub command_timeout_secs: Option<u64>,
	#[serde(default)]
	pub counts_traffic: Option<bool>,
}

impl RemoteConfigLayer {
	pub fn merge(&mut self, other: RemoteConfigLayer) {
		merge_option(&mut self.enabled, other.enabled);
		merge_option(&mut self.host, other.host);
		merge_option(&mut self.user, other.user);
		merge_option(&mut self.port, other.port);
		merge_option(&mut self.identity_file, other.identity_file);
		merge_option(&mut self.interface, other.interface);
		merge_option(&mut self.connect_timeout_secs, other.connect_timeout_secs);
		merge_option(&mut self.command_timeout_secs, other.command_timeout_secs);
		merge_option(&mut self.counts_traffic, other.counts_traffic);
	}

	/// The remote interface defaults to the local interface name.
	pub fn finalize(self, local_interface: &str) -> RemoteConfig {
		RemoteConfig {
			enabled: self.enabled.unwrap_or(false),
			host: self.host,
			user: self.user.unwrap_or_else(|| "root".to_string()),
			port: self.port.unwrap_or(22),
			identity_file: self.identity_file,
			interface: self
				.interface
				.unwrap_or_else(|| local_interface.to_string()),
			connect_timeout: Duration::from_secs(self.connect_timeout_secs.unwrap_or(5)),
			command_timeout: Duration::from_secs(self.command_timeout_secs.unwrap_or(15)),
			counts_traffic: self.counts_traffic.unwrap_or(false),
		}
	}
}

impl Default for RemoteConfig {
	fn default() -> Self {
		RemoteConfigLayer::default().finalize(super::DEFAULT_INTERFACE)
	}
}
