// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Local WireGuard interface and client profile configuration.

use ipnet::Ipv4Net;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use warden_wg_common::client_config::{
	DEFAULT_ALLOWED_IPS, DEFAULT_DNS, DEFAULT_ENDPOINT_PORT, DEFAULT_KEEPALIVE_SECS,
};
use warden_wg_common::{SuspendMode, DEFAULT_FIRST_HOST, DEFAULT_NETWORK};

use super::merge_option;
use crate::error::ConfigError;

pub const DEFAULT_INTERFACE: &str = "wg0";
pub const DEFAULT_SERVER_PUBLIC_KEY_FILE: &str = "/etc/wireguard/publickey";

#[derive(Debug, Clone)]
pub struct WireguardConfig {
	pub interface: String,
	pub network: Ipv4Net,
	/// Host offset of the first address handed to a peer.
	pub first_host: u32,
	/// Public host clients connect to. Client configs cannot be rendered
	/// without it.
	pub endpoint: Option<String>,
	pub endpoint_port: u16,
	pub dns: Vec<String>,
	pub client_allowed_ips: String,
	pub keepalive: u16,
	pub server_public_key_file: PathBuf,
	pub suspend_mode: SuspendMode,
	pub command_timeout: Duration,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WireguardConfigLayer {
	#[serde(default)]
	pub interface: Option<String>,
	#[serde(default)]
	pub network: Option<String>,
	#[serde(default)]
	pub first_host: Option<u32>,
	#[serde(default)]
	pub endpoint: Option<String>,
	#[serde(default)]
	pub endpoint_port: Option<u16>,
	#[serde(default)]
	pub dns: Option<Vec<String>>,
	#[serde(default)]
	pub client_allowed_ips: Option<String>,
	#[serde(default)]
	pub keepalive: Option<u16>,
	#[serde(default)]
	pub server_public_key_file: Option<PathBuf>,
	#[serde(default)]
	pub suspend_mode: Option<SuspendMode>,
	#[serde(default)]
	pub command_timeout_secs: Option<u64>,
}

impl WireguardConfigLayer {
	pub fn merge(&mut self, other: WireguardConfigLayer) {
		merge_option(&mut self.interface, other.interface);
		merge_option(&mut self.network, other.network);
		merge_option(&mut self.first_host, other.first_host);
		merge_option(&mut self.endpoint, other.endpoint);
		merge_option(&mut self.endpoint_port, other.endpoint_port);
		merge_option(&mut self.dns, other.dns);
		merge_option(&mut self.client_allowed_ips, other.client_allowed_ips);
		merge_option(&mut self.keepalive, other.keepalive);
		merge_option(&mut self.server_public_key_file, other.server_public_key_file);
		merge_option(&mut self.suspend_mode, other.suspend_mode);
		merge_option(&mut self.command_timeout_secs, other.command_timeout_secs);
	}

	pub fn finalize(self) -> Result<WireguardConfig, ConfigError> {
		let network_str = self.network.unwrap_or_else(|| DEFAULT_NETWORK.to_string());
		let network: Ipv4Net = network_str.parse().map_err(|e| ConfigError::InvalidValue {
			key: "wireguard.network".to_string(),
			message: format!("'{network_str}': {e}"),
		})?;

		Ok(WireguardConfig {
			interface: self.interface.unwrap_or_else(|| DEFAULT_INTERFACE.to_string()),
			network,
			first_host: self.first_host.unwrap_or(DEFAULT_FIRST_HOST),
			endpoint: self.endpoint,
			endpoint_port: self.endpoint_port.unwrap_or(DEFAULT_ENDPOINT_PORT),
			dns: self
				.dns
				.unwrap_or_else(|| DEFAULT_DNS.iter().map(|s| s.to_string()).collect()),
			client_allowed_ips: self
				.client_allowed_ips
				.unwrap_or_else(|| DEFAULT_ALLOWED_IPS.to_string()),
			keepalive: self.keepalive.unwrap_or(DEFAULT_KEEPALIVE_SECS),
			server_public_key_file: self
				.server_public_key_file
				.unwrap_or_else(|| PathBuf::from(DEFAULT_SERVER_PUBLIC_KEY_FILE)),
			suspend_mode: self.suspend_mode.unwrap_or_default(),
			command_timeout: Duration::from_secs(self.command_timeout_secs.unwrap_or(10)),
		})
	}
}
