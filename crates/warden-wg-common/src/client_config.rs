// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Rendering of `wg-quick` client configuration files.

use crate::keys::{PresharedKey, WgPrivateKey, WgPublicKey};
use std::fmt::Write;
use std::net::Ipv4Addr;
use zeroize::Zeroizing;

pub const DEFAULT_DNS: [&str; 2] = ["1.1.1.1", "8.8.8.8"];
pub const DEFAULT_ALLOWED_IPS: &str = "0.0.0.0/0";
pub const DEFAULT_KEEPALIVE_SECS: u16 = 25;
pub const DEFAULT_ENDPOINT_PORT: u16 = 17968;

/// Server-side values shared by every client config.
#[derive(Debug, Clone)]
pub struct ServerProfile {
	pub public_key: WgPublicKey,
	pub endpoint_host: String,
	pub endpoint_port: u16,
	pub dns: Vec<String>,
	pub allowed_ips: String,
	pub keepalive_secs: u16,
}

impl ServerProfile {
	pub fn new(public_key: WgPublicKey, endpoint_host: impl Into<String>) -> Self {
		Self {
			public_key,
			endpoint_host: endpoint_host.into(),
			endpoint_port: DEFAULT_ENDPOINT_PORT,
			dns: DEFAULT_DNS.iter().map(|s| s.to_string()).collect(),
			allowed_ips: DEFAULT_ALLOWED_IPS.to_string(),
			keepalive_secs: DEFAULT_KEEPALIVE_SECS,
		}
	}

	pub fn endpoint(&self) -> String {
		format!("{}:{}", self.endpoint_host, self.endpoint_port)
	}
}

/// Renders a complete client config. The output holds the client's private
/// key, so it comes back wrapped for zeroization.
pub fn render_client_config(
	server: &ServerProfile,
	private_key: &WgPrivateKey,
	preshared_key: &PresharedKey,
	address: Ipv4Addr,
) -> Zeroizing<String> {
	let mut out = Zeroizing::new(String::with_capacity(512));

	// Writing to a String cannot fail.
	let _ = writeln!(out, "[Interface]");
	let _ = writeln!(out, "PrivateKey = {}", private_key.to_base64().as_str());
	let _ = writeln!(out, "Address = {address}/32");
	if !server.dns.is_empty() {
		let _ = writeln!(out, "DNS = {}", server.dns.join(", "));
	}
	let _ = writeln!(out);
	let _ = writeln!(out, "[Peer]");
	let _ = writeln!(out, "PublicKey = {}", server.public_key);
	let _ = writeln!(out, "PresharedKey = {}", preshared_key.to_base64().as_str());
	let _ = writeln!(out, "Endpoint = {}", server.endpoint());
	let _ = writeln!(out, "AllowedIPs = {}", server.allowed_ips);
	if server.keepalive_secs > 0 {
		let _ = writeln!(out, "PersistentKeepalive = {}", server.keepalive_secs);
	}

	out
}
