// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Parser for `wg show <interface> dump`.
//!
//! The first line describes the interface:
//! `private-key  public-key  listen-port  fwmark`. Every following line is a
//! peer: `public-key  preshared-key  endpoint  allowed-ips  latest-handshake
//! transfer-rx  transfer-tx  persistent-keepalive`. Fields are tab separated
//! and absent values are written as `(none)` or `off`.

use crate::error::DumpError;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use warden_wg_common::{PresharedKey, WgPublicKey};

const NONE: &str = "(none)";

#[derive(Debug, Clone, Default)]
pub struct InterfaceDump {
	pub public_key: Option<WgPublicKey>,
	pub listen_port: Option<u16>,
	pub peers: HashMap<WgPublicKey, LivePeer>,
}

#[derive(Debug, Clone)]
pub struct LivePeer {
	pub preshared_key: Option<PresharedKey>,
	pub allowed_ips: Vec<String>,
	pub latest_handshake: Option<DateTime<Utc>>,
	pub rx_bytes: u64,
	pub tx_bytes: u64,
}

impl LivePeer {
	/// Whether the peer is configured exactly as `address/32` with `psk`.
	pub fn matches(&self, psk: &PresharedKey, allowed_ip: &str) -> bool {
		self.preshared_key.as_ref() == Some(psk)
			&& self.allowed_ips.len() == 1
			&& self.allowed_ips[0] == allowed_ip
	}
}

pub fn parse_dump(text: &str) -> Result<InterfaceDump, DumpError> {
	let mut dump = InterfaceDump::default();

	for (index, line) in text.lines().enumerate() {
		let line_no = index + 1;
		if line.trim().is_empty() {
			continue;
		}
		let fields: Vec<&str> = line.split('\t').collect();
		let malformed = |reason: String| DumpError::Malformed {
			line: line_no,
			reason,
		};

		match fields.len() {
			// Interface line. The private key in field 0 is never retained.
			4 => {
				dump.public_key = optional(fields[1])
					.map(WgPublicKey::from_base64)
					.transpose()
					.map_err(|e| malformed(format!("interface public key: {e}")))?;
				dump.listen_port = optional(fields[2])
					.map(str::parse::<u16>)
					.transpose()
					.map_err(|e| malformed(format!("listen port: {e}")))?;
			}
			8 => {
				let public_key = WgPublicKey::from_base64(fields[0])
					.map_err(|e| malformed(format!("peer public key: {e}")))?;
				let preshared_key = optional(fields[1])
					.map(PresharedKey::from_base64)
					.transpose()
					.map_err(|e| malformed(format!("preshared key: {e}")))?;
				let allowed_ips = optional(fields[3])
					.map(|ips| ips.split(',').map(|ip| ip.trim().to_string()).collect())
					.unwrap_or_default();
				let handshake: i64 = fields[4]
					.parse()
					.map_err(|e| malformed(format!("latest handshake: {e}")))?;
				let rx_bytes = fields[5]
					.parse()
					.map_err(|e| malformed(format!("transfer rx: {e}")))?;
				let tx_bytes = fields[6]
					.parse()
					.map_err(|e| malformed(format!("transfer tx: {e}")))?;

				dump.peers.insert(
					public_key,
					LivePeer {
						preshared_key,
						allowed_ips,
						latest_handshake: (handshake > 0)
							.then(|| DateTime::from_timestamp(handshake, 0))
							.flatten(),
						rx_bytes,
						tx_bytes,
					},
				);
			}
			n => return Err(malformed(format!("expected 4 or 8 fields, got {n}"))),
		}
	}

	Ok(dump)
}

fn optional(field: &str) -> Option<&str> {
	match field {
		NONE | "off" | "" => None,
		value => Some(value),
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use warden_wg_common::WgKeyPair;

	fn interface_line(pair: &WgKeyPair) -> String {
		format!(
			"{}\t{}\t17968\toff",
			pair.private_key().to_base64().as_str(),
			pair.public_key()
		)
	}

	#[test]
	fn parses_interface_and_peers() {
		let server = WgKeyPair::generate();
		let peer = WgKeyPair::generate();
		let psk = PresharedKey::generate();
		let text = format!(
			"{}\n{}\t{}\t203.0.113.7:51820\t10.20.30.10/32\t1700000000\t1024\t2048\t25\n",
			interface_line(&server),
			peer.public_key(),
			psk.to_base64().as_str(),
		);

		let dump = parse_dump(&text).unwrap();
		assert_eq!(dump.public_key.as_ref(), Some(server.public_key()));
		assert_eq!(dump.listen_port, Some(17968));

		let live = &dump.peers[peer.public_key()];
		assert_eq!(live.preshared_key.as_ref(), Some(&psk));
		assert_eq!(live.allowed_ips, vec!["10.20.30.10/32"]);
		assert_eq!(live.rx_bytes, 1024);
		assert_eq!(live.tx_bytes, 2048);
		assert_eq!(
			live.latest_handshake.map(|t| t.timestamp()),
			Some(1_700_000_000)
		);
		assert!(live.matches(&psk, "10.20.30.10/32"));
		assert!(!live.matches(&psk, "10.20.30.11/32"));
	}

	#[test]
	fn handles_absent_values() {
		let server = WgKeyPair::generate();
		let peer = WgKeyPair::generate();
		let text = format!(
			"{}\n{}\t(none)\t(none)\t(none)\t0\t0\t0\toff\n",
			interface_line(&server),
			peer.public_key(),
		);

		let dump = parse_dump(&text).unwrap();
		let live = &dump.peers[peer.public_key()];
		assert!(live.preshared_key.is_none());
		assert!(live.allowed_ips.is_empty());
		assert!(live.latest_handshake.is_none());
	}

	#[test]
	fn splits_multiple_allowed_ips() {
		let peer = WgKeyPair::generate();
		let text = format!(
			"{}\t(none)\t(none)\t10.20.30.0/24,fd00::/64\t0\t5\t6\toff",
			peer.public_key()
		);

		let dump = parse_dump(&text).unwrap();
		assert_eq!(
			dump.peers[peer.public_key()].allowed_ips,
			vec!["10.20.30.0/24", "fd00::/64"]
		);
	}

	#[test]
	fn empty_interface_has_no_peers() {
		let server = WgKeyPair::generate();
		let dump = parse_dump(&interface_line(&server)).unwrap();
		assert!(dump.peers.is_empty());
	}

	#[test]
	fn rejects_wrong_field_count() {
		let err = parse_dump("a\tb\tc").unwrap_err();
		assert!(matches!(err, DumpError::Malformed { line: 1, .. }));
	}

	#[test]
	fn rejects_bad_counter() {
		let peer = WgKeyPair::generate();
		let text = format!(
			"{}\t(none)\t(none)\t(none)\t0\tlots\t0\toff",
			peer.public_key()
		);
		let err = parse_dump(&text).unwrap_err();
		assert!(err.to_string().contains("transfer rx"));
	}
}
