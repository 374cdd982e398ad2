// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! In-memory stand-in for a node running `wg`, `wg-quick` and `iptables`.
//!
//! [`FakeWg`] interprets the exact invocations [`crate::WgCommand`] produces,
//! so a real [`crate::WgEnforcer`] can be driven against it in tests.

use crate::command::Invocation;
use crate::error::ExecError;
use crate::executor::{CommandExecutor, ExecOutput};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt::Write as _;
use std::net::Ipv4Addr;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use warden_wg_common::{PresharedKey, WgKeyPair, WgPublicKey};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
	/// Every command fails as if the host could not be reached.
	Unreachable,
	/// Every command fails as if it ran past its deadline.
	Timeout,
}

#[derive(Debug, Clone, Default)]
struct FakePeer {
	preshared_key: Option<PresharedKey>,
	allowed_ips: Vec<String>,
	rx_bytes: u64,
	tx_bytes: u64,
	latest_handshake: i64,
}

struct FakeState {
	up: bool,
	peers: BTreeMap<WgPublicKey, FakePeer>,
	blocks: BTreeSet<String>,
	mutations: Vec<String>,
	fault: Option<Fault>,
	rejected: HashSet<WgPublicKey>,
}

pub struct FakeWg {
	server: WgKeyPair,
	state: Mutex<FakeState>,
}

impl Default for FakeWg {
	fn default() -> Self {
		Self::new()
	}
}

impl FakeWg {
	pub fn new() -> Self {
		Self {
			server: WgKeyPair::generate(),
			state: Mutex::new(FakeState {
				up: true,
				peers: BTreeMap::new(),
				blocks: BTreeSet::new(),
				mutations: Vec::new(),
				fault: None,
				rejected: HashSet::new(),
			}),
		}
	}

	fn state(&self) -> MutexGuard<'_, FakeState> {
		self.state.lock().unwrap_or_else(PoisonError::into_inner)
	}

	pub fn set_fault(&self, fault: Option<Fault>) {
		self.state().fault = fault;
	}

	pub fn set_up(&self, up: bool) {
		self.state().up = up;
	}

	pub fn is_up(&self) -> bool {
		self.state().up
	}

	/// Makes every `wg set` for `public_key` exit non-zero.
	pub fn reject_peer(&self, public_key: WgPublicKey) {
		self.state().rejected.insert(public_key);
	}

	/// Configures a peer directly, bypassing any enforcer.
	pub fn add_unmanaged_peer(&self, public_key: WgPublicKey, allowed_ip: &str) {
		self.state().peers.insert(
			public_key,
			FakePeer {
				allowed_ips: vec![allowed_ip.to_string()],
				..FakePeer::default()
			},
		);
	}

	pub fn has_peer(&self, public_key: &WgPublicKey) -> bool {
		self.state().peers.contains_key(public_key)
	}

	pub fn peer_count(&self) -> usize {
		self.state().peers.len()
	}

	pub fn allowed_ips(&self, public_key: &WgPublicKey) -> Option<Vec<String>> {
		self.state()
			.peers
			.get(public_key)
			.map(|peer| peer.allowed_ips.clone())
	}

	pub fn is_blocked(&self, address: Ipv4Addr) -> bool {
		self.state().blocks.contains(&format!("{address}/32"))
	}

	/// Sets the absolute transfer counters of a configured peer.
	pub fn set_transfer(&self, public_key: &WgPublicKey, rx_bytes: u64, tx_bytes: u64) {
		if let Some(peer) = self.state().peers.get_mut(public_key) {
			peer.rx_bytes = rx_bytes;
			peer.tx_bytes = tx_bytes;
		}
	}

	pub fn set_handshake(&self, public_key: &WgPublicKey, at: DateTime<Utc>) {
		if let Some(peer) = self.state().peers.get_mut(public_key) {
			peer.latest_handshake = at.timestamp();
		}
	}

	/// Zeroes every peer's counters, as an interface reload would.
	pub fn reset_counters(&self) {
		for peer in self.state().peers.values_mut() {
			peer.rx_bytes = 0;
			peer.tx_bytes = 0;
		}
	}

	/// Every state-changing command that succeeded, in order.
	pub fn mutations(&self) -> Vec<String> {
		self.state().mutations.clone()
	}

	pub fn clear_mutations(&self) {
		self.state().mutations.clear();
	}

	fn dump(&self, state: &FakeState) -> String {
		let mut out = format!(
			"{}\t{}\t17968\toff\n",
			self.server.private_key().to_base64().as_str(),
			self.server.public_key()
		);
		for (public_key, peer) in &state.peers {
			let psk = peer
				.preshared_key
				.as_ref()
				.map(|psk| psk.to_base64().to_string())
				.unwrap_or_else(|| "(none)".to_string());
			let allowed = if peer.allowed_ips.is_empty() {
				"(none)".to_string()
			} else {
				peer.allowed_ips.join(",")
			};
			let _ = writeln!(
				out,
				"{public_key}\t{psk}\t(none)\t{allowed}\t{}\t{}\t{}\toff",
				peer.latest_handshake, peer.rx_bytes, peer.tx_bytes
			);
		}
		out
	}
}

fn exit(status: i32, stdout: impl Into<String>, stderr: impl Into<String>) -> ExecOutput {
	ExecOutput {
		status: Some(status),
		stdout: stdout.into(),
		stderr: stderr.into(),
	}
}

#[async_trait]
impl CommandExecutor for FakeWg {
	fn describe(&self) -> String {
		"fake".to_string()
	}

	async fn execute(&self, invocation: &Invocation) -> Result<ExecOutput, ExecError> {
		let mut state = self.state();

		match state.fault {
			Some(Fault::Unreachable) => {
				return Err(ExecError::Unreachable("connection refused".to_string()))
			}
			Some(Fault::Timeout) => return Err(ExecError::Timeout(Duration::from_secs(10))),
			None => {}
		}

		let args: Vec<&str> = invocation.args.iter().map(String::as_str).collect();
		let output = match (invocation.program, args.as_slice()) {
			("wg", ["show", _, "dump"]) => {
				if !state.up {
					return Ok(exit(1, "", "Unable to access interface: No such device"));
				}
				return Ok(exit(0, self.dump(&state), ""));
			}
			("wg", ["set", _, "peer", key, rest @ ..]) => {
				let Ok(public_key) = WgPublicKey::from_base64(key) else {
					return Ok(exit(1, "", "Key is not the correct length or format"));
				};
				if !state.up {
					return Ok(exit(1, "", "Unable to modify interface: No such device"));
				}
				if state.rejected.contains(&public_key) {
					return Ok(exit(1, "", "Unable to modify interface: Operation not permitted"));
				}
				match rest {
					["remove"] => {
						state.peers.remove(&public_key);
					}
					["preshared-key", "/dev/stdin", "allowed-ips", allowed] => {
						let psk = invocation
							.stdin
							.as_deref()
							.and_then(|s| PresharedKey::from_base64(s.trim()).ok());
						let peer = state.peers.entry(public_key).or_default();
						peer.preshared_key = psk;
						peer.allowed_ips = vec![allowed.to_string()];
					}
					_ => return Ok(exit(1, "", "Invalid argument")),
				}
				exit(0, "", "")
			}
			("iptables", [op, "FORWARD", rest @ ..]) => {
				let cidr = match rest {
					["1", "-i", _, "-s", cidr, "-j", "DROP"] | ["-i", _, "-s", cidr, "-j", "DROP"] => {
						cidr.to_string()
					}
					_ => return Ok(exit(2, "", "Bad argument")),
				};
				match *op {
					"-C" => {
						let status = if state.blocks.contains(&cidr) { 0 } else { 1 };
						return Ok(exit(status, "", ""));
					}
					"-I" => {
						state.blocks.insert(cidr);
					}
					"-D" => {
						if !state.blocks.remove(&cidr) {
							return Ok(exit(1, "", "Bad rule (does a matching rule exist in that chain?)."));
						}
					}
					_ => return Ok(exit(2, "", "Bad argument")),
				}
				exit(0, "", "")
			}
			("wg-quick", ["down", iface]) => {
				if !state.up {
					return Ok(exit(1, "", format!("wg-quick: `{iface}' is not a WireGuard interface")));
				}
				state.up = false;
				state.peers.clear();
				exit(0, "", "")
			}
			("wg-quick", ["up", iface]) => {
				if state.up {
					return Ok(exit(1, "", format!("wg-quick: `{iface}' already exists")));
				}
				state.up = true;
				exit(0, "", "")
			}
			_ => return Ok(exit(127, "", format!("{}: command not found", invocation.program))),
		};

		state.mutations.push(invocation.to_string());
		Ok(output)
	}
}
