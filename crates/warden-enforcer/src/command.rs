// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::fmt;
use std::net::Ipv4Addr;
use warden_wg_common::{PresharedKey, WgPublicKey};
use zeroize::Zeroizing;

/// The complete vocabulary an enforcer may issue against a node. Every
/// command is scoped to one interface and its FORWARD rules.
#[derive(Debug, Clone)]
pub enum WgCommand {
	Dump,
	SetPeer {
		public_key: WgPublicKey,
		preshared_key: PresharedKey,
		address: Ipv4Addr,
	},
	RemovePeer {
		public_key: WgPublicKey,
	},
	CheckBlock {
		address: Ipv4Addr,
	},
	InsertBlock {
		address: Ipv4Addr,
	},
	DeleteBlock {
		address: Ipv4Addr,
	},
	InterfaceDown,
	InterfaceUp,
}

/// A program plus arguments, ready for any [`crate::CommandExecutor`].
/// Secrets travel on stdin so they never show up in a process listing.
#[derive(Clone)]
pub struct Invocation {
	pub program: &'static str,
	pub args: Vec<String>,
	pub stdin: Option<Zeroizing<String>>,
}

impl Invocation {
	fn new(program: &'static str, args: Vec<String>) -> Self {
		Self {
			program,
			args,
			stdin: None,
		}
	}
}

impl fmt::Display for Invocation {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.program)?;
		for arg in &self.args {
			write!(f, " {arg}")?;
		}
		Ok(())
	}
}

impl fmt::Debug for Invocation {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Invocation")
			.field("command", &self.to_string())
			.field("stdin", &self.stdin.as_ref().map(|_| "[REDACTED]"))
			.finish()
	}
}

fn host_cidr(address: Ipv4Addr) -> String {
	format!("{address}/32")
}

impl WgCommand {
	/// Whether the command changes node state. Read-only commands are safe to
	/// repeat and are not counted as changes.
	pub fn is_mutation(&self) -> bool {
		!matches!(self, WgCommand::Dump | WgCommand::CheckBlock { .. })
	}

	pub fn invocation(&self, interface: &str) -> Invocation {
		let iface = interface.to_string();
		match self {
			WgCommand::Dump => Invocation::new("wg", vec!["show".into(), iface, "dump".into()]),
			WgCommand::SetPeer {
				public_key,
				preshared_key,
				address,
			} => {
				let mut invocation = Invocation::new(
					"wg",
					vec![
						"set".into(),
						iface,
						"peer".into(),
						public_key.to_base64(),
						"preshared-key".into(),
						"/dev/stdin".into(),
						"allowed-ips".into(),
						host_cidr(*address),
					],
				);
				let mut stdin = preshared_key.to_base64();
				stdin.push('\n');
				invocation.stdin = Some(stdin);
				invocation
			}
			WgCommand::RemovePeer { public_key } => Invocation::new(
				"wg",
				vec![
					"set".into(),
					iface,
					"peer".into(),
					public_key.to_base64(),
					"remove".into(),
				],
			),
			WgCommand::CheckBlock { address } => {
				Invocation::new("iptables", block_rule("-C", None, &iface, *address))
			}
			WgCommand::InsertBlock { address } => {
				Invocation::new("iptables", block_rule("-I", Some("1"), &iface, *address))
			}
			WgCommand::DeleteBlock { address } => {
				Invocation::new("iptables", block_rule("-D", None, &iface, *address))
			}
			WgCommand::InterfaceDown => Invocation::new("wg-quick", vec!["down".into(), iface]),
			WgCommand::InterfaceUp => Invocation::new("wg-quick", vec!["up".into(), iface]),
		}
	}
}

fn block_rule(op: &str, position: Option<&str>, interface: &str, address: Ipv4Addr) -> Vec<String> {
	let mut args = vec![op.to_string(), "FORWARD".to_string()];
	if let Some(position) = position {
		args.push(position.to_string());
	}
	args.extend([
		"-i".to_string(),
		interface.to_string(),
		"-s".to_string(),
		host_cidr(address),
		"-j".to_string(),
		"DROP".to_string(),
	]);
	args
}
