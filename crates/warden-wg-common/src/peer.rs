// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use crate::keys::{PresharedKey, WgPrivateKey, WgPublicKey};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;

/// Stable peer identity. The public key is unique per peer and is what the
/// interface itself keys on, so it doubles as the id.
pub type PeerId = WgPublicKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeerState {
	Active,
	Suspended,
	PendingRemoval,
}

impl PeerState {
	pub fn as_str(&self) -> &'static str {
		match self {
			PeerState::Active => "active",
			PeerState::Suspended => "suspended",
			PeerState::PendingRemoval => "pending_removal",
		}
	}

	/// Whether `self -> next` is an allowed lifecycle step.
	///
	/// Removal is terminal: nothing leaves `PendingRemoval` except the row
	/// being purged.
	pub fn can_transition_to(&self, next: PeerState) -> bool {
		matches!(
			(self, next),
			(PeerState::Active, PeerState::Suspended)
				| (PeerState::Suspended, PeerState::Active)
				| (PeerState::Active, PeerState::PendingRemoval)
				| (PeerState::Suspended, PeerState::PendingRemoval)
		)
	}

	pub fn is_live(&self) -> bool {
		!matches!(self, PeerState::PendingRemoval)
	}
}

impl fmt::Display for PeerState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl std::str::FromStr for PeerState {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"active" => Ok(PeerState::Active),
			"suspended" => Ok(PeerState::Suspended),
			"pending_removal" => Ok(PeerState::PendingRemoval),
			_ => Err(format!("unknown peer state: {s}")),
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuspendReason {
	Quota,
	Manual,
}

impl SuspendReason {
	pub fn as_str(&self) -> &'static str {
		match self {
			SuspendReason::Quota => "quota",
			SuspendReason::Manual => "manual",
		}
	}
}

impl std::str::FromStr for SuspendReason {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"quota" => Ok(SuspendReason::Quota),
			"manual" => Ok(SuspendReason::Manual),
			_ => Err(format!("unknown suspend reason: {s}")),
		}
	}
}

/// How far the remote node's configuration is known to match the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteStatus {
	Synced,
	Pending,
	Degraded,
}

impl RemoteStatus {
	pub fn as_str(&self) -> &'static str {
		match self {
			RemoteStatus::Synced => "synced",
			RemoteStatus::Pending => "pending",
			RemoteStatus::Degraded => "degraded",
		}
	}
}

impl fmt::Display for RemoteStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl std::str::FromStr for RemoteStatus {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"synced" => Ok(RemoteStatus::Synced),
			"pending" => Ok(RemoteStatus::Pending),
			"degraded" => Ok(RemoteStatus::Degraded),
			_ => Err(format!("unknown remote status: {s}")),
		}
	}
}

/// An enforcement point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Node {
	Local,
	Remote,
}

impl Node {
	pub fn as_str(&self) -> &'static str {
		match self {
			Node::Local => "local",
			Node::Remote => "remote",
		}
	}
}

impl fmt::Display for Node {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl std::str::FromStr for Node {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"local" => Ok(Node::Local),
			"remote" => Ok(Node::Remote),
			_ => Err(format!("unknown node: {s}")),
		}
	}
}

#[derive(Debug, Clone)]
pub struct Peer {
	pub id: PeerId,
	pub name: String,
	pub address: Ipv4Addr,
	pub private_key: Option<WgPrivateKey>,
	pub preshared_key: PresharedKey,
	pub quota_bytes: Option<u64>,
	pub used_bytes: u64,
	pub state: PeerState,
	pub suspend_reason: Option<SuspendReason>,
	pub remote_status: RemoteStatus,
	pub quota_warned: bool,
	pub last_handshake: Option<DateTime<Utc>>,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
}

impl Peer {
	pub fn public_key(&self) -> &WgPublicKey {
		&self.id
	}

	pub fn is_over_quota(&self) -> bool {
		self.quota_bytes.is_some_and(|quota| self.used_bytes >= quota)
	}

	/// Whether usage has crossed `ratio` of the quota. Unlimited peers never do.
	pub fn is_near_quota(&self, ratio: f64) -> bool {
		match self.quota_bytes {
			Some(quota) => self.used_bytes as f64 >= quota as f64 * ratio,
			None => false,
		}
	}

	pub fn summary(&self) -> PeerSummary {
		PeerSummary {
			id: self.id,
			name: self.name.clone(),
			address: self.address,
			state: self.state,
			quota_bytes: self.quota_bytes,
			used_bytes: self.used_bytes,
			remote_status: self.remote_status,
			last_handshake: self.last_handshake,
		}
	}
}

/// Listing view of a peer, free of key material.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerSummary {
	pub id: PeerId,
	pub name: String,
	pub address: Ipv4Addr,
	pub state: PeerState,
	pub quota_bytes: Option<u64>,
	pub used_bytes: u64,
	pub remote_status: RemoteStatus,
	pub last_handshake: Option<DateTime<Utc>>,
}
