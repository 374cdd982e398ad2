// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The operator-facing API.
//!
//! Every command validates its input, updates the store, converges the local
//! node for the affected peer under that peer's local lock, and queues the
//! remote node. Local enforcement failures undo the store change and fail
//! the command. Remote failures never do; they surface as the peer's remote
//! status.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::net::Ipv4Addr;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use warden_enforcer::{
	DesiredPeer, Enforcer, EnforcerError, InterfaceDump, PeerOutcome, ReconcileReport,
};
use warden_server_db::UsageDay;
use warden_wg_common::{
	render_client_config, Node, Peer, PeerId, PeerState, PeerSummary, PresharedKey, RemoteStatus,
	ResumePolicy, ServerProfile, SuspendReason, WgPrivateKey, WgPublicKey,
};
use zeroize::Zeroizing;

use crate::accountant::{AccountingSummary, TrafficAccountant};
use crate::error::{CommandError, Result};
use crate::remote_sync::RemoteSync;
use crate::sequencer::PeerSequencer;
use crate::state::AppState;
use crate::store::{PeerStore, ResetReason};

pub const MAX_NAME_LEN: usize = 32;
pub const MAX_HISTORY_DAYS: u32 = 366;

/// Everything a new client needs. Holds secrets; `Debug` redacts them.
pub struct CreatedPeer {
	pub id: PeerId,
	pub name: String,
	pub public_key: WgPublicKey,
	pub private_key: Option<WgPrivateKey>,
	pub preshared_key: PresharedKey,
	pub address: Ipv4Addr,
	pub remote_status: RemoteStatus,
	/// `None` when no endpoint is configured.
	pub client_config: Option<Zeroizing<String>>,
}

impl fmt::Debug for CreatedPeer {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("CreatedPeer")
			.field("id", &self.id)
			.field("name", &self.name)
			.field("address", &self.address)
			.field("remote_status", &self.remote_status)
			.field("client_config", &self.client_config.as_ref().map(|_| "[REDACTED]"))
			.finish_non_exhaustive()
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelTarget {
	Local,
	Remote,
	All,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum RestartOutcome {
	Ok,
	Failed(String),
	Unreachable(String),
	RemoteDisabled,
}

impl RestartOutcome {
	pub fn is_ok(&self) -> bool {
		matches!(self, RestartOutcome::Ok)
	}
}

impl fmt::Display for RestartOutcome {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			RestartOutcome::Ok => f.write_str("ok"),
			RestartOutcome::Failed(detail) => write!(f, "failed: {detail}"),
			RestartOutcome::Unreachable(detail) => write!(f, "unreachable: {detail}"),
			RestartOutcome::RemoteDisabled => f.write_str("remote disabled"),
		}
	}
}

/// Per-node result of a restart. A node that was not targeted is `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RestartReport {
	pub local: Option<RestartOutcome>,
	pub remote: Option<RestartOutcome>,
}

impl RestartReport {
	pub fn is_ok(&self) -> bool {
		self.local.as_ref().map_or(true, RestartOutcome::is_ok)
			&& self.remote.as_ref().map_or(true, RestartOutcome::is_ok)
	}
}

/// What one node's interface looks like right now.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InterfaceStatus {
	pub public_key: Option<String>,
	pub listen_port: Option<u16>,
	/// Every peer on the interface, including ones warden does not manage.
	pub peers: usize,
	pub managed_peers: usize,
	pub rx_bytes: u64,
	pub tx_bytes: u64,
	pub latest_handshake: Option<DateTime<Utc>>,
}

impl InterfaceStatus {
	fn from_dump(dump: &InterfaceDump, managed: &HashSet<PeerId>) -> Self {
		Self {
			public_key: dump.public_key.map(|key| key.to_base64()),
			listen_port: dump.listen_port,
			peers: dump.peers.len(),
			managed_peers: dump.peers.keys().filter(|id| managed.contains(*id)).count(),
			rx_bytes: dump.peers.values().map(|p| p.rx_bytes).sum(),
			tx_bytes: dump.peers.values().map(|p| p.tx_bytes).sum(),
			latest_handshake: dump.peers.values().filter_map(|p| p.latest_handshake).max(),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum NodeStatus {
	Up(InterfaceStatus),
	Failed(String),
	Unreachable(String),
	RemoteDisabled,
}

impl NodeStatus {
	pub fn is_up(&self) -> bool {
		matches!(self, NodeStatus::Up(_))
	}
}

impl fmt::Display for NodeStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			NodeStatus::Up(status) => write!(
				f,
				"up, {} peers ({} managed), port {}",
				status.peers,
				status.managed_peers,
				status
					.listen_port
					.map_or_else(|| "none".to_string(), |port| port.to_string())
			),
			NodeStatus::Failed(detail) => write!(f, "failed: {detail}"),
			NodeStatus::Unreachable(detail) => write!(f, "unreachable: {detail}"),
			NodeStatus::RemoteDisabled => f.write_str("remote disabled"),
		}
	}
}

/// Per-node status. A node that was not asked about is `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TunnelStatusReport {
	pub local: Option<NodeStatus>,
	pub remote: Option<NodeStatus>,
}

impl TunnelStatusReport {
	pub fn is_up(&self) -> bool {
		self.local.as_ref().map_or(true, NodeStatus::is_up)
			&& self.remote.as_ref().map_or(true, NodeStatus::is_up)
	}
}

pub fn validate_name(name: &str) -> Result<()> {
	if name.is_empty() || name.len() > MAX_NAME_LEN {
		return Err(CommandError::Validation(format!(
			"name must be 1-{MAX_NAME_LEN} characters"
		)));
	}
	if name.starts_with('-') {
		return Err(CommandError::Validation("name must not start with '-'".to_string()));
	}
	if let Some(c) = name
		.chars()
		.find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-')))
	{
		return Err(CommandError::Validation(format!(
			"name contains invalid character '{c}'; use letters, digits, '_', '.' or '-'"
		)));
	}
	Ok(())
}

pub fn validate_quota(quota_bytes: Option<u64>) -> Result<()> {
	match quota_bytes {
		Some(0) => Err(CommandError::Validation("quota must be greater than zero".to_string())),
		_ => Ok(()),
	}
}

fn local_failure(report: &ReconcileReport, id: &PeerId) -> Option<String> {
	match report.outcome(id) {
		Some(PeerOutcome::Applied { .. }) => None,
		Some(PeerOutcome::Failed(reason)) => Some(reason.to_string()),
		None => Some("no outcome reported".to_string()),
	}
}

fn restart_failure(err: &EnforcerError) -> RestartOutcome {
	if err.is_unreachable() {
		RestartOutcome::Unreachable(err.to_string())
	} else {
		RestartOutcome::Failed(err.to_string())
	}
}

async fn node_status(enforcer: &dyn Enforcer, managed: &HashSet<PeerId>) -> NodeStatus {
	match enforcer.interface_status().await {
		Ok(dump) => NodeStatus::Up(InterfaceStatus::from_dump(&dump, managed)),
		Err(e) => {
			warn!(node = %enforcer.node(), error = %e, "failed to read interface status");
			if e.is_unreachable() {
				NodeStatus::Unreachable(e.to_string())
			} else {
				NodeStatus::Failed(e.to_string())
			}
		}
	}
}

#[derive(Clone)]
pub struct CommandFacade {
	store: PeerStore,
	sequencer: PeerSequencer,
	local: Arc<dyn Enforcer>,
	remote: Option<Arc<dyn Enforcer>>,
	remote_sync: RemoteSync,
	resume_policy: ResumePolicy,
	server_profile: Option<ServerProfile>,
	accountant: Arc<TrafficAccountant>,
}

impl CommandFacade {
	pub fn new(state: &AppState) -> Self {
		Self {
			store: state.store.clone(),
			sequencer: state.sequencer.clone(),
			local: state.local.clone(),
			remote: state.remote.clone(),
			remote_sync: state.remote_sync.clone(),
			resume_policy: state.settings.resume_policy,
			server_profile: state.settings.server_profile.clone(),
			accountant: Arc::new(state.accountant()),
		}
	}

	/// Converges the local node for one peer. The caller holds the peer's
	/// local lock.
	async fn apply_local(&self, peer: &Peer) -> Result<Option<String>> {
		let report = self.local.reconcile(&[DesiredPeer::from(peer)]).await;
		self.store
			.restart_counter_epochs(report.node, report.added())
			.await?;
		Ok(local_failure(&report, &peer.id))
	}

	async fn live_peer(&self, id: &PeerId) -> Result<Peer> {
		let peer = self.store.get_peer(id).await?;
		if !peer.state.is_live() {
			return Err(CommandError::NotFound(id.to_string()));
		}
		Ok(peer)
	}

	/// Resolves a peer name, or a base64 public key, to a live peer's id.
	pub async fn resolve(&self, name_or_id: &str) -> Result<PeerId> {
		if let Some(peer) = self.store.find_by_name(name_or_id).await? {
			return Ok(peer.id);
		}
		if let Ok(id) = WgPublicKey::from_base64(name_or_id) {
			match self.live_peer(&id).await {
				Ok(peer) => return Ok(peer.id),
				Err(CommandError::NotFound(_)) => {}
				Err(e) => return Err(e),
			}
		}
		Err(CommandError::NotFound(name_or_id.to_string()))
	}

	#[instrument(skip(self), fields(name = %name))]
	pub async fn create_peer(&self, name: &str, quota_bytes: Option<u64>) -> Result<CreatedPeer> {
		validate_name(name)?;
		validate_quota(quota_bytes)?;

		let peer = self.store.create_peer(name, quota_bytes).await?;
		let guard = self.sequencer.lock(Node::Local, peer.id).await;
		if let Some(reason) = self.apply_local(&peer).await? {
			error!(peer_id = %peer.id.short(), %reason, "local enforcement failed, discarding new peer");
			self.store.delete_peer(&peer.id).await?;
			drop(guard);
			self.sequencer.forget(&peer.id);
			return Err(CommandError::LocalEnforcement(reason));
		}
		drop(guard);

		self.remote_sync.enqueue(vec![peer.id]);
		info!(peer_id = %peer.id.short(), address = %peer.address, "peer created");

		let client_config = match (&self.server_profile, &peer.private_key) {
			(Some(profile), Some(private_key)) => Some(render_client_config(
				profile,
				private_key,
				&peer.preshared_key,
				peer.address,
			)),
			_ => None,
		};

		Ok(CreatedPeer {
			id: peer.id,
			name: peer.name,
			public_key: peer.id,
			private_key: peer.private_key,
			preshared_key: peer.preshared_key,
			address: peer.address,
			remote_status: peer.remote_status,
			client_config,
		})
	}

	/// Marks the peer for removal and takes it off the local node. The peer
	/// disappears from listings at once; the row is purged when every node
	/// has confirmed.
	#[instrument(skip(self), fields(peer_id = %id.short()))]
	pub async fn delete_peer(&self, id: &PeerId) -> Result<()> {
		let guard = self.sequencer.lock(Node::Local, *id).await;
		let peer = self.live_peer(id).await?;

		let pending = self
			.store
			.set_state(id, PeerState::PendingRemoval, None)
			.await?;
		if let Some(reason) = self.apply_local(&pending).await? {
			error!(%reason, "local removal failed, restoring peer");
			self.store
				.revert_state(id, peer.state, peer.suspend_reason)
				.await?;
			return Err(CommandError::LocalEnforcement(reason));
		}
		drop(guard);

		if self.remote_sync.is_enabled() {
			self.remote_sync.enqueue(vec![*id]);
		} else {
			self.store.delete_peer(id).await?;
			self.sequencer.forget(id);
		}
		info!(name = %peer.name, "peer deleted");
		Ok(())
	}

	/// Suspends a peer by hand. Suspending a suspended peer changes nothing.
	#[instrument(skip(self), fields(peer_id = %id.short()))]
	pub async fn suspend_peer(&self, id: &PeerId) -> Result<PeerSummary> {
		let guard = self.sequencer.lock(Node::Local, *id).await;
		let peer = self.live_peer(id).await?;
		if peer.state == PeerState::Suspended {
			return Ok(peer.summary());
		}

		let suspended = self
			.store
			.set_state(id, PeerState::Suspended, Some(SuspendReason::Manual))
			.await?;
		if let Some(reason) = self.apply_local(&suspended).await? {
			error!(%reason, "local suspension failed, reverting");
			self.store.revert_state(id, peer.state, None).await?;
			return Err(CommandError::LocalEnforcement(reason));
		}
		drop(guard);

		self.remote_sync.enqueue(vec![*id]);
		info!(name = %peer.name, "peer suspended");
		Ok(suspended.summary())
	}

	/// Resumes a suspended peer according to the configured resume policy.
	#[instrument(skip(self), fields(peer_id = %id.short()))]
	pub async fn resume_peer(&self, id: &PeerId) -> Result<PeerSummary> {
		let reset = match self.resume_policy {
			ResumePolicy::ResetUsage => Some(ResetReason::Resume),
			ResumePolicy::KeepUsage => None,
		};
		self.resume(id, reset).await
	}

	/// Resumes a peer, zeroing its usage with `reset` once the local node has
	/// accepted it.
	pub(crate) async fn resume(&self, id: &PeerId, reset: Option<ResetReason>) -> Result<PeerSummary> {
		let guard = self.sequencer.lock(Node::Local, *id).await;
		let peer = self.live_peer(id).await?;
		if peer.state == PeerState::Active {
			return Ok(peer.summary());
		}
		if reset.is_none() && peer.is_over_quota() {
			return Err(CommandError::Validation(format!(
				"peer '{}' is at or over its quota; raise the quota or reset usage first",
				peer.name
			)));
		}

		let active = self.store.set_state(id, PeerState::Active, None).await?;
		if let Some(reason) = self.apply_local(&active).await? {
			error!(%reason, "local resume failed, reverting");
			self.store
				.revert_state(id, PeerState::Suspended, peer.suspend_reason)
				.await?;
			return Err(CommandError::LocalEnforcement(reason));
		}
		if let Some(reason) = reset {
			self.store.reset_usage(id, reason).await?;
		}
		drop(guard);

		self.remote_sync.enqueue(vec![*id]);
		info!(name = %peer.name, "peer resumed");
		Ok(self.store.get_peer(id).await?.summary())
	}

	pub async fn list_peers(&self) -> Result<Vec<PeerSummary>> {
		Ok(self
			.store
			.list_peers()
			.await?
			.iter()
			.map(Peer::summary)
			.collect())
	}

	pub async fn get_peer(&self, id: &PeerId) -> Result<PeerSummary> {
		Ok(self.live_peer(id).await?.summary())
	}

	pub async fn find_peer(&self, name: &str) -> Result<PeerSummary> {
		self.store
			.find_by_name(name)
			.await?
			.map(|peer| peer.summary())
			.ok_or_else(|| CommandError::NotFound(name.to_string()))
	}

	/// Changes a peer's quota. `None` makes it unlimited.
	#[instrument(skip(self), fields(peer_id = %id.short()))]
	pub async fn set_quota(&self, id: &PeerId, quota_bytes: Option<u64>) -> Result<PeerSummary> {
		validate_quota(quota_bytes)?;
		self.live_peer(id).await?;
		self.store.update_quota(id, quota_bytes).await?;
		Ok(self.store.get_peer(id).await?.summary())
	}

	/// Zeroes a peer's usage. Returns the usage before the reset.
	#[instrument(skip(self), fields(peer_id = %id.short()))]
	pub async fn reset_usage(&self, id: &PeerId) -> Result<u64> {
		let _guard = self.sequencer.lock(Node::Local, *id).await;
		self.live_peer(id).await?;
		Ok(self.store.reset_usage(id, ResetReason::Manual).await?)
	}

	pub async fn client_config(&self, id: &PeerId) -> Result<Zeroizing<String>> {
		let peer = self.live_peer(id).await?;
		let profile = self.server_profile.as_ref().ok_or_else(|| {
			CommandError::ClientConfigUnavailable(
				"server endpoint or public key not configured".to_string(),
			)
		})?;
		let private_key = peer.private_key.as_ref().ok_or_else(|| {
			CommandError::ClientConfigUnavailable("private key is not stored for this peer".to_string())
		})?;
		Ok(render_client_config(
			profile,
			private_key,
			&peer.preshared_key,
			peer.address,
		))
	}

	pub async fn usage_history(&self, id: &PeerId, days: u32) -> Result<Vec<UsageDay>> {
		if days == 0 || days > MAX_HISTORY_DAYS {
			return Err(CommandError::Validation(format!(
				"days must be between 1 and {MAX_HISTORY_DAYS}"
			)));
		}
		self.live_peer(id).await?;
		Ok(self.store.usage_history(id, days).await?)
	}

	/// Runs one accounting pass now instead of waiting for the next tick.
	/// Fails only when the local node's counters cannot be read.
	pub async fn refresh_usage(&self) -> Result<AccountingSummary> {
		let summary = self.accountant.tick().await?;
		if summary.skipped_sources.contains(&Node::Local) {
			return Err(CommandError::CounterRead(
				"local interface counters unavailable".to_string(),
			));
		}
		Ok(summary)
	}

	/// Restarts the tunnel interface on the targeted nodes. A single-node
	/// target turns that node's failure into an error; `All` reports each
	/// node separately.
	#[instrument(skip(self))]
	pub async fn restart_tunnel(&self, target: TunnelTarget) -> Result<RestartReport> {
		let mut report = RestartReport::default();

		if matches!(target, TunnelTarget::Local | TunnelTarget::All) {
			let outcome = self.restart_local().await?;
			if target == TunnelTarget::Local {
				if let RestartOutcome::Failed(detail) | RestartOutcome::Unreachable(detail) = &outcome {
					return Err(CommandError::LocalEnforcement(detail.clone()));
				}
			}
			report.local = Some(outcome);
		}

		if matches!(target, TunnelTarget::Remote | TunnelTarget::All) {
			let outcome = self.restart_remote().await?;
			if target == TunnelTarget::Remote {
				match &outcome {
					RestartOutcome::RemoteDisabled => return Err(CommandError::RemoteDisabled),
					RestartOutcome::Unreachable(detail) => {
						return Err(CommandError::RemoteUnreachable(detail.clone()))
					}
					RestartOutcome::Ok | RestartOutcome::Failed(_) => {}
				}
			}
			report.remote = Some(outcome);
		}

		Ok(report)
	}

	/// Reads each targeted node's interface. One node failing to answer
	/// never hides the other's status.
	#[instrument(skip(self))]
	pub async fn tunnel_status(&self, target: TunnelTarget) -> Result<TunnelStatusReport> {
		let managed: HashSet<PeerId> = self.store.list_all().await?.iter().map(|p| p.id).collect();
		let mut report = TunnelStatusReport::default();

		if matches!(target, TunnelTarget::Local | TunnelTarget::All) {
			report.local = Some(node_status(self.local.as_ref(), &managed).await);
		}
		if matches!(target, TunnelTarget::Remote | TunnelTarget::All) {
			report.remote = Some(match &self.remote {
				Some(remote) => node_status(remote.as_ref(), &managed).await,
				None => NodeStatus::RemoteDisabled,
			});
		}

		Ok(report)
	}

	/// Restarts the local interface and re-applies every peer before any
	/// peer lock is released.
	async fn restart_local(&self) -> Result<RestartOutcome> {
		let peers = self.store.list_all().await?;
		let ids: Vec<PeerId> = peers.iter().map(|p| p.id).collect();
		let _guards = self.sequencer.lock_many(Node::Local, &ids).await;

		if let Err(e) = self.local.restart_interface().await {
			error!(error = %e, "local interface restart failed");
			return Ok(restart_failure(&e));
		}

		let peers = self.store.list_all().await?;
		let desired: Vec<DesiredPeer> = peers.iter().map(DesiredPeer::from).collect();
		let applied = self.local.reconcile(&desired).await;
		self.store
			.restart_counter_epochs(applied.node, applied.added())
			.await?;
		for (id, reason) in applied.failed() {
			warn!(peer_id = %id.short(), %reason, "failed to re-apply peer after restart");
		}
		info!(changes = applied.changes(), "local interface restarted and re-applied");
		Ok(RestartOutcome::Ok)
	}

	async fn restart_remote(&self) -> Result<RestartOutcome> {
		let Some(remote) = &self.remote else {
			return Ok(RestartOutcome::RemoteDisabled);
		};

		let ids: Vec<PeerId> = self
			.store
			.list_all()
			.await?
			.iter()
			.map(|p| p.id)
			.collect();
		let guards = self.sequencer.lock_many(Node::Remote, &ids).await;
		let result = remote.restart_interface().await;
		drop(guards);

		match result {
			Ok(()) => {
				info!("remote interface restarted, queueing re-sync");
				self.remote_sync.enqueue(ids);
				Ok(RestartOutcome::Ok)
			}
			Err(e) => {
				warn!(error = %e, "remote interface restart failed");
				Ok(restart_failure(&e))
			}
		}
	}
}
