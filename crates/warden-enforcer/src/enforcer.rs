// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use crate::command::WgCommand;
use crate::dump::{parse_dump, InterfaceDump, LivePeer};
use crate::error::{EnforcerError, FailureReason, Result};
use crate::executor::{CommandExecutor, ExecOutput};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::net::Ipv4Addr;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use warden_wg_common::{Node, Peer, PeerId, PeerState, PresharedKey, SuspendMode};

/// What one node should look like for one peer.
#[derive(Debug, Clone)]
pub struct DesiredPeer {
	pub id: PeerId,
	pub address: Ipv4Addr,
	pub preshared_key: PresharedKey,
	pub state: PeerState,
}

impl DesiredPeer {
	fn allowed_ip(&self) -> String {
		format!("{}/32", self.address)
	}
}

impl From<&Peer> for DesiredPeer {
	fn from(peer: &Peer) -> Self {
		Self {
			id: peer.id,
			address: peer.address,
			preshared_key: peer.preshared_key.clone(),
			state: peer.state,
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerOutcome {
	/// The node matches the desired state. `changed` is false when it already
	/// did before this pass. `added` is set when the peer was absent and has
	/// just been configured, so its transfer counters start again from zero.
	Applied { changed: bool, added: bool },
	Failed(FailureReason),
}

#[derive(Debug, Clone)]
pub struct ReconcileReport {
	pub node: Node,
	pub outcomes: BTreeMap<PeerId, PeerOutcome>,
}

impl ReconcileReport {
	pub fn new(node: Node) -> Self {
		Self {
			node,
			outcomes: BTreeMap::new(),
		}
	}

	/// A report in which every desired peer failed for the same reason.
	pub fn all_failed(node: Node, desired: &[DesiredPeer], reason: FailureReason) -> Self {
		Self {
			node,
			outcomes: desired
				.iter()
				.map(|peer| (peer.id, PeerOutcome::Failed(reason.clone())))
				.collect(),
		}
	}

	pub fn outcome(&self, id: &PeerId) -> Option<&PeerOutcome> {
		self.outcomes.get(id)
	}

	pub fn is_applied(&self, id: &PeerId) -> bool {
		matches!(self.outcomes.get(id), Some(PeerOutcome::Applied { .. }))
	}

	pub fn changes(&self) -> usize {
		self.outcomes
			.values()
			.filter(|outcome| matches!(outcome, PeerOutcome::Applied { changed: true, .. }))
			.count()
	}

	/// Peers whose counters on this node began a new epoch during the pass.
	pub fn added(&self) -> impl Iterator<Item = &PeerId> {
		self.outcomes.iter().filter_map(|(id, outcome)| match outcome {
			PeerOutcome::Applied { added: true, .. } => Some(id),
			_ => None,
		})
	}

	pub fn failed(&self) -> impl Iterator<Item = (&PeerId, &FailureReason)> {
		self.outcomes.iter().filter_map(|(id, outcome)| match outcome {
			PeerOutcome::Failed(reason) => Some((id, reason)),
			PeerOutcome::Applied { .. } => None,
		})
	}

	pub fn is_clean(&self) -> bool {
		self.failed().next().is_none()
	}
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PeerCounters {
	pub rx_bytes: u64,
	pub tx_bytes: u64,
	pub latest_handshake: Option<DateTime<Utc>>,
}

impl PeerCounters {
	/// Bytes moved in both directions; this is what quotas are measured in.
	pub fn total(&self) -> u64 {
		self.rx_bytes.saturating_add(self.tx_bytes)
	}
}

impl From<&LivePeer> for PeerCounters {
	fn from(peer: &LivePeer) -> Self {
		Self {
			rx_bytes: peer.rx_bytes,
			tx_bytes: peer.tx_bytes,
			latest_handshake: peer.latest_handshake,
		}
	}
}

/// An enforcement point: one node's interface, converged on request.
#[async_trait]
pub trait Enforcer: Send + Sync {
	fn node(&self) -> Node;

	/// Converges the node to `desired`. Peers on the node that are not in
	/// `desired` are left untouched. Never fails as a whole; every desired
	/// peer gets its own outcome.
	async fn reconcile(&self, desired: &[DesiredPeer]) -> ReconcileReport;

	async fn read_counters(&self) -> Result<HashMap<PeerId, PeerCounters>>;

	/// The interface as the node currently reports it, managed or not.
	async fn interface_status(&self) -> Result<InterfaceDump>;

	/// Takes the interface down and brings it back up.
	async fn restart_interface(&self) -> Result<()>;
}

/// [`Enforcer`] backed by the `wg`, `wg-quick` and `iptables` tools, run
/// through a [`CommandExecutor`].
pub struct WgEnforcer {
	node: Node,
	interface: String,
	executor: Arc<dyn CommandExecutor>,
	suspend_mode: SuspendMode,
}

impl WgEnforcer {
	pub fn new(
		node: Node,
		interface: impl Into<String>,
		executor: Arc<dyn CommandExecutor>,
		suspend_mode: SuspendMode,
	) -> Self {
		Self {
			node,
			interface: interface.into(),
			executor,
			suspend_mode,
		}
	}

	pub fn interface(&self) -> &str {
		&self.interface
	}

	async fn run(&self, command: &WgCommand) -> Result<ExecOutput> {
		let invocation = command.invocation(&self.interface);
		let output = self.executor.execute(&invocation).await?;
		if !output.success() {
			return Err(EnforcerError::CommandFailed {
				command: invocation.to_string(),
				status: output.status.unwrap_or(-1),
				stderr: output.stderr,
			});
		}
		if command.is_mutation() {
			debug!(node = %self.node, cmd = %invocation, "applied");
		}
		Ok(output)
	}

	pub async fn dump(&self) -> Result<InterfaceDump> {
		let output = self.run(&WgCommand::Dump).await?;
		Ok(parse_dump(&output.stdout)?)
	}

	/// `iptables -C` exits 1 when the rule is absent.
	async fn is_blocked(&self, address: Ipv4Addr) -> Result<bool> {
		let invocation = WgCommand::CheckBlock { address }.invocation(&self.interface);
		let output = self.executor.execute(&invocation).await?;
		match output.status {
			Some(0) => Ok(true),
			Some(1) => Ok(false),
			status => Err(EnforcerError::CommandFailed {
				command: invocation.to_string(),
				status: status.unwrap_or(-1),
				stderr: output.stderr,
			}),
		}
	}

	async fn apply_peer(&self, desired: &DesiredPeer, live: Option<&LivePeer>) -> Result<PeerOutcome> {
		let mut changed = false;
		let mut added = false;
		let firewall = self.suspend_mode == SuspendMode::Firewall;

		let want_present = match desired.state {
			PeerState::Active => true,
			PeerState::Suspended => firewall,
			PeerState::PendingRemoval => false,
		};

		if want_present {
			let in_sync = live.is_some_and(|l| l.matches(&desired.preshared_key, &desired.allowed_ip()));
			if !in_sync {
				self.run(&WgCommand::SetPeer {
					public_key: desired.id,
					preshared_key: desired.preshared_key.clone(),
					address: desired.address,
				})
				.await?;
				changed = true;
				added = live.is_none();
			}
		} else if live.is_some() {
			self.run(&WgCommand::RemovePeer {
				public_key: desired.id,
			})
			.await?;
			changed = true;
		}

		if firewall {
			let want_blocked = desired.state == PeerState::Suspended;
			let blocked = self.is_blocked(desired.address).await?;
			if want_blocked && !blocked {
				self.run(&WgCommand::InsertBlock {
					address: desired.address,
				})
				.await?;
				changed = true;
			} else if !want_blocked && blocked {
				self.run(&WgCommand::DeleteBlock {
					address: desired.address,
				})
				.await?;
				changed = true;
			}
		}

		Ok(PeerOutcome::Applied { changed, added })
	}
}

#[async_trait]
impl Enforcer for WgEnforcer {
	fn node(&self) -> Node {
		self.node
	}

	#[instrument(skip(self, desired), fields(node = %self.node, interface = %self.interface, peers = desired.len()))]
	async fn reconcile(&self, desired: &[DesiredPeer]) -> ReconcileReport {
		let live = match self.dump().await {
			Ok(dump) => dump,
			Err(e) => {
				warn!(error = %e, target = %self.executor.describe(), "failed to read interface state");
				return ReconcileReport::all_failed(self.node, desired, e.failure_reason());
			}
		};

		let mut report = ReconcileReport::new(self.node);
		for peer in desired {
			let outcome = match self.apply_peer(peer, live.peers.get(&peer.id)).await {
				Ok(outcome) => outcome,
				Err(e) => {
					warn!(peer_id = %peer.id.short(), error = %e, "failed to apply peer");
					PeerOutcome::Failed(e.failure_reason())
				}
			};
			report.outcomes.insert(peer.id, outcome);
		}

		let changes = report.changes();
		if changes > 0 {
			info!(changes, "reconciled interface");
		} else {
			debug!("interface already converged");
		}
		report
	}

	#[instrument(skip(self), fields(node = %self.node))]
	async fn read_counters(&self) -> Result<HashMap<PeerId, PeerCounters>> {
		let dump = self.dump().await?;
		Ok(dump
			.peers
			.iter()
			.map(|(id, live)| (*id, PeerCounters::from(live)))
			.collect())
	}

	#[instrument(skip(self), fields(node = %self.node))]
	async fn interface_status(&self) -> Result<InterfaceDump> {
		self.dump().await
	}

	#[instrument(skip(self), fields(node = %self.node, interface = %self.interface))]
	async fn restart_interface(&self) -> Result<()> {
		if let Err(e) = self.run(&WgCommand::InterfaceDown).await {
			warn!(error = %e, "interface down failed, bringing it up anyway");
			if e.is_unreachable() {
				return Err(e);
			}
		}
		self.run(&WgCommand::InterfaceUp).await?;
		info!("interface restarted");
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::testing::{Fault, FakeWg};
	use warden_wg_common::WgKeyPair;

	fn desired(last_octet: u8, state: PeerState) -> DesiredPeer {
		DesiredPeer {
			id: *WgKeyPair::generate().public_key(),
			address: Ipv4Addr::new(10, 20, 30, last_octet),
			preshared_key: PresharedKey::generate(),
			state,
		}
	}

	fn enforcer(fake: &Arc<FakeWg>, mode: SuspendMode) -> WgEnforcer {
		WgEnforcer::new(Node::Local, "wg0", fake.clone(), mode)
	}

	#[tokio::test]
	async fn second_reconcile_changes_nothing() {
		let fake = Arc::new(FakeWg::new());
		let enforcer = enforcer(&fake, SuspendMode::Remove);
		let peers = vec![
			desired(10, PeerState::Active),
			desired(11, PeerState::Active),
			desired(12, PeerState::Suspended),
		];

		let first = enforcer.reconcile(&peers).await;
		assert!(first.is_clean());
		assert_eq!(first.changes(), 2);
		let mutations = fake.mutations().len();

		let second = enforcer.reconcile(&peers).await;
		assert!(second.is_clean());
		assert_eq!(second.changes(), 0);
		assert_eq!(fake.mutations().len(), mutations);
	}

	#[tokio::test]
	async fn remove_mode_drops_suspended_and_restores_on_resume() {
		let fake = Arc::new(FakeWg::new());
		let enforcer = enforcer(&fake, SuspendMode::Remove);
		let mut peer = desired(10, PeerState::Active);

		enforcer.reconcile(std::slice::from_ref(&peer)).await;
		assert!(fake.has_peer(&peer.id));

		peer.state = PeerState::Suspended;
		let report = enforcer.reconcile(std::slice::from_ref(&peer)).await;
		assert_eq!(
			report.outcome(&peer.id),
			Some(&PeerOutcome::Applied {
				changed: true,
				added: false
			})
		);
		assert!(!fake.has_peer(&peer.id));

		peer.state = PeerState::Active;
		let report = enforcer.reconcile(std::slice::from_ref(&peer)).await;
		assert_eq!(report.added().collect::<Vec<_>>(), vec![&peer.id]);
		assert!(fake.has_peer(&peer.id));
		assert_eq!(fake.allowed_ips(&peer.id), Some(vec!["10.20.30.10/32".to_string()]));
	}

	#[tokio::test]
	async fn drift_repair_is_not_a_new_epoch() {
		let fake = Arc::new(FakeWg::new());
		let enforcer = enforcer(&fake, SuspendMode::Remove);
		let peer = desired(10, PeerState::Active);
		fake.add_unmanaged_peer(peer.id, "10.20.30.99/32");

		let report = enforcer.reconcile(std::slice::from_ref(&peer)).await;
		assert_eq!(report.changes(), 1);
		assert_eq!(report.added().count(), 0);
	}

	#[tokio::test]
	async fn firewall_mode_blocks_without_removing() {
		let fake = Arc::new(FakeWg::new());
		let enforcer = enforcer(&fake, SuspendMode::Firewall);
		let mut peer = desired(10, PeerState::Suspended);

		let report = enforcer.reconcile(std::slice::from_ref(&peer)).await;
		assert!(report.is_clean());
		assert!(fake.has_peer(&peer.id));
		assert!(fake.is_blocked(peer.address));

		peer.state = PeerState::Active;
		enforcer.reconcile(std::slice::from_ref(&peer)).await;
		assert!(fake.has_peer(&peer.id));
		assert!(!fake.is_blocked(peer.address));

		peer.state = PeerState::PendingRemoval;
		enforcer.reconcile(std::slice::from_ref(&peer)).await;
		assert!(!fake.has_peer(&peer.id));
		assert!(!fake.is_blocked(peer.address));
	}

	#[tokio::test]
	async fn repairs_drifted_psk() {
		let fake = Arc::new(FakeWg::new());
		let enforcer = enforcer(&fake, SuspendMode::Remove);
		let peer = desired(10, PeerState::Active);
		fake.add_unmanaged_peer(peer.id, "10.20.30.99/32");

		let report = enforcer.reconcile(std::slice::from_ref(&peer)).await;
		assert_eq!(report.changes(), 1);
		assert_eq!(fake.allowed_ips(&peer.id), Some(vec!["10.20.30.10/32".to_string()]));
	}

	#[tokio::test]
	async fn leaves_unmanaged_peers_alone() {
		let fake = Arc::new(FakeWg::new());
		let enforcer = enforcer(&fake, SuspendMode::Remove);
		let link = *WgKeyPair::generate().public_key();
		fake.add_unmanaged_peer(link, "10.20.30.2/32");

		enforcer.reconcile(&[desired(10, PeerState::Active)]).await;
		assert!(fake.has_peer(&link));
	}

	#[tokio::test]
	async fn one_rejected_peer_does_not_fail_the_batch() {
		let fake = Arc::new(FakeWg::new());
		let enforcer = enforcer(&fake, SuspendMode::Remove);
		let good = desired(10, PeerState::Active);
		let bad = desired(11, PeerState::Active);
		fake.reject_peer(bad.id);

		let report = enforcer.reconcile(&[good.clone(), bad.clone()]).await;
		assert!(report.is_applied(&good.id));
		assert!(matches!(
			report.outcome(&bad.id),
			Some(PeerOutcome::Failed(FailureReason::Rejected(_)))
		));
		assert!(fake.has_peer(&good.id));
	}

	#[tokio::test]
	async fn unreachable_node_fails_every_peer() {
		let fake = Arc::new(FakeWg::new());
		fake.set_fault(Some(Fault::Timeout));
		let enforcer = WgEnforcer::new(Node::Remote, "wg0", fake.clone(), SuspendMode::Remove);
		let peers = vec![desired(10, PeerState::Active), desired(11, PeerState::Active)];

		let report = enforcer.reconcile(&peers).await;
		assert_eq!(report.node, Node::Remote);
		assert_eq!(report.failed().count(), 2);
		assert!(report.failed().all(|(_, reason)| reason.is_unreachable()));
	}

	#[tokio::test]
	async fn reads_counters() {
		let fake = Arc::new(FakeWg::new());
		let enforcer = enforcer(&fake, SuspendMode::Remove);
		let peer = desired(10, PeerState::Active);
		enforcer.reconcile(std::slice::from_ref(&peer)).await;
		fake.set_transfer(&peer.id, 300, 700);

		let counters = enforcer.read_counters().await.unwrap();
		assert_eq!(counters[&peer.id].total(), 1000);
	}

	#[tokio::test]
	async fn interface_status_includes_unmanaged_peers() {
		let fake = Arc::new(FakeWg::new());
		let enforcer = enforcer(&fake, SuspendMode::Remove);
		let link = *WgKeyPair::generate().public_key();
		fake.add_unmanaged_peer(link, "10.20.30.2/32");
		let peer = desired(10, PeerState::Active);
		enforcer.reconcile(std::slice::from_ref(&peer)).await;

		let status = enforcer.interface_status().await.unwrap();
		assert_eq!(status.listen_port, Some(17968));
		assert_eq!(status.peers.len(), 2);
		assert!(status.peers.contains_key(&link));

		fake.set_up(false);
		assert!(enforcer.interface_status().await.is_err());
	}

	#[tokio::test]
	async fn counter_read_failure_is_error() {
		let fake = Arc::new(FakeWg::new());
		fake.set_fault(Some(Fault::Unreachable));
		let enforcer = enforcer(&fake, SuspendMode::Remove);

		let err = enforcer.read_counters().await.unwrap_err();
		assert!(err.is_unreachable());
	}

	#[tokio::test]
	async fn restart_cycles_interface() {
		let fake = Arc::new(FakeWg::new());
		let enforcer = enforcer(&fake, SuspendMode::Remove);
		let peer = desired(10, PeerState::Active);
		enforcer.reconcile(std::slice::from_ref(&peer)).await;

		enforcer.restart_interface().await.unwrap();
		assert!(fake.is_up());
		assert!(!fake.has_peer(&peer.id));

		let report = enforcer.reconcile(std::slice::from_ref(&peer)).await;
		assert_eq!(report.changes(), 1);
	}

	#[tokio::test]
	async fn restart_tolerates_interface_already_down() {
		let fake = Arc::new(FakeWg::new());
		fake.set_up(false);
		let enforcer = enforcer(&fake, SuspendMode::Remove);

		enforcer.restart_interface().await.unwrap();
		assert!(fake.is_up());
	}
}
