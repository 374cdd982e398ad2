// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Periodic full convergence of both nodes to the store.

use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use warden_enforcer::{DesiredPeer, Enforcer, ReconcileReport};
use warden_wg_common::{Node, Peer, PeerId, PeerState};

use crate::error::StoreResult;
use crate::remote_sync::{RemoteSync, RemoteSyncReport};
use crate::sequencer::PeerSequencer;
use crate::state::AppState;
use crate::store::PeerStore;

#[derive(Debug, Clone)]
pub struct FullPassReport {
	pub local: ReconcileReport,
	/// Pending removals purged after the local node confirmed them gone.
	/// Only happens without a remote node.
	pub purged: Vec<PeerId>,
	pub remote: Option<RemoteSyncReport>,
}

pub struct Reconciler {
	store: PeerStore,
	sequencer: PeerSequencer,
	local: Arc<dyn Enforcer>,
	remote_sync: RemoteSync,
}

impl Reconciler {
	pub fn new(state: &AppState) -> Self {
		Self {
			store: state.store.clone(),
			sequencer: state.sequencer.clone(),
			local: state.local.clone(),
			remote_sync: state.remote_sync.clone(),
		}
	}

	/// Converges the local node, then the remote node. A remote failure
	/// never affects the local phase.
	#[instrument(skip(self))]
	pub async fn run_full_pass(&self) -> StoreResult<FullPassReport> {
		let (local, purged) = self.reconcile_local().await?;

		let remote = if self.remote_sync.is_enabled() {
			let ids: Vec<PeerId> = self.store.list_all().await?.iter().map(|p| p.id).collect();
			Some(self.remote_sync.sync_peers(&ids).await?)
		} else {
			None
		};

		info!(
			local_changes = local.changes(),
			local_failures = local.failed().count(),
			purged = purged.len(),
			remote_degraded = remote.as_ref().map_or(0, |r| r.degraded.len()),
			"reconciliation pass complete"
		);
		Ok(FullPassReport {
			local,
			purged,
			remote,
		})
	}

	/// Local phase: every peer's local lock is held while the desired set is
	/// read and applied.
	pub async fn reconcile_local(&self) -> StoreResult<(ReconcileReport, Vec<PeerId>)> {
		let ids: Vec<PeerId> = self.store.list_all().await?.iter().map(|p| p.id).collect();
		let guards = self.sequencer.lock_many(Node::Local, &ids).await;

		// Peers created after the id snapshot are applied by their own create.
		let locked: HashSet<PeerId> = ids.into_iter().collect();
		let peers: Vec<Peer> = self
			.store
			.list_all()
			.await?
			.into_iter()
			.filter(|p| locked.contains(&p.id))
			.collect();
		let desired: Vec<DesiredPeer> = peers.iter().map(DesiredPeer::from).collect();
		let report = self.local.reconcile(&desired).await;
		self.store
			.restart_counter_epochs(report.node, report.added())
			.await?;
		drop(guards);

		for (id, reason) in report.failed() {
			warn!(peer_id = %id.short(), %reason, "local reconcile failed for peer");
		}

		let mut purged = Vec::new();
		if !self.store.remote_enabled() {
			for peer in peers
				.iter()
				.filter(|p| p.state == PeerState::PendingRemoval && report.is_applied(&p.id))
			{
				if self.store.delete_peer(&peer.id).await? {
					self.sequencer.forget(&peer.id);
					purged.push(peer.id);
				}
			}
		}

		Ok((report, purged))
	}
}
