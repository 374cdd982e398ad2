// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Turns raw interface counters into cumulative per-peer usage and enforces
//! quotas.
//!
//! Counters are absolute and reset whenever an interface restarts or a peer
//! is re-added, so each tick stores the latest reading per (peer, node) and
//! only adds the difference. A reading below the previous one starts a new
//! epoch and counts in full.

use futures::future::join_all;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};
use warden_enforcer::{DesiredPeer, Enforcer, PeerCounters};
use warden_wg_common::{Node, PeerId, PeerState};

use crate::error::{StoreError, StoreResult};
use crate::events::{EventBus, PeerEvent};
use crate::remote_sync::RemoteSync;
use crate::sequencer::PeerSequencer;
use crate::state::AppState;
use crate::store::PeerStore;

#[derive(Debug, Clone, Default, Serialize)]
pub struct AccountingSummary {
	pub peers_accounted: usize,
	pub bytes_added: u64,
	pub suspended: Vec<PeerId>,
	pub warned: Vec<PeerId>,
	pub skipped_sources: Vec<Node>,
}

pub struct TrafficAccountant {
	store: PeerStore,
	sequencer: PeerSequencer,
	local: Arc<dyn Enforcer>,
	sources: Vec<Arc<dyn Enforcer>>,
	remote_sync: RemoteSync,
	events: EventBus,
	warn_ratio: f64,
}

impl TrafficAccountant {
	pub fn new(state: &AppState) -> Self {
		let mut sources = vec![state.local.clone()];
		if state.settings.remote_counts_traffic {
			if let Some(remote) = &state.remote {
				sources.push(remote.clone());
			}
		}

		Self {
			store: state.store.clone(),
			sequencer: state.sequencer.clone(),
			local: state.local.clone(),
			sources,
			remote_sync: state.remote_sync.clone(),
			events: state.events.clone(),
			warn_ratio: state.settings.warn_ratio,
		}
	}

	pub fn sources(&self) -> Vec<Node> {
		self.sources.iter().map(|source| source.node()).collect()
	}

	/// One accounting pass over every live peer.
	#[instrument(skip(self))]
	pub async fn tick(&self) -> StoreResult<AccountingSummary> {
		let mut summary = AccountingSummary::default();

		let readings = join_all(self.sources.iter().map(|source| async move {
			(source.node(), source.read_counters().await)
		}))
		.await;

		let mut counters: Vec<(Node, HashMap<PeerId, PeerCounters>)> = Vec::new();
		for (node, result) in readings {
			match result {
				Ok(map) => counters.push((node, map)),
				Err(e) => {
					warn!(%node, error = %e, "failed to read counters, skipping source this tick");
					summary.skipped_sources.push(node);
				}
			}
		}
		if counters.is_empty() {
			return Ok(summary);
		}

		for peer in self.store.list_peers().await? {
			let observed: Vec<(Node, PeerCounters)> = counters
				.iter()
				.filter_map(|(node, map)| map.get(&peer.id).map(|c| (*node, *c)))
				.collect();
			if observed.is_empty() {
				continue;
			}

			match self.account_peer(&peer.id, &observed, &mut summary).await {
				Ok(()) | Err(StoreError::NotFound(_)) => {}
				Err(e) => return Err(e),
			}
		}

		if summary.bytes_added > 0 || !summary.suspended.is_empty() {
			info!(
				peers = summary.peers_accounted,
				bytes_added = summary.bytes_added,
				suspended = summary.suspended.len(),
				"accounting tick complete"
			);
		} else {
			debug!(peers = summary.peers_accounted, "accounting tick complete");
		}
		Ok(summary)
	}

	/// Samples one peer under its local lock so a concurrent suspend or
	/// resume is either fully before or fully after this reading.
	async fn account_peer(
		&self,
		id: &PeerId,
		observed: &[(Node, PeerCounters)],
		summary: &mut AccountingSummary,
	) -> StoreResult<()> {
		let guard = self.sequencer.lock(Node::Local, *id).await;
		let peer = self.store.get_peer(id).await?;
		if !peer.state.is_live() {
			return Ok(());
		}

		// Suspended peers keep their epochs current without being charged.
		let count_usage = peer.state == PeerState::Active;
		let mut used = peer.used_bytes;
		let mut added = 0u64;
		let mut handshake = peer.last_handshake;

		for (node, counters) in observed {
			let outcome = self
				.store
				.apply_counter_sample(id, *node, counters.total(), count_usage)
				.await?;
			if outcome.counted {
				added = added.saturating_add(outcome.delta);
			}
			used = outcome.used_bytes;
			if let Some(at) = counters.latest_handshake {
				if handshake.map_or(true, |h| at > h) {
					handshake = Some(at);
				}
			}
		}

		if handshake != peer.last_handshake {
			if let Some(at) = handshake {
				self.store.record_handshake(id, at).await?;
			}
		}

		summary.peers_accounted += 1;
		summary.bytes_added = summary.bytes_added.saturating_add(added);
		if added > 0 {
			debug!(peer_id = %id.short(), delta = added, used, "usage accounted");
		}

		let Some(quota) = peer.quota_bytes else {
			return Ok(());
		};
		if peer.state != PeerState::Active {
			return Ok(());
		}

		if !peer.quota_warned
			&& used as f64 >= quota as f64 * self.warn_ratio
			&& self.store.mark_quota_warned(id).await?
		{
			info!(peer_id = %id.short(), used, quota, "peer nearing quota");
			self.events.publish(PeerEvent::QuotaWarning {
				peer_id: *id,
				name: peer.name.clone(),
				used_bytes: used,
				quota_bytes: quota,
			});
			summary.warned.push(*id);
		}

		if used >= quota && self.store.suspend_for_quota(id).await? {
			info!(peer_id = %id.short(), used, quota, "quota exceeded, suspending peer");
			let suspended = self.store.get_peer(id).await?;
			let report = self.local.reconcile(&[DesiredPeer::from(&suspended)]).await;
			if let Some((_, reason)) = report.failed().next() {
				error!(peer_id = %id.short(), %reason, "failed to enforce quota suspension locally");
			}
			drop(guard);

			self.remote_sync.enqueue(vec![*id]);
			self.events.publish(PeerEvent::QuotaExceeded {
				peer_id: *id,
				name: peer.name,
				used_bytes: used,
				quota_bytes: quota,
			});
			summary.suspended.push(*id);
		}

		Ok(())
	}
}
