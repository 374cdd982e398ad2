// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Best-effort propagation of desired state to the remote node.
//!
//! Remote work runs off the caller's path: commands enqueue peer ids and
//! return. A sync re-reads each peer from the store when it runs, applies
//! the batch, and retries only the peers that failed. A peer that is still
//! failing after the last retry is marked Degraded and left for the next
//! full reconciliation pass.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, instrument, warn};
use warden_enforcer::{DesiredPeer, Enforcer, FailureReason, PeerOutcome};
use warden_server_config::ReconcileConfig;
use warden_server_jobs::scheduler::calculate_backoff_delay;
use warden_wg_common::{Node, Peer, PeerId, PeerState, RemoteStatus};

use crate::error::{StoreError, StoreResult};
use crate::events::{EventBus, PeerEvent};
use crate::sequencer::PeerSequencer;
use crate::store::PeerStore;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
	pub max_retries: u32,
	pub base_delay: Duration,
	pub max_delay: Duration,
}

impl Default for RetryPolicy {
	fn default() -> Self {
		Self {
			max_retries: 3,
			base_delay: Duration::from_secs(1),
			max_delay: Duration::from_secs(30),
		}
	}
}

impl From<&ReconcileConfig> for RetryPolicy {
	fn from(config: &ReconcileConfig) -> Self {
		Self {
			max_retries: config.max_retries,
			base_delay: config.base_backoff,
			max_delay: config.max_backoff,
		}
	}
}

impl RetryPolicy {
	/// Exponential backoff for the `retry`th retry, scaled by a random factor
	/// in `[0.5, 1.5)` and capped at `max_delay`.
	pub fn delay(&self, retry: u32) -> Duration {
		let backoff = calculate_backoff_delay(retry, self.base_delay, self.max_delay);
		let jitter_factor = 0.5 + fastrand::f64();
		backoff.mul_f64(jitter_factor).min(self.max_delay)
	}
}

#[derive(Debug, Clone, Default)]
pub struct RemoteSyncReport {
	pub synced: Vec<PeerId>,
	pub purged: Vec<PeerId>,
	pub degraded: Vec<PeerId>,
	pub attempts: u32,
}

impl RemoteSyncReport {
	pub fn is_clean(&self) -> bool {
		self.degraded.is_empty()
	}
}

#[derive(Clone)]
pub struct RemoteSync {
	remote: Option<Arc<dyn Enforcer>>,
	store: PeerStore,
	sequencer: PeerSequencer,
	events: EventBus,
	retry: RetryPolicy,
	tasks: TaskTracker,
	shutdown: CancellationToken,
}

impl RemoteSync {
	pub fn new(
		remote: Option<Arc<dyn Enforcer>>,
		store: PeerStore,
		sequencer: PeerSequencer,
		events: EventBus,
		retry: RetryPolicy,
	) -> Self {
		Self {
			remote,
			store,
			sequencer,
			events,
			retry,
			tasks: TaskTracker::new(),
			shutdown: CancellationToken::new(),
		}
	}

	pub fn is_enabled(&self) -> bool {
		self.remote.is_some()
	}

	/// Schedules a background sync of `ids`. A no-op without a remote node.
	pub fn enqueue(&self, ids: Vec<PeerId>) {
		if self.remote.is_none() || ids.is_empty() {
			return;
		}
		debug!(peers = ids.len(), "queued remote sync");
		let this = self.clone();
		self.tasks.spawn(async move {
			if let Err(e) = this.sync_peers(&ids).await {
				warn!(error = %e, "remote sync aborted");
			}
		});
	}

	/// Waits for every queued sync to finish.
	pub async fn wait_idle(&self) {
		self.tasks.close();
		self.tasks.wait().await;
		self.tasks.reopen();
	}

	/// Interrupts retry backoffs and waits for in-flight syncs.
	pub async fn shutdown(&self) {
		self.shutdown.cancel();
		self.tasks.close();
		self.tasks.wait().await;
	}

	/// Syncs every peer the store knows about, pending removals included.
	pub async fn sync_all(&self) -> StoreResult<RemoteSyncReport> {
		let ids: Vec<PeerId> = self.store.list_all().await?.iter().map(|p| p.id).collect();
		self.sync_peers(&ids).await
	}

	/// Applies `ids` to the remote node, retrying the failed subset with
	/// backoff. No lock is held while waiting between attempts.
	#[instrument(skip(self, ids), fields(peers = ids.len()))]
	pub async fn sync_peers(&self, ids: &[PeerId]) -> StoreResult<RemoteSyncReport> {
		let mut report = RemoteSyncReport::default();
		let Some(remote) = &self.remote else {
			return Ok(report);
		};

		let mut pending = ids.to_vec();
		pending.sort();
		pending.dedup();

		while !pending.is_empty() {
			report.attempts += 1;
			let failures = self.attempt(remote.as_ref(), &pending, &mut report).await?;
			if failures.is_empty() {
				break;
			}

			let retries_used = report.attempts - 1;
			if retries_used >= self.retry.max_retries {
				for (peer, reason) in failures {
					self.mark_degraded(&peer, &reason).await?;
					report.degraded.push(peer.id);
				}
				break;
			}

			for (peer, _) in &failures {
				ignore_missing(self.store.set_remote_status(&peer.id, RemoteStatus::Pending).await)?;
			}
			pending = failures.into_iter().map(|(peer, _)| peer.id).collect();

			let delay = self.retry.delay(report.attempts);
			debug!(failed = pending.len(), ?delay, "retrying remote sync");
			tokio::select! {
				_ = self.shutdown.cancelled() => {
					info!(failed = pending.len(), "remote sync interrupted by shutdown");
					break;
				}
				_ = tokio::time::sleep(delay) => {}
			}
		}

		if !report.synced.is_empty() || !report.purged.is_empty() {
			info!(
				synced = report.synced.len(),
				purged = report.purged.len(),
				degraded = report.degraded.len(),
				attempts = report.attempts,
				"remote sync finished"
			);
		}
		Ok(report)
	}

	/// One batch attempt under the remote locks of `ids`. Returns the peers
	/// that failed.
	async fn attempt(
		&self,
		remote: &dyn Enforcer,
		ids: &[PeerId],
		report: &mut RemoteSyncReport,
	) -> StoreResult<Vec<(Peer, FailureReason)>> {
		let guards = self.sequencer.lock_many(Node::Remote, ids).await;

		let mut peers = HashMap::with_capacity(ids.len());
		for id in ids {
			match self.store.get_peer(id).await {
				Ok(peer) => {
					peers.insert(peer.id, peer);
				}
				Err(StoreError::NotFound(_)) => {}
				Err(e) => return Err(e),
			}
		}
		let desired: Vec<DesiredPeer> = peers.values().map(DesiredPeer::from).collect();
		let outcome = remote.reconcile(&desired).await;
		self.store
			.restart_counter_epochs(outcome.node, outcome.added())
			.await?;

		let mut failures = Vec::new();
		let mut purged = Vec::new();
		for (id, peer) in peers {
			match outcome.outcome(&id) {
				Some(PeerOutcome::Applied { .. }) if peer.state == PeerState::PendingRemoval => {
					if self.store.delete_peer(&id).await? {
						purged.push(id);
					}
				}
				Some(PeerOutcome::Applied { .. }) => {
					if peer.remote_status != RemoteStatus::Synced {
						ignore_missing(self.store.set_remote_status(&id, RemoteStatus::Synced).await)?;
					}
					report.synced.push(id);
				}
				Some(PeerOutcome::Failed(reason)) => failures.push((peer, reason.clone())),
				None => failures.push((peer, FailureReason::Rejected("no outcome reported".to_string()))),
			}
		}
		drop(guards);

		for id in purged {
			self.sequencer.forget(&id);
			report.purged.push(id);
		}
		Ok(failures)
	}

	async fn mark_degraded(&self, peer: &Peer, reason: &FailureReason) -> StoreResult<()> {
		warn!(peer_id = %peer.id.short(), %reason, "remote retries exhausted, peer degraded");
		ignore_missing(self.store.set_remote_status(&peer.id, RemoteStatus::Degraded).await)?;
		self.events.publish(PeerEvent::RemoteDegraded {
			peer_id: peer.id,
			name: peer.name.clone(),
			reason: reason.to_string(),
		});
		Ok(())
	}
}

/// A peer purged while a sync was in flight needs no status.
fn ignore_missing(result: StoreResult<()>) -> StoreResult<()> {
	match result {
		Err(StoreError::NotFound(_)) => Ok(()),
		other => other,
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use warden_enforcer::testing::{Fault, FakeWg};
	use warden_enforcer::WgEnforcer;
	use warden_server_db::testing::create_migrated_test_pool;
	use warden_wg_common::{AddressPool, SuspendMode};

	fn fast_retry() -> RetryPolicy {
		RetryPolicy {
			max_retries: 2,
			base_delay: Duration::from_millis(1),
			max_delay: Duration::from_millis(5),
		}
	}

	async fn setup() -> (RemoteSync, PeerStore, Arc<FakeWg>, EventBus) {
		let store = PeerStore::new(create_migrated_test_pool().await, AddressPool::default(), true);
		let fake = Arc::new(FakeWg::new());
		let remote: Arc<dyn Enforcer> = Arc::new(WgEnforcer::new(
			Node::Remote,
			"wg0",
			fake.clone(),
			SuspendMode::Remove,
		));
		let events = EventBus::new();
		let sync = RemoteSync::new(
			Some(remote),
			store.clone(),
			PeerSequencer::new(),
			events.clone(),
			fast_retry(),
		);
		(sync, store, fake, events)
	}

	#[test]
	fn delay_is_jittered_and_capped() {
		let policy = RetryPolicy::default();
		for retry in 1..8 {
			let delay = policy.delay(retry);
			assert!(delay <= policy.max_delay);
		}
		let first = policy.delay(1);
		assert!(first >= Duration::from_millis(500) && first < Duration::from_millis(1500));
	}

	#[tokio::test]
	async fn disabled_sync_does_nothing() {
		let store = PeerStore::new(create_migrated_test_pool().await, AddressPool::default(), false);
		let sync = RemoteSync::new(None, store.clone(), PeerSequencer::new(), EventBus::new(), fast_retry());
		let peer = store.create_peer("alice", None).await.unwrap();

		assert!(!sync.is_enabled());
		let report = sync.sync_peers(&[peer.id]).await.unwrap();
		assert_eq!(report.attempts, 0);
	}

	#[tokio::test]
	async fn success_marks_synced() {
		let (sync, store, fake, _) = setup().await;
		let peer = store.create_peer("alice", None).await.unwrap();
		assert_eq!(peer.remote_status, RemoteStatus::Pending);

		let report = sync.sync_peers(&[peer.id]).await.unwrap();
		assert_eq!(report.synced, vec![peer.id]);
		assert_eq!(report.attempts, 1);
		assert!(fake.has_peer(&peer.id));
		assert_eq!(store.get_peer(&peer.id).await.unwrap().remote_status, RemoteStatus::Synced);
	}

	#[tokio::test]
	async fn exhausted_retries_degrade_once() {
		let (sync, store, fake, events) = setup().await;
		let mut rx = events.subscribe();
		let peer = store.create_peer("alice", None).await.unwrap();
		fake.set_fault(Some(Fault::Unreachable));

		let report = sync.sync_peers(&[peer.id]).await.unwrap();
		assert_eq!(report.attempts, 3);
		assert_eq!(report.degraded, vec![peer.id]);
		assert_eq!(store.get_peer(&peer.id).await.unwrap().remote_status, RemoteStatus::Degraded);

		let event = rx.try_recv().unwrap();
		assert!(matches!(event, PeerEvent::RemoteDegraded { peer_id, .. } if peer_id == peer.id));
		assert!(rx.try_recv().is_err());
	}

	#[tokio::test]
	async fn only_failed_peers_are_retried() {
		let (sync, store, fake, _) = setup().await;
		let good = store.create_peer("good", None).await.unwrap();
		let bad = store.create_peer("bad", None).await.unwrap();
		fake.reject_peer(bad.id);

		let report = sync.sync_peers(&[good.id, bad.id]).await.unwrap();
		assert_eq!(report.synced, vec![good.id]);
		assert_eq!(report.degraded, vec![bad.id]);
		// One set for the good peer, none of the rejected attempts succeed.
		let sets = fake.mutations().iter().filter(|m| m.contains(" set ")).count();
		assert_eq!(sets, 1);
	}

	#[tokio::test]
	async fn removal_purges_after_remote_confirms() {
		let (sync, store, fake, _) = setup().await;
		let peer = store.create_peer("alice", None).await.unwrap();
		sync.sync_peers(&[peer.id]).await.unwrap();
		assert!(fake.has_peer(&peer.id));

		store.set_state(&peer.id, PeerState::PendingRemoval, None).await.unwrap();
		let report = sync.sync_peers(&[peer.id]).await.unwrap();
		assert_eq!(report.purged, vec![peer.id]);
		assert!(!fake.has_peer(&peer.id));
		assert!(matches!(store.get_peer(&peer.id).await, Err(StoreError::NotFound(_))));
	}

	#[tokio::test]
	async fn queued_sync_runs_in_background() {
		let (sync, store, fake, _) = setup().await;
		let peer = store.create_peer("alice", None).await.unwrap();

		sync.enqueue(vec![peer.id]);
		sync.wait_idle().await;

		assert!(fake.has_peer(&peer.id));
		assert_eq!(store.get_peer(&peer.id).await.unwrap().remote_status, RemoteStatus::Synced);
	}

	#[tokio::test]
	async fn shutdown_interrupts_backoff() {
		let (_, store, fake, events) = setup().await;
		let remote: Arc<dyn Enforcer> = Arc::new(WgEnforcer::new(Node::Remote, "wg0", fake.clone(), SuspendMode::Remove));
		let slow = RemoteSync::new(
			Some(remote),
			store.clone(),
			PeerSequencer::new(),
			events,
			RetryPolicy {
				max_retries: 5,
				base_delay: Duration::from_secs(60),
				max_delay: Duration::from_secs(60),
			},
		);
		let peer = store.create_peer("alice", None).await.unwrap();
		fake.set_fault(Some(Fault::Timeout));

		slow.enqueue(vec![peer.id]);
		tokio::time::timeout(Duration::from_secs(5), slow.shutdown())
			.await
			.unwrap();
		assert_eq!(store.get_peer(&peer.id).await.unwrap().remote_status, RemoteStatus::Pending);
	}
}
