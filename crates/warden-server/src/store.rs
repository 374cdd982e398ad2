// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The durable source of truth for peers.
//!
//! [`PeerStore`] wraps [`PeerRepository`] with domain types, lifecycle
//! validation and address allocation. Every mutation is serialized behind one
//! async lock so check-then-write sequences (name uniqueness, address choice,
//! state transitions) cannot interleave. No enforcer call ever runs while the
//! lock is held.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use sqlx::SqlitePool;
use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};
use warden_server_db::{DbError, NewPeerRow, PeerRepository, PeerRow, SampleOutcome, UsageDay};
use warden_wg_common::{
	generate_keypair, generate_preshared_key, AddressPool, Node, Peer, PeerId, PeerState,
	PresharedKey, RemoteStatus, SuspendReason, WgPrivateKey, WgPublicKey,
};
use zeroize::Zeroizing;

use crate::error::{StoreError, StoreResult as Result};

/// Why a peer's usage was zeroed. Recorded in the reset audit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetReason {
	Resume,
	Monthly,
	Manual,
}

impl ResetReason {
	pub fn as_str(&self) -> &'static str {
		match self {
			ResetReason::Resume => "resume",
			ResetReason::Monthly => "monthly",
			ResetReason::Manual => "manual",
		}
	}
}

#[derive(Clone)]
pub struct PeerStore {
	repo: PeerRepository,
	addresses: AddressPool,
	write_lock: Arc<Mutex<()>>,
	remote_enabled: bool,
}

impl PeerStore {
	pub fn new(pool: SqlitePool, addresses: AddressPool, remote_enabled: bool) -> Self {
		Self {
			repo: PeerRepository::new(pool),
			addresses,
			write_lock: Arc::new(Mutex::new(())),
			remote_enabled,
		}
	}

	pub fn remote_enabled(&self) -> bool {
		self.remote_enabled
	}

	pub fn address_pool(&self) -> &AddressPool {
		&self.addresses
	}

	/// Creates an Active peer with fresh keys and the lowest free address.
	#[instrument(skip(self), fields(name = %name))]
	pub async fn create_peer(&self, name: &str, quota_bytes: Option<u64>) -> Result<Peer> {
		let _guard = self.write_lock.lock().await;

		if self.repo.get_live_peer_by_name(name).await?.is_some() {
			return Err(StoreError::DuplicateName(name.to_string()));
		}

		let in_use: HashSet<Ipv4Addr> = self
			.repo
			.list_addresses()
			.await?
			.iter()
			.filter_map(|addr| addr.parse().ok())
			.collect();
		let address = self
			.addresses
			.allocate(&in_use)
			.map_err(|_| StoreError::AddressPoolExhausted)?;

		let (private_key, public_key) = generate_keypair().into_parts();
		let preshared_key = generate_preshared_key();
		let remote_status = if self.remote_enabled {
			RemoteStatus::Pending
		} else {
			RemoteStatus::Synced
		};

		let row = NewPeerRow {
			public_key: public_key.to_base64(),
			name: name.to_string(),
			address: address.to_string(),
			private_key: Some(private_key.to_base64().to_string()),
			preshared_key: preshared_key.to_base64().to_string(),
			quota_bytes: quota_bytes.map(|q| i64::try_from(q).unwrap_or(i64::MAX)),
			state: PeerState::Active.as_str().to_string(),
			remote_status: remote_status.as_str().to_string(),
		};

		match self.repo.insert_peer(&row).await {
			Ok(()) => {}
			Err(DbError::Conflict(_)) => return Err(StoreError::DuplicateName(name.to_string())),
			Err(e) => return Err(e.into()),
		}

		info!(peer_id = %public_key.short(), %address, "peer created");
		self.get_peer(&public_key).await
	}

	pub async fn get_peer(&self, id: &PeerId) -> Result<Peer> {
		match self.repo.get_peer(&id.to_base64()).await? {
			Some(row) => peer_from_row(row),
			None => Err(StoreError::NotFound(id.to_string())),
		}
	}

	/// Looks up a live peer by name. Peers pending removal are invisible.
	pub async fn find_by_name(&self, name: &str) -> Result<Option<Peer>> {
		self.repo
			.get_live_peer_by_name(name)
			.await?
			.map(peer_from_row)
			.transpose()
	}

	/// Live peers, oldest first.
	pub async fn list_peers(&self) -> Result<Vec<Peer>> {
		self.repo
			.list_peers(false)
			.await?
			.into_iter()
			.map(peer_from_row)
			.collect()
	}

	/// Every peer, including ones pending removal.
	pub async fn list_all(&self) -> Result<Vec<Peer>> {
		self.repo
			.list_peers(true)
			.await?
			.into_iter()
			.map(peer_from_row)
			.collect()
	}

	/// Changes the quota and clears the warning flag.
	#[instrument(skip(self), fields(peer_id = %id.short()))]
	pub async fn update_quota(&self, id: &PeerId, quota_bytes: Option<u64>) -> Result<()> {
		let _guard = self.write_lock.lock().await;
		let rows = self.repo.update_quota(&id.to_base64(), quota_bytes).await?;
		require_row(rows, id)
	}

	/// Moves a peer through its lifecycle. Setting the current state again
	/// is a no-op; anything outside the allowed transitions is rejected.
	#[instrument(skip(self), fields(peer_id = %id.short(), to = %next))]
	pub async fn set_state(
		&self,
		id: &PeerId,
		next: PeerState,
		reason: Option<SuspendReason>,
	) -> Result<Peer> {
		let _guard = self.write_lock.lock().await;
		let current = self.get_peer(id).await?;

		if current.state == next {
			return Ok(current);
		}
		if !current.state.can_transition_to(next) {
			return Err(StoreError::InvalidTransition {
				id: id.to_string(),
				from: current.state,
				to: next,
			});
		}

		self.write_state(id, current.state, next, reason).await?;
		debug!(from = %current.state, "peer state changed");
		self.get_peer(id).await
	}

	/// Puts a peer back into a state it held before a failed operation,
	/// bypassing lifecycle checks. Only used to undo a change whose local
	/// enforcement did not go through.
	#[instrument(skip(self), fields(peer_id = %id.short(), to = %previous))]
	pub(crate) async fn revert_state(
		&self,
		id: &PeerId,
		previous: PeerState,
		reason: Option<SuspendReason>,
	) -> Result<Peer> {
		let _guard = self.write_lock.lock().await;
		let current = self.get_peer(id).await?;
		if current.state != previous {
			self.write_state(id, current.state, previous, reason).await?;
		}
		self.get_peer(id).await
	}

	async fn write_state(
		&self,
		id: &PeerId,
		from: PeerState,
		to: PeerState,
		reason: Option<SuspendReason>,
	) -> Result<()> {
		let reason = match to {
			PeerState::Suspended => Some(reason.unwrap_or(SuspendReason::Manual).as_str()),
			PeerState::Active | PeerState::PendingRemoval => None,
		};
		let rows = self
			.repo
			.update_state_if(&id.to_base64(), from.as_str(), to.as_str(), reason)
			.await
			.map_err(|e| match e {
				DbError::Conflict(_) => StoreError::DuplicateName(id.to_string()),
				other => other.into(),
			})?;
		require_row(rows, id)
	}

	/// Suspends an Active peer for exceeding its quota. Returns false when the
	/// peer was not Active, so a breach only ever suspends once.
	#[instrument(skip(self), fields(peer_id = %id.short()))]
	pub async fn suspend_for_quota(&self, id: &PeerId) -> Result<bool> {
		let _guard = self.write_lock.lock().await;
		let rows = self
			.repo
			.update_state_if(
				&id.to_base64(),
				PeerState::Active.as_str(),
				PeerState::Suspended.as_str(),
				Some(SuspendReason::Quota.as_str()),
			)
			.await?;
		Ok(rows > 0)
	}

	/// Adds `delta` bytes to the peer's usage. Returns the new total.
	#[instrument(skip(self), fields(peer_id = %id.short()))]
	pub async fn record_usage(&self, id: &PeerId, delta: u64) -> Result<u64> {
		let _guard = self.write_lock.lock().await;
		self.repo
			.add_usage(&id.to_base64(), delta)
			.await?
			.ok_or_else(|| StoreError::NotFound(id.to_string()))
	}

	/// Folds one raw `rx + tx` reading from `node` into the peer's usage.
	#[instrument(skip(self), fields(peer_id = %id.short(), node = %node))]
	pub async fn apply_counter_sample(
		&self,
		id: &PeerId,
		node: Node,
		counter: u64,
		count_usage: bool,
	) -> Result<SampleOutcome> {
		let _guard = self.write_lock.lock().await;
		self.repo
			.apply_counter_sample(&id.to_base64(), node.as_str(), counter, count_usage)
			.await?
			.ok_or_else(|| StoreError::NotFound(id.to_string()))
	}

	/// Starts a new counter epoch on `node` for peers that were just
	/// configured there. Their interface counters restart at zero, so the
	/// sample kept from before they were removed no longer applies.
	#[instrument(skip(self, ids), fields(node = %node))]
	pub async fn restart_counter_epochs<'a>(
		&self,
		node: Node,
		ids: impl IntoIterator<Item = &'a PeerId>,
	) -> Result<()> {
		let _guard = self.write_lock.lock().await;
		for id in ids {
			if self
				.repo
				.clear_counter_sample(&id.to_base64(), node.as_str())
				.await? > 0
			{
				debug!(peer_id = %id.short(), "counter epoch restarted");
			}
		}
		Ok(())
	}

	/// Zeroes usage and writes an audit record. Returns the previous usage.
	#[instrument(skip(self), fields(peer_id = %id.short(), reason = reason.as_str()))]
	pub async fn reset_usage(&self, id: &PeerId, reason: ResetReason) -> Result<u64> {
		let _guard = self.write_lock.lock().await;
		let previous = self
			.repo
			.reset_usage(&id.to_base64(), reason.as_str())
			.await?
			.ok_or_else(|| StoreError::NotFound(id.to_string()))?;
		info!(previous_bytes = previous, "usage reset");
		Ok(previous)
	}

	pub async fn last_reset_at(&self, reason: ResetReason) -> Result<Option<DateTime<Utc>>> {
		Ok(self.repo.last_reset_at(reason.as_str()).await?)
	}

	pub async fn last_peer_reset_at(
		&self,
		id: &PeerId,
		reason: ResetReason,
	) -> Result<Option<DateTime<Utc>>> {
		Ok(self
			.repo
			.last_peer_reset_at(&id.to_base64(), reason.as_str())
			.await?)
	}

	pub async fn reset_count(&self, id: &PeerId) -> Result<u64> {
		Ok(self.repo.count_resets(&id.to_base64()).await?)
	}

	pub async fn set_remote_status(&self, id: &PeerId, status: RemoteStatus) -> Result<()> {
		let _guard = self.write_lock.lock().await;
		let rows = self
			.repo
			.update_remote_status(&id.to_base64(), status.as_str())
			.await?;
		require_row(rows, id)
	}

	pub async fn record_handshake(&self, id: &PeerId, at: DateTime<Utc>) -> Result<()> {
		let _guard = self.write_lock.lock().await;
		let rows = self.repo.update_handshake(&id.to_base64(), at).await?;
		require_row(rows, id)
	}

	/// Sets the quota warning flag. Returns false if it was already set.
	pub async fn mark_quota_warned(&self, id: &PeerId) -> Result<bool> {
		let _guard = self.write_lock.lock().await;
		Ok(self.repo.mark_quota_warned(&id.to_base64()).await? > 0)
	}

	/// Purges the peer and everything recorded about it. Returns false if it
	/// was already gone.
	#[instrument(skip(self), fields(peer_id = %id.short()))]
	pub async fn delete_peer(&self, id: &PeerId) -> Result<bool> {
		let _guard = self.write_lock.lock().await;
		let removed = self.repo.delete_peer(&id.to_base64()).await? > 0;
		if removed {
			info!("peer purged");
		}
		Ok(removed)
	}

	/// Daily usage for the last `days` days, today included.
	pub async fn usage_history(&self, id: &PeerId, days: u32) -> Result<Vec<UsageDay>> {
		let days = i64::from(days.max(1));
		let since = (Utc::now() - ChronoDuration::days(days - 1)).date_naive();
		Ok(self.repo.usage_history(&id.to_base64(), since).await?)
	}

	/// Drops daily usage older than `keep_days` days across all peers.
	pub async fn prune_usage_history(&self, keep_days: u32) -> Result<u64> {
		let before = (Utc::now() - ChronoDuration::days(i64::from(keep_days))).date_naive();
		let _guard = self.write_lock.lock().await;
		let removed = self.repo.prune_usage_days(before).await?;
		if removed > 0 {
			debug!(removed, %before, "pruned daily usage");
		}
		Ok(removed)
	}
}

fn require_row(rows: u64, id: &PeerId) -> Result<()> {
	if rows == 0 {
		Err(StoreError::NotFound(id.to_string()))
	} else {
		Ok(())
	}
}

fn peer_from_row(row: PeerRow) -> Result<Peer> {
	let corrupt = |reason: String| StoreError::Corrupt {
		id: row.public_key.clone(),
		reason,
	};

	let id = WgPublicKey::from_base64(&row.public_key)
		.map_err(|e| corrupt(format!("public key: {e}")))?;
	let address: Ipv4Addr = row
		.address
		.parse()
		.map_err(|e| corrupt(format!("address: {e}")))?;

	let private_key = Zeroizing::new(row.private_key);
	let private_key = private_key
		.as_deref()
		.map(WgPrivateKey::from_base64)
		.transpose()
		.map_err(|e| corrupt(format!("private key: {e}")))?;
	let preshared_key = Zeroizing::new(row.preshared_key);
	let preshared_key = PresharedKey::from_base64(&preshared_key)
		.map_err(|e| corrupt(format!("preshared key: {e}")))?;

	let state: PeerState = row.state.parse().map_err(corrupt)?;
	let suspend_reason = row
		.suspend_reason
		.as_deref()
		.map(str::parse::<SuspendReason>)
		.transpose()
		.map_err(corrupt)?;
	let remote_status: RemoteStatus = row.remote_status.parse().map_err(corrupt)?;

	Ok(Peer {
		id,
		name: row.name,
		address,
		private_key,
		preshared_key,
		quota_bytes: row.quota_bytes.map(|q| q.max(0) as u64),
		used_bytes: row.used_bytes.max(0) as u64,
		state,
		suspend_reason,
		remote_status,
		quota_warned: row.quota_warned,
		last_handshake: row.last_handshake_at,
		created_at: row.created_at,
		updated_at: row.updated_at,
	})
}

#[cfg(test)]
mod tests {
	use super::*;
	use proptest::prelude::*;
	use warden_server_db::testing::create_migrated_test_pool;

	async fn store() -> PeerStore {
		let pool = create_migrated_test_pool().await;
		PeerStore::new(pool, AddressPool::default(), false)
	}

	#[tokio::test]
	async fn create_allocates_lowest_free_address() {
		let store = store().await;
		let a = store.create_peer("alice", None).await.unwrap();
		let b = store.create_peer("bob", Some(1_000)).await.unwrap();

		assert_eq!(a.address, Ipv4Addr::new(10, 20, 30, 10));
		assert_eq!(b.address, Ipv4Addr::new(10, 20, 30, 11));
		assert_eq!(a.state, PeerState::Active);
		assert_eq!(a.remote_status, RemoteStatus::Synced);
		assert!(a.private_key.is_some());
		assert_eq!(b.quota_bytes, Some(1_000));

		store.delete_peer(&a.id).await.unwrap();
		let c = store.create_peer("carol", None).await.unwrap();
		assert_eq!(c.address, Ipv4Addr::new(10, 20, 30, 10));
	}

	#[tokio::test]
	async fn remote_enabled_starts_pending() {
		let pool = create_migrated_test_pool().await;
		let store = PeerStore::new(pool, AddressPool::default(), true);
		let peer = store.create_peer("alice", None).await.unwrap();
		assert_eq!(peer.remote_status, RemoteStatus::Pending);
	}

	#[tokio::test]
	async fn round_trips_key_material() {
		let store = store().await;
		let created = store.create_peer("alice", None).await.unwrap();
		let loaded = store.get_peer(&created.id).await.unwrap();

		assert_eq!(loaded.preshared_key, created.preshared_key);
		let private = loaded.private_key.unwrap();
		assert_eq!(private.public_key(), loaded.id);
	}

	#[tokio::test]
	async fn rejects_duplicate_live_name() {
		let store = store().await;
		store.create_peer("alice", None).await.unwrap();
		let err = store.create_peer("alice", None).await.unwrap_err();
		assert!(matches!(err, StoreError::DuplicateName(name) if name == "alice"));
	}

	#[tokio::test]
	async fn name_is_reusable_once_pending_removal() {
		let store = store().await;
		let old = store.create_peer("alice", None).await.unwrap();
		store
			.set_state(&old.id, PeerState::PendingRemoval, None)
			.await
			.unwrap();

		let new = store.create_peer("alice", None).await.unwrap();
		assert_ne!(new.id, old.id);
		assert_ne!(new.address, old.address);
		assert_eq!(store.find_by_name("alice").await.unwrap().unwrap().id, new.id);
		assert_eq!(store.list_peers().await.unwrap().len(), 1);
		assert_eq!(store.list_all().await.unwrap().len(), 2);
	}

	#[tokio::test]
	async fn exhausts_small_pool() {
		let pool = create_migrated_test_pool().await;
		let store = PeerStore::new(pool, AddressPool::parse("10.9.0.0/29", 5).unwrap(), false);
		store.create_peer("a", None).await.unwrap();
		store.create_peer("b", None).await.unwrap();
		let err = store.create_peer("c", None).await.unwrap_err();
		assert!(matches!(err, StoreError::AddressPoolExhausted));
	}

	#[tokio::test]
	async fn enforces_lifecycle() {
		let store = store().await;
		let peer = store.create_peer("alice", None).await.unwrap();

		let same = store.set_state(&peer.id, PeerState::Active, None).await.unwrap();
		assert_eq!(same.state, PeerState::Active);

		let suspended = store
			.set_state(&peer.id, PeerState::Suspended, Some(SuspendReason::Manual))
			.await
			.unwrap();
		assert_eq!(suspended.suspend_reason, Some(SuspendReason::Manual));

		let active = store.set_state(&peer.id, PeerState::Active, None).await.unwrap();
		assert_eq!(active.suspend_reason, None);

		store
			.set_state(&peer.id, PeerState::PendingRemoval, None)
			.await
			.unwrap();
		let err = store
			.set_state(&peer.id, PeerState::Active, None)
			.await
			.unwrap_err();
		assert!(matches!(
			err,
			StoreError::InvalidTransition {
				from: PeerState::PendingRemoval,
				to: PeerState::Active,
				..
			}
		));
	}

	#[tokio::test]
	async fn revert_bypasses_lifecycle() {
		let store = store().await;
		let peer = store.create_peer("alice", None).await.unwrap();
		store
			.set_state(&peer.id, PeerState::PendingRemoval, None)
			.await
			.unwrap();

		let restored = store
			.revert_state(&peer.id, PeerState::Active, None)
			.await
			.unwrap();
		assert_eq!(restored.state, PeerState::Active);
	}

	#[tokio::test]
	async fn quota_suspension_is_edge_triggered() {
		let store = store().await;
		let peer = store.create_peer("alice", Some(10)).await.unwrap();

		assert!(store.suspend_for_quota(&peer.id).await.unwrap());
		assert!(!store.suspend_for_quota(&peer.id).await.unwrap());

		let loaded = store.get_peer(&peer.id).await.unwrap();
		assert_eq!(loaded.state, PeerState::Suspended);
		assert_eq!(loaded.suspend_reason, Some(SuspendReason::Quota));
	}

	#[tokio::test]
	async fn warning_flag_is_edge_triggered_and_cleared() {
		let store = store().await;
		let peer = store.create_peer("alice", Some(100)).await.unwrap();

		assert!(store.mark_quota_warned(&peer.id).await.unwrap());
		assert!(!store.mark_quota_warned(&peer.id).await.unwrap());

		store.update_quota(&peer.id, Some(200)).await.unwrap();
		assert!(!store.get_peer(&peer.id).await.unwrap().quota_warned);
		assert!(store.mark_quota_warned(&peer.id).await.unwrap());

		store.reset_usage(&peer.id, ResetReason::Manual).await.unwrap();
		assert!(!store.get_peer(&peer.id).await.unwrap().quota_warned);
	}

	#[tokio::test]
	async fn reset_is_audited() {
		let store = store().await;
		let peer = store.create_peer("alice", None).await.unwrap();
		store.record_usage(&peer.id, 500).await.unwrap();

		let previous = store.reset_usage(&peer.id, ResetReason::Resume).await.unwrap();
		assert_eq!(previous, 500);
		assert_eq!(store.get_peer(&peer.id).await.unwrap().used_bytes, 0);
		assert_eq!(store.reset_count(&peer.id).await.unwrap(), 1);
		assert!(store.last_reset_at(ResetReason::Resume).await.unwrap().is_some());
		assert!(store.last_reset_at(ResetReason::Monthly).await.unwrap().is_none());
	}

	#[tokio::test]
	async fn counter_samples_are_per_node() {
		let store = store().await;
		let peer = store.create_peer("alice", None).await.unwrap();

		store.apply_counter_sample(&peer.id, Node::Local, 100, true).await.unwrap();
		store.apply_counter_sample(&peer.id, Node::Remote, 40, true).await.unwrap();
		let local = store.apply_counter_sample(&peer.id, Node::Local, 150, true).await.unwrap();
		assert_eq!(local.delta, 50);
		// Only the remote counter reset; the local epoch is unaffected.
		let remote = store.apply_counter_sample(&peer.id, Node::Remote, 10, true).await.unwrap();
		assert_eq!(remote.delta, 10);
		assert_eq!(remote.used_bytes, 200);
	}

	#[tokio::test]
	async fn uncounted_sample_moves_epoch_only() {
		let store = store().await;
		let peer = store.create_peer("alice", None).await.unwrap();

		let outcome = store.apply_counter_sample(&peer.id, Node::Local, 700, false).await.unwrap();
		assert!(!outcome.counted);
		assert_eq!(outcome.used_bytes, 0);

		let outcome = store.apply_counter_sample(&peer.id, Node::Local, 750, true).await.unwrap();
		assert_eq!(outcome.delta, 50);
		assert_eq!(outcome.used_bytes, 50);
	}

	#[tokio::test]
	async fn records_usage_history() {
		let store = store().await;
		let peer = store.create_peer("alice", None).await.unwrap();
		store.record_usage(&peer.id, 300).await.unwrap();
		store.record_usage(&peer.id, 200).await.unwrap();

		let history = store.usage_history(&peer.id, 7).await.unwrap();
		assert_eq!(history.len(), 1);
		assert_eq!(history[0].bytes, 500);
		assert_eq!(history[0].day, Utc::now().date_naive());
	}

	#[tokio::test]
	async fn missing_peer_is_not_found() {
		let store = store().await;
		let ghost = *generate_keypair().public_key();
		assert!(matches!(store.get_peer(&ghost).await, Err(StoreError::NotFound(_))));
		assert!(matches!(
			store.set_remote_status(&ghost, RemoteStatus::Synced).await,
			Err(StoreError::NotFound(_))
		));
		assert!(!store.delete_peer(&ghost).await.unwrap());
	}

	proptest! {
		#![proptest_config(ProptestConfig::with_cases(24))]

		#[test]
		fn usage_never_decreases(readings in prop::collection::vec((any::<bool>(), 0u64..1_000_000), 1..24)) {
			let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
			rt.block_on(async {
				let store = store().await;
				let peer = store.create_peer("alice", None).await.unwrap();
				let mut last_used = 0;
				for (remote, counter) in readings {
					let node = if remote { Node::Remote } else { Node::Local };
					let outcome = store.apply_counter_sample(&peer.id, node, counter, true).await.unwrap();
					assert!(outcome.used_bytes >= last_used);
					last_used = outcome.used_bytes;
				}
			});
		}
	}
}
