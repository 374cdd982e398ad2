// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Remote node scenarios: failures stay off the command path, retries end
//! in Degraded, and reconciliation heals.

use tokio::sync::broadcast::error::TryRecvError;
use warden_enforcer::testing::Fault;
use warden_server::testing::TestHarness;
use warden_server::PeerEvent;
use warden_wg_common::{PeerState, RemoteStatus};

#[tokio::test]
async fn create_with_healthy_remote_ends_synced() {
	let h = TestHarness::new().await;
	let created = h.state.facade().create_peer("alice", None).await.unwrap();
	assert_eq!(created.remote_status, RemoteStatus::Pending);

	h.state.remote_sync.wait_idle().await;

	let peer = h.state.store.get_peer(&created.id).await.unwrap();
	assert_eq!(peer.remote_status, RemoteStatus::Synced);
	assert!(h.local.has_peer(&created.id));
	assert!(h.remote.has_peer(&created.id));
}

#[tokio::test]
async fn remote_timeout_leaves_peer_pending_until_a_pass_heals_it() {
	let h = TestHarness::new().await;
	h.remote.set_fault(Some(Fault::Timeout));
	let mut events = h.state.events.subscribe();

	let created = h.state.facade().create_peer("bob", None).await.unwrap();
	assert_eq!(created.remote_status, RemoteStatus::Pending);
	assert!(h.local.has_peer(&created.id));

	h.state.remote_sync.wait_idle().await;
	let peer = h.state.store.get_peer(&created.id).await.unwrap();
	assert_eq!(peer.remote_status, RemoteStatus::Degraded);

	match events.try_recv().unwrap() {
		PeerEvent::RemoteDegraded { peer_id, .. } => assert_eq!(peer_id, created.id),
		other => panic!("expected degraded, got {other:?}"),
	}
	assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));

	h.remote.set_fault(None);
	let report = h.state.reconciler().run_full_pass().await.unwrap();

	assert_eq!(report.local.changes(), 0);
	let remote = report.remote.unwrap();
	assert_eq!(remote.synced, vec![created.id]);
	assert!(remote.degraded.is_empty());
	let peer = h.state.store.get_peer(&created.id).await.unwrap();
	assert_eq!(peer.remote_status, RemoteStatus::Synced);
	assert!(h.remote.has_peer(&created.id));
}

#[tokio::test]
async fn unreachable_remote_never_fails_create_or_delete() {
	let h = TestHarness::new().await;
	h.remote.set_fault(Some(Fault::Unreachable));
	let facade = h.state.facade();

	let created = facade.create_peer("carol", None).await.unwrap();
	facade.delete_peer(&created.id).await.unwrap();

	assert!(facade.list_peers().await.unwrap().is_empty());
	assert!(!h.local.has_peer(&created.id));

	h.state.remote_sync.wait_idle().await;
	// The row waits for the remote node to confirm the removal.
	let pending = h.state.store.get_peer(&created.id).await.unwrap();
	assert_eq!(pending.state, PeerState::PendingRemoval);

	h.remote.set_fault(None);
	let report = h.state.reconciler().run_full_pass().await.unwrap();
	assert_eq!(report.remote.unwrap().purged, vec![created.id]);
	assert!(h.state.store.get_peer(&created.id).await.is_err());
	assert!(!h.remote.has_peer(&created.id));
}

#[tokio::test]
async fn delete_with_healthy_remote_purges_the_row() {
	let h = TestHarness::new().await;
	let facade = h.state.facade();
	let id = facade.create_peer("dave", None).await.unwrap().id;
	h.state.remote_sync.wait_idle().await;
	assert!(h.remote.has_peer(&id));

	facade.delete_peer(&id).await.unwrap();
	h.state.remote_sync.wait_idle().await;

	assert!(!h.remote.has_peer(&id));
	assert!(h.state.store.list_all().await.unwrap().is_empty());
}

#[tokio::test]
async fn remote_rejecting_one_peer_degrades_only_that_peer() {
	let h = TestHarness::new().await;
	let good = h.state.store.create_peer("good", None).await.unwrap().id;
	let bad = h.state.store.create_peer("bad", None).await.unwrap().id;
	h.remote.reject_peer(bad);
	let mut events = h.state.events.subscribe();

	let report = h.state.remote_sync.sync_all().await.unwrap();

	assert_eq!(report.synced, vec![good]);
	assert_eq!(report.degraded, vec![bad]);
	assert_eq!(report.attempts, 3);
	assert_eq!(
		h.state.store.get_peer(&good).await.unwrap().remote_status,
		RemoteStatus::Synced
	);
	assert_eq!(
		h.state.store.get_peer(&bad).await.unwrap().remote_status,
		RemoteStatus::Degraded
	);
	assert_eq!(events.try_recv().unwrap().peer_id(), &bad);
	assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));
}
