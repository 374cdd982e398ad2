// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! A process restart over a file-backed database keeps every peer intact.

use tempfile::tempdir;
use warden_server::testing::{test_settings, TestHarness};
use warden_server_db::{create_pool, run_migrations};
use warden_wg_common::PeerState;

const MB: u64 = 1_000_000;

#[tokio::test]
async fn restart_preserves_keys_quota_and_usage() {
	let dir = tempdir().unwrap();
	let db_url = format!("sqlite:{}", dir.path().join("warden.db").display());

	let pool = create_pool(&db_url).await.unwrap();
	run_migrations(&pool).await.unwrap();
	let before = TestHarness::with_pool(pool.clone(), false, test_settings());
	let facade = before.state.facade();
	let created = facade.create_peer("durable", Some(500 * MB)).await.unwrap();
	let other = facade.create_peer("paused", None).await.unwrap().id;
	facade.suspend_peer(&other).await.unwrap();
	before.local.set_transfer(&created.id, 42 * MB, 0);
	before.state.accountant().tick().await.unwrap();
	drop(before);
	pool.close().await;

	let pool = create_pool(&db_url).await.unwrap();
	run_migrations(&pool).await.unwrap();
	let after = TestHarness::with_pool(pool, false, test_settings());

	let peer = after.state.store.get_peer(&created.id).await.unwrap();
	assert_eq!(peer.name, "durable");
	assert_eq!(peer.address, created.address);
	assert_eq!(peer.quota_bytes, Some(500 * MB));
	assert_eq!(peer.used_bytes, 42 * MB);
	assert_eq!(
		peer.preshared_key.to_base64().as_str(),
		created.preshared_key.to_base64().as_str()
	);
	let stored = peer.private_key.unwrap();
	let original = created.private_key.unwrap();
	assert_eq!(stored.to_base64().as_str(), original.to_base64().as_str());
	assert_eq!(stored.public_key(), created.public_key);

	assert_eq!(
		after.state.store.get_peer(&other).await.unwrap().state,
		PeerState::Suspended
	);

	// The new process converges its empty interface from the store.
	let report = after.state.reconciler().run_full_pass().await.unwrap();
	assert_eq!(report.local.changes(), 1);
	assert!(after.local.has_peer(&created.id));
	assert!(!after.local.has_peer(&other));

	// Counters restart from zero on the new interface; nothing is lost or
	// double counted.
	after.local.set_transfer(&created.id, 3 * MB, 0);
	after.state.accountant().tick().await.unwrap();
	assert_eq!(
		after.state.store.get_peer(&created.id).await.unwrap().used_bytes,
		45 * MB
	);
}
