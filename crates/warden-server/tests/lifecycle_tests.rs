// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Command lifecycle: create, delete, suspend, resume, quota, tunnel
//! restarts and tunnel status against in-memory nodes.

use warden_enforcer::testing::Fault;
use warden_server::testing::{test_settings, TestHarness};
use warden_server::{CommandError, NodeStatus, RestartOutcome, ServiceSettings, TunnelTarget};
use warden_wg_common::{generate_keypair, PeerState, ResumePolicy, ServerProfile, SuspendReason};

const MB: u64 = 1_000_000;

#[tokio::test]
async fn create_assigns_distinct_addresses_and_applies_locally() {
	let h = TestHarness::local_only().await;
	let facade = h.state.facade();

	let a = facade.create_peer("alpha", None).await.unwrap();
	let b = facade.create_peer("beta", Some(MB)).await.unwrap();

	assert_ne!(a.address, b.address);
	assert!(h.state.store.address_pool().contains(a.address));
	assert!(h.local.has_peer(&a.id));
	assert_eq!(
		h.local.allowed_ips(&b.id),
		Some(vec![format!("{}/32", b.address)])
	);
	assert!(a.private_key.is_some());
	assert!(a.client_config.is_none());
}

#[tokio::test]
async fn invalid_requests_change_nothing() {
	let h = TestHarness::local_only().await;
	let facade = h.state.facade();
	facade.create_peer("taken", None).await.unwrap();

	assert!(matches!(
		facade.create_peer("taken", None).await,
		Err(CommandError::DuplicateName(_))
	));
	assert!(matches!(
		facade.create_peer("-flag", None).await,
		Err(CommandError::Validation(_))
	));
	assert!(matches!(
		facade.create_peer("zero", Some(0)).await,
		Err(CommandError::Validation(_))
	));
	assert_eq!(facade.list_peers().await.unwrap().len(), 1);
	assert_eq!(h.local.peer_count(), 1);
}

#[tokio::test]
async fn local_failure_discards_new_peer() {
	let h = TestHarness::local_only().await;
	h.local.set_fault(Some(Fault::Unreachable));
	let facade = h.state.facade();

	let err = facade.create_peer("ghost", None).await.unwrap_err();
	assert!(matches!(err, CommandError::LocalEnforcement(_)));
	assert!(h.state.store.list_all().await.unwrap().is_empty());

	h.local.set_fault(None);
	facade.create_peer("ghost", None).await.unwrap();
}

#[tokio::test]
async fn deleted_peer_vanishes_from_listings() {
	let h = TestHarness::local_only().await;
	let facade = h.state.facade();
	let keep = facade.create_peer("keep", None).await.unwrap().id;
	let gone = facade.create_peer("gone", None).await.unwrap().id;

	facade.delete_peer(&gone).await.unwrap();

	let names: Vec<String> = facade
		.list_peers()
		.await
		.unwrap()
		.into_iter()
		.map(|p| p.name)
		.collect();
	assert_eq!(names, vec!["keep".to_string()]);
	assert!(h.local.has_peer(&keep));
	assert!(!h.local.has_peer(&gone));
	assert!(matches!(
		facade.delete_peer(&gone).await,
		Err(CommandError::NotFound(_))
	));
	assert!(matches!(
		facade.resolve("gone").await,
		Err(CommandError::NotFound(_))
	));
}

#[tokio::test]
async fn local_failure_restores_deleted_peer() {
	let h = TestHarness::local_only().await;
	let facade = h.state.facade();
	let id = facade.create_peer("sticky", None).await.unwrap().id;

	h.local.set_fault(Some(Fault::Timeout));
	assert!(matches!(
		facade.delete_peer(&id).await,
		Err(CommandError::LocalEnforcement(_))
	));
	h.local.set_fault(None);

	assert_eq!(facade.get_peer(&id).await.unwrap().state, PeerState::Active);
}

#[tokio::test]
async fn suspend_is_idempotent_and_resume_restores_access() {
	let h = TestHarness::local_only().await;
	let facade = h.state.facade();
	let id = facade.create_peer("guest", None).await.unwrap().id;

	let first = facade.suspend_peer(&id).await.unwrap();
	h.local.clear_mutations();
	let second = facade.suspend_peer(&id).await.unwrap();

	assert_eq!(first, second);
	assert_eq!(second.state, PeerState::Suspended);
	assert!(h.local.mutations().is_empty());
	assert!(!h.local.has_peer(&id));
	assert_eq!(
		h.state.store.get_peer(&id).await.unwrap().suspend_reason,
		Some(SuspendReason::Manual)
	);

	let resumed = facade.resume_peer(&id).await.unwrap();
	assert_eq!(resumed.state, PeerState::Active);
	assert!(h.local.has_peer(&id));
}

async fn quota_suspended(h: &TestHarness) -> warden_wg_common::PeerId {
	let id = h.state.facade().create_peer("capped", Some(10 * MB)).await.unwrap().id;
	h.local.set_transfer(&id, 12 * MB, 0);
	h.state.accountant().tick().await.unwrap();
	let peer = h.state.store.get_peer(&id).await.unwrap();
	assert_eq!(peer.suspend_reason, Some(SuspendReason::Quota));
	id
}

#[tokio::test]
async fn resume_resets_usage_by_default() {
	let h = TestHarness::local_only().await;
	let id = quota_suspended(&h).await;

	let resumed = h.state.facade().resume_peer(&id).await.unwrap();

	assert_eq!(resumed.state, PeerState::Active);
	assert_eq!(resumed.used_bytes, 0);
	assert_eq!(h.state.store.reset_count(&id).await.unwrap(), 1);
}

#[tokio::test]
async fn keep_usage_policy_refuses_resume_over_quota() {
	let settings = ServiceSettings {
		resume_policy: ResumePolicy::KeepUsage,
		..test_settings()
	};
	let h = TestHarness::with_settings(false, settings).await;
	let facade = h.state.facade();
	let id = quota_suspended(&h).await;

	assert!(matches!(
		facade.resume_peer(&id).await,
		Err(CommandError::Validation(_))
	));
	assert_eq!(facade.get_peer(&id).await.unwrap().state, PeerState::Suspended);

	facade.set_quota(&id, Some(50 * MB)).await.unwrap();
	let resumed = facade.resume_peer(&id).await.unwrap();
	assert_eq!(resumed.state, PeerState::Active);
	assert_eq!(resumed.used_bytes, 12 * MB);
}

#[tokio::test]
async fn failed_resume_keeps_peer_suspended() {
	let h = TestHarness::local_only().await;
	let facade = h.state.facade();
	let id = facade.create_peer("offline", None).await.unwrap().id;
	facade.suspend_peer(&id).await.unwrap();

	h.local.set_fault(Some(Fault::Unreachable));
	assert!(matches!(
		facade.resume_peer(&id).await,
		Err(CommandError::LocalEnforcement(_))
	));
	h.local.set_fault(None);

	let peer = h.state.store.get_peer(&id).await.unwrap();
	assert_eq!(peer.state, PeerState::Suspended);
	assert_eq!(peer.suspend_reason, Some(SuspendReason::Manual));
}

#[tokio::test]
async fn manual_reset_returns_previous_usage() {
	let h = TestHarness::local_only().await;
	let facade = h.state.facade();
	let id = facade.create_peer("metered", None).await.unwrap().id;
	h.local.set_transfer(&id, 7 * MB, 0);
	facade.refresh_usage().await.unwrap();

	assert_eq!(facade.reset_usage(&id).await.unwrap(), 7 * MB);
	assert_eq!(facade.get_peer(&id).await.unwrap().used_bytes, 0);

	let history = facade.usage_history(&id, 7).await.unwrap();
	assert_eq!(history.iter().map(|d| d.bytes).sum::<u64>(), 7 * MB);
	assert!(matches!(
		facade.usage_history(&id, 0).await,
		Err(CommandError::Validation(_))
	));
}

#[tokio::test]
async fn client_config_needs_a_server_profile() {
	let h = TestHarness::local_only().await;
	let id = h.state.facade().create_peer("nocfg", None).await.unwrap().id;
	assert!(matches!(
		h.state.facade().client_config(&id).await,
		Err(CommandError::ClientConfigUnavailable(_))
	));

	let server = generate_keypair();
	let settings = ServiceSettings {
		server_profile: Some(ServerProfile::new(*server.public_key(), "vpn.example.com")),
		..test_settings()
	};
	let h = TestHarness::with_settings(false, settings).await;
	let created = h.state.facade().create_peer("withcfg", None).await.unwrap();
	let rendered = created.client_config.unwrap();
	assert!(rendered.contains(&format!("Address = {}/32", created.address)));
	assert!(rendered.contains("Endpoint = vpn.example.com:17968"));
	assert!(rendered.contains(&format!("PublicKey = {}", server.public_key())));

	let again = h.state.facade().client_config(&created.id).await.unwrap();
	assert_eq!(again.as_str(), rendered.as_str());
}

#[tokio::test]
async fn reconcile_twice_changes_nothing_the_second_time() {
	let h = TestHarness::local_only().await;
	let facade = h.state.facade();
	for name in ["one", "two", "three"] {
		facade.create_peer(name, None).await.unwrap();
	}
	let suspended = facade.resolve("two").await.unwrap();
	facade.suspend_peer(&suspended).await.unwrap();

	// A fresh interface, as after a reboot.
	let restarted = TestHarness::with_pool(h.pool.clone(), false, test_settings());
	let reconciler = restarted.state.reconciler();

	let first = reconciler.run_full_pass().await.unwrap();
	assert_eq!(first.local.changes(), 2);
	assert!(first.remote.is_none());
	assert_eq!(restarted.local.peer_count(), 2);

	let second = reconciler.run_full_pass().await.unwrap();
	assert_eq!(second.local.changes(), 0);
}

#[tokio::test]
async fn reconcile_leaves_unmanaged_peers_alone() {
	let h = TestHarness::local_only().await;
	let stranger = generate_keypair();
	h.local
		.add_unmanaged_peer(*stranger.public_key(), "192.168.50.2/32");
	h.state.facade().create_peer("managed", None).await.unwrap();

	h.state.reconciler().run_full_pass().await.unwrap();

	assert!(h.local.has_peer(stranger.public_key()));
}

#[tokio::test]
async fn restart_local_tunnel_reapplies_peers() {
	let h = TestHarness::local_only().await;
	let facade = h.state.facade();
	let id = facade.create_peer("survivor", None).await.unwrap().id;

	let report = facade.restart_tunnel(TunnelTarget::Local).await.unwrap();

	assert_eq!(report.local, Some(RestartOutcome::Ok));
	assert!(report.remote.is_none());
	assert!(h.local.is_up());
	assert!(h.local.has_peer(&id));
}

#[tokio::test]
async fn restart_remote_without_remote_node_is_rejected() {
	let h = TestHarness::local_only().await;
	let facade = h.state.facade();

	assert!(matches!(
		facade.restart_tunnel(TunnelTarget::Remote).await,
		Err(CommandError::RemoteDisabled)
	));
	let report = facade.restart_tunnel(TunnelTarget::All).await.unwrap();
	assert_eq!(report.remote, Some(RestartOutcome::RemoteDisabled));
	assert!(!report.is_ok());
}

#[tokio::test]
async fn restart_all_reports_each_node() {
	let h = TestHarness::new().await;
	let facade = h.state.facade();
	let id = facade.create_peer("roamer", None).await.unwrap().id;
	h.state.remote_sync.wait_idle().await;

	h.remote.set_fault(Some(Fault::Unreachable));
	let report = facade.restart_tunnel(TunnelTarget::All).await.unwrap();
	assert_eq!(report.local, Some(RestartOutcome::Ok));
	assert!(matches!(report.remote, Some(RestartOutcome::Unreachable(_))));
	assert!(!report.is_ok());
	assert!(matches!(
		facade.restart_tunnel(TunnelTarget::Remote).await,
		Err(CommandError::RemoteUnreachable(_))
	));

	h.remote.set_fault(None);
	let report = facade.restart_tunnel(TunnelTarget::Remote).await.unwrap();
	assert!(report.is_ok());
	h.state.remote_sync.wait_idle().await;
	assert!(h.remote.has_peer(&id));
}

#[tokio::test]
async fn tunnel_status_reports_each_node_independently() {
	let h = TestHarness::new().await;
	let facade = h.state.facade();
	facade.create_peer("north", None).await.unwrap();
	facade.create_peer("south", None).await.unwrap();
	h.state.remote_sync.wait_idle().await;
	h.local
		.add_unmanaged_peer(*generate_keypair().public_key(), "192.168.50.2/32");

	h.remote.set_fault(Some(Fault::Unreachable));
	let report = facade.tunnel_status(TunnelTarget::All).await.unwrap();

	match &report.local {
		Some(NodeStatus::Up(status)) => {
			assert_eq!(status.peers, 3);
			assert_eq!(status.managed_peers, 2);
			assert_eq!(status.listen_port, Some(17968));
		}
		other => panic!("expected local node up, got {other:?}"),
	}
	assert!(matches!(report.remote, Some(NodeStatus::Unreachable(_))));
	assert!(!report.is_up());

	h.remote.set_fault(None);
	let report = facade.tunnel_status(TunnelTarget::Remote).await.unwrap();
	assert!(report.local.is_none());
	match &report.remote {
		Some(NodeStatus::Up(status)) => assert_eq!(status.managed_peers, 2),
		other => panic!("expected remote node up, got {other:?}"),
	}
	assert!(report.is_up());
}

#[tokio::test]
async fn tunnel_status_without_remote_node() {
	let h = TestHarness::local_only().await;
	let facade = h.state.facade();

	let report = facade.tunnel_status(TunnelTarget::All).await.unwrap();
	assert!(matches!(report.local, Some(NodeStatus::Up(_))));
	assert_eq!(report.remote, Some(NodeStatus::RemoteDisabled));

	h.local.set_up(false);
	let report = facade.tunnel_status(TunnelTarget::Local).await.unwrap();
	assert!(matches!(report.local, Some(NodeStatus::Failed(_))));
	assert!(report.remote.is_none());
}
