// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Monthly usage reset: once per peer per month, lifting quota suspensions
//! only.

use chrono::{Datelike, TimeZone, Utc};
use warden_server::jobs::MonthlyUsageResetJob;
use warden_server::store::ResetReason;
use warden_server::testing::TestHarness;
use warden_server_jobs::{CancellationToken, JobContext, TriggerSource};
use warden_wg_common::{PeerState, SuspendReason};

const MB: u64 = 1_000_000;

fn context() -> JobContext {
	JobContext {
		run_id: "test-run".to_string(),
		triggered_by: TriggerSource::Manual,
		cancellation_token: CancellationToken::new(),
	}
}

#[tokio::test]
async fn first_of_month_resets_usage_and_lifts_quota_suspensions() {
	let h = TestHarness::local_only().await;
	let facade = h.state.facade();
	let capped = facade.create_peer("capped", Some(10 * MB)).await.unwrap().id;
	let manual = facade.create_peer("manual", None).await.unwrap().id;
	let active = facade.create_peer("active", None).await.unwrap().id;

	h.local.set_transfer(&capped, 11 * MB, 0);
	h.local.set_transfer(&manual, 2 * MB, 0);
	h.local.set_transfer(&active, 3 * MB, 0);
	h.state.accountant().tick().await.unwrap();
	facade.suspend_peer(&manual).await.unwrap();
	assert_eq!(
		h.state.store.get_peer(&capped).await.unwrap().suspend_reason,
		Some(SuspendReason::Quota)
	);

	let job = MonthlyUsageResetJob::new(h.state.store.clone(), facade.clone());
	// Resets are stamped with the wall clock, so run as of this month.
	let now = Utc::now();
	let first = Utc
		.with_ymd_and_hms(now.year(), now.month(), 1, 0, 30, 0)
		.unwrap();
	job.run_at(&context(), first).await.unwrap();

	let capped_peer = h.state.store.get_peer(&capped).await.unwrap();
	assert_eq!(capped_peer.state, PeerState::Active);
	assert_eq!(capped_peer.used_bytes, 0);
	assert!(h.local.has_peer(&capped));

	let manual_peer = h.state.store.get_peer(&manual).await.unwrap();
	assert_eq!(manual_peer.state, PeerState::Suspended);
	assert_eq!(manual_peer.used_bytes, 0);

	assert_eq!(h.state.store.get_peer(&active).await.unwrap().used_bytes, 0);
	assert!(h
		.state
		.store
		.last_peer_reset_at(&active, ResetReason::Monthly)
		.await
		.unwrap()
		.is_some());

	// A later run the same day finds nothing left to do.
	h.local.set_transfer(&active, 8 * MB, 0);
	h.state.accountant().tick().await.unwrap();
	job.run_at(&context(), first).await.unwrap();
	assert_eq!(h.state.store.get_peer(&active).await.unwrap().used_bytes, 5 * MB);
	assert_eq!(h.state.store.reset_count(&active).await.unwrap(), 1);
}

#[tokio::test]
async fn other_days_leave_usage_alone() {
	let h = TestHarness::local_only().await;
	let id = h.state.facade().create_peer("steady", None).await.unwrap().id;
	h.local.set_transfer(&id, 4 * MB, 0);
	h.state.accountant().tick().await.unwrap();

	let job = MonthlyUsageResetJob::new(h.state.store.clone(), h.state.facade());
	let mid_month = Utc.with_ymd_and_hms(2025, 6, 15, 12, 0, 0).unwrap();
	job.run_at(&context(), mid_month).await.unwrap();

	assert_eq!(h.state.store.get_peer(&id).await.unwrap().used_bytes, 4 * MB);
	assert_eq!(h.state.store.reset_count(&id).await.unwrap(), 0);
}
