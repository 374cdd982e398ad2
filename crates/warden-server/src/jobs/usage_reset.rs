// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Utc};
use tracing::{info, instrument, warn};
use warden_server_jobs::{Job, JobContext, JobError, JobOutput};
use warden_wg_common::{PeerState, SuspendReason};

use crate::facade::CommandFacade;
use crate::store::{PeerStore, ResetReason};

/// A monthly reset is due on the first day of a month when the last one
/// happened in an earlier month, or never.
pub fn is_monthly_reset_due(now: DateTime<Utc>, last: Option<DateTime<Utc>>) -> bool {
	now.day() == 1
		&& last.map_or(true, |last| (last.year(), last.month()) != (now.year(), now.month()))
}

/// Zeroes every peer's usage at the start of each month and lifts quota
/// suspensions. Peers suspended by hand stay suspended.
///
/// Each peer is reset at most once per month, so hourly runs on the first
/// pick up peers whose reset or resume failed earlier in the day.
pub struct MonthlyUsageResetJob {
	store: PeerStore,
	facade: CommandFacade,
}

impl MonthlyUsageResetJob {
	pub fn new(store: PeerStore, facade: CommandFacade) -> Self {
		Self { store, facade }
	}

	/// Runs the reset as of `now`. Split out so tests can pick the date.
	pub async fn run_at(&self, ctx: &JobContext, now: DateTime<Utc>) -> Result<JobOutput, JobError> {
		if now.day() != 1 {
			return Ok(JobOutput::new("Not the first of the month"));
		}

		let mut reset = 0usize;
		let mut resumed = 0usize;
		let mut failed = 0usize;

		for peer in self.store.list_peers().await.map_err(store_error)? {
			ctx.check_cancelled()?;

			let last = self
				.store
				.last_peer_reset_at(&peer.id, ResetReason::Monthly)
				.await
				.map_err(store_error)?;
			if is_monthly_reset_due(now, last) {
				self.store
					.reset_usage(&peer.id, ResetReason::Monthly)
					.await
					.map_err(store_error)?;
				reset += 1;
			}

			if peer.state != PeerState::Suspended || peer.suspend_reason != Some(SuspendReason::Quota) {
				continue;
			}
			// Re-read: a peer that used its quota again since today's reset
			// stays suspended.
			let current = self.store.get_peer(&peer.id).await.map_err(store_error)?;
			if !current.is_over_quota() {
				match self.facade.resume(&peer.id, None).await {
					Ok(_) => resumed += 1,
					Err(e) => {
						warn!(peer_id = %peer.id.short(), error = %e, "failed to resume peer after monthly reset");
						failed += 1;
					}
				}
			}
		}

		if reset > 0 || resumed > 0 {
			info!(reset, resumed, failed, "monthly usage reset applied");
		}
		let metadata = serde_json::json!({
			"reset": reset,
			"resumed": resumed,
			"failed": failed,
		});
		if failed > 0 {
			return Err(JobError::retryable(format!(
				"monthly reset could not resume {failed} peers"
			)));
		}
		Ok(JobOutput::with_metadata(
			format!("Reset {reset} peers, resumed {resumed}"),
			metadata,
		))
	}
}

fn store_error(e: crate::error::StoreError) -> JobError {
	JobError::retryable(format!("monthly usage reset failed: {e}"))
}

#[async_trait]
impl Job for MonthlyUsageResetJob {
	fn id(&self) -> &str {
		"monthly-usage-reset"
	}

	fn name(&self) -> &str {
		"Monthly Usage Reset"
	}

	fn description(&self) -> &str {
		"Resets peer usage on the first of each month and resumes quota-suspended peers"
	}

	#[instrument(skip(self, ctx), fields(job_id = "monthly-usage-reset"))]
	async fn run(&self, ctx: &JobContext) -> Result<JobOutput, JobError> {
		ctx.check_cancelled()?;
		self.run_at(ctx, Utc::now()).await
	}
}
