// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, instrument};
use warden_server_db::JobRepository;
use warden_server_jobs::{Job, JobContext, JobError, JobOutput};

use crate::facade::MAX_HISTORY_DAYS;
use crate::store::PeerStore;

/// Prunes scheduler run history past `retention_days`, and daily usage rows
/// older than the longest history a command can ask for.
pub struct JobHistoryCleanupJob {
	jobs: Arc<JobRepository>,
	store: PeerStore,
	retention_days: u32,
}

impl JobHistoryCleanupJob {
	pub fn new(jobs: Arc<JobRepository>, store: PeerStore, retention_days: u32) -> Self {
		Self {
			jobs,
			store,
			retention_days,
		}
	}
}

#[async_trait]
impl Job for JobHistoryCleanupJob {
	fn id(&self) -> &str {
		"job-history-cleanup"
	}

	fn name(&self) -> &str {
		"History Cleanup"
	}

	fn description(&self) -> &str {
		"Removes old job runs and daily usage rows"
	}

	#[instrument(skip(self, ctx), fields(job_id = "job-history-cleanup"))]
	async fn run(&self, ctx: &JobContext) -> Result<JobOutput, JobError> {
		ctx.check_cancelled()?;
		let runs = self
			.jobs
			.cleanup_old_runs(self.retention_days)
			.await
			.map_err(|e| JobError::retryable(format!("job run cleanup failed: {e}")))?;

		ctx.check_cancelled()?;
		let usage_days = self
			.store
			.prune_usage_history(MAX_HISTORY_DAYS)
			.await
			.map_err(|e| JobError::retryable(format!("usage history cleanup failed: {e}")))?;

		info!(runs, usage_days, retention_days = self.retention_days, "history cleanup completed");
		Ok(JobOutput::with_metadata(
			format!("Removed {runs} job runs and {usage_days} usage days"),
			serde_json::json!({
				"job_runs_deleted": runs,
				"usage_days_deleted": usage_days,
				"retention_days": self.retention_days,
			}),
		))
	}
}
