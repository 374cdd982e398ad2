// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use async_trait::async_trait;
use tracing::instrument;
use warden_server_jobs::{Job, JobContext, JobError, JobOutput};

use crate::reconciler::Reconciler;

pub struct ReconciliationJob {
	reconciler: Reconciler,
}

impl ReconciliationJob {
	pub fn new(reconciler: Reconciler) -> Self {
		Self { reconciler }
	}
}

#[async_trait]
impl Job for ReconciliationJob {
	fn id(&self) -> &str {
		"reconciliation"
	}

	fn name(&self) -> &str {
		"Reconciliation"
	}

	fn description(&self) -> &str {
		"Converges the local and remote interfaces to the peer store"
	}

	#[instrument(skip(self, ctx), fields(job_id = "reconciliation"))]
	async fn run(&self, ctx: &JobContext) -> Result<JobOutput, JobError> {
		ctx.check_cancelled()?;

		let pass = self
			.reconciler
			.run_full_pass()
			.await
			.map_err(|e| JobError::retryable(format!("reconciliation failed: {e}")))?;

		let local_failures = pass.local.failed().count();
		let remote_degraded = pass.remote.as_ref().map_or(0, |r| r.degraded.len());
		Ok(JobOutput::with_metadata(
			format!(
				"{} local changes, {} local failures, {} remote degraded",
				pass.local.changes(),
				local_failures,
				remote_degraded
			),
			serde_json::json!({
				"local_changes": pass.local.changes(),
				"local_failures": local_failures,
				"purged": pass.purged.len(),
				"remote_synced": pass.remote.as_ref().map(|r| r.synced.len()),
				"remote_degraded": remote_degraded,
			}),
		))
	}
}
