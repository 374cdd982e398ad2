// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use async_trait::async_trait;
use tracing::instrument;
use warden_server_jobs::{Job, JobContext, JobError, JobOutput};

use crate::accountant::TrafficAccountant;

pub struct TrafficAccountingJob {
	accountant: TrafficAccountant,
}

impl TrafficAccountingJob {
	pub fn new(accountant: TrafficAccountant) -> Self {
		Self { accountant }
	}
}

#[async_trait]
impl Job for TrafficAccountingJob {
	fn id(&self) -> &str {
		"traffic-accounting"
	}

	fn name(&self) -> &str {
		"Traffic Accounting"
	}

	fn description(&self) -> &str {
		"Samples interface counters, accumulates usage and suspends peers over quota"
	}

	#[instrument(skip(self, ctx), fields(job_id = "traffic-accounting"))]
	async fn run(&self, ctx: &JobContext) -> Result<JobOutput, JobError> {
		ctx.check_cancelled()?;

		let summary = self
			.accountant
			.tick()
			.await
			.map_err(|e| JobError::retryable(format!("traffic accounting failed: {e}")))?;

		let metadata = serde_json::to_value(&summary)
			.map_err(|e| JobError::fatal(format!("failed to encode summary: {e}")))?;
		Ok(JobOutput::with_metadata(
			format!(
				"Accounted {} peers, {} bytes added, {} suspended",
				summary.peers_accounted,
				summary.bytes_added,
				summary.suspended.len()
			),
			metadata,
		))
	}
}
