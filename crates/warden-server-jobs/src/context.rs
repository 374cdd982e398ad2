// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use crate::error::JobError;
use crate::types::TriggerSource;
use tokio_util::sync::CancellationToken;

pub struct JobContext {
	pub run_id: String,
	pub triggered_by: TriggerSource,
	pub cancellation_token: CancellationToken,
}

impl JobContext {
	/// Returns `Err(JobError::Cancelled)` once the job or the scheduler has
	/// been cancelled. Jobs call this between units of work.
	pub fn check_cancelled(&self) -> Result<(), JobError> {
		if self.cancellation_token.is_cancelled() {
			Err(JobError::Cancelled)
		} else {
			Ok(())
		}
	}
}
