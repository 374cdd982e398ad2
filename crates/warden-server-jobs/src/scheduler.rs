// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use crate::context::JobContext;
use crate::error::{JobError, Result};
use crate::health::{determine_health_state, HealthState, JobHealthStatus, JobsHealthStatus};
use crate::job::Job;
use crate::types::{JobDefinition, JobRun, JobStatus, JobType, TriggerSource};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, instrument, warn};
use warden_server_db::JobStore;

const BASE_RETRY_DELAY: Duration = Duration::from_secs(1);
const MAX_RETRY_DELAY: Duration = Duration::from_secs(60);
const RETRY_FACTOR: f64 = 2.0;
const MAX_RETRIES: u32 = 3;

#[derive(Debug, Clone, Copy)]
pub struct PeriodicSchedule {
	pub interval: Duration,
	/// Run once as soon as the scheduler starts instead of waiting a full
	/// interval.
	pub run_immediately: bool,
}

impl PeriodicSchedule {
	pub fn every(interval: Duration) -> Self {
		Self {
			interval,
			run_immediately: false,
		}
	}

	pub fn immediately(mut self) -> Self {
		self.run_immediately = true;
		self
	}
}

#[derive(Debug, Clone, Copy)]
struct RetryPolicy {
	max_retries: u32,
	base_delay: Duration,
	max_delay: Duration,
}

struct RegisteredJob {
	job: Arc<dyn Job>,
	job_type: JobType,
	run_immediately: bool,
	cancellation_token: CancellationToken,
}

pub struct JobScheduler {
	jobs: HashMap<String, RegisteredJob>,
	store: Arc<dyn JobStore>,
	shutdown: CancellationToken,
	tasks: TaskTracker,
	retry: RetryPolicy,
}

impl JobScheduler {
	pub fn new(store: Arc<dyn JobStore>) -> Self {
		Self {
			jobs: HashMap::new(),
			store,
			shutdown: CancellationToken::new(),
			tasks: TaskTracker::new(),
			retry: RetryPolicy {
				max_retries: MAX_RETRIES,
				base_delay: BASE_RETRY_DELAY,
				max_delay: MAX_RETRY_DELAY,
			},
		}
	}

	/// Overrides the retry policy applied to retryable job failures.
	pub fn with_retry(mut self, max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
		self.retry = RetryPolicy {
			max_retries,
			base_delay,
			max_delay,
		};
		self
	}

	pub fn register_periodic(&mut self, job: Arc<dyn Job>, schedule: PeriodicSchedule) {
		let id = job.id().to_string();
		self.jobs.insert(
			id,
			RegisteredJob {
				job,
				job_type: JobType::Periodic {
					interval: schedule.interval,
				},
				run_immediately: schedule.run_immediately,
				cancellation_token: self.shutdown.child_token(),
			},
		);
	}

	pub fn register_one_shot(&mut self, job: Arc<dyn Job>) {
		let id = job.id().to_string();
		self.jobs.insert(
			id,
			RegisteredJob {
				job,
				job_type: JobType::OneShot,
				run_immediately: false,
				cancellation_token: self.shutdown.child_token(),
			},
		);
	}

	#[instrument(skip(self))]
	pub async fn start(&self) -> Result<()> {
		let mut periodic = 0usize;

		for (job_id, registered) in &self.jobs {
			let def = JobDefinition {
				id: job_id.clone(),
				name: registered.job.name().to_string(),
				description: registered.job.description().to_string(),
				job_type: registered.job_type.as_str().to_string(),
				interval_secs: match &registered.job_type {
					JobType::Periodic { interval } => Some(interval.as_secs() as i64),
					JobType::OneShot => None,
				},
				enabled: true,
			};
			self.store.upsert_definition(&def).await?;

			let JobType::Periodic { interval } = registered.job_type else {
				continue;
			};

			let job = Arc::clone(&registered.job);
			let store = Arc::clone(&self.store);
			let token = registered.cancellation_token.clone();
			let run_immediately = registered.run_immediately;
			let retry = self.retry;
			let job_id = job_id.clone();

			self.tasks.spawn(async move {
				if run_immediately && !token.is_cancelled() {
					let _ = run_job_with_retry(&job, &store, TriggerSource::Schedule, &token, retry).await;
				}

				let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
				ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

				loop {
					tokio::select! {
						_ = token.cancelled() => {
							info!(job_id = %job_id, "Shutting down periodic job");
							break;
						}
						_ = ticker.tick() => {
							let _ = run_job_with_retry(&job, &store, TriggerSource::Schedule, &token, retry).await;
						}
					}
				}
			});
			periodic += 1;
		}

		info!(job_count = periodic, "Job scheduler started");
		Ok(())
	}

	#[instrument(skip(self))]
	pub async fn trigger_job(&self, job_id: &str, triggered_by: TriggerSource) -> Result<String> {
		let registered = self
			.jobs
			.get(job_id)
			.ok_or_else(|| JobError::NotFound(job_id.to_string()))?;

		run_job_with_retry(
			&registered.job,
			&self.store,
			triggered_by,
			&registered.cancellation_token,
			self.retry,
		)
		.await
	}

	/// Stops a periodic job's ticker and fails any run in progress at its
	/// next cancellation check.
	#[instrument(skip(self))]
	pub fn cancel_job(&self, job_id: &str) -> Result<()> {
		let registered = self
			.jobs
			.get(job_id)
			.ok_or_else(|| JobError::NotFound(job_id.to_string()))?;

		registered.cancellation_token.cancel();
		Ok(())
	}

	#[instrument(skip(self))]
	pub async fn shutdown(&self) {
		self.shutdown.cancel();
		self.tasks.close();
		self.tasks.wait().await;

		info!("Job scheduler shut down");
	}

	pub fn job_ids(&self) -> Vec<String> {
		self.jobs.keys().cloned().collect()
	}

	#[instrument(skip(self))]
	pub async fn job_status(&self, job_id: &str) -> Option<JobHealthStatus> {
		let registered = self.jobs.get(job_id)?;

		let last_run = self.store.get_last_run(job_id).await.ok().flatten();
		let consecutive_failures = self
			.store
			.count_consecutive_failures(job_id)
			.await
			.unwrap_or(0);

		Some(JobHealthStatus {
			job_id: job_id.to_string(),
			name: registered.job.name().to_string(),
			status: determine_health_state(last_run.as_ref(), consecutive_failures),
			last_run: last_run.map(Into::into),
			consecutive_failures,
		})
	}

	#[instrument(skip(self))]
	pub async fn health_status(&self) -> JobsHealthStatus {
		let mut jobs = Vec::new();

		for job_id in self.jobs.keys() {
			if let Some(status) = self.job_status(job_id).await {
				jobs.push(status);
			}
		}

		let status = jobs
			.iter()
			.map(|job| job.status)
			.max()
			.unwrap_or(HealthState::Healthy);

		JobsHealthStatus { status, jobs }
	}
}

async fn run_job_with_retry(
	job: &Arc<dyn Job>,
	store: &Arc<dyn JobStore>,
	triggered_by: TriggerSource,
	cancellation_token: &CancellationToken,
	retry: RetryPolicy,
) -> Result<String> {
	let mut retry_count = 0u32;
	let run_id = uuid::Uuid::new_v4().to_string();

	let run = JobRun {
		id: run_id.clone(),
		job_id: job.id().to_string(),
		status: JobStatus::Running,
		started_at: Utc::now(),
		completed_at: None,
		duration_ms: None,
		error_message: None,
		retry_count,
		triggered_by,
		metadata: None,
	};
	store.record_run_start(&run).await?;

	loop {
		let ctx = JobContext {
			run_id: run_id.clone(),
			triggered_by: if retry_count > 0 {
				TriggerSource::Retry
			} else {
				triggered_by
			},
			cancellation_token: cancellation_token.clone(),
		};

		match job.run(&ctx).await {
			Ok(output) => {
				store
					.record_run_complete(&run_id, JobStatus::Succeeded, None, output.metadata)
					.await?;
				info!(job_id = %job.id(), run_id = %run_id, message = %output.message, "Job completed successfully");
				return Ok(run_id);
			}
			Err(JobError::Cancelled) => {
				store
					.record_run_complete(&run_id, JobStatus::Cancelled, None, None)
					.await?;
				info!(job_id = %job.id(), run_id = %run_id, "Job cancelled");
				return Err(JobError::Cancelled);
			}
			Err(JobError::Failed { message, retryable }) => {
				if retryable && retry_count < retry.max_retries {
					retry_count += 1;
					let delay = calculate_backoff_delay(retry_count, retry.base_delay, retry.max_delay);
					warn!(
						job_id = %job.id(),
						run_id = %run_id,
						retry_count,
						delay_ms = delay.as_millis() as u64,
						error = %message,
						"Job failed, retrying"
					);
					tokio::select! {
						_ = cancellation_token.cancelled() => {
							store
								.record_run_complete(&run_id, JobStatus::Cancelled, Some(message), None)
								.await?;
							return Err(JobError::Cancelled);
						}
						_ = tokio::time::sleep(delay) => continue,
					}
				}

				store
					.record_run_complete(&run_id, JobStatus::Failed, Some(message.clone()), None)
					.await?;
				warn!(job_id = %job.id(), run_id = %run_id, error = %message, "Job failed");
				return Err(JobError::Failed { message, retryable });
			}
			Err(e) => {
				let message = e.to_string();
				store
					.record_run_complete(&run_id, JobStatus::Failed, Some(message.clone()), None)
					.await?;
				warn!(job_id = %job.id(), run_id = %run_id, error = %message, "Job failed with error");
				return Err(e);
			}
		}
	}
}

/// Exponential backoff: `base * 2^(retry_count - 1)`, capped at `max`.
pub fn calculate_backoff_delay(retry_count: u32, base: Duration, max: Duration) -> Duration {
	let exponent = retry_count.saturating_sub(1).min(32) as i32;
	let delay = base.as_secs_f64() * RETRY_FACTOR.powi(exponent);
	Duration::from_secs_f64(delay.min(max.as_secs_f64()))
}
