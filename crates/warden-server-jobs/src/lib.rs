// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Background job scheduler for the warden server.
//!
//! Periodic jobs (traffic accounting, reconciliation, usage resets) run on
//! their own tickers with retry on retryable failures. Every run is recorded
//! in SQLite so health can be derived from recent history.

pub mod context;
pub mod error;
pub mod health;
pub mod job;
pub mod scheduler;
pub mod types;

pub use context::JobContext;
pub use error::{JobError, Result};
pub use health::{HealthState, JobHealthStatus, JobsHealthStatus, LastRunInfo};
pub use job::Job;
pub use scheduler::{JobScheduler, PeriodicSchedule};
pub use tokio_util::sync::CancellationToken;
pub use types::{JobDefinition, JobOutput, JobRun, JobStatus, JobType, TriggerSource};
