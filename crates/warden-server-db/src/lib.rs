// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! SQLite persistence for the warden server.

pub mod error;
pub mod job;
pub mod migrations;
pub mod peer;
pub mod pool;
pub mod testing;

pub use error::{DbError, Result};
pub use job::{JobDefinition, JobRepository, JobRun, JobStatus, JobStore, TriggerSource};
pub use migrations::run_migrations;
pub use peer::{NewPeerRow, PeerRepository, PeerRow, SampleOutcome, UsageDay};
pub use pool::create_pool;
pub use sqlx::SqlitePool;
