// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use crate::error::{DbError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
	Running,
	Succeeded,
	Failed,
	Cancelled,
}

impl JobStatus {
	pub fn as_str(&self) -> &'static str {
		match self {
			JobStatus::Running => "running",
			JobStatus::Succeeded => "succeeded",
			JobStatus::Failed => "failed",
			JobStatus::Cancelled => "cancelled",
		}
	}
}

impl std::str::FromStr for JobStatus {
	type Err = String;

	fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
		match s {
			"running" => Ok(JobStatus::Running),
			"succeeded" => Ok(JobStatus::Succeeded),
			"failed" => Ok(JobStatus::Failed),
			"cancelled" => Ok(JobStatus::Cancelled),
			_ => Err(format!("unknown job status: {s}")),
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerSource {
	Schedule,
	Manual,
	Retry,
}

impl TriggerSource {
	pub fn as_str(&self) -> &'static str {
		match self {
			TriggerSource::Schedule => "schedule",
			TriggerSource::Manual => "manual",
			TriggerSource::Retry => "retry",
		}
	}
}

impl std::str::FromStr for TriggerSource {
	type Err = String;

	fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
		match s {
			"schedule" => Ok(TriggerSource::Schedule),
			"manual" => Ok(TriggerSource::Manual),
			"retry" => Ok(TriggerSource::Retry),
			_ => Err(format!("unknown trigger source: {s}")),
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobDefinition {
	pub id: String,
	pub name: String,
	pub description: String,
	pub job_type: String,
	pub interval_secs: Option<i64>,
	pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRun {
	pub id: String,
	pub job_id: String,
	pub status: JobStatus,
	pub started_at: DateTime<Utc>,
	pub completed_at: Option<DateTime<Utc>>,
	pub duration_ms: Option<i64>,
	pub error_message: Option<String>,
	pub retry_count: u32,
	pub triggered_by: TriggerSource,
	pub metadata: Option<serde_json::Value>,
}

type JobRunRow = (
	String,
	String,
	String,
	DateTime<Utc>,
	Option<DateTime<Utc>>,
	Option<i64>,
	Option<String>,
	i64,
	String,
	Option<String>,
);

const JOB_RUN_COLUMNS: &str = "id, job_id, status, started_at, completed_at, duration_ms, \
	error_message, retry_count, triggered_by, metadata";

fn run_from_row(row: JobRunRow) -> Result<JobRun> {
	let (
		id,
		job_id,
		status,
		started_at,
		completed_at,
		duration_ms,
		error_message,
		retry_count,
		triggered_by,
		metadata,
	) = row;

	Ok(JobRun {
		id,
		job_id,
		status: status.parse().map_err(DbError::Internal)?,
		started_at,
		completed_at,
		duration_ms,
		error_message,
		retry_count: retry_count.max(0) as u32,
		triggered_by: triggered_by.parse().map_err(DbError::Internal)?,
		metadata: metadata
			.as_deref()
			.and_then(|s| serde_json::from_str(s).ok()),
	})
}

#[derive(Clone)]
pub struct JobRepository {
	pool: SqlitePool,
}

impl JobRepository {
	pub fn new(pool: SqlitePool) -> Self {
		Self { pool }
	}

	#[tracing::instrument(skip(self, def), fields(job_id = %def.id))]
	pub async fn upsert_definition(&self, def: &JobDefinition) -> Result<()> {
		let now = Utc::now().to_rfc3339_opts(SecondsFormat::Nanos, true);
		sqlx::query(
			r#"
			INSERT INTO job_definitions (id, name, description, job_type, interval_secs, enabled, created_at, updated_at)
			VALUES (?, ?, ?, ?, ?, ?, ?, ?)
			ON CONFLICT(id) DO UPDATE SET
				name = excluded.name,
				description = excluded.description,
				job_type = excluded.job_type,
				interval_secs = excluded.interval_secs,
				enabled = excluded.enabled,
				updated_at = excluded.updated_at
			"#,
		)
		.bind(&def.id)
		.bind(&def.name)
		.bind(&def.description)
		.bind(&def.job_type)
		.bind(def.interval_secs)
		.bind(def.enabled)
		.bind(&now)
		.bind(&now)
		.execute(&self.pool)
		.await?;

		Ok(())
	}

	#[tracing::instrument(skip(self, run), fields(run_id = %run.id, job_id = %run.job_id))]
	pub async fn record_run_start(&self, run: &JobRun) -> Result<()> {
		sqlx::query(
			r#"
			INSERT INTO job_runs (id, job_id, status, started_at, retry_count, triggered_by)
			VALUES (?, ?, ?, ?, ?, ?)
			"#,
		)
		.bind(&run.id)
		.bind(&run.job_id)
		.bind(run.status.as_str())
		.bind(run.started_at)
		.bind(run.retry_count as i64)
		.bind(run.triggered_by.as_str())
		.execute(&self.pool)
		.await?;

		Ok(())
	}

	#[tracing::instrument(skip(self, metadata))]
	pub async fn record_run_complete(
		&self,
		run_id: &str,
		status: JobStatus,
		error: Option<String>,
		metadata: Option<serde_json::Value>,
	) -> Result<()> {
		let now = Utc::now();
		let metadata_str = metadata.map(|m| m.to_string());

		sqlx::query(
			r#"
			UPDATE job_runs
			SET status = ?,
				completed_at = ?,
				duration_ms = CAST((julianday(?) - julianday(started_at)) * 86400000 AS INTEGER),
				error_message = ?,
				metadata = ?
			WHERE id = ?
			"#,
		)
		.bind(status.as_str())
		.bind(now)
		.bind(now)
		.bind(error)
		.bind(metadata_str)
		.bind(run_id)
		.execute(&self.pool)
		.await?;

		Ok(())
	}

	#[tracing::instrument(skip(self))]
	pub async fn get_last_run(&self, job_id: &str) -> Result<Option<JobRun>> {
		let row = sqlx::query_as::<_, JobRunRow>(&format!(
			"SELECT {JOB_RUN_COLUMNS} FROM job_runs WHERE job_id = ? ORDER BY started_at DESC LIMIT 1"
		))
		.bind(job_id)
		.fetch_optional(&self.pool)
		.await?;

		row.map(run_from_row).transpose()
	}

	#[tracing::instrument(skip(self))]
	pub async fn count_consecutive_failures(&self, job_id: &str) -> Result<u32> {
		let row = sqlx::query_as::<_, (i64,)>(
			r#"
			WITH ranked AS (
				SELECT status,
					ROW_NUMBER() OVER (ORDER BY started_at DESC) as rn
				FROM job_runs
				WHERE job_id = ?
			)
			SELECT COUNT(*) as count
			FROM ranked
			WHERE status = 'failed'
				AND rn <= (
					SELECT COALESCE(MIN(rn) - 1, (SELECT COUNT(*) FROM ranked))
					FROM ranked
					WHERE status != 'failed'
				)
			"#,
		)
		.bind(job_id)
		.fetch_one(&self.pool)
		.await?;

		Ok(row.0.max(0) as u32)
	}

	#[tracing::instrument(skip(self))]
	pub async fn delete_old_runs(&self, before: DateTime<Utc>) -> Result<u64> {
		let result = sqlx::query("DELETE FROM job_runs WHERE completed_at < ?")
			.bind(before)
			.execute(&self.pool)
			.await?;

		Ok(result.rows_affected())
	}

	#[tracing::instrument(skip(self))]
	pub async fn cleanup_old_runs(&self, retention_days: u32) -> Result<u64> {
		let cutoff = Utc::now() - chrono::Duration::days(retention_days as i64);
		self.delete_old_runs(cutoff).await
	}
}

#[async_trait]
pub trait JobStore: Send + Sync {
	async fn upsert_definition(&self, def: &JobDefinition) -> Result<()>;
	async fn record_run_start(&self, run: &JobRun) -> Result<()>;
	async fn record_run_complete(
		&self,
		run_id: &str,
		status: JobStatus,
		error: Option<String>,
		metadata: Option<serde_json::Value>,
	) -> Result<()>;
	async fn get_last_run(&self, job_id: &str) -> Result<Option<JobRun>>;
	async fn count_consecutive_failures(&self, job_id: &str) -> Result<u32>;
	async fn cleanup_old_runs(&self, retention_days: u32) -> Result<u64>;
}

#[async_trait]
impl JobStore for JobRepository {
	async fn upsert_definition(&self, def: &JobDefinition) -> Result<()> {
		self.upsert_definition(def).await
	}

	async fn record_run_start(&self, run: &JobRun) -> Result<()> {
		self.record_run_start(run).await
	}

	async fn record_run_complete(
		&self,
		run_id: &str,
		status: JobStatus,
		error: Option<String>,
		metadata: Option<serde_json::Value>,
	) -> Result<()> {
		self
			.record_run_complete(run_id, status, error, metadata)
			.await
	}

	async fn get_last_run(&self, job_id: &str) -> Result<Option<JobRun>> {
		self.get_last_run(job_id).await
	}

	async fn count_consecutive_failures(&self, job_id: &str) -> Result<u32> {
		self.count_consecutive_failures(job_id).await
	}

	async fn cleanup_old_runs(&self, retention_days: u32) -> Result<u64> {
		self.cleanup_old_runs(retention_days).await
	}
}
