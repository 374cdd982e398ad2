// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Schema setup. Every statement is idempotent so this runs on each start.

use sqlx::SqlitePool;

use crate::error::Result;

const SCHEMA: &[&str] = &[
	r#"
	CREATE TABLE IF NOT EXISTS wg_peers (
		public_key TEXT PRIMARY KEY,
		name TEXT NOT NULL,
		address TEXT NOT NULL UNIQUE,
		private_key TEXT,
		preshared_key TEXT NOT NULL,
		quota_bytes INTEGER,
		used_bytes INTEGER NOT NULL DEFAULT 0,
		state TEXT NOT NULL,
		suspend_reason TEXT,
		remote_status TEXT NOT NULL,
		quota_warned INTEGER NOT NULL DEFAULT 0,
		last_handshake_at TEXT,
		created_at TEXT NOT NULL,
		updated_at TEXT NOT NULL
	)
	"#,
	// Names are only reserved by live peers; a peer being torn down frees
	// its name immediately.
	r#"
	CREATE UNIQUE INDEX IF NOT EXISTS idx_wg_peers_live_name
		ON wg_peers(name) WHERE state != 'pending_removal'
	"#,
	r#"
	CREATE TABLE IF NOT EXISTS wg_counter_samples (
		public_key TEXT NOT NULL REFERENCES wg_peers(public_key) ON DELETE CASCADE,
		node TEXT NOT NULL,
		counter_bytes INTEGER NOT NULL,
		observed_at TEXT NOT NULL,
		PRIMARY KEY (public_key, node)
	)
	"#,
	r#"
	CREATE TABLE IF NOT EXISTS wg_usage_resets (
		id INTEGER PRIMARY KEY AUTOINCREMENT,
		public_key TEXT NOT NULL,
		previous_bytes INTEGER NOT NULL,
		reason TEXT NOT NULL,
		reset_at TEXT NOT NULL
	)
	"#,
	"CREATE INDEX IF NOT EXISTS idx_wg_usage_resets_reason ON wg_usage_resets(reason, reset_at)",
	r#"
	CREATE TABLE IF NOT EXISTS wg_usage_daily (
		public_key TEXT NOT NULL,
		day TEXT NOT NULL,
		bytes INTEGER NOT NULL DEFAULT 0,
		PRIMARY KEY (public_key, day)
	)
	"#,
	r#"
	CREATE TABLE IF NOT EXISTS job_definitions (
		id TEXT PRIMARY KEY,
		name TEXT NOT NULL,
		description TEXT,
		job_type TEXT NOT NULL,
		interval_secs INTEGER,
		enabled INTEGER NOT NULL DEFAULT 1,
		created_at TEXT NOT NULL,
		updated_at TEXT NOT NULL
	)
	"#,
	r#"
	CREATE TABLE IF NOT EXISTS job_runs (
		id TEXT PRIMARY KEY,
		job_id TEXT NOT NULL REFERENCES job_definitions(id),
		status TEXT NOT NULL,
		started_at TEXT NOT NULL,
		completed_at TEXT,
		duration_ms INTEGER,
		error_message TEXT,
		retry_count INTEGER NOT NULL DEFAULT 0,
		triggered_by TEXT NOT NULL,
		metadata TEXT
	)
	"#,
	"CREATE INDEX IF NOT EXISTS idx_job_runs_job_started ON job_runs(job_id, started_at)",
];

#[tracing::instrument(skip(pool))]
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
	for statement in SCHEMA {
		sqlx::query(statement).execute(pool).await?;
	}
	tracing::debug!(statements = SCHEMA.len(), "schema up to date");
	Ok(())
}
