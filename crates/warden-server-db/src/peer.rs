// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Persistence for peers, their counter samples and usage history.

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::SqlitePool;
use warden_wg_common::counter_delta;

use crate::error::{conflict_on_unique, DbError, Result};

const PEER_COLUMNS: &str = "public_key, name, address, private_key, preshared_key, quota_bytes, \
	used_bytes, state, suspend_reason, remote_status, quota_warned, last_handshake_at, created_at, \
	updated_at";

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PeerRow {
	pub public_key: String,
	pub name: String,
	pub address: String,
	pub private_key: Option<String>,
	pub preshared_key: String,
	pub quota_bytes: Option<i64>,
	pub used_bytes: i64,
	pub state: String,
	pub suspend_reason: Option<String>,
	pub remote_status: String,
	pub quota_warned: bool,
	pub last_handshake_at: Option<DateTime<Utc>>,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewPeerRow {
	pub public_key: String,
	pub name: String,
	pub address: String,
	pub private_key: Option<String>,
	pub preshared_key: String,
	pub quota_bytes: Option<i64>,
	pub state: String,
	pub remote_status: String,
}

/// Result of folding one counter reading into a peer's usage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleOutcome {
	/// Bytes attributed to this reading.
	pub delta: u64,
	/// Whether the delta was added to usage.
	pub counted: bool,
	pub used_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsageDay {
	pub day: NaiveDate,
	pub bytes: u64,
}

#[derive(Clone)]
pub struct PeerRepository {
	pool: SqlitePool,
}

fn to_i64(value: u64, what: &str) -> Result<i64> {
	i64::try_from(value).map_err(|_| DbError::Internal(format!("{what} out of range: {value}")))
}

impl PeerRepository {
	pub fn new(pool: SqlitePool) -> Self {
		Self { pool }
	}

	pub fn pool(&self) -> &SqlitePool {
		&self.pool
	}

	#[tracing::instrument(skip(self, peer), fields(name = %peer.name, address = %peer.address))]
	pub async fn insert_peer(&self, peer: &NewPeerRow) -> Result<()> {
		let now = Utc::now();
		sqlx::query(
			r#"
			INSERT INTO wg_peers (public_key, name, address, private_key, preshared_key, quota_bytes,
				used_bytes, state, remote_status, quota_warned, created_at, updated_at)
			VALUES (?, ?, ?, ?, ?, ?, 0, ?, ?, 0, ?, ?)
			"#,
		)
		.bind(&peer.public_key)
		.bind(&peer.name)
		.bind(&peer.address)
		.bind(&peer.private_key)
		.bind(&peer.preshared_key)
		.bind(peer.quota_bytes)
		.bind(&peer.state)
		.bind(&peer.remote_status)
		.bind(now)
		.bind(now)
		.execute(&self.pool)
		.await
		.map_err(conflict_on_unique)?;

		Ok(())
	}

	#[tracing::instrument(skip(self))]
	pub async fn get_peer(&self, public_key: &str) -> Result<Option<PeerRow>> {
		let row = sqlx::query_as::<_, PeerRow>(&format!(
			"SELECT {PEER_COLUMNS} FROM wg_peers WHERE public_key = ?"
		))
		.bind(public_key)
		.fetch_optional(&self.pool)
		.await?;

		Ok(row)
	}

	/// Looks up a live (not pending removal) peer by name.
	#[tracing::instrument(skip(self))]
	pub async fn get_live_peer_by_name(&self, name: &str) -> Result<Option<PeerRow>> {
		let row = sqlx::query_as::<_, PeerRow>(&format!(
			"SELECT {PEER_COLUMNS} FROM wg_peers WHERE name = ? AND state != 'pending_removal'"
		))
		.bind(name)
		.fetch_optional(&self.pool)
		.await?;

		Ok(row)
	}

	#[tracing::instrument(skip(self))]
	pub async fn list_peers(&self, include_pending_removal: bool) -> Result<Vec<PeerRow>> {
		let filter = if include_pending_removal {
			""
		} else {
			"WHERE state != 'pending_removal'"
		};
		let rows = sqlx::query_as::<_, PeerRow>(&format!(
			"SELECT {PEER_COLUMNS} FROM wg_peers {filter} ORDER BY created_at, name"
		))
		.fetch_all(&self.pool)
		.await?;

		Ok(rows)
	}

	/// Addresses held by any peer, including ones still being torn down.
	#[tracing::instrument(skip(self))]
	pub async fn list_addresses(&self) -> Result<Vec<String>> {
		let rows = sqlx::query_as::<_, (String,)>("SELECT address FROM wg_peers")
			.fetch_all(&self.pool)
			.await?;

		Ok(rows.into_iter().map(|(address,)| address).collect())
	}

	#[tracing::instrument(skip(self))]
	pub async fn update_quota(&self, public_key: &str, quota_bytes: Option<u64>) -> Result<u64> {
		let quota = quota_bytes.map(|q| to_i64(q, "quota")).transpose()?;
		let result = sqlx::query(
			"UPDATE wg_peers SET quota_bytes = ?, quota_warned = 0, updated_at = ? WHERE public_key = ?",
		)
		.bind(quota)
		.bind(Utc::now())
		.bind(public_key)
		.execute(&self.pool)
		.await?;

		Ok(result.rows_affected())
	}

	#[tracing::instrument(skip(self))]
	pub async fn update_state(
		&self,
		public_key: &str,
		state: &str,
		suspend_reason: Option<&str>,
	) -> Result<u64> {
		let result = sqlx::query(
			"UPDATE wg_peers SET state = ?, suspend_reason = ?, updated_at = ? WHERE public_key = ?",
		)
		.bind(state)
		.bind(suspend_reason)
		.bind(Utc::now())
		.bind(public_key)
		.execute(&self.pool)
		.await
		.map_err(conflict_on_unique)?;

		Ok(result.rows_affected())
	}

	/// Compare-and-set on state. Returns 0 when the peer was not in `from`.
	#[tracing::instrument(skip(self))]
	pub async fn update_state_if(
		&self,
		public_key: &str,
		from: &str,
		to: &str,
		suspend_reason: Option<&str>,
	) -> Result<u64> {
		let result = sqlx::query(
			r#"
			UPDATE wg_peers SET state = ?, suspend_reason = ?, updated_at = ?
			WHERE public_key = ? AND state = ?
			"#,
		)
		.bind(to)
		.bind(suspend_reason)
		.bind(Utc::now())
		.bind(public_key)
		.bind(from)
		.execute(&self.pool)
		.await
		.map_err(conflict_on_unique)?;

		Ok(result.rows_affected())
	}

	#[tracing::instrument(skip(self))]
	pub async fn update_remote_status(&self, public_key: &str, status: &str) -> Result<u64> {
		let result =
			sqlx::query("UPDATE wg_peers SET remote_status = ?, updated_at = ? WHERE public_key = ?")
				.bind(status)
				.bind(Utc::now())
				.bind(public_key)
				.execute(&self.pool)
				.await?;

		Ok(result.rows_affected())
	}

	#[tracing::instrument(skip(self))]
	pub async fn update_handshake(&self, public_key: &str, at: DateTime<Utc>) -> Result<u64> {
		let result = sqlx::query("UPDATE wg_peers SET last_handshake_at = ? WHERE public_key = ?")
			.bind(at)
			.bind(public_key)
			.execute(&self.pool)
			.await?;

		Ok(result.rows_affected())
	}

	/// Sets the quota warning flag. Returns 0 if it was already set.
	#[tracing::instrument(skip(self))]
	pub async fn mark_quota_warned(&self, public_key: &str) -> Result<u64> {
		let result = sqlx::query(
			"UPDATE wg_peers SET quota_warned = 1 WHERE public_key = ? AND quota_warned = 0",
		)
		.bind(public_key)
		.execute(&self.pool)
		.await?;

		Ok(result.rows_affected())
	}

	/// Adds `delta` to cumulative usage and to the day's history bucket.
	/// Returns the new total, or `None` if the peer does not exist.
	#[tracing::instrument(skip(self))]
	pub async fn add_usage(&self, public_key: &str, delta: u64) -> Result<Option<u64>> {
		let mut tx = self.pool.begin().await?;
		let used = add_usage_in(&mut tx, public_key, delta).await?;
		tx.commit().await?;
		Ok(used)
	}

	/// Folds a raw counter reading from `node` into the peer's usage.
	///
	/// Reading the previous sample, storing the new one and adding the delta
	/// happen in one transaction, so a crash can neither lose nor repeat a
	/// delta. Returns `None` if the peer no longer exists.
	#[tracing::instrument(skip(self))]
	pub async fn apply_counter_sample(
		&self,
		public_key: &str,
		node: &str,
		counter: u64,
		count_usage: bool,
	) -> Result<Option<SampleOutcome>> {
		let mut tx = self.pool.begin().await?;

		let used: Option<(i64,)> =
			sqlx::query_as("SELECT used_bytes FROM wg_peers WHERE public_key = ?")
				.bind(public_key)
				.fetch_optional(&mut *tx)
				.await?;
		let Some((used,)) = used else {
			return Ok(None);
		};

		let last: Option<(i64,)> = sqlx::query_as(
			"SELECT counter_bytes FROM wg_counter_samples WHERE public_key = ? AND node = ?",
		)
		.bind(public_key)
		.bind(node)
		.fetch_optional(&mut *tx)
		.await?;

		let delta = counter_delta(last.map(|(c,)| c.max(0) as u64), counter);

		sqlx::query(
			r#"
			INSERT INTO wg_counter_samples (public_key, node, counter_bytes, observed_at)
			VALUES (?, ?, ?, ?)
			ON CONFLICT(public_key, node) DO UPDATE SET
				counter_bytes = excluded.counter_bytes,
				observed_at = excluded.observed_at
			"#,
		)
		.bind(public_key)
		.bind(node)
		.bind(to_i64(counter, "counter")?)
		.bind(Utc::now())
		.execute(&mut *tx)
		.await?;

		let counted = count_usage && delta > 0;
		let used_bytes = if counted {
			add_usage_in(&mut tx, public_key, delta)
				.await?
				.unwrap_or(used.max(0) as u64)
		} else {
			used.max(0) as u64
		};

		tx.commit().await?;

		Ok(Some(SampleOutcome {
			delta,
			counted,
			used_bytes,
		}))
	}

	/// Forgets the last reading of `public_key` on `node`. The next reading
	/// is then counted from zero, as a freshly configured peer's counters are.
	#[tracing::instrument(skip(self))]
	pub async fn clear_counter_sample(&self, public_key: &str, node: &str) -> Result<u64> {
		let result =
			sqlx::query("DELETE FROM wg_counter_samples WHERE public_key = ? AND node = ?")
				.bind(public_key)
				.bind(node)
				.execute(&self.pool)
				.await?;

		Ok(result.rows_affected())
	}

	#[tracing::instrument(skip(self))]
	pub async fn get_counter_sample(&self, public_key: &str, node: &str) -> Result<Option<u64>> {
		let row: Option<(i64,)> = sqlx::query_as(
			"SELECT counter_bytes FROM wg_counter_samples WHERE public_key = ? AND node = ?",
		)
		.bind(public_key)
		.bind(node)
		.fetch_optional(&self.pool)
		.await?;

		Ok(row.map(|(c,)| c.max(0) as u64))
	}

	/// Zeroes cumulative usage and records the previous value in the reset
	/// log. Counter samples are kept so the next reading only counts new
	/// traffic. Returns the previous usage, or `None` if the peer is gone.
	#[tracing::instrument(skip(self))]
	pub async fn reset_usage(&self, public_key: &str, reason: &str) -> Result<Option<u64>> {
		let mut tx = self.pool.begin().await?;

		let used: Option<(i64,)> =
			sqlx::query_as("SELECT used_bytes FROM wg_peers WHERE public_key = ?")
				.bind(public_key)
				.fetch_optional(&mut *tx)
				.await?;
		let Some((previous,)) = used else {
			return Ok(None);
		};

		let now = Utc::now();
		sqlx::query(
			"INSERT INTO wg_usage_resets (public_key, previous_bytes, reason, reset_at) VALUES (?, ?, ?, ?)",
		)
		.bind(public_key)
		.bind(previous)
		.bind(reason)
		.bind(now)
		.execute(&mut *tx)
		.await?;

		sqlx::query(
			"UPDATE wg_peers SET used_bytes = 0, quota_warned = 0, updated_at = ? WHERE public_key = ?",
		)
		.bind(now)
		.bind(public_key)
		.execute(&mut *tx)
		.await?;

		tx.commit().await?;
		Ok(Some(previous.max(0) as u64))
	}

	/// Time of the most recent reset recorded with `reason`, across all peers.
	#[tracing::instrument(skip(self))]
	pub async fn last_reset_at(&self, reason: &str) -> Result<Option<DateTime<Utc>>> {
		let row: Option<(DateTime<Utc>,)> = sqlx::query_as(
			"SELECT reset_at FROM wg_usage_resets WHERE reason = ? ORDER BY id DESC LIMIT 1",
		)
		.bind(reason)
		.fetch_optional(&self.pool)
		.await?;

		Ok(row.map(|(at,)| at))
	}

	/// Time of the most recent reset of one peer recorded with `reason`.
	#[tracing::instrument(skip(self))]
	pub async fn last_peer_reset_at(
		&self,
		public_key: &str,
		reason: &str,
	) -> Result<Option<DateTime<Utc>>> {
		let row: Option<(DateTime<Utc>,)> = sqlx::query_as(
			"SELECT reset_at FROM wg_usage_resets WHERE public_key = ? AND reason = ? ORDER BY id DESC LIMIT 1",
		)
		.bind(public_key)
		.bind(reason)
		.fetch_optional(&self.pool)
		.await?;

		Ok(row.map(|(at,)| at))
	}

	#[tracing::instrument(skip(self))]
	pub async fn count_resets(&self, public_key: &str) -> Result<u64> {
		let (count,): (i64,) =
			sqlx::query_as("SELECT COUNT(*) FROM wg_usage_resets WHERE public_key = ?")
				.bind(public_key)
				.fetch_one(&self.pool)
				.await?;

		Ok(count.max(0) as u64)
	}

	#[tracing::instrument(skip(self))]
	pub async fn usage_history(&self, public_key: &str, since: NaiveDate) -> Result<Vec<UsageDay>> {
		let rows: Vec<(String, i64)> = sqlx::query_as(
			"SELECT day, bytes FROM wg_usage_daily WHERE public_key = ? AND day >= ? ORDER BY day",
		)
		.bind(public_key)
		.bind(since.format("%Y-%m-%d").to_string())
		.fetch_all(&self.pool)
		.await?;

		rows
			.into_iter()
			.map(|(day, bytes)| {
				let day = NaiveDate::parse_from_str(&day, "%Y-%m-%d")
					.map_err(|e| DbError::Internal(format!("bad usage day '{day}': {e}")))?;
				Ok(UsageDay {
					day,
					bytes: bytes.max(0) as u64,
				})
			})
			.collect()
	}

	/// Drops daily usage rows older than `before`. Cumulative usage is
	/// unaffected.
	#[tracing::instrument(skip(self))]
	pub async fn prune_usage_days(&self, before: NaiveDate) -> Result<u64> {
		let result = sqlx::query("DELETE FROM wg_usage_daily WHERE day < ?")
			.bind(before.format("%Y-%m-%d").to_string())
			.execute(&self.pool)
			.await?;

		Ok(result.rows_affected())
	}

	/// Removes the peer row together with its samples and history.
	#[tracing::instrument(skip(self))]
	pub async fn delete_peer(&self, public_key: &str) -> Result<u64> {
		let mut tx = self.pool.begin().await?;

		sqlx::query("DELETE FROM wg_counter_samples WHERE public_key = ?")
			.bind(public_key)
			.execute(&mut *tx)
			.await?;
		sqlx::query("DELETE FROM wg_usage_daily WHERE public_key = ?")
			.bind(public_key)
			.execute(&mut *tx)
			.await?;
		let result = sqlx::query("DELETE FROM wg_peers WHERE public_key = ?")
			.bind(public_key)
			.execute(&mut *tx)
			.await?;

		tx.commit().await?;
		Ok(result.rows_affected())
	}
}

async fn add_usage_in(
	tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
	public_key: &str,
	delta: u64,
) -> Result<Option<u64>> {
	let delta = to_i64(delta, "usage delta")?;
	let now = Utc::now();

	let updated: Option<(i64,)> = sqlx::query_as(
		r#"
		UPDATE wg_peers SET used_bytes = used_bytes + ?, updated_at = ?
		WHERE public_key = ?
		RETURNING used_bytes
		"#,
	)
	.bind(delta)
	.bind(now)
	.bind(public_key)
	.fetch_optional(&mut **tx)
	.await?;

	let Some((used,)) = updated else {
		return Ok(None);
	};

	sqlx::query(
		r#"
		INSERT INTO wg_usage_daily (public_key, day, bytes) VALUES (?, ?, ?)
		ON CONFLICT(public_key, day) DO UPDATE SET bytes = bytes + excluded.bytes
		"#,
	)
	.bind(public_key)
	.bind(now.format("%Y-%m-%d").to_string())
	.bind(delta)
	.execute(&mut **tx)
	.await?;

	Ok(Some(used.max(0) as u64))
}
