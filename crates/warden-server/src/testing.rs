// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Test wiring: real services over in-memory nodes.

use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use warden_enforcer::testing::FakeWg;
use warden_enforcer::{Enforcer, WgEnforcer};
use warden_server_db::testing::create_migrated_test_pool;
use warden_wg_common::{AddressPool, Node, SuspendMode};

use crate::remote_sync::RetryPolicy;
use crate::state::{AppState, ServiceSettings};

/// Retries quickly enough for tests to exhaust them.
pub fn fast_retry() -> RetryPolicy {
	RetryPolicy {
		max_retries: 2,
		base_delay: Duration::from_millis(1),
		max_delay: Duration::from_millis(5),
	}
}

pub struct TestHarness {
	pub state: AppState,
	pub pool: SqlitePool,
	pub local: Arc<FakeWg>,
	/// Present on every harness; only wired in when the remote is enabled.
	pub remote: Arc<FakeWg>,
}

impl TestHarness {
	/// Local and remote nodes, remote traffic not counted.
	pub async fn new() -> Self {
		Self::with_settings(true, test_settings()).await
	}

	pub async fn local_only() -> Self {
		Self::with_settings(false, test_settings()).await
	}

	pub async fn with_settings(remote_enabled: bool, settings: ServiceSettings) -> Self {
		Self::with_pool(create_migrated_test_pool().await, remote_enabled, settings)
	}

	/// Wires fresh nodes over an existing database, as a restarted process
	/// would.
	pub fn with_pool(pool: SqlitePool, remote_enabled: bool, settings: ServiceSettings) -> Self {
		Self::with_nodes(
			pool,
			Arc::new(FakeWg::new()),
			Arc::new(FakeWg::new()),
			remote_enabled,
			settings,
		)
	}

	pub fn with_nodes(
		pool: SqlitePool,
		local: Arc<FakeWg>,
		remote: Arc<FakeWg>,
		remote_enabled: bool,
		settings: ServiceSettings,
	) -> Self {
		let local_enforcer: Arc<dyn Enforcer> = Arc::new(WgEnforcer::new(
			Node::Local,
			"wg0",
			local.clone(),
			SuspendMode::Remove,
		));
		let remote_enforcer: Option<Arc<dyn Enforcer>> = remote_enabled.then(|| {
			Arc::new(WgEnforcer::new(
				Node::Remote,
				"wg0",
				remote.clone(),
				SuspendMode::Remove,
			)) as Arc<dyn Enforcer>
		});

		let state = AppState::new(
			pool.clone(),
			AddressPool::default(),
			local_enforcer,
			remote_enforcer,
			settings,
		);
		Self {
			state,
			pool,
			local,
			remote,
		}
	}
}

pub fn test_settings() -> ServiceSettings {
	ServiceSettings {
		retry: fast_retry(),
		..ServiceSettings::default()
	}
}
