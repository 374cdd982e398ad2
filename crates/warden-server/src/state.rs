// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Shared services, wired once per process.

use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::{info, warn};
use warden_enforcer::{Enforcer, LocalExecutor, SshExecutor, SshTarget, WgEnforcer};
use warden_server_config::{ConfigError, ServerConfig};
use warden_wg_common::{load_server_public_key, AddressPool, Node, ResumePolicy, ServerProfile};

use crate::accountant::TrafficAccountant;
use crate::events::EventBus;
use crate::facade::CommandFacade;
use crate::reconciler::Reconciler;
use crate::remote_sync::{RetryPolicy, RemoteSync};
use crate::sequencer::PeerSequencer;
use crate::store::PeerStore;

/// Behavior knobs shared by the services.
#[derive(Debug, Clone)]
pub struct ServiceSettings {
	pub warn_ratio: f64,
	pub resume_policy: ResumePolicy,
	/// Whether the remote node's counters are added to usage.
	pub remote_counts_traffic: bool,
	pub retry: RetryPolicy,
	/// Needed to render client configs; `None` without an endpoint.
	pub server_profile: Option<ServerProfile>,
}

impl Default for ServiceSettings {
	fn default() -> Self {
		Self {
			warn_ratio: 0.8,
			resume_policy: ResumePolicy::default(),
			remote_counts_traffic: false,
			retry: RetryPolicy::default(),
			server_profile: None,
		}
	}
}

#[derive(Clone)]
pub struct AppState {
	pub store: PeerStore,
	pub sequencer: PeerSequencer,
	pub events: EventBus,
	pub local: Arc<dyn Enforcer>,
	pub remote: Option<Arc<dyn Enforcer>>,
	pub remote_sync: RemoteSync,
	pub settings: ServiceSettings,
}

impl AppState {
	pub fn new(
		pool: SqlitePool,
		addresses: AddressPool,
		local: Arc<dyn Enforcer>,
		remote: Option<Arc<dyn Enforcer>>,
		settings: ServiceSettings,
	) -> Self {
		let store = PeerStore::new(pool, addresses, remote.is_some());
		let sequencer = PeerSequencer::new();
		let events = EventBus::new();
		let remote_sync = RemoteSync::new(
			remote.clone(),
			store.clone(),
			sequencer.clone(),
			events.clone(),
			settings.retry,
		);

		Self {
			store,
			sequencer,
			events,
			local,
			remote,
			remote_sync,
			settings,
		}
	}

	pub fn facade(&self) -> CommandFacade {
		CommandFacade::new(self)
	}

	pub fn accountant(&self) -> TrafficAccountant {
		TrafficAccountant::new(self)
	}

	pub fn reconciler(&self) -> Reconciler {
		Reconciler::new(self)
	}
}

/// Builds the services for `config`: a subprocess-backed local enforcer and,
/// when enabled, an ssh-backed remote one.
pub async fn create_app_state(
	config: &ServerConfig,
	pool: SqlitePool,
) -> Result<AppState, ConfigError> {
	let wg = &config.wireguard;
	let local: Arc<dyn Enforcer> = Arc::new(WgEnforcer::new(
		Node::Local,
		wg.interface.clone(),
		Arc::new(LocalExecutor::new(wg.command_timeout)),
		wg.suspend_mode,
	));

	let remote: Option<Arc<dyn Enforcer>> = if config.remote.enabled {
		let host = config.remote.host.clone().ok_or_else(|| {
			ConfigError::Validation("remote.host is required when remote.enabled is set".to_string())
		})?;
		let target = SshTarget {
			host,
			user: config.remote.user.clone(),
			port: config.remote.port,
			identity_file: config.remote.identity_file.clone(),
			connect_timeout: config.remote.connect_timeout,
			command_timeout: config.remote.command_timeout,
		};
		info!(host = %target.host, interface = %config.remote.interface, "remote node enabled");
		Some(Arc::new(WgEnforcer::new(
			Node::Remote,
			config.remote.interface.clone(),
			Arc::new(SshExecutor::new(target)),
			wg.suspend_mode,
		)))
	} else {
		None
	};

	let server_profile = match &wg.endpoint {
		Some(endpoint) => match load_server_public_key(&wg.server_public_key_file).await {
			Ok(public_key) => {
				let mut profile = ServerProfile::new(public_key, endpoint.clone());
				profile.endpoint_port = wg.endpoint_port;
				profile.dns = wg.dns.clone();
				profile.allowed_ips = wg.client_allowed_ips.clone();
				profile.keepalive_secs = wg.keepalive;
				Some(profile)
			}
			Err(e) => {
				warn!(
					path = %wg.server_public_key_file.display(),
					error = %e,
					"cannot read server public key, client configs unavailable"
				);
				None
			}
		},
		None => {
			warn!("wireguard.endpoint not set, client configs unavailable");
			None
		}
	};

	let settings = ServiceSettings {
		warn_ratio: config.accounting.warn_ratio,
		resume_policy: config.accounting.resume_policy,
		remote_counts_traffic: config.remote.enabled && config.remote.counts_traffic,
		retry: RetryPolicy::from(&config.reconcile),
		server_profile,
	};

	Ok(AppState::new(pool, config.address_pool()?, local, remote, settings))
}
