// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Warden control plane binary.

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use warden_server::jobs::{
	JobHistoryCleanupJob, MonthlyUsageResetJob, ReconciliationJob, TrafficAccountingJob,
};
use warden_server::{create_app_state, AppState, CommandFacade, EventBus, PeerEvent, TunnelTarget};
use warden_server_config::{LogFormat, ServerConfig};
use warden_server_db::{create_pool, run_migrations, JobRepository};
use warden_server_jobs::{JobScheduler, PeriodicSchedule};
use warden_wg_common::{format_bytes, parse_byte_size, PeerSummary};

const USAGE_RESET_CHECK_INTERVAL: Duration = Duration::from_secs(60 * 60);
const JOB_HISTORY_CLEANUP_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Warden - WireGuard peer control plane.
#[derive(Parser, Debug)]
#[command(name = "warden", about = "WireGuard peer control plane", version)]
struct Args {
	/// Config file (defaults to /etc/warden/warden.toml)
	#[arg(long, global = true, env = "WARDEN_CONFIG")]
	config: Option<PathBuf>,

	#[command(subcommand)]
	command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
	/// Run accounting, reconciliation and maintenance jobs until interrupted
	Serve,
	/// Manage peers
	#[command(subcommand)]
	Peer(PeerCommand),
	/// Manage the tunnel interfaces
	#[command(subcommand)]
	Tunnel(TunnelCommand),
	/// Show version and build information
	Version,
}

#[derive(Subcommand, Debug)]
enum PeerCommand {
	/// Create a peer and print its client configuration
	Create {
		name: String,
		/// Traffic quota, e.g. 10GB or 500MiB
		#[arg(long)]
		quota: Option<String>,
	},
	/// Delete a peer from both nodes
	Delete { name: String },
	/// Suspend a peer until resumed
	Suspend { name: String },
	/// Resume a suspended peer
	Resume { name: String },
	/// Show one peer
	Show {
		name: String,
		#[arg(long)]
		json: bool,
	},
	/// Print a peer's client configuration
	Config { name: String },
	/// List peers
	List {
		#[arg(long)]
		json: bool,
	},
	/// Set a peer's quota, or `unlimited`
	Quota { name: String, quota: String },
	/// Zero a peer's usage
	Reset { name: String },
	/// Show daily usage
	History {
		name: String,
		#[arg(long, default_value_t = 7)]
		days: u32,
	},
}

#[derive(Subcommand, Debug)]
enum TunnelCommand {
	/// Restart the tunnel interface and re-apply peers
	Restart {
		#[arg(value_enum)]
		target: NodeArg,
	},
	/// Show what each node's interface currently reports
	Status {
		#[arg(value_enum, default_value_t = NodeArg::All)]
		target: NodeArg,
		#[arg(long)]
		json: bool,
	},
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum NodeArg {
	Local,
	Remote,
	All,
}

impl From<NodeArg> for TunnelTarget {
	fn from(target: NodeArg) -> Self {
		match target {
			NodeArg::Local => TunnelTarget::Local,
			NodeArg::Remote => TunnelTarget::Remote,
			NodeArg::All => TunnelTarget::All,
		}
	}
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	let args = Args::parse();

	if let Command::Version = args.command {
		println!("{}", warden_server::version::format_version_info());
		return Ok(());
	}

	dotenvy::dotenv().ok();

	let config = match &args.config {
		Some(path) => warden_server_config::load_config_with_file(path)?,
		None => warden_server_config::load_config()?,
	};
	init_tracing(&config);

	let pool = create_pool(&config.database.url)
		.await
		.with_context(|| format!("opening database {}", config.database.url))?;
	run_migrations(&pool).await?;

	let state = create_app_state(&config, pool.clone()).await?;

	match args.command {
		Command::Serve => serve(&config, state, pool).await,
		Command::Peer(command) => {
			let result = run_peer_command(&state.facade(), command).await;
			state.remote_sync.wait_idle().await;
			result
		}
		Command::Tunnel(TunnelCommand::Restart { target }) => {
			let report = state.facade().restart_tunnel(target.into()).await;
			state.remote_sync.wait_idle().await;
			let report = report?;
			if let Some(local) = &report.local {
				println!("local:  {local}");
			}
			if let Some(remote) = &report.remote {
				println!("remote: {remote}");
			}
			if !report.is_ok() {
				std::process::exit(1);
			}
			Ok(())
		}
		Command::Tunnel(TunnelCommand::Status { target, json }) => {
			let report = state.facade().tunnel_status(target.into()).await?;
			if json {
				println!("{}", serde_json::to_string_pretty(&report)?);
			} else {
				if let Some(local) = &report.local {
					println!("local:  {local}");
				}
				if let Some(remote) = &report.remote {
					println!("remote: {remote}");
				}
			}
			if !report.is_up() {
				std::process::exit(1);
			}
			Ok(())
		}
		Command::Version => Ok(()),
	}
}

fn init_tracing(config: &ServerConfig) {
	let filter = tracing_subscriber::EnvFilter::try_from_default_env()
		.unwrap_or_else(|_| config.logging.level.clone().into());

	let (text, json) = match config.logging.format {
		LogFormat::Text => (
			Some(tracing_subscriber::fmt::layer().with_writer(std::io::stderr)),
			None,
		),
		LogFormat::Json => (
			None,
			Some(
				tracing_subscriber::fmt::layer()
					.json()
					.with_writer(std::io::stderr),
			),
		),
	};

	tracing_subscriber::registry()
		.with(filter)
		.with(text)
		.with(json)
		.init();
}

async fn serve(
	config: &ServerConfig,
	state: AppState,
	pool: warden_server_db::SqlitePool,
) -> anyhow::Result<()> {
	tracing::info!(
		interface = %config.wireguard.interface,
		remote = config.remote.enabled,
		database = %config.database.url,
		"starting warden"
	);

	let job_repo = Arc::new(JobRepository::new(pool));
	let mut scheduler = JobScheduler::new(job_repo.clone());

	scheduler.register_periodic(
		Arc::new(TrafficAccountingJob::new(state.accountant())),
		PeriodicSchedule::every(config.accounting.interval),
	);

	// Converge both nodes right away: a restart may have wiped the interfaces.
	scheduler.register_periodic(
		Arc::new(ReconciliationJob::new(state.reconciler())),
		PeriodicSchedule::every(config.reconcile.interval).immediately(),
	);

	if config.accounting.monthly_reset {
		scheduler.register_periodic(
			Arc::new(MonthlyUsageResetJob::new(state.store.clone(), state.facade())),
			PeriodicSchedule::every(USAGE_RESET_CHECK_INTERVAL).immediately(),
		);
	}

	scheduler.register_periodic(
		Arc::new(JobHistoryCleanupJob::new(
			job_repo,
			state.store.clone(),
			config.jobs.history_retention_days,
		)),
		PeriodicSchedule::every(JOB_HISTORY_CLEANUP_INTERVAL),
	);

	let event_logger = tokio::spawn(log_events(state.events.clone()));

	scheduler.start().await?;
	tracing::info!("warden running");

	tokio::signal::ctrl_c().await?;
	tracing::info!("shutdown signal received");

	scheduler.shutdown().await;
	state.remote_sync.shutdown().await;
	event_logger.abort();

	tracing::info!("warden stopped");
	Ok(())
}

async fn log_events(events: EventBus) {
	let mut rx = events.subscribe();
	loop {
		match rx.recv().await {
			Ok(event) => match &event {
				PeerEvent::QuotaWarning {
					name,
					used_bytes,
					quota_bytes,
					..
				} => tracing::warn!(
					kind = event.kind(),
					peer = %name,
					used = %format_bytes(*used_bytes),
					quota = %format_bytes(*quota_bytes),
					"peer nearing quota"
				),
				PeerEvent::QuotaExceeded {
					name,
					used_bytes,
					quota_bytes,
					..
				} => tracing::warn!(
					kind = event.kind(),
					peer = %name,
					used = %format_bytes(*used_bytes),
					quota = %format_bytes(*quota_bytes),
					"peer suspended over quota"
				),
				PeerEvent::RemoteDegraded { name, reason, .. } => tracing::error!(
					kind = event.kind(),
					peer = %name,
					%reason,
					"remote node could not apply peer"
				),
			},
			Err(RecvError::Lagged(skipped)) => {
				tracing::warn!(skipped, "event logger fell behind");
			}
			Err(RecvError::Closed) => break,
		}
	}
}

async fn run_peer_command(facade: &CommandFacade, command: PeerCommand) -> anyhow::Result<()> {
	match command {
		PeerCommand::Create { name, quota } => {
			let quota = quota.as_deref().map(parse_byte_size).transpose()?;
			let created = facade.create_peer(&name, quota).await?;
			eprintln!(
				"created peer {} ({}) at {}, remote: {}",
				created.name,
				created.public_key,
				created.address,
				created.remote_status.as_str()
			);
			match &created.client_config {
				Some(config) => print!("{}", config.as_str()),
				None => {
					if let Some(private_key) = &created.private_key {
						println!("PrivateKey = {}", private_key.to_base64().as_str());
					}
					println!("PresharedKey = {}", created.preshared_key.to_base64().as_str());
					println!("Address = {}/32", created.address);
				}
			}
		}
		PeerCommand::Delete { name } => {
			let id = facade.resolve(&name).await?;
			facade.delete_peer(&id).await?;
			println!("deleted {name}");
		}
		PeerCommand::Suspend { name } => {
			let id = facade.resolve(&name).await?;
			print_peer(&facade.suspend_peer(&id).await?);
		}
		PeerCommand::Resume { name } => {
			let id = facade.resolve(&name).await?;
			print_peer(&facade.resume_peer(&id).await?);
		}
		PeerCommand::Show { name, json } => {
			let id = facade.resolve(&name).await?;
			let peer = facade.get_peer(&id).await?;
			if json {
				println!("{}", serde_json::to_string_pretty(&peer)?);
			} else {
				print_peer(&peer);
			}
		}
		PeerCommand::Config { name } => {
			let id = facade.resolve(&name).await?;
			print!("{}", facade.client_config(&id).await?.as_str());
		}
		PeerCommand::List { json } => {
			let peers = facade.list_peers().await?;
			if json {
				println!("{}", serde_json::to_string_pretty(&peers)?);
			} else {
				println!(
					"{:<20} {:<15} {:<16} {:>12} {:>12} {:<9}",
					"NAME", "ADDRESS", "STATE", "USED", "QUOTA", "REMOTE"
				);
				for peer in &peers {
					println!(
						"{:<20} {:<15} {:<16} {:>12} {:>12} {:<9}",
						peer.name,
						peer.address,
						peer.state.as_str(),
						format_bytes(peer.used_bytes),
						format_quota(peer.quota_bytes),
						peer.remote_status.as_str()
					);
				}
			}
		}
		PeerCommand::Quota { name, quota } => {
			let quota = if quota.eq_ignore_ascii_case("unlimited") {
				None
			} else {
				Some(parse_byte_size(&quota)?)
			};
			let id = facade.resolve(&name).await?;
			print_peer(&facade.set_quota(&id, quota).await?);
		}
		PeerCommand::Reset { name } => {
			let id = facade.resolve(&name).await?;
			let previous = facade.reset_usage(&id).await?;
			println!("reset {name} (was {})", format_bytes(previous));
		}
		PeerCommand::History { name, days } => {
			let id = facade.resolve(&name).await?;
			for day in facade.usage_history(&id, days).await? {
				println!("{}  {:>12}", day.day, format_bytes(day.bytes));
			}
		}
	}
	Ok(())
}

fn format_quota(quota: Option<u64>) -> String {
	quota.map_or_else(|| "unlimited".to_string(), format_bytes)
}

fn print_peer(peer: &PeerSummary) {
	println!("name:        {}", peer.name);
	println!("public key:  {}", peer.id);
	println!("address:     {}", peer.address);
	println!("state:       {}", peer.state.as_str());
	println!(
		"usage:       {} / {}",
		format_bytes(peer.used_bytes),
		format_quota(peer.quota_bytes)
	);
	println!("remote:      {}", peer.remote_status.as_str());
	match peer.last_handshake {
		Some(at) => println!("handshake:   {}", at.to_rfc3339()),
		None => println!("handshake:   never"),
	}
}
