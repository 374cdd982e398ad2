// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Warden control plane.
//!
//! Owns the peer store and keeps a local and an optional remote WireGuard
//! node converged to it: per-peer command sequencing, traffic accounting
//! with quota enforcement, background reconciliation and the operator
//! commands the `warden` binary exposes.

pub mod accountant;
pub mod error;
pub mod events;
pub mod facade;
pub mod jobs;
pub mod reconciler;
pub mod remote_sync;
pub mod sequencer;
pub mod state;
pub mod store;
pub mod testing;
pub mod version;

pub use accountant::{AccountingSummary, TrafficAccountant};
pub use error::{CommandError, StoreError};
pub use events::{EventBus, PeerEvent};
pub use facade::{
	CommandFacade, CreatedPeer, InterfaceStatus, NodeStatus, RestartOutcome, RestartReport,
	TunnelStatusReport, TunnelTarget,
};
pub use reconciler::{FullPassReport, Reconciler};
pub use remote_sync::{RemoteSync, RemoteSyncReport, RetryPolicy};
pub use sequencer::PeerSequencer;
pub use state::{create_app_state, AppState, ServiceSettings};
pub use store::{PeerStore, ResetReason};
pub use warden_server_config::ServerConfig;
