// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Enforcement points for warden peers.
//!
//! An enforcer converges one WireGuard interface (and, in firewall mode, its
//! FORWARD rules) to the desired peer set. The same [`WgEnforcer`] drives the
//! local node through [`LocalExecutor`] and the remote node through
//! [`SshExecutor`]; anything implementing [`CommandExecutor`] can stand in.

pub mod command;
pub mod dump;
pub mod enforcer;
pub mod error;
pub mod executor;
pub mod ssh;
pub mod testing;

pub use command::{Invocation, WgCommand};
pub use dump::{parse_dump, InterfaceDump, LivePeer};
pub use enforcer::{
	DesiredPeer, Enforcer, PeerCounters, PeerOutcome, ReconcileReport, WgEnforcer,
};
pub use error::{DumpError, EnforcerError, ExecError, FailureReason, Result};
pub use executor::{CommandExecutor, ExecOutput, LocalExecutor};
pub use ssh::{shell_quote, SshExecutor, SshTarget};
