// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use warden_enforcer::{EnforcerError, FailureReason};
use warden_server_db::DbError;
use warden_wg_common::PeerState;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
	#[error("peer not found: {0}")]
	NotFound(String),

	#[error("a peer named '{0}' already exists")]
	DuplicateName(String),

	#[error("peer {id} cannot go from {from} to {to}")]
	InvalidTransition {
		id: String,
		from: PeerState,
		to: PeerState,
	},

	#[error("no free addresses left in the tunnel network")]
	AddressPoolExhausted,

	#[error("corrupt record for peer {id}: {reason}")]
	Corrupt { id: String, reason: String },

	#[error(transparent)]
	Db(#[from] DbError),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Errors returned to operators by [`crate::facade::CommandFacade`].
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
	#[error("invalid request: {0}")]
	Validation(String),

	#[error("a peer named '{0}' already exists")]
	DuplicateName(String),

	#[error("peer not found: {0}")]
	NotFound(String),

	#[error("local enforcement failed: {0}")]
	LocalEnforcement(String),

	#[error("remote node unreachable: {0}")]
	RemoteUnreachable(String),

	#[error("remote node is not configured")]
	RemoteDisabled,

	#[error("failed to read counters: {0}")]
	CounterRead(String),

	#[error("client config unavailable: {0}")]
	ClientConfigUnavailable(String),

	#[error(transparent)]
	Store(StoreError),
}

impl From<StoreError> for CommandError {
	fn from(err: StoreError) -> Self {
		match err {
			StoreError::NotFound(id) => CommandError::NotFound(id),
			StoreError::DuplicateName(name) => CommandError::DuplicateName(name),
			StoreError::InvalidTransition { id, from, to } => {
				CommandError::Validation(format!("peer {id} cannot go from {from} to {to}"))
			}
			other => CommandError::Store(other),
		}
	}
}

impl From<FailureReason> for CommandError {
	fn from(reason: FailureReason) -> Self {
		CommandError::LocalEnforcement(reason.to_string())
	}
}

impl From<EnforcerError> for CommandError {
	fn from(err: EnforcerError) -> Self {
		CommandError::LocalEnforcement(err.to_string())
	}
}

pub type Result<T> = std::result::Result<T, CommandError>;
