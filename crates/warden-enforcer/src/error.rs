// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use serde::Serialize;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Failure to get a command to run to completion at all.
#[derive(Debug, Error)]
pub enum ExecError {
	#[error("failed to spawn {program}: {source}")]
	Spawn {
		program: String,
		#[source]
		source: std::io::Error,
	},

	#[error("command timed out after {0:?}")]
	Timeout(Duration),

	#[error("host unreachable: {0}")]
	Unreachable(String),

	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum DumpError {
	#[error("malformed dump line {line}: {reason}")]
	Malformed { line: usize, reason: String },
}

#[derive(Debug, Error)]
pub enum EnforcerError {
	#[error(transparent)]
	Exec(#[from] ExecError),

	#[error("`{command}` exited with status {status}: {stderr}")]
	CommandFailed {
		command: String,
		status: i32,
		stderr: String,
	},

	#[error("failed to parse interface dump: {0}")]
	Dump(#[from] DumpError),
}

impl EnforcerError {
	/// True when the node could not be reached, as opposed to the node
	/// refusing a command.
	pub fn is_unreachable(&self) -> bool {
		matches!(self, EnforcerError::Exec(_))
	}

	pub fn failure_reason(&self) -> FailureReason {
		if self.is_unreachable() {
			FailureReason::Unreachable(self.to_string())
		} else {
			FailureReason::Rejected(self.to_string())
		}
	}
}

/// Why a single peer could not be applied on a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum FailureReason {
	Unreachable(String),
	Rejected(String),
}

impl FailureReason {
	pub fn is_unreachable(&self) -> bool {
		matches!(self, FailureReason::Unreachable(_))
	}
}

impl fmt::Display for FailureReason {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			FailureReason::Unreachable(detail) => write!(f, "unreachable: {detail}"),
			FailureReason::Rejected(detail) => write!(f, "rejected: {detail}"),
		}
	}
}

pub type Result<T> = std::result::Result<T, EnforcerError>;
