// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use crate::command::Invocation;
use crate::error::ExecError;
use crate::executor::{run_with_timeout, CommandExecutor, ExecOutput};
use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, trace};

/// ssh reserves exit status 255 for its own failures (connection refused,
/// auth failure, host key mismatch).
const SSH_FAILURE_STATUS: i32 = 255;

#[derive(Debug, Clone)]
pub struct SshTarget {
	pub host: String,
	pub user: String,
	pub port: u16,
	pub identity_file: Option<PathBuf>,
	pub connect_timeout: Duration,
	pub command_timeout: Duration,
}

/// Runs commands on the remote node over `ssh`, with key auth only.
#[derive(Debug, Clone)]
pub struct SshExecutor {
	target: SshTarget,
}

impl SshExecutor {
	pub fn new(target: SshTarget) -> Self {
		Self { target }
	}

	pub fn target(&self) -> &SshTarget {
		&self.target
	}

	/// Full argument vector passed to the `ssh` binary.
	pub fn ssh_args(&self, invocation: &Invocation) -> Vec<String> {
		let target = &self.target;
		let mut args = vec![
			"-o".to_string(),
			"BatchMode=yes".to_string(),
			"-o".to_string(),
			format!("ConnectTimeout={}", target.connect_timeout.as_secs().max(1)),
			"-o".to_string(),
			"StrictHostKeyChecking=accept-new".to_string(),
			"-p".to_string(),
			target.port.to_string(),
		];

		if let Some(identity) = &target.identity_file {
			args.push("-i".to_string());
			args.push(identity.display().to_string());
		}

		args.push(format!("{}@{}", target.user, target.host));
		args.push("--".to_string());
		args.push(remote_command_line(invocation));
		args
	}
}

fn remote_command_line(invocation: &Invocation) -> String {
	std::iter::once(invocation.program)
		.chain(invocation.args.iter().map(String::as_str))
		.map(shell_quote)
		.collect::<Vec<_>>()
		.join(" ")
}

/// Quotes `arg` for a POSIX shell. Arguments made only of safe characters
/// pass through untouched.
pub fn shell_quote(arg: &str) -> String {
	let safe = !arg.is_empty()
		&& arg
			.chars()
			.all(|c| c.is_ascii_alphanumeric() || "_-./=:@%+,".contains(c));
	if safe {
		arg.to_string()
	} else {
		format!("'{}'", arg.replace('\'', r"'\''"))
	}
}

#[async_trait]
impl CommandExecutor for SshExecutor {
	fn describe(&self) -> String {
		format!("{}@{}:{}", self.target.user, self.target.host, self.target.port)
	}

	async fn execute(&self, invocation: &Invocation) -> Result<ExecOutput, ExecError> {
		let mut cmd = Command::new("ssh");
		cmd.args(self.ssh_args(invocation));
		trace!(host = %self.target.host, cmd = %invocation, "running remote command");

		let output = run_with_timeout(
			cmd,
			"ssh",
			invocation.stdin.as_deref().map(String::as_str),
			self.target.command_timeout,
		)
		.await
		.map_err(|e| match e {
			ExecError::Spawn { .. } | ExecError::Timeout(_) | ExecError::Unreachable(_) => e,
			ExecError::Io(io) => ExecError::Unreachable(io.to_string()),
		})?;

		if output.status == Some(SSH_FAILURE_STATUS) {
			debug!(host = %self.target.host, stderr = %output.stderr, "ssh connection failed");
			return Err(ExecError::Unreachable(output.stderr));
		}
		Ok(output)
	}
}
