// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use crate::command::Invocation;
use crate::error::ExecError;
use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::trace;

pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct ExecOutput {
	/// Exit code, or `None` when the process was killed by a signal.
	pub status: Option<i32>,
	pub stdout: String,
	pub stderr: String,
}

impl ExecOutput {
	pub fn success(&self) -> bool {
		self.status == Some(0)
	}
}

/// Runs an [`Invocation`] somewhere. Implementations own transport and
/// timeouts; a returned [`ExecOutput`] means the command ran to completion,
/// whatever its exit status.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
	/// Short human description of where commands run, for logs.
	fn describe(&self) -> String;

	async fn execute(&self, invocation: &Invocation) -> Result<ExecOutput, ExecError>;
}

/// Runs commands as direct child processes of the server.
#[derive(Debug, Clone)]
pub struct LocalExecutor {
	timeout: Duration,
}

impl LocalExecutor {
	pub fn new(timeout: Duration) -> Self {
		Self { timeout }
	}
}

impl Default for LocalExecutor {
	fn default() -> Self {
		Self::new(DEFAULT_COMMAND_TIMEOUT)
	}
}

#[async_trait]
impl CommandExecutor for LocalExecutor {
	fn describe(&self) -> String {
		"local".to_string()
	}

	async fn execute(&self, invocation: &Invocation) -> Result<ExecOutput, ExecError> {
		let mut cmd = Command::new(invocation.program);
		cmd.args(&invocation.args);
		trace!(cmd = %invocation, "running local command");
		run_with_timeout(cmd, invocation.program, invocation.stdin.as_deref().map(String::as_str), self.timeout).await
	}
}

/// Spawns `cmd`, feeds `stdin`, and waits at most `timeout`. The child is
/// killed if the wait is abandoned.
pub(crate) async fn run_with_timeout(
	mut cmd: Command,
	program: &str,
	stdin: Option<&str>,
	timeout: Duration,
) -> Result<ExecOutput, ExecError> {
	cmd.stdin(if stdin.is_some() {
		Stdio::piped()
	} else {
		Stdio::null()
	})
	.stdout(Stdio::piped())
	.stderr(Stdio::piped())
	.kill_on_drop(true);

	let mut child = cmd.spawn().map_err(|source| ExecError::Spawn {
		program: program.to_string(),
		source,
	})?;

	let run = async move {
		if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
			pipe.write_all(input.as_bytes()).await?;
			pipe.shutdown().await?;
		}
		child.wait_with_output().await
	};

	let output = tokio::time::timeout(timeout, run)
		.await
		.map_err(|_| ExecError::Timeout(timeout))??;

	Ok(ExecOutput {
		status: output.status.code(),
		stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
		stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
	})
}
