// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use serde::{Deserialize, Serialize};
use std::time::Duration;

pub use warden_server_db::{JobDefinition, JobRun, JobStatus, TriggerSource};

#[derive(Debug, Clone)]
pub enum JobType {
	Periodic { interval: Duration },
	OneShot,
}

impl JobType {
	pub fn as_str(&self) -> &'static str {
		match self {
			JobType::Periodic { .. } => "periodic",
			JobType::OneShot => "one_shot",
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobOutput {
	pub message: String,
	pub metadata: Option<serde_json::Value>,
}

impl JobOutput {
	pub fn new(message: impl Into<String>) -> Self {
		Self {
			message: message.into(),
			metadata: None,
		}
	}

	pub fn with_metadata(message: impl Into<String>, metadata: serde_json::Value) -> Self {
		Self {
			message: message.into(),
			metadata: Some(metadata),
		}
	}
}
