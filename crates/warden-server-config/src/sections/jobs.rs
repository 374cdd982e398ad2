// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Jobs configuration section.

use serde::Deserialize;

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct JobsConfigLayer {
	pub history_retention_days: Option<u32>,
}

impl JobsConfigLayer {
	pub fn merge(&mut self, other: Self) {
		if other.history_retention_days.is_some() {
			self.history_retention_days = other.history_retention_days;
		}
	}

	pub fn finalize(self) -> JobsConfig {
		JobsConfig {
			history_retention_days: self.history_retention_days.unwrap_or(30),
		}
	}
}

#[derive(Debug, Clone, PartialEq)]
pub struct JobsConfig {
	pub history_retention_days: u32,
}

impl Default for JobsConfig {
	fn default() -> Self {
		Self {
			history_retention_days: 30,
		}
	}
}
