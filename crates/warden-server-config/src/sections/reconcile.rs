// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use serde::Deserialize;
use std::time::Duration;

use super::merge_option;

#[derive(Debug, Clone, PartialEq)]
pub struct ReconcileConfig {
	pub interval: Duration,
	/// Remote attempts after the first batch before a peer is Degraded.
	pub max_retries: u32,
	pub base_backoff: Duration,
	pub max_backoff: Duration,
}

impl Default for ReconcileConfig {
	fn default() -> Self {
		ReconcileConfigLayer::default().finalize()
	}
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReconcileConfigLayer {
	#[serde(default)]
	pub interval_secs: Option<u64>,
	#[serde(default)]
	pub max_retries: Option<u32>,
	#[serde(default)]
	pub base_backoff_ms: Option<u64>,
	#[serde(default)]
	pub max_backoff_ms: Option<u64>,
}

impl ReconcileConfigLayer {
	pub fn merge(&mut self, other: ReconcileConfigLayer) {
		merge_option(&mut self.interval_secs, other.interval_secs);
		merge_option(&mut self.max_retries, other.max_retries);
		merge_option(&mut self.base_backoff_ms, other.base_backoff_ms);
		merge_option(&mut self.max_backoff_ms, other.max_backoff_ms);
	}

	pub fn finalize(self) -> ReconcileConfig {
		let base_backoff = Duration::from_millis(self.base_backoff_ms.unwrap_or(1_000));
		let max_backoff = Duration::from_millis(self.max_backoff_ms.unwrap_or(30_000));
		ReconcileConfig {
			interval: Duration::from_secs(self.interval_secs.unwrap_or(300).max(1)),
			max_retries: self.max_retries.unwrap_or(3),
			base_backoff,
			max_backoff: max_backoff.max(base_backoff),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_defaults() {
		let config = ReconcileConfig::default();
		assert_eq!(config.interval, Duration::from_secs(300));
		assert_eq!(config.max_retries, 3);
		assert_eq!(config.base_backoff, Duration::from_secs(1));
		assert_eq!(config.max_backoff, Duration::from_secs(30));
	}

	#[test]
	fn test_cap_never_below_base() {
		let config = ReconcileConfigLayer {
			base_backoff_ms: Some(5_000),
			max_backoff_ms: Some(100),
			..Default::default()
		}
		.finalize();
		assert_eq!(config.max_backoff, Duration::from_secs(5));
	}
}
