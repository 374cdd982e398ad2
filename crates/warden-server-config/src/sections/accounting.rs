// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Traffic accounting and quota policy.

use serde::Deserialize;
use std::time::Duration;
use warden_wg_common::ResumePolicy;

use super::merge_option;

#[derive(Debug, Clone, PartialEq)]
pub struct AccountingConfig {
	pub interval: Duration,
	/// Fraction of the quota at which a one-time warning is emitted.
	pub warn_ratio: f64,
	pub resume_policy: ResumePolicy,
	/// Reset every peer's usage on the first day of each month.
	pub monthly_reset: bool,
}

impl Default for AccountingConfig {
	fn default() -> Self {
		AccountingConfigLayer::default().finalize()
	}
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AccountingConfigLayer {
	#[serde(default)]
	pub interval_secs: Option<u64>,
	#[serde(default)]
	pub warn_ratio: Option<f64>,
	#[serde(default)]
	pub resume_policy: Option<ResumePolicy>,
	#[serde(default)]
	pub monthly_reset: Option<bool>,
}

impl AccountingConfigLayer {
	pub fn merge(&mut self, other: AccountingConfigLayer) {
		merge_option(&mut self.interval_secs, other.interval_secs);
		merge_option(&mut self.warn_ratio, other.warn_ratio);
		merge_option(&mut self.resume_policy, other.resume_policy);
		merge_option(&mut self.monthly_reset, other.monthly_reset);
	}

	pub fn finalize(self) -> AccountingConfig {
		AccountingConfig {
			interval: Duration::from_secs(self.interval_secs.unwrap_or(60).max(1)),
			warn_ratio: self.warn_ratio.unwrap_or(0.8),
			resume_policy: self.resume_policy.unwrap_or_default(),
			monthly_reset: self.monthly_reset.unwrap_or(true),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_defaults() {
		let config = AccountingConfig::default();
		assert_eq!(config.interval, Duration::from_secs(60));
		assert_eq!(config.warn_ratio, 0.8);
		assert_eq!(config.resume_policy, ResumePolicy::ResetUsage);
		assert!(config.monthly_reset);
	}

	#[test]
	fn test_zero_interval_is_clamped() {
		let config = AccountingConfigLayer {
			interval_secs: Some(0),
			..Default::default()
		}
		.finalize();
		assert_eq!(config.interval, Duration::from_secs(1));
	}

	#[test]
	fn test_from_toml() {
		let layer: AccountingConfigLayer = toml::from_str(
			r#"
interval_secs = 30
resume_policy = "keep_usage"
"#,
		)
		.unwrap();
		let config = layer.finalize();
		assert_eq!(config.interval, Duration::from_secs(30));
		assert_eq!(config.resume_policy, ResumePolicy::KeepUsage);
	}
}
