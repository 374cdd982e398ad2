// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use serde::{Deserialize, Serialize};
use std::fmt;

/// How a suspended peer is kept off the network.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuspendMode {
	/// Drop the peer from the interface; the store keeps its key material.
	#[default]
	Remove,
	/// Keep the peer configured and DROP its forwarded traffic.
	Firewall,
}

impl SuspendMode {
	pub fn as_str(&self) -> &'static str {
		match self {
			SuspendMode::Remove => "remove",
			SuspendMode::Firewall => "firewall",
		}
	}
}

impl fmt::Display for SuspendMode {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl std::str::FromStr for SuspendMode {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.to_ascii_lowercase().as_str() {
			"remove" => Ok(SuspendMode::Remove),
			"firewall" => Ok(SuspendMode::Firewall),
			_ => Err(format!("unknown suspend mode: {s}")),
		}
	}
}

/// What happens to consumed bytes when a suspended peer is resumed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResumePolicy {
	/// Start a fresh allowance.
	#[default]
	ResetUsage,
	/// Only lift the suspension. Resuming a peer still over quota is refused.
	KeepUsage,
}

impl ResumePolicy {
	pub fn as_str(&self) -> &'static str {
		match self {
			ResumePolicy::ResetUsage => "reset_usage",
			ResumePolicy::KeepUsage => "keep_usage",
		}
	}
}

impl fmt::Display for ResumePolicy {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl std::str::FromStr for ResumePolicy {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.to_ascii_lowercase().replace('-', "_").as_str() {
			"reset_usage" | "reset" => Ok(ResumePolicy::ResetUsage),
			"keep_usage" | "keep" => Ok(ResumePolicy::KeepUsage),
			_ => Err(format!("unknown resume policy: {s}")),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn defaults() {
		assert_eq!(SuspendMode::default(), SuspendMode::Remove);
		assert_eq!(ResumePolicy::default(), ResumePolicy::ResetUsage);
	}

	#[test]
	fn parses_aliases() {
		assert_eq!("Firewall".parse::<SuspendMode>(), Ok(SuspendMode::Firewall));
		assert_eq!("keep-usage".parse::<ResumePolicy>(), Ok(ResumePolicy::KeepUsage));
		assert_eq!("reset".parse::<ResumePolicy>(), Ok(ResumePolicy::ResetUsage));
		assert!("sometimes".parse::<ResumePolicy>().is_err());
	}

	#[test]
	fn serde_uses_snake_case() {
		assert_eq!(
			serde_json::to_string(&ResumePolicy::KeepUsage).unwrap(),
			"\"keep_usage\""
		);
		let mode: SuspendMode = serde_json::from_str("\"firewall\"").unwrap();
		assert_eq!(mode, SuspendMode::Firewall);
	}
}
