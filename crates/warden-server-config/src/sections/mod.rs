// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

mod accounting;
mod database;
mod jobs;
mod logging;
mod reconcile;
mod remote;
mod wireguard;

pub use accounting::{AccountingConfig, AccountingConfigLayer};
pub use database::{DatabaseConfig, DatabaseConfigLayer};
pub use jobs::{JobsConfig, JobsConfigLayer};
pub use logging::{LogFormat, LoggingConfig, LoggingConfigLayer};
pub use reconcile::{ReconcileConfig, ReconcileConfigLayer};
pub use remote::{RemoteConfig, RemoteConfigLayer};
pub use wireguard::{WireguardConfig, WireguardConfigLayer, DEFAULT_INTERFACE};

/// Overwrites `target` when `other` carries a value.
pub(crate) fn merge_option<T>(target: &mut Option<T>, other: Option<T>) {
	if other.is_some() {
		*target = other;
	}
}
