// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use serde::Deserialize;

use crate::sections::{
	AccountingConfigLayer, DatabaseConfigLayer, JobsConfigLayer, LoggingConfigLayer,
	ReconcileConfigLayer, RemoteConfigLayer, WireguardConfigLayer,
};

/// One source's view of the configuration. Every section is optional so
/// that later sources only override what they set.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServerConfigLayer {
	#[serde(default)]
	pub database: Option<DatabaseConfigLayer>,
	#[serde(default)]
	pub logging: Option<LoggingConfigLayer>,
	#[serde(default)]
	pub wireguard: Option<WireguardConfigLayer>,
	#[serde(default)]
	pub remote: Option<RemoteConfigLayer>,
	#[serde(default)]
	pub accounting: Option<AccountingConfigLayer>,
	#[serde(default)]
	pub reconcile: Option<ReconcileConfigLayer>,
	#[serde(default)]
	pub jobs: Option<JobsConfigLayer>,
}

macro_rules! merge_section {
	($self:ident, $other:ident, $field:ident) => {
		if let Some(next) = $other.$field {
			$self.$field.get_or_insert_with(Default::default).merge(next);
		}
	};
}

impl ServerConfigLayer {
	pub fn merge(&mut self, other: ServerConfigLayer) {
		merge_section!(self, other, database);
		merge_section!(self, other, logging);
		merge_section!(self, other, wireguard);
		merge_section!(self, other, remote);
		merge_section!(self, other, accounting);
		merge_section!(self, other, reconcile);
		merge_section!(self, other, jobs);
	}
}
