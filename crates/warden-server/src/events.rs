// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Notifications for whoever reports to operators.

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::trace;
use warden_wg_common::PeerId;

const EVENT_BUS_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PeerEvent {
	QuotaWarning {
		peer_id: PeerId,
		name: String,
		used_bytes: u64,
		quota_bytes: u64,
	},
	QuotaExceeded {
		peer_id: PeerId,
		name: String,
		used_bytes: u64,
		quota_bytes: u64,
	},
	RemoteDegraded {
		peer_id: PeerId,
		name: String,
		reason: String,
	},
}

impl PeerEvent {
	pub fn peer_id(&self) -> &PeerId {
		match self {
			PeerEvent::QuotaWarning { peer_id, .. }
			| PeerEvent::QuotaExceeded { peer_id, .. }
			| PeerEvent::RemoteDegraded { peer_id, .. } => peer_id,
		}
	}

	pub fn kind(&self) -> &'static str {
		match self {
			PeerEvent::QuotaWarning { .. } => "quota_warning",
			PeerEvent::QuotaExceeded { .. } => "quota_exceeded",
			PeerEvent::RemoteDegraded { .. } => "remote_degraded",
		}
	}
}

/// Fan-out of [`PeerEvent`]s. Publishing never blocks and never fails; a
/// subscriber that falls behind loses the oldest events.
#[derive(Clone)]
pub struct EventBus {
	sender: broadcast::Sender<PeerEvent>,
}

impl Default for EventBus {
	fn default() -> Self {
		Self::new()
	}
}

impl EventBus {
	pub fn new() -> Self {
		let (sender, _) = broadcast::channel(EVENT_BUS_CAPACITY);
		Self { sender }
	}

	pub fn subscribe(&self) -> broadcast::Receiver<PeerEvent> {
		self.sender.subscribe()
	}

	pub fn publish(&self, event: PeerEvent) {
		trace!(kind = event.kind(), peer_id = %event.peer_id().short(), "publishing event");
		// No subscribers is fine.
		let _ = self.sender.send(event);
	}
}
