// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Per-peer operation ordering.
//!
//! Each peer has one FIFO lock per node. Work that touches a peer's live
//! configuration on a node holds that node's lock for the peer, so operations
//! on one peer apply in arrival order while distinct peers run in parallel.
//! Remote work only ever takes remote locks, which keeps a slow remote node
//! from stalling local commands.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use warden_wg_common::{Node, PeerId};

pub type PeerGuard = OwnedMutexGuard<()>;

#[derive(Clone, Default)]
pub struct PeerSequencer {
	locks: Arc<Mutex<HashMap<(Node, PeerId), Arc<AsyncMutex<()>>>>>,
}

impl PeerSequencer {
	pub fn new() -> Self {
		Self::default()
	}

	fn slot(&self, node: Node, id: PeerId) -> Arc<AsyncMutex<()>> {
		let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
		locks.entry((node, id)).or_default().clone()
	}

	/// Waits for this peer's turn on `node`.
	pub async fn lock(&self, node: Node, id: PeerId) -> PeerGuard {
		self.slot(node, id).lock_owned().await
	}

	/// Locks several peers on one node. Locks are taken in sorted id order so
	/// two callers locking overlapping sets cannot deadlock.
	pub async fn lock_many(&self, node: Node, ids: &[PeerId]) -> Vec<PeerGuard> {
		let mut ids = ids.to_vec();
		ids.sort();
		ids.dedup();

		let mut guards = Vec::with_capacity(ids.len());
		for id in ids {
			guards.push(self.lock(node, id).await);
		}
		guards
	}

	/// Drops the lock slots of a purged peer once nobody holds or waits on
	/// them.
	pub fn forget(&self, id: &PeerId) {
		let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
		for node in [Node::Local, Node::Remote] {
			if locks
				.get(&(node, *id))
				.is_some_and(|slot| Arc::strong_count(slot) == 1)
			{
				locks.remove(&(node, *id));
			}
		}
	}

	pub fn tracked(&self) -> usize {
		self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::time::Duration;
	use warden_wg_common::WgKeyPair;

	fn id() -> PeerId {
		*WgKeyPair::generate().public_key()
	}

	#[tokio::test]
	async fn same_peer_is_serialized_in_order() {
		let sequencer = PeerSequencer::new();
		let peer = id();
		let order = Arc::new(Mutex::new(Vec::new()));

		let first = sequencer.lock(Node::Local, peer).await;
		let mut handles = Vec::new();
		for n in 0..3 {
			let sequencer = sequencer.clone();
			let order = order.clone();
			handles.push(tokio::spawn(async move {
				let _guard = sequencer.lock(Node::Local, peer).await;
				order.lock().unwrap().push(n);
			}));
			// Let each task queue up before the next one.
			tokio::time::sleep(Duration::from_millis(5)).await;
		}
		drop(first);
		for handle in handles {
			handle.await.unwrap();
		}

		assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
	}

	#[tokio::test]
	async fn nodes_and_peers_do_not_block_each_other() {
		let sequencer = PeerSequencer::new();
		let a = id();
		let b = id();

		let _remote = sequencer.lock(Node::Remote, a).await;
		let local = tokio::time::timeout(Duration::from_millis(50), sequencer.lock(Node::Local, a)).await;
		assert!(local.is_ok());
		let other = tokio::time::timeout(Duration::from_millis(50), sequencer.lock(Node::Remote, b)).await;
		assert!(other.is_ok());
	}

	#[tokio::test]
	async fn lock_many_dedups_and_forget_cleans_up() {
		let sequencer = PeerSequencer::new();
		let a = id();
		let b = id();

		let guards = sequencer.lock_many(Node::Local, &[b, a, b]).await;
		assert_eq!(guards.len(), 2);

		sequencer.forget(&a);
		assert_eq!(sequencer.tracked(), 2);

		drop(guards);
		sequencer.forget(&a);
		sequencer.forget(&b);
		assert_eq!(sequencer.tracked(), 0);
	}
}
