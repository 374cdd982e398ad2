// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use ipnet::Ipv4Net;
use std::collections::HashSet;
use std::net::Ipv4Addr;
use thiserror::Error;

pub const DEFAULT_NETWORK: &str = "10.20.30.0/24";

/// Hosts below this offset are reserved for the nodes themselves
/// (.1 is the local node, .2 the remote node).
pub const DEFAULT_FIRST_HOST: u32 = 10;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum IpError {
	#[error("IP address pool exhausted")]
	PoolExhausted,

	#[error("invalid IPv4 network: {0}")]
	InvalidNetwork(String),

	#[error("first host offset {0} is outside the network")]
	InvalidFirstHost(u32),
}

pub type Result<T> = std::result::Result<T, IpError>;

/// Allocates client tunnel addresses from a fixed IPv4 network.
///
/// The pool keeps no state of its own: callers pass the addresses already in
/// use, so the database remains the only record of assignments.
#[derive(Debug, Clone)]
pub struct AddressPool {
	network: Ipv4Net,
	first_host: u32,
}

impl AddressPool {
	pub fn new(network: Ipv4Net, first_host: u32) -> Result<Self> {
		let network = network.trunc();
		let size = 1u64 << (32 - network.prefix_len());
		if first_host == 0 || u64::from(first_host) >= size.saturating_sub(1) {
			return Err(IpError::InvalidFirstHost(first_host));
		}
		Ok(Self {
			network,
			first_host,
		})
	}

	pub fn parse(network: &str, first_host: u32) -> Result<Self> {
		let network: Ipv4Net = network
			.parse()
			.map_err(|_| IpError::InvalidNetwork(network.to_string()))?;
		Self::new(network, first_host)
	}

	pub fn network(&self) -> Ipv4Net {
		self.network
	}

	/// Lowest free address at or above the first host, excluding broadcast.
	pub fn allocate(&self, in_use: &HashSet<Ipv4Addr>) -> Result<Ipv4Addr> {
		let base = u32::from(self.network.network());
		let broadcast = u32::from(self.network.broadcast());

		(base + self.first_host..broadcast)
			.map(Ipv4Addr::from)
			.find(|addr| !in_use.contains(addr))
			.ok_or(IpError::PoolExhausted)
	}

	pub fn contains(&self, addr: Ipv4Addr) -> bool {
		self.network.contains(&addr)
	}
}

impl Default for AddressPool {
	fn default() -> Self {
		Self {
			network: Ipv4Net::new(Ipv4Addr::new(10, 20, 30, 0), 24)
				.unwrap_or_default(),
			first_host: DEFAULT_FIRST_HOST,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn allocates_from_first_host() {
		let pool = AddressPool::parse(DEFAULT_NETWORK, 10).unwrap();
		let addr = pool.allocate(&HashSet::new()).unwrap();
		assert_eq!(addr, Ipv4Addr::new(10, 20, 30, 10));
	}

	#[test]
	fn reuses_lowest_gap() {
		let pool = AddressPool::parse(DEFAULT_NETWORK, 10).unwrap();
		let in_use: HashSet<_> = [10, 11, 13]
			.into_iter()
			.map(|h| Ipv4Addr::new(10, 20, 30, h))
			.collect();
		assert_eq!(pool.allocate(&in_use).unwrap(), Ipv4Addr::new(10, 20, 30, 12));
	}

	#[test]
	fn never_hands_out_broadcast() {
		let pool = AddressPool::parse("10.0.0.0/29", 5).unwrap();
		let mut in_use = HashSet::new();
		in_use.insert(pool.allocate(&in_use).unwrap());
		in_use.insert(pool.allocate(&in_use).unwrap());
		assert_eq!(pool.allocate(&in_use), Err(IpError::PoolExhausted));
		assert!(!in_use.contains(&Ipv4Addr::new(10, 0, 0, 7)));
	}

	#[test]
	fn normalizes_host_bits() {
		let pool = AddressPool::parse("10.20.30.1/24", 10).unwrap();
		assert_eq!(pool.network().to_string(), "10.20.30.0/24");
	}

	#[test]
	fn rejects_bad_config() {
		assert!(matches!(
			AddressPool::parse("not-a-net", 10),
			Err(IpError::InvalidNetwork(_))
		));
		assert_eq!(
			AddressPool::parse("10.0.0.0/30", 3).unwrap_err(),
			IpError::InvalidFirstHost(3)
		);
	}

	#[test]
	fn default_matches_constants() {
		let pool = AddressPool::default();
		assert_eq!(pool.network().to_string(), DEFAULT_NETWORK);
		assert!(pool.contains(Ipv4Addr::new(10, 20, 30, 200)));
	}
}
