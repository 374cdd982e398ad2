// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

pub mod client_config;
pub mod ip;
pub mod keys;
pub mod keys_file;
pub mod peer;
pub mod policy;
pub mod usage;

pub use client_config::{render_client_config, ServerProfile};
pub use ip::{AddressPool, IpError, DEFAULT_FIRST_HOST, DEFAULT_NETWORK};
pub use keys::{
	generate_keypair, generate_preshared_key, KeyError, PresharedKey, WgKeyPair, WgPrivateKey,
	WgPublicKey,
};
pub use keys_file::{load_public_key_from_file, load_server_public_key, KeyFileError};
pub use peer::{Node, Peer, PeerId, PeerState, PeerSummary, RemoteStatus, SuspendReason};
pub use policy::{ResumePolicy, SuspendMode};
pub use usage::{counter_delta, format_bytes, parse_byte_size, ByteSizeError};
