// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use crate::keys::{WgKeyPair, WgPrivateKey, WgPublicKey};
use std::path::Path;
use thiserror::Error;
use tokio::fs;
use tracing::instrument;
use zeroize::Zeroizing;

#[derive(Error, Debug)]
pub enum KeyFileError {
	#[error("failed to read key file: {0}")]
	Read(#[from] std::io::Error),

	#[error("invalid key format: {0}")]
	InvalidFormat(#[from] crate::keys::KeyError),
}

pub type Result<T> = std::result::Result<T, KeyFileError>;

/// Reads a base64 public key as written by `wg pubkey > publickey`.
#[instrument(skip_all, fields(path = %path.as_ref().display()))]
pub async fn load_public_key_from_file(path: impl AsRef<Path>) -> Result<WgPublicKey> {
	let content = fs::read_to_string(path.as_ref()).await?;
	Ok(WgPublicKey::from_base64(content.trim())?)
}

/// Reads a base64 private key as written by `wg genkey > privatekey`.
#[instrument(skip_all, fields(path = %path.as_ref().display()))]
pub async fn load_key_pair_from_file(path: impl AsRef<Path>) -> Result<WgKeyPair> {
	let content = Zeroizing::new(fs::read_to_string(path.as_ref()).await?);
	let private = WgPrivateKey::from_base64(content.trim())?;
	Ok(WgKeyPair::from_private_key(private))
}

/// Resolves the server's public key from either its `publickey` file or a
/// sibling `privatekey` file.
pub async fn load_server_public_key(path: impl AsRef<Path>) -> Result<WgPublicKey> {
	let path = path.as_ref();
	match load_public_key_from_file(path).await {
		Ok(key) => Ok(key),
		Err(KeyFileError::Read(e)) if e.kind() == std::io::ErrorKind::NotFound => {
			let private_path = path.with_file_name("privatekey");
			let pair = load_key_pair_from_file(&private_path).await?;
			Ok(*pair.public_key())
		}
		Err(e) => Err(e),
	}
}
