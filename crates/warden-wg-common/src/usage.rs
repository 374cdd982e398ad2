// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Traffic counter arithmetic and byte-size formatting.

use thiserror::Error;

/// Bytes to add to cumulative usage for a new counter reading.
///
/// Interface counters only grow until the interface is reloaded, at which
/// point they restart near zero. A reading below the previous one therefore
/// starts a new epoch: only the new reading is counted and the unobserved
/// tail of the old epoch is dropped. A first reading counts from zero.
pub fn counter_delta(last: Option<u64>, current: u64) -> u64 {
	match last {
		Some(last) if current >= last => current - last,
		_ => current,
	}
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ByteSizeError {
	#[error("empty size")]
	Empty,

	#[error("invalid size '{0}'")]
	Invalid(String),

	#[error("unknown unit '{0}'")]
	UnknownUnit(String),

	#[error("size '{0}' overflows")]
	Overflow(String),
}

/// Parses sizes such as `1024`, `100MB`, `1.5 GB` or `10GiB`.
///
/// Decimal units (KB, MB, GB, TB) are powers of 1000, binary units
/// (KiB, MiB, GiB, TiB) powers of 1024.
pub fn parse_byte_size(input: &str) -> Result<u64, ByteSizeError> {
	let trimmed = input.trim();
	if trimmed.is_empty() {
		return Err(ByteSizeError::Empty);
	}

	let split = trimmed
		.find(|c: char| !(c.is_ascii_digit() || c == '.'))
		.unwrap_or(trimmed.len());
	let (number, unit) = trimmed.split_at(split);

	let multiplier: u64 = match unit.trim().to_ascii_lowercase().as_str() {
		"" | "b" => 1,
		"k" | "kb" => 1_000,
		"m" | "mb" => 1_000_000,
		"g" | "gb" => 1_000_000_000,
		"t" | "tb" => 1_000_000_000_000,
		"kib" => 1 << 10,
		"mib" => 1 << 20,
		"gib" => 1 << 30,
		"tib" => 1 << 40,
		other => return Err(ByteSizeError::UnknownUnit(other.to_string())),
	};

	if let Ok(whole) = number.parse::<u64>() {
		return whole
			.checked_mul(multiplier)
			.ok_or_else(|| ByteSizeError::Overflow(input.to_string()));
	}

	let value: f64 = number
		.parse()
		.map_err(|_| ByteSizeError::Invalid(input.to_string()))?;
	let bytes = value * multiplier as f64;
	if !bytes.is_finite() || bytes >= u64::MAX as f64 {
		return Err(ByteSizeError::Overflow(input.to_string()));
	}
	Ok(bytes.round() as u64)
}

/// Human-readable binary size, e.g. `1.50 GiB`.
pub fn format_bytes(bytes: u64) -> String {
	const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];

	let mut value = bytes as f64;
	let mut unit = 0;
	while value >= 1024.0 && unit < UNITS.len() - 1 {
		value /= 1024.0;
		unit += 1;
	}

	if unit == 0 {
		format!("{bytes} B")
	} else {
		format!("{value:.2} {}", UNITS[unit])
	}
}
