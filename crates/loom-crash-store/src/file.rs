// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Store keys, file handles and the on-disk naming convention.
//!
//! A stored payload is a single `*.json` file named
//! `{written_ms:013}_{sequence:010}_{payload_id}.json`. The zero-padded write
//! time comes first and a process-wide counter breaks ties within one
//! millisecond, so sorting names lexically yields creation order. Other
//! producers in the process (for example a native crash bridge) may drop files
//! into the same directory as long as they follow this convention.

use std::cmp::Ordering;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::SystemTime;

use chrono::Utc;

pub(crate) const PAYLOAD_EXTENSION: &str = ".json";
pub(crate) const TMP_SUFFIX: &str = ".tmp";
pub(crate) const DISCARD_SUFFIX: &str = ".discard";

static SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Identifier of one persisted payload: its file name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StoreKey(String);

impl StoreKey {
	pub(crate) fn generate(payload_id: &str) -> Self {
		let written_ms = Utc::now().timestamp_millis().max(0);
		let sequence = SEQUENCE.fetch_add(1, AtomicOrdering::SeqCst);
		Self(format!(
			"{written_ms:013}_{sequence:010}_{}{PAYLOAD_EXTENSION}",
			sanitize(payload_id)
		))
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for StoreKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

/// Handle to a payload currently on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
	key: StoreKey,
	path: PathBuf,
	modified: Option<SystemTime>,
	len: u64,
}

impl StoredFile {
	pub(crate) fn from_path(path: PathBuf) -> Option<Self> {
		let name = path.file_name()?.to_str()?.to_string();
		let metadata = std::fs::metadata(&path).ok()?;
		if !metadata.is_file() {
			return None;
		}

		Some(Self {
			key: StoreKey(name),
			modified: metadata.modified().ok(),
			len: metadata.len(),
			path,
		})
	}

	pub fn key(&self) -> &StoreKey {
		&self.key
	}

	pub fn path(&self) -> &Path {
		&self.path
	}

	pub fn modified(&self) -> Option<SystemTime> {
		self.modified
	}

	/// Size in bytes when the file was listed.
	pub fn len(&self) -> u64 {
		self.len
	}

	pub fn is_empty(&self) -> bool {
		self.len == 0
	}
}

/// Orders stored files oldest first.
pub type Comparator = fn(&StoredFile, &StoredFile) -> Ordering;

/// Orders by file name, which encodes write time and sequence.
pub fn by_creation_order(a: &StoredFile, b: &StoredFile) -> Ordering {
	a.key.cmp(&b.key)
}

/// Orders by filesystem modification time, falling back to the name.
pub fn by_modified_time(a: &StoredFile, b: &StoredFile) -> Ordering {
	a.modified
		.cmp(&b.modified)
		.then_with(|| by_creation_order(a, b))
}

pub(crate) fn is_payload_name(name: &str) -> bool {
	name.ends_with(PAYLOAD_EXTENSION)
}

fn sanitize(id: &str) -> String {
	let cleaned: String = id
		.chars()
		.filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
		.take(64)
		.collect();

	if cleaned.is_empty() {
		"payload".to_string()
	} else {
		cleaned
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_generated_keys_sort_in_creation_order() {
		let keys: Vec<StoreKey> = (0..50).map(|_| StoreKey::generate("id")).collect();

		let mut sorted = keys.clone();
		sorted.sort();
		assert_eq!(keys, sorted);
	}

	#[test]
	fn test_key_is_payload_name() {
		let key = StoreKey::generate("0192b3c4-aaaa-7bbb-8ccc-123456789abc");

		assert!(is_payload_name(key.as_str()));
		assert!(key.as_str().ends_with("_0192b3c4-aaaa-7bbb-8ccc-123456789abc.json"));
	}

	#[test]
	fn test_sanitize_strips_path_characters() {
		assert_eq!(sanitize("../../etc/passwd"), "etcpasswd");
		assert_eq!(sanitize("///"), "payload");
	}

	#[test]
	fn test_tmp_and_discard_are_not_payloads() {
		assert!(!is_payload_name("a.json.tmp"));
		assert!(!is_payload_name("a.json.discard"));
		assert!(is_payload_name("a.json"));
	}
}
