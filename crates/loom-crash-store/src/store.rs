// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::collections::HashSet;
use std::io::ErrorKind;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use loom_crash_core::Payload;
use tracing::{debug, info, warn};

use crate::error::{Result, StoreError};
use crate::file::{
	by_creation_order, is_payload_name, Comparator, StoreKey, StoredFile, DISCARD_SUFFIX,
	TMP_SUFFIX,
};

/// Default bound on the number of stored payloads.
pub const DEFAULT_MAX_STORE_COUNT: usize = 128;

/// Configuration for a [`PayloadStore`].
#[derive(Debug, Clone)]
pub struct StoreConfig {
	/// Maximum number of payloads kept on disk. Values below 1 are treated as 1.
	pub max_store_count: usize,
	/// Decides which entry is oldest when evicting and the order of listings.
	pub comparator: Comparator,
}

impl Default for StoreConfig {
	fn default() -> Self {
		Self {
			max_store_count: DEFAULT_MAX_STORE_COUNT,
			comparator: by_creation_order,
		}
	}
}

impl StoreConfig {
	pub fn with_max_store_count(max_store_count: usize) -> Self {
		Self {
			max_store_count,
			..Default::default()
		}
	}
}

#[derive(Default)]
struct StoreState {
	/// Files that could neither be removed nor renamed. Hidden from listings
	/// and retried on every operation until they are gone.
	quarantined: HashSet<PathBuf>,
}

/// Bounded, disk-backed queue of payloads of type `T`.
///
/// Each payload is one file under the store root; the directory listing is the
/// index. Writing past `max_store_count` evicts the single oldest entry first,
/// so a new write is never rejected because the store is full.
///
/// Storage faults are logged and never returned: a store whose root cannot be
/// created is disabled and every write returns `None`.
///
/// Write, list and delete are mutually exclusive through one lock per store
/// instance. The lock does not coordinate with other processes; a store
/// directory belongs to a single process.
pub struct PayloadStore<T> {
	root: Option<PathBuf>,
	config: StoreConfig,
	state: Mutex<StoreState>,
	_payload: PhantomData<fn() -> T>,
}

impl<T: Payload> PayloadStore<T> {
	/// Opens (creating if needed) a store rooted at `root`.
	pub fn new(root: impl Into<PathBuf>, config: StoreConfig) -> Self {
		let root = root.into();

		let root = match std::fs::create_dir_all(&root) {
			Ok(()) if root.is_dir() => Some(root),
			Ok(()) => {
				warn!(path = %root.display(), kind = %T::KIND, "could not prepare payload store directory");
				None
			}
			Err(e) => {
				warn!(
					path = %root.display(),
					kind = %T::KIND,
					error = %e,
					"could not prepare payload store directory"
				);
				None
			}
		};

		if let Some(root) = &root {
			debug!(path = %root.display(), kind = %T::KIND, "initialized payload store");
		}

		Self {
			root,
			config: StoreConfig {
				max_store_count: config.max_store_count.max(1),
				..config
			},
			state: Mutex::new(StoreState::default()),
			_payload: PhantomData,
		}
	}

	/// Returns false when the root directory was unusable and the store is a
	/// no-op.
	pub fn is_enabled(&self) -> bool {
		self.root.is_some()
	}

	pub fn root(&self) -> Option<&Path> {
		self.root.as_deref()
	}

	pub fn max_store_count(&self) -> usize {
		self.config.max_store_count
	}

	/// Persists `item`, evicting the oldest entry first when the store is full.
	///
	/// Returns the key of the new entry, or `None` if anything went wrong.
	pub fn write(&self, item: &T) -> Option<StoreKey> {
		let root = self.root.as_deref()?;
		let mut state = self.lock();
		self.purge_locked(root, &mut state);

		let existing = self.list_locked(root, &state);
		if existing.len() >= self.config.max_store_count {
			let oldest = &existing[0];
			warn!(
				path = %oldest.path().display(),
				limit = self.config.max_store_count,
				kind = %T::KIND,
				"discarding oldest payload as stored payload limit reached"
			);
			self.delete_locked(oldest.path(), &mut state);
		}

		let key = StoreKey::generate(&item.payload_id());
		match write_atomic(root, &key, item) {
			Ok(path) => {
				info!(path = %path.display(), kind = %T::KIND, "saved unsent payload to disk");
				Some(key)
			}
			Err(e) => {
				warn!(key = %key, kind = %T::KIND, error = %e, "couldn't save unsent payload to disk");
				None
			}
		}
	}

	/// Lists persisted payloads, oldest first. A missing or unreadable
	/// directory yields an empty list.
	pub fn find_stored_files(&self) -> Vec<StoredFile> {
		let Some(root) = self.root.as_deref() else {
			return Vec::new();
		};

		let mut state = self.lock();
		self.purge_locked(root, &mut state);
		self.list_locked(root, &state)
	}

	/// Looks up the entry written under `key`, if it is still listed.
	pub fn stored_file(&self, key: &StoreKey) -> Option<StoredFile> {
		let root = self.root.as_deref()?;
		let path = root.join(key.as_str());

		let state = self.lock();
		if state.quarantined.contains(&path) {
			return None;
		}
		StoredFile::from_path(path)
	}

	/// Reads the raw body of a stored payload.
	pub fn read_bytes(&self, file: &StoredFile) -> Option<Vec<u8>> {
		let _state = self.lock();

		match std::fs::read(file.path()) {
			Ok(bytes) => Some(bytes),
			Err(e) => {
				warn!(path = %file.path().display(), error = %e, "failed to read stored payload");
				None
			}
		}
	}

	/// Reads and deserializes a stored payload.
	pub fn read(&self, file: &StoredFile) -> Option<T> {
		let bytes = self.read_bytes(file)?;

		match T::from_bytes(&bytes) {
			Ok(item) => Some(item),
			Err(e) => {
				warn!(path = %file.path().display(), error = %e, "failed to parse stored payload");
				None
			}
		}
	}

	/// Removes the given payloads.
	///
	/// When a file cannot be unlinked it is renamed out of the listing
	/// (`*.discard`) and purged later; if even that fails it is hidden in
	/// memory and removal is retried on every later operation and on drop.
	/// Either way it is never listed again by this store.
	pub fn delete_stored_files(&self, files: &[StoredFile]) {
		if files.is_empty() {
			return;
		}

		let mut state = self.lock();
		for file in files {
			self.delete_locked(file.path(), &mut state);
		}
	}

	/// Number of payloads currently listed.
	pub fn len(&self) -> usize {
		self.find_stored_files().len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Removes every stored payload.
	pub fn clear(&self) {
		let files = self.find_stored_files();
		self.delete_stored_files(&files);
	}

	fn lock(&self) -> MutexGuard<'_, StoreState> {
		// A poisoned lock still guards consistent state: every mutation is a
		// single filesystem call or set insert.
		self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
	}

	fn list_locked(&self, root: &Path, state: &StoreState) -> Vec<StoredFile> {
		let entries = match std::fs::read_dir(root) {
			Ok(entries) => entries,
			Err(e) => {
				if e.kind() != ErrorKind::NotFound {
					warn!(path = %root.display(), error = %e, "failed to list payload store");
				}
				return Vec::new();
			}
		};

		let mut files: Vec<StoredFile> = entries
			.filter_map(|entry| entry.ok())
			.map(|entry| entry.path())
			.filter(|path| {
				path.file_name()
					.and_then(|n| n.to_str())
					.map(is_payload_name)
					.unwrap_or(false)
			})
			.filter(|path| !state.quarantined.contains(path))
			.filter_map(StoredFile::from_path)
			.collect();

		files.sort_by(self.config.comparator);
		files
	}

	fn delete_locked(&self, path: &Path, state: &mut StoreState) {
		match std::fs::remove_file(path) {
			Ok(()) => {
				debug!(path = %path.display(), "deleted stored payload");
				return;
			}
			Err(e) if e.kind() == ErrorKind::NotFound => return,
			Err(e) => {
				warn!(path = %path.display(), error = %e, "failed to delete stored payload, discarding");
			}
		}

		let mut discard = path.as_os_str().to_owned();
		discard.push(DISCARD_SUFFIX);
		if std::fs::rename(path, &discard).is_ok() {
			return;
		}

		warn!(path = %path.display(), "failed to discard stored payload, quarantining until removed");
		state.quarantined.insert(path.to_path_buf());
	}

	fn purge_locked(&self, root: &Path, state: &mut StoreState) {
		state
			.quarantined
			.retain(|path| match std::fs::remove_file(path) {
				Ok(()) => false,
				Err(e) => e.kind() != ErrorKind::NotFound,
			});

		let Ok(entries) = std::fs::read_dir(root) else {
			return;
		};

		for entry in entries.filter_map(|entry| entry.ok()) {
			let path = entry.path();
			let is_discard = path
				.file_name()
				.and_then(|n| n.to_str())
				.map(|n| n.ends_with(DISCARD_SUFFIX))
				.unwrap_or(false);

			if is_discard {
				if let Err(e) = std::fs::remove_file(&path) {
					debug!(path = %path.display(), error = %e, "discarded payload still present");
				}
			}
		}
	}

	#[cfg(test)]
	fn quarantine(&self, path: PathBuf) {
		self.lock().quarantined.insert(path);
	}
}

impl<T> Drop for PayloadStore<T> {
	fn drop(&mut self) {
		let state = self
			.state
			.get_mut()
			.unwrap_or_else(|poisoned| poisoned.into_inner());

		for path in state.quarantined.drain() {
			if let Err(e) = std::fs::remove_file(&path) {
				if e.kind() != ErrorKind::NotFound {
					warn!(path = %path.display(), error = %e, "quarantined payload could not be removed");
				}
			}
		}
	}
}

fn write_atomic<T: Payload>(root: &Path, key: &StoreKey, item: &T) -> Result<PathBuf> {
	let bytes = item.to_bytes().map_err(StoreError::Serialization)?;

	let path = root.join(key.as_str());
	let tmp_path = root.join(format!("{}{TMP_SUFFIX}", key.as_str()));

	if let Err(e) = std::fs::write(&tmp_path, &bytes) {
		let _ = std::fs::remove_file(&tmp_path);
		return Err(e.into());
	}

	if let Err(e) = std::fs::rename(&tmp_path, &path) {
		let _ = std::fs::remove_file(&tmp_path);
		return Err(e.into());
	}

	Ok(path)
}
