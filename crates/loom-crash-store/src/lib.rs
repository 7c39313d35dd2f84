// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Crash-safe on-disk queue for unsent crash payloads.
//!
//! Payloads are written before any delivery is attempted, so a report
//! survives the process dying mid-send. See [`PayloadStore`].

mod error;
mod file;
mod store;

pub use error::{Result, StoreError};
pub use file::{by_creation_order, by_modified_time, Comparator, StoreKey, StoredFile};
pub use store::{PayloadStore, StoreConfig, DEFAULT_MAX_STORE_COUNT};
