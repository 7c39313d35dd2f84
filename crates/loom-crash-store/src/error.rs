// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use loom_crash_core::CrashError;
use thiserror::Error;

/// Faults inside the store. These never leave [`crate::PayloadStore`]'s
/// public methods; they are logged there instead.
#[derive(Debug, Error)]
pub enum StoreError {
	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),

	#[error("serialization error: {0}")]
	Serialization(#[from] CrashError),
}

pub type Result<T> = std::result::Result<T, StoreError>;
