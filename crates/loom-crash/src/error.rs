// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Error types for the crash SDK.

use thiserror::Error;

/// Result type alias for crash operations.
pub type Result<T> = std::result::Result<T, CrashSdkError>;

/// Errors that can occur in the crash SDK.
#[derive(Debug, Error)]
pub enum CrashSdkError {
	/// The client has been shut down.
	#[error("crash client has been shut down")]
	ClientShutdown,

	/// Invalid API key format.
	#[error("invalid API key format")]
	InvalidApiKey,

	/// Missing or unparseable endpoint URL.
	#[error("invalid endpoint URL: {0}")]
	InvalidEndpoint(String),

	/// The payload store could not persist a report.
	#[error("report could not be persisted")]
	NotPersisted,

	/// Failed to build or parse a payload.
	#[error("serialization error: {0}")]
	Serialization(#[from] loom_crash_core::CrashError),

	/// An async operation needs a tokio runtime and none is running.
	#[error("no tokio runtime available")]
	NoRuntime,

	/// A background task panicked or was cancelled.
	#[error("background task failed: {0}")]
	TaskFailed(#[from] tokio::task::JoinError),
}
