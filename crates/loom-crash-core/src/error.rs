// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Error types for crash capture types.

use thiserror::Error;

/// Errors that can occur while handling crash payloads.
#[derive(Debug, Error)]
pub enum CrashError {
	#[error("invalid report ID: {0}")]
	InvalidReportId(String),

	#[error("invalid session ID: {0}")]
	InvalidSessionId(String),

	#[error("invalid severity: {0}")]
	InvalidSeverity(String),

	#[error("invalid breadcrumb level: {0}")]
	InvalidBreadcrumbLevel(String),

	#[error("serialization error: {0}")]
	Serialization(#[from] serde_json::Error),
}

/// Result type for crash capture operations.
pub type Result<T> = std::result::Result<T, CrashError>;
