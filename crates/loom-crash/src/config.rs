// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Resolved client configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::Url;
use sha2::{Digest, Sha256};

use crate::error::{CrashSdkError, Result};

/// Default bound on stored error reports.
pub const DEFAULT_MAX_STORED_REPORTS: usize = 128;
/// Default bound on stored session payloads.
pub const DEFAULT_MAX_STORED_SESSIONS: usize = 128;
/// Default time box for one delivery attempt.
pub const DEFAULT_DELIVERY_TIMEOUT: Duration = Duration::from_secs(5);
/// Release stage used when none is configured.
pub const DEFAULT_RELEASE_STAGE: &str = "production";
/// Context and breadcrumb keys redacted when none are configured.
pub const DEFAULT_REDACT_KEYS: &[&str] = &["password"];

/// Immutable configuration produced by [`crate::CrashClientBuilder::build`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
	pub api_key: String,
	pub notify_endpoint: String,
	pub sessions_endpoint: String,
	/// Module path prefixes that mark frames as project code.
	pub project_packages: Vec<String>,
	pub release_stage: String,
	pub app_version: Option<String>,
	/// When non-empty, reports are only captured in these release stages.
	pub enabled_release_stages: Vec<String>,
	/// Error classes that are never reported.
	pub ignore_classes: Vec<String>,
	/// Root of the on-disk payload stores.
	pub store_dir: PathBuf,
	pub max_stored_reports: usize,
	pub max_stored_sessions: usize,
	pub delivery_timeout: Duration,
	/// Install the panic interceptor on build.
	pub auto_detect_errors: bool,
	/// Start a session on build.
	pub auto_track_sessions: bool,
	/// Breadcrumbs attached to each report, most recent kept.
	pub max_breadcrumbs: usize,
	/// Keys whose values are replaced in context and breadcrumb data.
	pub redact_keys: Vec<String>,
}

impl ClientConfig {
	/// Whether anything should be captured in the configured release stage.
	pub fn should_notify_for_release_stage(&self) -> bool {
		self.enabled_release_stages.is_empty()
			|| self
				.enabled_release_stages
				.iter()
				.any(|stage| stage == &self.release_stage)
	}

	pub fn should_ignore_class(&self, error_class: &str) -> bool {
		self.ignore_classes.iter().any(|c| c == error_class)
	}

	pub fn reports_dir(&self) -> PathBuf {
		self.store_dir.join("reports")
	}

	pub fn sessions_dir(&self) -> PathBuf {
		self.store_dir.join("sessions")
	}
}

/// Rejects empty keys and keys containing whitespace.
pub(crate) fn validate_api_key(api_key: Option<String>) -> Result<String> {
	let api_key = api_key.ok_or(CrashSdkError::InvalidApiKey)?;
	if api_key.is_empty() || api_key.chars().any(char::is_whitespace) {
		return Err(CrashSdkError::InvalidApiKey);
	}
	Ok(api_key)
}

/// Parses an absolute http(s) URL, dropping any trailing slash.
pub(crate) fn validate_endpoint(endpoint: &str) -> Result<String> {
	let url = Url::parse(endpoint).map_err(|_| CrashSdkError::InvalidEndpoint(endpoint.to_string()))?;
	if url.scheme() != "http" && url.scheme() != "https" {
		return Err(CrashSdkError::InvalidEndpoint(endpoint.to_string()));
	}
	Ok(endpoint.trim_end_matches('/').to_string())
}

/// Sessions go to `<notify endpoint>/sessions` unless configured.
pub(crate) fn default_sessions_endpoint(notify_endpoint: &str) -> String {
	format!("{}/sessions", notify_endpoint.trim_end_matches('/'))
}

/// Per-key store directory under the user cache dir, so clients with
/// different API keys never share a queue.
pub(crate) fn default_store_dir(api_key: &str) -> PathBuf {
	let base = dirs::cache_dir().unwrap_or_else(std::env::temp_dir);
	store_dir_under(&base, api_key)
}

fn store_dir_under(base: &Path, api_key: &str) -> PathBuf {
	let digest = Sha256::digest(api_key.as_bytes());
	base.join("loom-crash").join(&hex::encode(digest)[..16])
}
