// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The network boundary: one send attempt, classified into three outcomes.

use std::fmt;
use std::time::Duration;

use chrono::Utc;
use loom_crash_core::PayloadKind;
use reqwest::StatusCode;
use tracing::debug;

/// Result of one delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
	/// Accepted by the collector.
	Delivered,
	/// Collector unreachable or temporarily unavailable; keep the payload.
	TransientFailure(String),
	/// Collector rejected the payload; retrying cannot succeed.
	PermanentFailure(String),
}

impl DeliveryOutcome {
	pub fn is_delivered(&self) -> bool {
		matches!(self, DeliveryOutcome::Delivered)
	}

	pub fn is_transient(&self) -> bool {
		matches!(self, DeliveryOutcome::TransientFailure(_))
	}

	/// Whether the stored payload should be removed after this outcome.
	pub fn removes_payload(&self) -> bool {
		!self.is_transient()
	}
}

impl fmt::Display for DeliveryOutcome {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			DeliveryOutcome::Delivered => write!(f, "delivered"),
			DeliveryOutcome::TransientFailure(reason) => write!(f, "transient failure: {reason}"),
			DeliveryOutcome::PermanentFailure(reason) => write!(f, "permanent failure: {reason}"),
		}
	}
}

/// Sends one serialized payload to the collector.
///
/// Implementations block for at most `timeout` and must not panic. They are
/// called from short-lived worker threads, never from inside an async runtime.
pub trait Transport: Send + Sync {
	fn send(&self, body: &[u8], kind: PayloadKind, timeout: Duration) -> DeliveryOutcome;
}

/// Maps an HTTP response status onto a delivery outcome.
pub fn classify_status(status: StatusCode) -> DeliveryOutcome {
	if status.is_success() {
		return DeliveryOutcome::Delivered;
	}

	if status == StatusCode::REQUEST_TIMEOUT
		|| status == StatusCode::TOO_MANY_REQUESTS
		|| status.is_server_error()
	{
		return DeliveryOutcome::TransientFailure(format!("collector returned {status}"));
	}

	DeliveryOutcome::PermanentFailure(format!("collector rejected payload with {status}"))
}

/// [`Transport`] over blocking HTTP.
///
/// Reports go to the notify endpoint, sessions to the sessions endpoint.
#[derive(Debug, Clone)]
pub struct HttpTransport {
	api_key: String,
	notify_endpoint: String,
	sessions_endpoint: String,
}

impl HttpTransport {
	pub fn new(
		api_key: impl Into<String>,
		notify_endpoint: impl Into<String>,
		sessions_endpoint: impl Into<String>,
	) -> Self {
		Self {
			api_key: api_key.into(),
			notify_endpoint: notify_endpoint.into(),
			sessions_endpoint: sessions_endpoint.into(),
		}
	}

	fn endpoint(&self, kind: PayloadKind) -> &str {
		match kind {
			PayloadKind::Report => &self.notify_endpoint,
			PayloadKind::Session => &self.sessions_endpoint,
		}
	}
}

impl Transport for HttpTransport {
	fn send(&self, body: &[u8], kind: PayloadKind, timeout: Duration) -> DeliveryOutcome {
		let client = match reqwest::blocking::Client::builder().timeout(timeout).build() {
			Ok(client) => client,
			Err(e) => return DeliveryOutcome::TransientFailure(format!("http client unavailable: {e}")),
		};

		let url = self.endpoint(kind);
		debug!(url = %url, kind = %kind, bytes = body.len(), "sending payload");

		let response = client
			.post(url)
			.header("Authorization", format!("Bearer {}", self.api_key))
			.header("Content-Type", "application/json")
			.header("Loom-Payload-Kind", kind.as_str())
			.header("Loom-Sent-At", Utc::now().to_rfc3339())
			.body(body.to_vec())
			.send();

		match response {
			Ok(response) => classify_status(response.status()),
			Err(e) => DeliveryOutcome::TransientFailure(format!("request failed: {e}")),
		}
	}
}
