// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Session payloads for app session tracking.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CrashError;
use crate::payload::{Payload, PayloadKind};

/// Unique identifier for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
	#[must_use]
	pub fn new() -> Self {
		Self(Uuid::now_v7())
	}
}

impl Default for SessionId {
	fn default() -> Self {
		Self::new()
	}
}

impl std::fmt::Display for SessionId {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}", self.0)
	}
}

impl std::str::FromStr for SessionId {
	type Err = CrashError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Uuid::parse_str(s)
			.map(Self)
			.map_err(|_| CrashError::InvalidSessionId(s.to_string()))
	}
}

/// Record of a session boundary, persisted and delivered the same way as
/// reports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionPayload {
	pub id: SessionId,
	pub started_at: DateTime<Utc>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub app_version: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub release_stage: Option<String>,
}

impl SessionPayload {
	#[must_use]
	pub fn new(app_version: Option<String>, release_stage: Option<String>) -> Self {
		Self {
			id: SessionId::new(),
			started_at: Utc::now(),
			app_version,
			release_stage,
		}
	}
}

impl Payload for SessionPayload {
	const KIND: PayloadKind = PayloadKind::Session;

	fn payload_id(&self) -> String {
		self.id.to_string()
	}
}
