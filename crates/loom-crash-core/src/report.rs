// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Error report types.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::breadcrumb::Breadcrumb;
use crate::context::{ContextSnapshot, UserContext};
use crate::error::CrashError;
use crate::payload::{Payload, PayloadKind};
use crate::session::SessionId;
use crate::stacktrace::Stacktrace;

/// Unique identifier for a report. UUIDv7, so IDs sort by creation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReportId(pub Uuid);

impl ReportId {
	pub fn new() -> Self {
		Self(Uuid::now_v7())
	}
}

impl Default for ReportId {
	fn default() -> Self {
		Self::new()
	}
}

impl fmt::Display for ReportId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

impl FromStr for ReportId {
	type Err = CrashError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Uuid::parse_str(s)
			.map(Self)
			.map_err(|_| CrashError::InvalidReportId(s.to_string()))
	}
}

/// How bad a captured failure is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
	Error,
	Warning,
	Info,
}

impl fmt::Display for Severity {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Severity::Error => write!(f, "error"),
			Severity::Warning => write!(f, "warning"),
			Severity::Info => write!(f, "info"),
		}
	}
}

impl FromStr for Severity {
	type Err = CrashError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"error" => Ok(Severity::Error),
			"warning" => Ok(Severity::Warning),
			"info" => Ok(Severity::Info),
			_ => Err(CrashError::InvalidSeverity(s.to_string())),
		}
	}
}

/// Session counters at the moment a report was built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
	pub id: SessionId,
	pub started_at: DateTime<Utc>,
	pub handled_count: u32,
	pub unhandled_count: u32,
}

/// A structured record of one captured failure.
///
/// Reports are only changed by error callbacks between being built and being
/// written. After they are written to a store they are only ever read or
/// deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
	pub id: ReportId,
	pub created_at: DateTime<Utc>,
	/// Panic payload type or error type name.
	pub error_class: String,
	pub message: String,
	pub stacktrace: Stacktrace,
	#[serde(default)]
	pub context: ContextSnapshot,
	/// Oldest first.
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub breadcrumbs: Vec<Breadcrumb>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub user: Option<UserContext>,
	pub severity: Severity,
	/// True when the failure was not caught by the application.
	pub unhandled: bool,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub session: Option<SessionInfo>,
}

impl Report {
	pub fn builder(error_class: impl Into<String>, message: impl Into<String>) -> ReportBuilder {
		ReportBuilder::new(error_class, message)
	}
}

impl Payload for Report {
	const KIND: PayloadKind = PayloadKind::Report;

	fn payload_id(&self) -> String {
		self.id.to_string()
	}
}

/// Builder for [`Report`].
pub struct ReportBuilder {
	error_class: String,
	message: String,
	stacktrace: Stacktrace,
	context: ContextSnapshot,
	breadcrumbs: Vec<Breadcrumb>,
	user: Option<UserContext>,
	severity: Severity,
	unhandled: bool,
	session: Option<SessionInfo>,
	created_at: Option<DateTime<Utc>>,
}

impl ReportBuilder {
	pub fn new(error_class: impl Into<String>, message: impl Into<String>) -> Self {
		Self {
			error_class: error_class.into(),
			message: message.into(),
			stacktrace: Stacktrace::default(),
			context: ContextSnapshot::default(),
			breadcrumbs: Vec::new(),
			user: None,
			severity: Severity::Warning,
			unhandled: false,
			session: None,
			created_at: None,
		}
	}

	pub fn stacktrace(mut self, stacktrace: Stacktrace) -> Self {
		self.stacktrace = stacktrace;
		self
	}

	pub fn context(mut self, context: ContextSnapshot) -> Self {
		self.context = context;
		self
	}

	pub fn breadcrumbs(mut self, breadcrumbs: Vec<Breadcrumb>) -> Self {
		self.breadcrumbs = breadcrumbs;
		self
	}

	pub fn user(mut self, user: Option<UserContext>) -> Self {
		self.user = user;
		self
	}

	pub fn severity(mut self, severity: Severity) -> Self {
		self.severity = severity;
		self
	}

	/// Marks the report as an uncaught failure. Unhandled reports are always
	/// [`Severity::Error`].
	pub fn unhandled(mut self) -> Self {
		self.unhandled = true;
		self.severity = Severity::Error;
		self
	}

	pub fn session(mut self, session: Option<SessionInfo>) -> Self {
		self.session = session;
		self
	}

	pub fn created_at(mut self, created_at: DateTime<Utc>) -> Self {
		self.created_at = Some(created_at);
		self
	}

	pub fn build(self) -> Report {
		Report {
			id: ReportId::new(),
			created_at: self.created_at.unwrap_or_else(Utc::now),
			error_class: self.error_class,
			message: self.message,
			stacktrace: self.stacktrace,
			context: self.context,
			breadcrumbs: self.breadcrumbs,
			user: self.user,
			severity: self.severity,
			unhandled: self.unhandled,
			session: self.session,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::stacktrace::RawFrame;
	use proptest::prelude::*;

	#[test]
	fn test_builder_defaults_to_handled_warning() {
		let report = Report::builder("std::io::Error", "disk full").build();

		assert_eq!(report.severity, Severity::Warning);
		assert!(!report.unhandled);
		assert!(report.session.is_none());
		assert!(report.context.is_empty());
	}

	#[test]
	fn test_unhandled_forces_error_severity() {
		let report = Report::builder("panic", "boom")
			.severity(Severity::Info)
			.unhandled()
			.build();

		assert_eq!(report.severity, Severity::Error);
		assert!(report.unhandled);
	}

	#[test]
	fn test_report_roundtrip_through_payload_bytes() {
		let raw = [RawFrame::new("run")
			.with_class("my_app::worker")
			.with_location("src/worker.rs", 42)];
		let report = Report::builder("panic", "index out of bounds")
			.stacktrace(Stacktrace::from_raw(&raw, &["my_app".to_string()]))
			.context(ContextSnapshot::new().with("os", "linux"))
			.breadcrumbs(vec![Breadcrumb::new("request")
				.with_message("GET /jobs")
				.with_data("status", 200)])
			.user(Some(UserContext {
				id: Some("u-42".to_string()),
				..Default::default()
			}))
			.unhandled()
			.session(Some(SessionInfo {
				id: SessionId::new(),
				started_at: Utc::now(),
				handled_count: 2,
				unhandled_count: 1,
			}))
			.build();

		let bytes = report.to_bytes().unwrap();
		let parsed = Report::from_bytes(&bytes).unwrap();

		assert_eq!(parsed, report);
	}

	#[test]
	fn test_empty_trail_and_user_are_omitted() {
		let value = serde_json::to_value(Report::builder("panic", "boom").build()).unwrap();

		assert!(value.get("breadcrumbs").is_none());
		assert!(value.get("user").is_none());
	}

	#[test]
	fn test_severity_parse_rejects_unknown() {
		assert!(matches!(
			"fatal".parse::<Severity>(),
			Err(CrashError::InvalidSeverity(_))
		));
	}

	proptest! {
		#[test]
		fn report_id_roundtrip(uuid_bytes in any::<[u8; 16]>()) {
			let id = ReportId(Uuid::from_bytes(uuid_bytes));
			let parsed: ReportId = id.to_string().parse().unwrap();
			prop_assert_eq!(id, parsed);
		}
	}
}
