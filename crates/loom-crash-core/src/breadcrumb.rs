// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Breadcrumbs: the trail of events leading up to a report.

use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CrashError;

/// Breadcrumbs kept when no limit is configured.
pub const DEFAULT_MAX_BREADCRUMBS: usize = 25;
/// Upper bound for any configured limit.
pub const MAX_BREADCRUMBS: usize = 100;

/// One event leading up to a report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Breadcrumb {
	pub timestamp: DateTime<Utc>,
	/// "error", "navigation", "request", "log", ...
	pub category: String,
	pub message: Option<String>,
	pub level: BreadcrumbLevel,
	#[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
	pub data: serde_json::Map<String, serde_json::Value>,
}

impl Breadcrumb {
	pub fn new(category: impl Into<String>) -> Self {
		Self {
			timestamp: Utc::now(),
			category: category.into(),
			message: None,
			level: BreadcrumbLevel::Info,
			data: serde_json::Map::new(),
		}
	}

	pub fn with_message(mut self, message: impl Into<String>) -> Self {
		self.message = Some(message.into());
		self
	}

	pub fn with_level(mut self, level: BreadcrumbLevel) -> Self {
		self.level = level;
		self
	}

	pub fn with_data(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
		self.data.insert(key.into(), value.into());
		self
	}
}

/// Severity level of a breadcrumb.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreadcrumbLevel {
	Debug,
	Info,
	Warning,
	Error,
}

impl fmt::Display for BreadcrumbLevel {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Debug => write!(f, "debug"),
			Self::Info => write!(f, "info"),
			Self::Warning => write!(f, "warning"),
			Self::Error => write!(f, "error"),
		}
	}
}

impl FromStr for BreadcrumbLevel {
	type Err = CrashError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"debug" => Ok(Self::Debug),
			"info" => Ok(Self::Info),
			"warning" => Ok(Self::Warning),
			"error" => Ok(Self::Error),
			_ => Err(CrashError::InvalidBreadcrumbLevel(s.to_string())),
		}
	}
}

/// Bounded, oldest-first breadcrumb buffer. Pushing past the limit drops the
/// oldest entry.
#[derive(Debug, Clone)]
pub struct BreadcrumbTrail {
	entries: VecDeque<Breadcrumb>,
	limit: usize,
}

impl BreadcrumbTrail {
	/// `limit` is clamped to [`MAX_BREADCRUMBS`]. A limit of zero keeps nothing.
	pub fn new(limit: usize) -> Self {
		let limit = limit.min(MAX_BREADCRUMBS);
		Self {
			entries: VecDeque::with_capacity(limit),
			limit,
		}
	}

	pub fn push(&mut self, breadcrumb: Breadcrumb) {
		if self.limit == 0 {
			return;
		}
		while self.entries.len() >= self.limit {
			self.entries.pop_front();
		}
		self.entries.push_back(breadcrumb);
	}

	pub fn limit(&self) -> usize {
		self.limit
	}

	pub fn len(&self) -> usize {
		self.entries.len()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	pub fn clear(&mut self) {
		self.entries.clear();
	}

	pub fn snapshot(&self) -> Vec<Breadcrumb> {
		self.entries.iter().cloned().collect()
	}
}

impl Default for BreadcrumbTrail {
	fn default() -> Self {
		Self::new(DEFAULT_MAX_BREADCRUMBS)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use proptest::prelude::*;

	fn messages(trail: &BreadcrumbTrail) -> Vec<String> {
		trail
			.snapshot()
			.into_iter()
			.filter_map(|b| b.message)
			.collect()
	}

	#[test]
	fn test_trail_drops_oldest_when_full() {
		let mut trail = BreadcrumbTrail::new(2);
		for name in ["a", "b", "c"] {
			trail.push(Breadcrumb::new("log").with_message(name));
		}

		assert_eq!(messages(&trail), vec!["b", "c"]);
	}

	#[test]
	fn test_zero_limit_keeps_nothing() {
		let mut trail = BreadcrumbTrail::new(0);
		trail.push(Breadcrumb::new("log"));

		assert!(trail.is_empty());
	}

	#[test]
	fn test_limit_is_clamped() {
		assert_eq!(BreadcrumbTrail::new(10_000).limit(), MAX_BREADCRUMBS);
		assert_eq!(BreadcrumbTrail::default().limit(), DEFAULT_MAX_BREADCRUMBS);
	}

	#[test]
	fn test_empty_data_is_not_serialized() {
		let value = serde_json::to_value(Breadcrumb::new("navigation")).unwrap();

		assert!(value.get("data").is_none());
		assert_eq!(value["level"], "info");
	}

	proptest! {
		#[test]
		fn breadcrumb_level_roundtrip(level in prop_oneof![
			Just(BreadcrumbLevel::Debug),
			Just(BreadcrumbLevel::Info),
			Just(BreadcrumbLevel::Warning),
			Just(BreadcrumbLevel::Error),
		]) {
			let s = level.to_string();
			let parsed: BreadcrumbLevel = s.parse().unwrap();
			prop_assert_eq!(level, parsed);
		}

		#[test]
		fn trail_never_exceeds_limit(limit in 0usize..8, pushes in 0usize..32) {
			let mut trail = BreadcrumbTrail::new(limit);
			for i in 0..pushes {
				trail.push(Breadcrumb::new("log").with_message(i.to_string()));
			}

			prop_assert_eq!(trail.len(), pushes.min(limit));
			if let Some(last) = trail.snapshot().last() {
				prop_assert_eq!(last.message.clone(), Some((pushes - 1).to_string()));
			}
		}
	}
}
