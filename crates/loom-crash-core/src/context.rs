// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Context snapshot embedded into reports.
//!
//! The snapshot is produced by an external metadata collector (device, OS,
//! locale, ...). Crash capture never interprets it beyond redacting configured
//! keys; it is carried into the serialized report as is.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Opaque key/value mapping captured at report build time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContextSnapshot(Map<String, Value>);

impl ContextSnapshot {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
		self.0.insert(key.into(), value.into());
	}

	pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
		self.insert(key, value);
		self
	}

	pub fn get(&self, key: &str) -> Option<&Value> {
		self.0.get(key)
	}

	pub fn remove(&mut self, key: &str) -> Option<Value> {
		self.0.remove(key)
	}

	pub fn len(&self) -> usize {
		self.0.len()
	}

	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}

	pub fn into_inner(self) -> Map<String, Value> {
		self.0
	}
}

/// Replacement value for redacted keys.
pub const REDACTED: &str = "[REDACTED]";

/// Replaces the value of every key in `keys`, at any depth, with [`REDACTED`].
/// Keys match case-insensitively.
pub fn redact_map(map: &mut Map<String, Value>, keys: &[String]) {
	for (key, value) in map.iter_mut() {
		if keys.iter().any(|k| k.eq_ignore_ascii_case(key)) {
			*value = Value::String(REDACTED.to_string());
		} else {
			redact_value(value, keys);
		}
	}
}

fn redact_value(value: &mut Value, keys: &[String]) {
	match value {
		Value::Object(map) => redact_map(map, keys),
		Value::Array(items) => items.iter_mut().for_each(|item| redact_value(item, keys)),
		_ => {}
	}
}

impl ContextSnapshot {
	/// See [`redact_map`].
	pub fn redact(&mut self, keys: &[String]) {
		redact_map(&mut self.0, keys);
	}
}

/// The user affected by a report.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserContext {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub id: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub email: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub name: Option<String>,
}

impl From<Map<String, Value>> for ContextSnapshot {
	fn from(map: Map<String, Value>) -> Self {
		Self(map)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	#[test]
	fn test_snapshot_serializes_as_plain_object() {
		let snapshot = ContextSnapshot::new()
			.with("os", json!({ "name": "linux", "version": "6.8" }))
			.with("locale", "en_AU");

		let value = serde_json::to_value(&snapshot).unwrap();
		assert_eq!(value["os"]["name"], "linux");
		assert_eq!(value["locale"], "en_AU");
	}

	#[test]
	fn test_redact_replaces_nested_keys() {
		let mut snapshot = ContextSnapshot::new()
			.with("Password", "hunter2")
			.with("request", json!({ "headers": [{ "authorization": "Bearer x" }], "path": "/login" }));

		snapshot.redact(&["password".to_string(), "authorization".to_string()]);

		assert_eq!(snapshot.get("Password"), Some(&json!(REDACTED)));
		let request = snapshot.get("request").unwrap();
		assert_eq!(request["headers"][0]["authorization"], REDACTED);
		assert_eq!(request["path"], "/login");
	}

	#[test]
	fn test_insert_replaces_existing_key() {
		let mut snapshot = ContextSnapshot::new();
		snapshot.insert("battery", 80);
		snapshot.insert("battery", 42);

		assert_eq!(snapshot.len(), 1);
		assert_eq!(snapshot.get("battery"), Some(&json!(42)));
	}
}
