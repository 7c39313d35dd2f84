// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The serialization capability shared by everything that gets persisted and
//! delivered (error reports and session payloads).

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// What a serialized payload represents on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadKind {
	Report,
	Session,
}

impl PayloadKind {
	pub fn as_str(&self) -> &'static str {
		match self {
			PayloadKind::Report => "report",
			PayloadKind::Session => "session",
		}
	}
}

impl fmt::Display for PayloadKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// A self-contained payload that can be written to disk and sent as-is.
pub trait Payload: Serialize + DeserializeOwned + Send + Sync {
	const KIND: PayloadKind;

	/// Stable identifier, used as part of the store key.
	fn payload_id(&self) -> String;

	fn to_bytes(&self) -> Result<Vec<u8>> {
		Ok(serde_json::to_vec(self)?)
	}

	fn from_bytes(bytes: &[u8]) -> Result<Self> {
		Ok(serde_json::from_slice(bytes)?)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_payload_kind_display() {
		assert_eq!(PayloadKind::Report.to_string(), "report");
		assert_eq!(PayloadKind::Session.to_string(), "session");
	}

	#[test]
	fn test_payload_kind_serde() {
		let json = serde_json::to_string(&PayloadKind::Session).unwrap();
		assert_eq!(json, "\"session\"");
	}
}
