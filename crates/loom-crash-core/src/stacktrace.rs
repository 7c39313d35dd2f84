// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Stacktrace normalization.
//!
//! Raw call-stack descriptors are turned into a bounded, ordered list of
//! [`Frame`]s. Frames are kept innermost-first: when a stack is deeper than
//! [`MAX_STACKTRACE_FRAMES`] the outer (caller) frames are dropped, since the
//! frames closest to the failure carry the most signal.

use serde::{Deserialize, Serialize};

/// Maximum number of frames kept in a [`Stacktrace`].
pub const MAX_STACKTRACE_FRAMES: usize = 200;

/// An unprocessed frame as captured from the runtime.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawFrame {
	/// Source file, if debug info was available.
	pub file: Option<String>,
	/// Bare function/method name.
	pub method: String,
	/// Fully qualified owner of the method (module path or class name).
	pub class_name: Option<String>,
	pub line_number: Option<u32>,
}

impl RawFrame {
	pub fn new(method: impl Into<String>) -> Self {
		Self {
			method: method.into(),
			..Default::default()
		}
	}

	pub fn with_class(mut self, class_name: impl Into<String>) -> Self {
		self.class_name = Some(class_name.into());
		self
	}

	pub fn with_location(mut self, file: impl Into<String>, line_number: u32) -> Self {
		self.file = Some(file.into());
		self.line_number = Some(line_number);
		self
	}
}

/// A single normalized stack frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
	pub file: String,
	/// `Class.method`, or just `method` when the owner is unknown.
	pub method: String,
	pub line_number: u32,
	/// `None` when no project packages were configured, so consumers can tell
	/// "not evaluated" apart from "evaluated and not in project".
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub in_project: Option<bool>,
}

impl Frame {
	fn from_raw(raw: &RawFrame, project_packages: &[String]) -> Self {
		let class_name = raw.class_name.as_deref().unwrap_or("");

		let method = if class_name.is_empty() {
			raw.method.clone()
		} else {
			format!("{}.{}", class_name, raw.method)
		};

		let in_project = if project_packages.is_empty() {
			None
		} else {
			Some(
				project_packages
					.iter()
					.any(|package| class_name.starts_with(package.as_str())),
			)
		};

		Self {
			file: raw.file.clone().unwrap_or_default(),
			method,
			line_number: raw.line_number.unwrap_or(0),
			in_project,
		}
	}
}

/// Ordered, bounded list of frames. Built once per failure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stacktrace {
	pub frames: Vec<Frame>,
}

impl Stacktrace {
	/// Normalize raw frames, keeping at most [`MAX_STACKTRACE_FRAMES`] of the
	/// innermost entries.
	///
	/// A frame is tagged in-project when any of `project_packages` is a prefix of
	/// its owner's fully qualified name. With no project packages the tag is
	/// left unset on every frame.
	pub fn from_raw(raw_frames: &[RawFrame], project_packages: &[String]) -> Self {
		let frames = raw_frames
			.iter()
			.take(MAX_STACKTRACE_FRAMES)
			.map(|raw| Frame::from_raw(raw, project_packages))
			.collect();

		Self { frames }
	}

	pub fn len(&self) -> usize {
		self.frames.len()
	}

	pub fn is_empty(&self) -> bool {
		self.frames.is_empty()
	}
}
