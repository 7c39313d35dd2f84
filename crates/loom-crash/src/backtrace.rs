// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Backtrace capture for Rust panics and handled errors.
//!
//! Captured symbols are demangled and split at the last `::` so that
//! `my_app::worker::run` becomes class `my_app::worker`, method `run`. Frames
//! belonging to the capture machinery itself (the panic runtime, this crate)
//! are stripped from the top of the stack.

use std::path::Path;

use loom_crash_core::RawFrame;
use rustc_demangle::demangle;

/// Leading frames are only searched this deep for capture machinery.
const MAX_MACHINERY_DEPTH: usize = 64;

/// A resolved symbol before it is split into class and method.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Symbol {
	name: String,
	file: Option<String>,
	line: Option<u32>,
}

/// Capture the current thread's stack as raw frames, innermost first.
pub fn capture_raw_frames() -> Vec<RawFrame> {
	let backtrace = ::backtrace::Backtrace::new();
	let mut symbols = Vec::new();

	for frame in backtrace.frames() {
		for symbol in frame.symbols() {
			let Some(name) = symbol.name() else {
				continue;
			};
			let name = match name.as_str() {
				Some(raw) => format!("{:#}", demangle(raw)),
				None => format!("{name:#}"),
			};

			symbols.push(Symbol {
				name,
				file: symbol.filename().map(display_path),
				line: symbol.lineno(),
			});
		}
	}

	strip_capture_frames(symbols)
		.into_iter()
		.map(into_raw_frame)
		.collect()
}

fn display_path(path: &Path) -> String {
	path.display().to_string()
}

/// Drops everything up to and including the last capture-machinery frame
/// near the top of the stack.
fn strip_capture_frames(symbols: Vec<Symbol>) -> Vec<Symbol> {
	let mut cut = 0;

	for (idx, symbol) in symbols.iter().enumerate().take(MAX_MACHINERY_DEPTH) {
		if is_capture_machinery(&symbol.name) {
			cut = idx + 1;
		} else if !is_system_frame(&symbol.name) {
			break;
		}
	}

	symbols.into_iter().skip(cut).collect()
}

fn into_raw_frame(symbol: Symbol) -> RawFrame {
	let mut frame = match split_symbol(&symbol.name) {
		(Some(class), method) => RawFrame::new(method).with_class(class),
		(None, method) => RawFrame::new(method),
	};

	if let Some(file) = symbol.file {
		frame = frame.with_location(file, symbol.line.unwrap_or(0));
	}
	frame
}

/// Splits `a::b::c` into (`a::b`, `c`). `::` inside `<...>` does not count.
fn split_symbol(name: &str) -> (Option<&str>, &str) {
	let mut depth = 0i32;
	let mut split = None;
	let bytes = name.as_bytes();

	for (idx, byte) in bytes.iter().enumerate() {
		match byte {
			b'<' => depth += 1,
			b'>' => depth -= 1,
			b':' if depth == 0 && bytes.get(idx + 1) == Some(&b':') => split = Some(idx),
			_ => {}
		}
	}

	match split {
		Some(idx) if idx > 0 => (Some(&name[..idx]), &name[idx + 2..]),
		_ => (None, name),
	}
}

/// Frames that exist only because a failure is being captured.
fn is_capture_machinery(function: &str) -> bool {
	const MACHINERY_PREFIXES: &[&str] = &[
		"backtrace::",
		"<backtrace::",
		"std::panicking::",
		"core::panicking::",
		"std::panic::",
		"std::sys::backtrace::",
		"std::sys_common::backtrace::",
		"rust_begin_unwind",
		"__rustc::rust_begin_unwind",
		"loom_crash::",
		"<loom_crash::",
	];

	if function.contains("::tests::") {
		return false;
	}

	MACHINERY_PREFIXES
		.iter()
		.any(|prefix| function.starts_with(prefix))
}

/// Determine if a frame is from the standard library or runtime rather than
/// application code.
fn is_system_frame(function: &str) -> bool {
	const SYSTEM_PREFIXES: &[&str] = &[
		"std::",
		"core::",
		"alloc::",
		"<std::",
		"<core::",
		"<alloc::",
		"panic_unwind::",
		"<panic_unwind::",
		"rust_panic",
		"__rust_",
		"_rust_",
	];

	SYSTEM_PREFIXES
		.iter()
		.any(|prefix| function.starts_with(prefix))
}
