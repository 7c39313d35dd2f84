// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Core types for Loom crash capture.
//!
//! This crate holds the pure data model shared by the on-disk payload store
//! (`loom-crash-store`) and the client SDK (`loom-crash`). Nothing here does
//! I/O.
//!
//! # Overview
//!
//! - [`Stacktrace::from_raw`] normalizes a captured call stack into at most
//!   [`MAX_STACKTRACE_FRAMES`] frames, tagging project frames when project
//!   packages are configured
//! - [`Report`] is one captured failure; [`SessionPayload`] marks a session start
//! - [`BreadcrumbTrail`] keeps the most recent [`Breadcrumb`]s attached to
//!   reports
//! - [`Payload`] is the serialization capability the store and delivery layers
//!   are generic over

pub mod breadcrumb;
pub mod context;
pub mod error;
pub mod payload;
pub mod report;
pub mod session;
pub mod stacktrace;

pub use breadcrumb::{
	Breadcrumb, BreadcrumbLevel, BreadcrumbTrail, DEFAULT_MAX_BREADCRUMBS, MAX_BREADCRUMBS,
};
pub use context::{redact_map, ContextSnapshot, UserContext, REDACTED};
pub use error::{CrashError, Result};
pub use payload::{Payload, PayloadKind};
pub use report::{Report, ReportBuilder, ReportId, SessionInfo, Severity};
pub use session::{SessionId, SessionPayload};
pub use stacktrace::{Frame, RawFrame, Stacktrace, MAX_STACKTRACE_FRAMES};
