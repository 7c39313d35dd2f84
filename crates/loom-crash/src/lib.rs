// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Crash reporting SDK for Rust applications.
//!
//! Panics and handled errors become [`Report`]s that are written to a bounded
//! on-disk queue before any network send is attempted, so a report survives
//! the process dying mid-delivery. Queued payloads are delivered oldest first
//! and kept until the collector accepts or permanently rejects them.
//!
//! # Quick Start
//!
//! ```ignore
//! use loom_crash::{CrashClient, Severity};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Builds the stores, installs the panic interceptor, starts a session
//!     // and flushes reports left over from earlier runs.
//!     let crash = CrashClient::builder()
//!         .api_key("your_api_key")
//!         .notify_endpoint("https://loom.ghuntley.com/api/crash/notify")
//!         .project_package("my_app")
//!         .app_version(env!("CARGO_PKG_VERSION"))
//!         .release_stage("production")
//!         .build()?;
//!
//!     crash.set_metadata("server", "web-01");
//!
//!     // Manual capture (for recoverable errors)
//!     if let Err(e) = risky_operation() {
//!         crash.notify(&e)?;
//!     }
//!
//!     crash.flush().await?;
//!     crash.shutdown();
//!     Ok(())
//! }
//!
//! fn risky_operation() -> Result<(), std::io::Error> {
//!     // ...
//!     Ok(())
//! }
//! ```
//!
//! # Features
//!
//! - **Panic interception**: one process-wide panic hook shared by every
//!   client; the previously installed hook still runs afterwards
//! - **Durable queue**: reports and sessions are persisted in separate bounded
//!   stores, evicting the oldest entry when full
//! - **Delivery**: time-boxed sends classified as delivered, transient or
//!   permanent; flushes stop at the first transient failure
//! - **Sessions**: handled and unhandled counts attached to every report
//! - **Breadcrumbs and user**: a bounded trail of recent events and the current
//!   user travel with each report; configured keys are redacted
//! - **Error callbacks**: edit or drop a report before it is persisted
//! - **Rust Symbol Demangling**: backtrace symbols are demangled and split
//!   into module path and function

mod backtrace;
mod client;
mod config;
mod delivery;
mod error;
mod interceptor;
mod schedule;
mod session;
mod transport;

pub use client::{
	ContextProvider, CrashClient, CrashClientBuilder, OnErrorCallback, PANIC_ERROR_CLASS,
};
pub use config::{
	ClientConfig, DEFAULT_DELIVERY_TIMEOUT, DEFAULT_MAX_STORED_REPORTS, DEFAULT_MAX_STORED_SESSIONS,
	DEFAULT_REDACT_KEYS, DEFAULT_RELEASE_STAGE,
};
pub use delivery::{DeliveryCoordinator, FlushSummary};
pub use error::{CrashSdkError, Result};
pub use interceptor::{FailureEvent, FailureHandler, FailureInterceptor, RegistrationId};
pub use schedule::{BackoffConfig, FlushTimer};
pub use session::SessionTracker;
pub use transport::{classify_status, DeliveryOutcome, HttpTransport, Transport};

pub use crate::backtrace::capture_raw_frames;

// Re-export core types for convenience
pub use loom_crash_core::{
	Breadcrumb, BreadcrumbLevel, ContextSnapshot, Frame, Payload, PayloadKind, RawFrame, Report,
	ReportId, SessionId, SessionInfo, SessionPayload, Severity, Stacktrace, UserContext,
	DEFAULT_MAX_BREADCRUMBS, MAX_BREADCRUMBS, MAX_STACKTRACE_FRAMES, REDACTED,
};
pub use loom_crash_store::{PayloadStore, StoreConfig, StoreKey, StoredFile};
