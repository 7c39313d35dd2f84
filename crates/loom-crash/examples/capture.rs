// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Example: Capture a handled error and a panic using the loom-crash SDK.
//!
//! Run with:
//!   LOOM_CRASH_API_KEY=... cargo run --example capture -p loom-crash

use loom_crash::{Breadcrumb, CrashClient, Severity, UserContext};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
	tracing_subscriber::fmt()
		.with_env_filter(
			EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("loom_crash=debug")),
		)
		.init();

	// Configure from environment or use defaults for testing
	let api_key = std::env::var("LOOM_CRASH_API_KEY")
		.map_err(|_| "LOOM_CRASH_API_KEY environment variable required")?;
	let endpoint = std::env::var("LOOM_CRASH_ENDPOINT")
		.unwrap_or_else(|_| "https://loom.ghuntley.com/api/crash/notify".to_string());

	println!("Initializing crash client...");
	println!("  Notify endpoint: {}", endpoint);

	let client = CrashClient::builder()
		.api_key(&api_key)
		.notify_endpoint(&endpoint)
		.project_package("capture")
		.app_version("0.1.0-example")
		.release_stage("development")
		.redact_keys(["password", "api_key"])
		.on_error(|report| {
			report.context.insert("example.stage", "capture");
			true
		})
		.build()?;

	println!("  Store: {}", client.config().store_dir.display());

	client.set_metadata("example", true);
	client.set_metadata("host", "example-server");
	client.set_metadata("api_key", "redacted before storage");
	client.set_user(UserContext {
		id: Some("example-user".to_string()),
		..Default::default()
	});
	client.leave_breadcrumb(Breadcrumb::new("navigation").with_message("loaded config"));

	// Capture a handled error
	println!("\nCapturing handled error...");
	let err = std::io::Error::new(std::io::ErrorKind::NotFound, "config.toml not found");
	match client.notify(&err)? {
		Some(id) => println!("  Stored report {}", id),
		None => println!("  Report was not stored"),
	}

	client.notify_message("ExampleWarning", "cache warmed slowly", Severity::Info)?;

	// Panic on a worker thread; the interceptor persists and sends the report
	// before the default hook prints the panic.
	println!("\nPanicking in a worker thread...");
	let worker = std::thread::Builder::new()
		.name("example-worker".to_string())
		.spawn(|| {
			let values: Vec<u32> = Vec::new();
			values[3]
		})?;
	let _ = worker.join();

	println!("\nFlushing...");
	let summary = client.flush().await?;
	println!(
		"  attempted={} delivered={} discarded={} stopped_early={}",
		summary.attempted, summary.delivered, summary.discarded, summary.stopped_early
	);

	client.shutdown();
	println!("\nDone!");

	Ok(())
}
