// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Periodic flushing with exponential backoff.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::debug;

use crate::delivery::FlushSummary;

/// Backoff applied after a flush stops at a transient failure.
#[derive(Debug, Clone)]
pub struct BackoffConfig {
	pub base_delay: Duration,
	pub max_delay: Duration,
	pub backoff_factor: f64,
	pub jitter: bool,
}

impl Default for BackoffConfig {
	fn default() -> Self {
		Self {
			base_delay: Duration::from_secs(5),
			max_delay: Duration::from_secs(300),
			backoff_factor: 2.0,
			jitter: true,
		}
	}
}

impl BackoffConfig {
	/// Delay before the next flush after `failures` consecutive early stops
	/// (zero for the first). Capped at `max_delay` before jitter is applied.
	pub fn delay_after(&self, failures: u32) -> Duration {
		let exponent = i32::try_from(failures).unwrap_or(i32::MAX);
		let secs = (self.base_delay.as_secs_f64() * self.backoff_factor.powi(exponent))
			.min(self.max_delay.as_secs_f64());

		let scale = if self.jitter { 0.5 + fastrand::f64() } else { 1.0 };
		Duration::from_secs_f64(secs * scale)
	}
}

/// A running flush timer. Dropping it stops the timer.
pub struct FlushTimer {
	handle: JoinHandle<()>,
}

impl FlushTimer {
	/// Runs `flush` every `interval` on the current tokio runtime. After a
	/// flush that stopped early the next one waits
	/// [`BackoffConfig::delay_after`] instead, growing with each consecutive
	/// early stop.
	pub(crate) fn spawn<F, Fut>(interval: Duration, backoff: BackoffConfig, mut flush: F) -> Self
	where
		F: FnMut() -> Fut + Send + 'static,
		Fut: Future<Output = Option<FlushSummary>> + Send + 'static,
	{
		let handle = tokio::spawn(async move {
			let mut delay = interval;
			let mut failures = 0u32;

			loop {
				tokio::time::sleep(delay).await;

				match flush().await {
					Some(summary) if summary.stopped_early => {
						delay = backoff.delay_after(failures);
						failures = failures.saturating_add(1);
						debug!(
							failures,
							delay_ms = delay.as_millis() as u64,
							"collector unavailable, backing off"
						);
					}
					Some(_) => {
						failures = 0;
						delay = interval;
					}
					None => break,
				}
			}
		});

		Self { handle }
	}

	pub fn stop(&self) {
		self.handle.abort();
	}

	pub fn is_finished(&self) -> bool {
		self.handle.is_finished()
	}
}

impl Drop for FlushTimer {
	fn drop(&mut self) {
		self.handle.abort();
	}
}
