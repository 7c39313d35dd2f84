// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Drains a payload store through a [`Transport`], reconciling the store with
//! each outcome.
//!
//! Delivered and permanently rejected payloads are deleted; transiently failed
//! payloads stay queued for the next flush. A flush walks the store oldest
//! first and stops at the first transient failure so payloads keep their
//! creation order and an unreachable collector is not hit with the whole
//! backlog.
//!
//! A payload is claimed for the whole of an attempt, including a send that
//! outlived its timeout, so the crash path and a running flush never send the
//! same payload at once.

use std::collections::HashSet;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::time::Duration;

use loom_crash_core::Payload;
use loom_crash_store::{PayloadStore, StoreKey, StoredFile};
use tracing::{debug, info, warn};

use crate::transport::{DeliveryOutcome, Transport};

/// What one [`DeliveryCoordinator::flush_store`] call did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushSummary {
	/// Payloads handed to the transport.
	pub attempted: usize,
	pub delivered: usize,
	/// Payloads removed without delivery: permanently rejected, empty or
	/// unreadable.
	pub discarded: usize,
	/// True when the flush stopped at a transient failure.
	pub stopped_early: bool,
}

impl FlushSummary {
	pub fn absorb(&mut self, other: FlushSummary) {
		self.attempted += other.attempted;
		self.delivered += other.delivered;
		self.discarded += other.discarded;
		self.stopped_early |= other.stopped_early;
	}
}

/// Keys of payloads with an attempt in progress.
#[derive(Default)]
struct InFlight(Mutex<HashSet<StoreKey>>);

impl InFlight {
	fn claim(self: &Arc<Self>, key: &StoreKey) -> Option<Claim> {
		let mut keys = self.0.lock().unwrap_or_else(|e| e.into_inner());
		if !keys.insert(key.clone()) {
			return None;
		}
		Some(Claim {
			in_flight: Arc::clone(self),
			key: key.clone(),
		})
	}

	fn contains(&self, key: &StoreKey) -> bool {
		self.0
			.lock()
			.unwrap_or_else(|e| e.into_inner())
			.contains(key)
	}
}

/// Released on drop.
struct Claim {
	in_flight: Arc<InFlight>,
	key: StoreKey,
}

impl Drop for Claim {
	fn drop(&mut self) {
		self.in_flight
			.0
			.lock()
			.unwrap_or_else(|e| e.into_inner())
			.remove(&self.key);
	}
}

/// Delivers the payloads of one store.
pub struct DeliveryCoordinator<T> {
	store: Arc<PayloadStore<T>>,
	transport: Arc<dyn Transport>,
	timeout: Duration,
	in_flight: Arc<InFlight>,
	flushing: AtomicBool,
	rerun: AtomicBool,
	_payload: PhantomData<fn() -> T>,
}

impl<T: Payload + 'static> DeliveryCoordinator<T> {
	pub fn new(store: Arc<PayloadStore<T>>, transport: Arc<dyn Transport>, timeout: Duration) -> Self {
		Self {
			store,
			transport,
			timeout,
			in_flight: Arc::new(InFlight::default()),
			flushing: AtomicBool::new(false),
			rerun: AtomicBool::new(false),
			_payload: PhantomData,
		}
	}

	pub fn store(&self) -> &Arc<PayloadStore<T>> {
		&self.store
	}

	/// Per-attempt time box used by [`Self::flush_store`].
	pub fn timeout(&self) -> Duration {
		self.timeout
	}

	/// Makes one delivery attempt for `file`, waiting at most `timeout`, and
	/// removes the file unless the outcome is transient.
	///
	/// The send runs on its own worker thread, so an attempt that overruns is
	/// abandoned (and reported as transient) rather than blocking the caller.
	/// A payload already being sent by another attempt is left to it and
	/// reported as transient.
	pub fn attempt_deliver_sync(&self, file: &StoredFile, timeout: Duration) -> DeliveryOutcome {
		self.deliver(file, timeout).unwrap_or_else(|| {
			DeliveryOutcome::TransientFailure("delivery already in progress".to_string())
		})
	}

	/// `None` when another attempt holds the payload.
	fn deliver(&self, file: &StoredFile, timeout: Duration) -> Option<DeliveryOutcome> {
		let Some(claim) = self.in_flight.claim(file.key()) else {
			debug!(key = %file.key(), kind = %T::KIND, "payload already in flight");
			return None;
		};

		let (outcome, _claim) = match self.store.read_bytes(file) {
			Some(body) if !body.is_empty() => self.send_with_timeout(body, timeout, claim),
			Some(_) => (
				DeliveryOutcome::PermanentFailure("empty payload".to_string()),
				Some(claim),
			),
			None => (
				DeliveryOutcome::PermanentFailure("unreadable payload".to_string()),
				Some(claim),
			),
		};

		self.reconcile(file, &outcome);
		Some(outcome)
	}

	/// Attempts every stored payload oldest first, stopping at the first
	/// transient failure.
	///
	/// A flush requested while another is running on the same coordinator
	/// returns an empty summary at once; the running flush makes another pass
	/// so payloads written in the meantime are not left behind.
	pub fn flush_store(&self) -> FlushSummary {
		let mut summary = FlushSummary::default();

		loop {
			self.rerun.store(true, Ordering::SeqCst);
			if self.flushing.swap(true, Ordering::SeqCst) {
				debug!(kind = %T::KIND, "flush already running, coalescing");
				return summary;
			}
			self.rerun.store(false, Ordering::SeqCst);

			let pass = self.flush_pass();
			self.flushing.store(false, Ordering::SeqCst);
			summary.absorb(pass);

			if summary.stopped_early || !self.rerun.load(Ordering::SeqCst) {
				break;
			}
		}

		if summary.attempted > 0 || summary.discarded > 0 {
			info!(
				kind = %T::KIND,
				attempted = summary.attempted,
				delivered = summary.delivered,
				discarded = summary.discarded,
				stopped_early = summary.stopped_early,
				"flushed stored payloads"
			);
		}
		summary
	}

	fn flush_pass(&self) -> FlushSummary {
		let mut summary = FlushSummary::default();

		for file in self.store.find_stored_files() {
			if self.in_flight.contains(file.key()) {
				debug!(key = %file.key(), kind = %T::KIND, "skipping payload in flight");
				continue;
			}

			if file.is_empty() {
				warn!(path = %file.path().display(), "discarding empty stored payload");
				self.store.delete_stored_files(std::slice::from_ref(&file));
				summary.discarded += 1;
				continue;
			}

			let Some(outcome) = self.deliver(&file, self.timeout) else {
				continue;
			};
			summary.attempted += 1;
			match outcome {
				DeliveryOutcome::Delivered => summary.delivered += 1,
				DeliveryOutcome::PermanentFailure(_) => summary.discarded += 1,
				DeliveryOutcome::TransientFailure(_) => {
					summary.stopped_early = true;
					break;
				}
			}
		}

		summary
	}

	/// The worker holds `claim` until the transport returns and hands it back
	/// with the outcome. After a timeout the claim stays with the abandoned
	/// worker.
	fn send_with_timeout(
		&self,
		body: Vec<u8>,
		timeout: Duration,
		claim: Claim,
	) -> (DeliveryOutcome, Option<Claim>) {
		let (tx, rx) = mpsc::sync_channel(1);
		let transport = Arc::clone(&self.transport);

		let spawned = std::thread::Builder::new()
			.name("loom-crash-delivery".to_string())
			.spawn(move || {
				let outcome = transport.send(&body, T::KIND, timeout);
				let _ = tx.send((outcome, claim));
			});

		if let Err(e) = spawned {
			let outcome =
				DeliveryOutcome::TransientFailure(format!("could not start delivery worker: {e}"));
			return (outcome, None);
		}

		match rx.recv_timeout(timeout) {
			Ok((outcome, claim)) => (outcome, Some(claim)),
			Err(mpsc::RecvTimeoutError::Timeout) => {
				let outcome = DeliveryOutcome::TransientFailure(format!(
					"no response within {}ms",
					timeout.as_millis()
				));
				(outcome, None)
			}
			Err(mpsc::RecvTimeoutError::Disconnected) => (
				DeliveryOutcome::TransientFailure("delivery worker exited without a result".to_string()),
				None,
			),
		}
	}

	fn reconcile(&self, file: &StoredFile, outcome: &DeliveryOutcome) {
		match outcome {
			DeliveryOutcome::Delivered => {
				debug!(key = %file.key(), kind = %T::KIND, "payload delivered");
				self.store.delete_stored_files(std::slice::from_ref(file));
			}
			DeliveryOutcome::PermanentFailure(reason) => {
				warn!(key = %file.key(), kind = %T::KIND, reason = %reason, "payload rejected, discarding");
				self.store.delete_stored_files(std::slice::from_ref(file));
			}
			DeliveryOutcome::TransientFailure(reason) => {
				info!(key = %file.key(), kind = %T::KIND, reason = %reason, "payload delivery deferred");
			}
		}
	}
}
