// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Session tracking.
//!
//! A session marks one run of the application. Starting a session persists a
//! [`SessionPayload`] and delivers it in the background; handled and
//! unhandled counters are attached to every report raised during the session.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use loom_crash_core::{SessionId, SessionInfo, SessionPayload};
use tracing::{debug, warn};

use crate::delivery::DeliveryCoordinator;

#[derive(Debug, Clone, Copy)]
struct ActiveSession {
	id: SessionId,
	started_at: DateTime<Utc>,
}

/// Tracks the current session for one client.
pub struct SessionTracker {
	coordinator: Arc<DeliveryCoordinator<SessionPayload>>,
	app_version: Option<String>,
	release_stage: Option<String>,
	current: RwLock<Option<ActiveSession>>,
	handled: AtomicU32,
	unhandled: AtomicU32,
	crashed: AtomicBool,
}

impl SessionTracker {
	pub fn new(
		coordinator: Arc<DeliveryCoordinator<SessionPayload>>,
		app_version: Option<String>,
		release_stage: Option<String>,
	) -> Self {
		Self {
			coordinator,
			app_version,
			release_stage,
			current: RwLock::new(None),
			handled: AtomicU32::new(0),
			unhandled: AtomicU32::new(0),
			crashed: AtomicBool::new(false),
		}
	}

	/// Starts a new session, resetting the counters.
	///
	/// The session payload is written to the session store and delivered on a
	/// background worker. The session starts even if it could not be stored.
	pub fn start_session(&self) -> SessionId {
		let payload = SessionPayload::new(self.app_version.clone(), self.release_stage.clone());
		let session = ActiveSession {
			id: payload.id,
			started_at: payload.started_at,
		};

		{
			let mut current = self.current.write().unwrap_or_else(|e| e.into_inner());
			*current = Some(session);
			self.handled.store(0, Ordering::SeqCst);
			self.unhandled.store(0, Ordering::SeqCst);
			self.crashed.store(false, Ordering::SeqCst);
		}

		if self.coordinator.store().write(&payload).is_some() {
			self.flush_in_background();
		}

		debug!(session_id = %session.id, "session started");
		session.id
	}

	/// Ends the current session. Later reports carry no session info until a
	/// new session is started.
	pub fn end_session(&self) -> Option<SessionInfo> {
		let session = self
			.current
			.write()
			.unwrap_or_else(|e| e.into_inner())
			.take()?;
		debug!(session_id = %session.id, crashed = self.is_crashed(), "session ended");
		Some(self.info(session))
	}

	pub fn session_id(&self) -> Option<SessionId> {
		self.active().map(|s| s.id)
	}

	/// Records a handled error and returns the updated counters.
	pub fn record_handled(&self) -> Option<SessionInfo> {
		let session = self.active()?;
		self.handled.fetch_add(1, Ordering::SeqCst);
		Some(self.info(session))
	}

	/// Records an unhandled failure, marking the session crashed, and returns
	/// the updated counters.
	pub fn record_unhandled(&self) -> Option<SessionInfo> {
		let session = self.active()?;
		self.unhandled.fetch_add(1, Ordering::SeqCst);
		self.crashed.store(true, Ordering::SeqCst);
		Some(self.info(session))
	}

	/// Whether an unhandled failure occurred during the current session.
	pub fn is_crashed(&self) -> bool {
		self.crashed.load(Ordering::SeqCst)
	}

	/// Current counters without recording anything.
	pub fn session_info(&self) -> Option<SessionInfo> {
		self.active().map(|session| self.info(session))
	}

	fn active(&self) -> Option<ActiveSession> {
		*self.current.read().unwrap_or_else(|e| e.into_inner())
	}

	fn info(&self, session: ActiveSession) -> SessionInfo {
		SessionInfo {
			id: session.id,
			started_at: session.started_at,
			handled_count: self.handled.load(Ordering::SeqCst),
			unhandled_count: self.unhandled.load(Ordering::SeqCst),
		}
	}

	fn flush_in_background(&self) {
		let coordinator = Arc::clone(&self.coordinator);
		let spawned = std::thread::Builder::new()
			.name("loom-crash-sessions".to_string())
			.spawn(move || {
				coordinator.flush_store();
			});

		if let Err(e) = spawned {
			warn!(error = %e, "failed to start session delivery worker");
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::delivery::tests::ScriptedTransport;
	use crate::transport::DeliveryOutcome;
	use loom_crash_store::{PayloadStore, StoreConfig};
	use std::time::{Duration, Instant};
	use tempfile::TempDir;

	fn tracker(transport: ScriptedTransport) -> (SessionTracker, Arc<ScriptedTransport>, TempDir) {
		let tmp = TempDir::new().unwrap();
		let store = Arc::new(PayloadStore::new(tmp.path(), StoreConfig::default()));
		let transport = Arc::new(transport);
		let coordinator = Arc::new(DeliveryCoordinator::new(
			store,
			transport.clone(),
			Duration::from_secs(1),
		));
		let tracker = SessionTracker::new(coordinator, Some("1.0.0".to_string()), None);
		(tracker, transport, tmp)
	}

	fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
		let deadline = Instant::now() + Duration::from_secs(5);
		while Instant::now() < deadline {
			if condition() {
				return true;
			}
			std::thread::sleep(Duration::from_millis(10));
		}
		false
	}

	#[test]
	fn test_no_session_means_no_info() {
		let (tracker, _transport, _tmp) = tracker(ScriptedTransport::new([]));

		assert!(tracker.session_id().is_none());
		assert!(tracker.record_handled().is_none());
	}

	#[test]
	fn test_counters_track_the_session() {
		let (tracker, _transport, _tmp) = tracker(ScriptedTransport::new([]));
		let id = tracker.start_session();

		tracker.record_handled();
		tracker.record_handled();
		let info = tracker.record_unhandled().unwrap();

		assert_eq!(info.id, id);
		assert_eq!(info.handled_count, 2);
		assert_eq!(info.unhandled_count, 1);
		assert!(tracker.is_crashed());
	}

	#[test]
	fn test_new_session_resets_counters() {
		let (tracker, _transport, _tmp) = tracker(ScriptedTransport::new([]));
		let first = tracker.start_session();
		tracker.record_unhandled();

		let second = tracker.start_session();
		let info = tracker.session_info().unwrap();

		assert_ne!(first, second);
		assert_eq!(info.unhandled_count, 0);
		assert!(!tracker.is_crashed());
	}

	#[test]
	fn test_end_session_returns_final_counters() {
		let (tracker, _transport, _tmp) = tracker(ScriptedTransport::new([]));
		tracker.start_session();
		tracker.record_handled();

		let info = tracker.end_session().unwrap();

		assert_eq!(info.handled_count, 1);
		assert!(tracker.session_id().is_none());
		assert!(tracker.end_session().is_none());
	}

	#[test]
	fn test_session_payload_is_delivered() {
		let (tracker, transport, _tmp) = tracker(ScriptedTransport::new([]));
		let id = tracker.start_session();

		assert!(wait_for(|| transport.sent_count() == 1));
		let (kind, body) = transport.sent.lock().unwrap()[0].clone();
		let payload = <SessionPayload as loom_crash_core::Payload>::from_bytes(&body).unwrap();

		assert_eq!(kind, loom_crash_core::PayloadKind::Session);
		assert_eq!(payload.id, id);
		assert_eq!(payload.app_version.as_deref(), Some("1.0.0"));
	}

	#[test]
	fn test_undelivered_session_stays_queued() {
		let (tracker, transport, _tmp) = tracker(ScriptedTransport::new([
			DeliveryOutcome::TransientFailure("offline".to_string()),
		]));
		tracker.start_session();

		assert!(wait_for(|| transport.sent_count() == 1));
		assert!(wait_for(|| !tracker.coordinator.store().is_empty()));
		assert_eq!(tracker.coordinator.store().len(), 1);
	}
}
