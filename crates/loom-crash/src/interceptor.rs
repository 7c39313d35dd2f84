// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Process-wide panic interception shared by every crash client.
//!
//! The interceptor owns the process panic hook while at least one handler is
//! registered. When it installs itself it keeps whatever hook was active
//! before (the std default hook or a foreign one) and calls it after every
//! registered handler has run, so other diagnostics still observe the panic
//! and unwinding proceeds exactly as it would without this crate. When the
//! last registration is removed the previous hook is put back, unless another
//! hook was set over the interceptor in the meantime. That hook is left in
//! place, and the interceptor's closure in its chain only forwards from then
//! on.
//!
//! Handlers run on the panicking thread. A panic raised inside a panic hook
//! aborts the process, so handlers report their faults through `Result`; an
//! error from one handler is logged and does not stop the others.

use std::collections::HashMap;
use std::fmt;
use std::panic::PanicHookInfo;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

use chrono::{DateTime, Utc};
use loom_crash_core::RawFrame;
use tracing::{debug, info, warn};

use crate::backtrace::capture_raw_frames;
use crate::error::Result;

type PanicHook = Box<dyn Fn(&PanicHookInfo<'_>) + Send + Sync + 'static>;

static NEXT_REGISTRATION: AtomicU64 = AtomicU64::new(1);
static STATE: OnceLock<Mutex<InterceptorState>> = OnceLock::new();

/// Serializes hook swaps. Held across `take_hook`/`set_hook`, which wait for
/// every panicking thread to leave its hook; `STATE` never is.
static TRANSITION: Mutex<()> = Mutex::new(());

/// Handle for one registration, used to remove it again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegistrationId(u64);

impl RegistrationId {
	fn next() -> Self {
		Self(NEXT_REGISTRATION.fetch_add(1, Ordering::Relaxed))
	}
}

impl fmt::Display for RegistrationId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "registration-{}", self.0)
	}
}

/// A panic as seen by registered handlers.
#[derive(Debug, Clone)]
pub struct FailureEvent {
	pub message: String,
	/// `file:line:column` of the panic, if known.
	pub location: Option<String>,
	/// Name of the panicking thread.
	pub thread: Option<String>,
	/// Captured stack, innermost first.
	pub frames: Vec<RawFrame>,
	pub occurred_at: DateTime<Utc>,
}

impl FailureEvent {
	fn from_panic(info: &PanicHookInfo<'_>) -> Self {
		Self {
			message: panic_message(info),
			location: info
				.location()
				.map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column())),
			thread: std::thread::current().name().map(str::to_string),
			frames: capture_raw_frames(),
			occurred_at: Utc::now(),
		}
	}
}

/// Receives every panic while registered.
///
/// Implementations must not panic.
pub trait FailureHandler: Send + Sync {
	fn handle_failure(&self, event: &FailureEvent) -> Result<()>;
}

struct Registration {
	id: RegistrationId,
	handler: Arc<dyn FailureHandler>,
}

/// The hook this interceptor put in place.
struct Installed {
	/// Hook that was active before, restored on uninstall.
	previous: Arc<PanicHook>,
	/// Address of the installed closure, compared against the current hook
	/// before restoring.
	hook_addr: usize,
	generation: u64,
}

#[derive(Default)]
struct InterceptorState {
	installed: Option<Installed>,
	/// Bumped on every install. A hook closure from an older generation only
	/// forwards to the hook it captured.
	generation: u64,
	registrations: HashMap<String, Vec<Registration>>,
}

impl InterceptorState {
	fn registration_count(&self) -> usize {
		self.registrations.values().map(Vec::len).sum()
	}
}

fn lock() -> MutexGuard<'static, InterceptorState> {
	STATE
		.get_or_init(|| Mutex::new(InterceptorState::default()))
		.lock()
		.unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn transition() -> MutexGuard<'static, ()> {
	TRANSITION
		.lock()
		.unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// The process-wide panic interceptor.
pub struct FailureInterceptor;

impl FailureInterceptor {
	/// Registers `handler` under `identifier`, installing the panic hook if
	/// this is the first registration.
	///
	/// Registering the same handler instance under the same identifier again
	/// returns the existing id. Distinct handlers may share an identifier and
	/// are each invoked once per panic.
	pub fn register(identifier: impl Into<String>, handler: Arc<dyn FailureHandler>) -> RegistrationId {
		let identifier = identifier.into();
		let _transition = transition();

		let needs_install = {
			let state = lock();
			if let Some(existing) = state
				.registrations
				.get(&identifier)
				.and_then(|regs| regs.iter().find(|r| Arc::ptr_eq(&r.handler, &handler)))
			{
				debug!(identifier = %identifier, id = %existing.id, "handler already registered");
				return existing.id;
			}
			state.installed.is_none()
		};

		if needs_install {
			install();
		}

		let id = RegistrationId::next();
		lock()
			.registrations
			.entry(identifier.clone())
			.or_default()
			.push(Registration { id, handler });

		debug!(identifier = %identifier, id = %id, "registered failure handler");
		id
	}

	/// Removes every registration under `identifier`. Returns how many were
	/// removed.
	pub fn unregister(identifier: &str) -> usize {
		let _transition = transition();
		let removed = lock()
			.registrations
			.remove(identifier)
			.map(|regs| regs.len())
			.unwrap_or(0);

		if removed > 0 {
			debug!(identifier = %identifier, removed, "unregistered failure handlers");
			uninstall_if_idle();
		}
		removed
	}

	/// Removes a single registration.
	pub fn unregister_registration(id: RegistrationId) -> bool {
		let _transition = transition();
		let mut removed = false;

		lock().registrations.retain(|_, regs| {
			let before = regs.len();
			regs.retain(|r| r.id != id);
			removed |= regs.len() != before;
			!regs.is_empty()
		});

		if removed {
			debug!(id = %id, "unregistered failure handler");
			uninstall_if_idle();
		}
		removed
	}

	/// Whether the interceptor's hook is in the panic hook chain.
	pub fn is_installed() -> bool {
		lock().installed.is_some()
	}

	pub fn registration_count() -> usize {
		lock().registration_count()
	}
}

fn hook_addr(hook: &PanicHook) -> usize {
	&**hook as *const _ as *const () as usize
}

/// Caller holds `TRANSITION` and not `STATE`.
fn install() {
	if std::thread::panicking() {
		warn!("cannot install panic interceptor from a panicking thread");
		return;
	}

	let previous: Arc<PanicHook> = Arc::new(std::panic::take_hook());
	let mut state = lock();
	state.generation += 1;
	let generation = state.generation;

	let forward = Arc::clone(&previous);
	let hook: PanicHook =
		Box::new(move |info: &PanicHookInfo<'_>| dispatch(info, generation, &forward));
	state.installed = Some(Installed {
		previous,
		hook_addr: hook_addr(&hook),
		generation,
	});
	drop(state);

	std::panic::set_hook(hook);
	info!("panic interceptor installed");
}

/// Caller holds `TRANSITION` and not `STATE`.
fn uninstall_if_idle() {
	let (previous, addr) = {
		let state = lock();
		if !state.registrations.is_empty() {
			return;
		}
		match &state.installed {
			Some(installed) => (Arc::clone(&installed.previous), installed.hook_addr),
			None => return,
		}
	};

	// The hook cannot be swapped from a panicking thread. Staying installed
	// with no registrations only forwards to the previous hook.
	if std::thread::panicking() {
		debug!("last handler removed during a panic, keeping interceptor installed");
		return;
	}

	let current = std::panic::take_hook();
	if hook_addr(&current) == addr {
		drop(current);
		std::panic::set_hook(Box::new(move |info: &PanicHookInfo<'_>| previous(info)));
		info!("panic interceptor removed, previous hook restored");
	} else {
		// Another hook was set over ours and may chain to it. Ours stays in
		// that chain, forwarding only.
		std::panic::set_hook(current);
		warn!("panic hook was replaced after the interceptor installed, leaving it in place");
	}
	lock().installed = None;
}

fn dispatch(info: &PanicHookInfo<'_>, generation: u64, previous: &PanicHook) {
	let handlers: Vec<(String, RegistrationId, Arc<dyn FailureHandler>)> = {
		let state = lock();
		if state.installed.as_ref().map(|i| i.generation) == Some(generation) {
			state
				.registrations
				.iter()
				.flat_map(|(identifier, regs)| {
					regs.iter()
						.map(move |r| (identifier.clone(), r.id, Arc::clone(&r.handler)))
				})
				.collect()
		} else {
			Vec::new()
		}
	};

	if !handlers.is_empty() {
		let event = FailureEvent::from_panic(info);

		for (identifier, id, handler) in handlers {
			if let Err(e) = handler.handle_failure(&event) {
				warn!(identifier = %identifier, id = %id, error = %e, "failure handler failed");
			}
		}
	}

	previous(info);
}

/// Extract the panic message from panic info.
fn panic_message(info: &PanicHookInfo<'_>) -> String {
	if let Some(s) = info.payload().downcast_ref::<&str>() {
		s.to_string()
	} else if let Some(s) = info.payload().downcast_ref::<String>() {
		s.clone()
	} else {
		"Box<dyn Any>".to_string()
	}
}
