// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Crash client for capturing and reporting errors.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use loom_crash_core::{
	redact_map, Breadcrumb, BreadcrumbLevel, BreadcrumbTrail, ContextSnapshot, Report,
	ReportBuilder, ReportId, SessionId, SessionPayload, Severity, Stacktrace, UserContext,
	DEFAULT_MAX_BREADCRUMBS, MAX_BREADCRUMBS,
};
use loom_crash_store::{PayloadStore, StoreConfig};
use tracing::{debug, info, warn};

use crate::backtrace::capture_raw_frames;
use crate::config::{
	default_sessions_endpoint, default_store_dir, validate_api_key, validate_endpoint,
	ClientConfig, DEFAULT_DELIVERY_TIMEOUT, DEFAULT_MAX_STORED_REPORTS,
	DEFAULT_MAX_STORED_SESSIONS, DEFAULT_REDACT_KEYS, DEFAULT_RELEASE_STAGE,
};
use crate::delivery::{DeliveryCoordinator, FlushSummary};
use crate::error::{CrashSdkError, Result};
use crate::interceptor::{FailureEvent, FailureHandler, FailureInterceptor, RegistrationId};
use crate::schedule::{BackoffConfig, FlushTimer};
use crate::session::SessionTracker;
use crate::transport::{HttpTransport, Transport};

/// SDK name for identification.
const SDK_NAME: &str = "loom-crash-rust";
/// SDK version for identification.
const SDK_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Error class recorded for panics.
pub const PANIC_ERROR_CLASS: &str = "panic";

/// Supplies the context snapshot embedded in every report.
///
/// When no provider is configured the client uses the metadata set through
/// [`CrashClient::set_metadata`].
pub trait ContextProvider: Send + Sync {
	fn snapshot(&self) -> ContextSnapshot;
}

/// Runs on every report before it is persisted. The callback may edit the
/// report; returning `false` drops it. Callbacks also run on the panicking
/// thread, so they must not panic.
pub type OnErrorCallback = Arc<dyn Fn(&mut Report) -> bool + Send + Sync>;

/// Builder for constructing a CrashClient.
pub struct CrashClientBuilder {
	api_key: Option<String>,
	notify_endpoint: Option<String>,
	sessions_endpoint: Option<String>,
	project_packages: Vec<String>,
	release_stage: Option<String>,
	app_version: Option<String>,
	enabled_release_stages: Vec<String>,
	ignore_classes: Vec<String>,
	store_dir: Option<PathBuf>,
	max_stored_reports: usize,
	max_stored_sessions: usize,
	delivery_timeout: Duration,
	auto_detect_errors: bool,
	auto_track_sessions: bool,
	context_provider: Option<Arc<dyn ContextProvider>>,
	transport: Option<Arc<dyn Transport>>,
	max_breadcrumbs: usize,
	redact_keys: Option<Vec<String>>,
	on_error: Vec<OnErrorCallback>,
}

impl CrashClientBuilder {
	/// Creates a new builder with default settings.
	pub fn new() -> Self {
		Self {
			api_key: None,
			notify_endpoint: None,
			sessions_endpoint: None,
			project_packages: Vec::new(),
			release_stage: None,
			app_version: None,
			enabled_release_stages: Vec::new(),
			ignore_classes: Vec::new(),
			store_dir: None,
			max_stored_reports: DEFAULT_MAX_STORED_REPORTS,
			max_stored_sessions: DEFAULT_MAX_STORED_SESSIONS,
			delivery_timeout: DEFAULT_DELIVERY_TIMEOUT,
			auto_detect_errors: true,
			auto_track_sessions: true,
			context_provider: None,
			transport: None,
			max_breadcrumbs: DEFAULT_MAX_BREADCRUMBS,
			redact_keys: None,
			on_error: Vec::new(),
		}
	}

	/// Sets the API key sent with every payload.
	pub fn api_key(mut self, api_key: impl Into<String>) -> Self {
		self.api_key = Some(api_key.into());
		self
	}

	/// Sets the URL error reports are posted to.
	///
	/// Example: `https://loom.ghuntley.com/api/crash/notify`
	pub fn notify_endpoint(mut self, url: impl Into<String>) -> Self {
		self.notify_endpoint = Some(url.into());
		self
	}

	/// Sets the URL session payloads are posted to. Defaults to
	/// `<notify endpoint>/sessions`.
	pub fn sessions_endpoint(mut self, url: impl Into<String>) -> Self {
		self.sessions_endpoint = Some(url.into());
		self
	}

	/// Adds a module path prefix marking frames as project code.
	///
	/// Example: `my_app`
	pub fn project_package(mut self, prefix: impl Into<String>) -> Self {
		self.project_packages.push(prefix.into());
		self
	}

	pub fn project_packages<I, S>(mut self, prefixes: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		self.project_packages.extend(prefixes.into_iter().map(Into::into));
		self
	}

	/// Sets the release stage.
	///
	/// Example: `production`, `staging`, `development`
	pub fn release_stage(mut self, stage: impl Into<String>) -> Self {
		self.release_stage = Some(stage.into());
		self
	}

	/// Sets the application version.
	pub fn app_version(mut self, version: impl Into<String>) -> Self {
		self.app_version = Some(version.into());
		self
	}

	/// Limits capture to the given release stages.
	pub fn enabled_release_stages<I, S>(mut self, stages: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		self.enabled_release_stages = stages.into_iter().map(Into::into).collect();
		self
	}

	/// Error classes that are never reported.
	pub fn ignore_classes<I, S>(mut self, classes: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		self.ignore_classes = classes.into_iter().map(Into::into).collect();
		self
	}

	/// Overrides the store root. Defaults to a per-API-key directory under the
	/// user cache dir.
	pub fn store_dir(mut self, dir: impl Into<PathBuf>) -> Self {
		self.store_dir = Some(dir.into());
		self
	}

	pub fn max_stored_reports(mut self, max: usize) -> Self {
		self.max_stored_reports = max;
		self
	}

	pub fn max_stored_sessions(mut self, max: usize) -> Self {
		self.max_stored_sessions = max;
		self
	}

	/// Sets the time box for one delivery attempt.
	pub fn delivery_timeout(mut self, timeout: Duration) -> Self {
		self.delivery_timeout = timeout;
		self
	}

	/// Enables or disables automatic panic capture (default: enabled).
	pub fn auto_detect_errors(mut self, enabled: bool) -> Self {
		self.auto_detect_errors = enabled;
		self
	}

	/// Enables or disables starting a session on build (default: enabled).
	pub fn auto_track_sessions(mut self, enabled: bool) -> Self {
		self.auto_track_sessions = enabled;
		self
	}

	pub fn context_provider(mut self, provider: Arc<dyn ContextProvider>) -> Self {
		self.context_provider = Some(provider);
		self
	}

	/// Replaces the HTTP transport.
	pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
		self.transport = Some(transport);
		self
	}

	/// Sets how many breadcrumbs are kept (default 25, at most 100).
	pub fn max_breadcrumbs(mut self, max: usize) -> Self {
		self.max_breadcrumbs = max;
		self
	}

	/// Keys whose values are replaced with `[REDACTED]` in report context and
	/// breadcrumb data. Replaces the default (`password`).
	pub fn redact_keys<I, S>(mut self, keys: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		self.redact_keys = Some(keys.into_iter().map(Into::into).collect());
		self
	}

	/// Adds a callback run on every report before it is persisted, in the
	/// order added. See [`OnErrorCallback`].
	pub fn on_error<F>(mut self, callback: F) -> Self
	where
		F: Fn(&mut Report) -> bool + Send + Sync + 'static,
	{
		self.on_error.push(Arc::new(callback));
		self
	}

	/// Builds the CrashClient.
	///
	/// Opens the report and session stores, registers with the panic
	/// interceptor when `auto_detect_errors` is set, starts a session when
	/// `auto_track_sessions` is set, and flushes payloads left over from
	/// earlier runs on a background worker.
	pub fn build(self) -> Result<CrashClient> {
		let api_key = validate_api_key(self.api_key)?;
		let notify_endpoint = self
			.notify_endpoint
			.ok_or_else(|| CrashSdkError::InvalidEndpoint("notify endpoint is required".to_string()))?;
		let notify_endpoint = validate_endpoint(&notify_endpoint)?;
		let sessions_endpoint = match self.sessions_endpoint {
			Some(endpoint) => validate_endpoint(&endpoint)?,
			None => default_sessions_endpoint(&notify_endpoint),
		};

		let config = ClientConfig {
			store_dir: self.store_dir.unwrap_or_else(|| default_store_dir(&api_key)),
			api_key,
			notify_endpoint,
			sessions_endpoint,
			project_packages: self.project_packages,
			release_stage: self
				.release_stage
				.unwrap_or_else(|| DEFAULT_RELEASE_STAGE.to_string()),
			app_version: self.app_version,
			enabled_release_stages: self.enabled_release_stages,
			ignore_classes: self.ignore_classes,
			max_stored_reports: self.max_stored_reports,
			max_stored_sessions: self.max_stored_sessions,
			delivery_timeout: self.delivery_timeout,
			auto_detect_errors: self.auto_detect_errors,
			auto_track_sessions: self.auto_track_sessions,
			max_breadcrumbs: self.max_breadcrumbs.min(MAX_BREADCRUMBS),
			redact_keys: self
				.redact_keys
				.unwrap_or_else(|| DEFAULT_REDACT_KEYS.iter().map(|k| k.to_string()).collect()),
		};

		let transport = self.transport.unwrap_or_else(|| {
			Arc::new(HttpTransport::new(
				config.api_key.clone(),
				config.notify_endpoint.clone(),
				config.sessions_endpoint.clone(),
			))
		});

		let report_store = Arc::new(PayloadStore::<Report>::new(
			config.reports_dir(),
			StoreConfig::with_max_store_count(config.max_stored_reports),
		));
		let session_store = Arc::new(PayloadStore::<SessionPayload>::new(
			config.sessions_dir(),
			StoreConfig::with_max_store_count(config.max_stored_sessions),
		));

		let reports = Arc::new(DeliveryCoordinator::new(
			report_store,
			Arc::clone(&transport),
			config.delivery_timeout,
		));
		let session_coordinator = Arc::new(DeliveryCoordinator::new(
			session_store,
			transport,
			config.delivery_timeout,
		));
		let sessions = SessionTracker::new(
			Arc::clone(&session_coordinator),
			config.app_version.clone(),
			Some(config.release_stage.clone()),
		);

		let breadcrumbs = BreadcrumbTrail::new(config.max_breadcrumbs);
		let inner = Arc::new(CrashClientInner {
			config,
			reports,
			session_coordinator,
			sessions,
			metadata: RwLock::new(ContextSnapshot::new()),
			breadcrumbs: Mutex::new(breadcrumbs),
			user: RwLock::new(None),
			on_error: self.on_error,
			context_provider: self.context_provider,
			registration: Mutex::new(None),
			closed: AtomicBool::new(false),
		});

		let client = CrashClient { inner };
		client.flush_in_background();

		if client.inner.config.auto_detect_errors {
			client.install_panic_hook();
		}
		if client.inner.config.auto_track_sessions {
			client.start_session();
		}

		info!(
			notify_endpoint = %client.inner.config.notify_endpoint,
			store_dir = %client.inner.config.store_dir.display(),
			"Crash client initialized"
		);

		Ok(client)
	}
}

impl Default for CrashClientBuilder {
	fn default() -> Self {
		Self::new()
	}
}

/// Internal client state, shared with the panic interceptor.
struct CrashClientInner {
	config: ClientConfig,
	reports: Arc<DeliveryCoordinator<Report>>,
	session_coordinator: Arc<DeliveryCoordinator<SessionPayload>>,
	sessions: SessionTracker,
	metadata: RwLock<ContextSnapshot>,
	breadcrumbs: Mutex<BreadcrumbTrail>,
	user: RwLock<Option<UserContext>>,
	on_error: Vec<OnErrorCallback>,
	context_provider: Option<Arc<dyn ContextProvider>>,
	registration: Mutex<Option<RegistrationId>>,
	closed: AtomicBool,
}

impl CrashClientInner {
	fn is_closed(&self) -> bool {
		self.closed.load(Ordering::SeqCst)
	}

	fn should_capture(&self, error_class: &str) -> bool {
		if !self.config.should_notify_for_release_stage() {
			debug!(release_stage = %self.config.release_stage, "release stage not enabled, skipping report");
			return false;
		}
		if self.config.should_ignore_class(error_class) {
			debug!(error_class = %error_class, "error class ignored, skipping report");
			return false;
		}
		true
	}

	fn context(&self) -> ContextSnapshot {
		let mut context = match &self.context_provider {
			Some(provider) => provider.snapshot(),
			None => self
				.metadata
				.read()
				.unwrap_or_else(|e| e.into_inner())
				.clone(),
		};

		context.insert("sdk.name", SDK_NAME);
		context.insert("sdk.version", SDK_VERSION);
		context.insert("app.release_stage", self.config.release_stage.clone());
		if let Some(version) = &self.config.app_version {
			context.insert("app.version", version.clone());
		}
		context
	}

	fn stacktrace(&self, frames: &[loom_crash_core::RawFrame]) -> Stacktrace {
		Stacktrace::from_raw(frames, &self.config.project_packages)
	}

	/// Attaches the breadcrumb trail and user, runs the error callbacks and
	/// redacts. `None` when a callback dropped the report.
	fn finish(&self, builder: ReportBuilder) -> Option<Report> {
		let breadcrumbs = self
			.breadcrumbs
			.lock()
			.unwrap_or_else(|e| e.into_inner())
			.snapshot();
		let user = self.user.read().unwrap_or_else(|e| e.into_inner()).clone();
		let mut report = builder.breadcrumbs(breadcrumbs).user(user).build();

		for callback in &self.on_error {
			if !callback(&mut report) {
				debug!(report_id = %report.id, error_class = %report.error_class, "report dropped by error callback");
				return None;
			}
		}

		let keys = &self.config.redact_keys;
		if !keys.is_empty() {
			report.context.redact(keys);
			for breadcrumb in &mut report.breadcrumbs {
				redact_map(&mut breadcrumb.data, keys);
			}
		}
		Some(report)
	}

	fn leave_breadcrumb(&self, breadcrumb: Breadcrumb) {
		self.breadcrumbs
			.lock()
			.unwrap_or_else(|e| e.into_inner())
			.push(breadcrumb);
	}

	/// Later reports see an `error` breadcrumb for every captured report.
	fn leave_error_breadcrumb(&self, report: &Report) {
		self.leave_breadcrumb(
			Breadcrumb::new("error")
				.with_message(report.error_class.clone())
				.with_level(BreadcrumbLevel::Error)
				.with_data("message", report.message.clone())
				.with_data("severity", report.severity.to_string())
				.with_data("unhandled", report.unhandled),
		);
	}

	fn flush_blocking(&self) -> FlushSummary {
		let mut summary = self.reports.flush_store();
		summary.absorb(self.session_coordinator.flush_store());
		summary
	}
}

impl FailureHandler for CrashClientInner {
	fn handle_failure(&self, event: &FailureEvent) -> Result<()> {
		if self.is_closed() || !self.should_capture(PANIC_ERROR_CLASS) {
			return Ok(());
		}

		let mut context = self.context();
		if let Some(location) = &event.location {
			context.insert("failure.location", location.clone());
		}
		if let Some(thread) = &event.thread {
			context.insert("failure.thread", thread.clone());
		}

		let builder = Report::builder(PANIC_ERROR_CLASS, event.message.clone())
			.stacktrace(self.stacktrace(&event.frames))
			.context(context)
			.unhandled()
			.created_at(event.occurred_at);
		let Some(mut report) = self.finish(builder) else {
			return Ok(());
		};
		report.session = self.sessions.record_unhandled();

		let store = self.reports.store();
		let file = store
			.write(&report)
			.and_then(|key| store.stored_file(&key))
			.ok_or(CrashSdkError::NotPersisted)?;
		self.leave_error_breadcrumb(&report);

		let outcome = self
			.reports
			.attempt_deliver_sync(&file, self.config.delivery_timeout);
		info!(report_id = %report.id, outcome = %outcome, "captured panic");
		Ok(())
	}
}

/// Client for capturing crash reports and delivering them to a collector.
///
/// # Example
///
/// ```ignore
/// use loom_crash::CrashClient;
///
/// let client = CrashClient::builder()
///     .api_key("your_api_key")
///     .notify_endpoint("https://loom.ghuntley.com/api/crash/notify")
///     .project_package("my_app")
///     .app_version(env!("CARGO_PKG_VERSION"))
///     .release_stage("production")
///     .build()?;
///
/// client.set_metadata("tenant", "acme");
///
/// // Manual capture
/// if let Err(e) = do_something() {
///     client.notify(&e)?;
/// }
///
/// // Shutdown
/// client.flush().await?;
/// client.shutdown();
/// ```
#[derive(Clone)]
pub struct CrashClient {
	inner: Arc<CrashClientInner>,
}

impl CrashClient {
	/// Creates a new builder for constructing a CrashClient.
	pub fn builder() -> CrashClientBuilder {
		CrashClientBuilder::new()
	}

	pub fn config(&self) -> &ClientConfig {
		&self.inner.config
	}

	/// Registers this client with the panic interceptor. Calling it again is
	/// a no-op.
	pub fn install_panic_hook(&self) {
		let mut registration = self
			.inner
			.registration
			.lock()
			.unwrap_or_else(|e| e.into_inner());
		if registration.is_some() {
			return;
		}

		let handler: Arc<dyn FailureHandler> = self.inner.clone();
		let id = FailureInterceptor::register(self.inner.config.api_key.clone(), handler);
		*registration = Some(id);
		info!(registration = %id, "Panic hook installed");
	}

	/// Starts a new session.
	pub fn start_session(&self) -> SessionId {
		self.inner.sessions.start_session()
	}

	/// Returns the current session ID, if a session has been started.
	pub fn session_id(&self) -> Option<SessionId> {
		self.inner.sessions.session_id()
	}

	/// Captures a handled error.
	///
	/// The report is persisted before this returns and delivered on a
	/// background worker. Returns `None` when the report was filtered out or
	/// could not be stored.
	pub fn notify<E>(&self, error: &E) -> Result<Option<ReportId>>
	where
		E: std::error::Error + ?Sized,
	{
		self.notify_message(
			std::any::type_name::<E>(),
			error.to_string(),
			Severity::Warning,
		)
	}

	/// Captures a handled error with an explicit class, message and severity.
	pub fn notify_message(
		&self,
		error_class: impl Into<String>,
		message: impl Into<String>,
		severity: Severity,
	) -> Result<Option<ReportId>> {
		self.check_closed()?;

		let error_class = error_class.into();
		if !self.inner.should_capture(&error_class) {
			return Ok(None);
		}

		let builder = Report::builder(error_class, message)
			.stacktrace(self.inner.stacktrace(&capture_raw_frames()))
			.context(self.inner.context())
			.severity(severity);
		let Some(mut report) = self.inner.finish(builder) else {
			return Ok(None);
		};
		report.session = self.inner.sessions.record_handled();

		if self.inner.reports.store().write(&report).is_none() {
			return Ok(None);
		}
		self.inner.leave_error_breadcrumb(&report);

		debug!(report_id = %report.id, error_class = %report.error_class, "captured handled error");
		self.flush_in_background();
		Ok(Some(report.id))
	}

	/// Sets a metadata entry included in every report's context snapshot.
	/// Ignored when a custom [`ContextProvider`] is configured.
	pub fn set_metadata(&self, key: impl Into<String>, value: impl Into<serde_json::Value>) {
		self.inner
			.metadata
			.write()
			.unwrap_or_else(|e| e.into_inner())
			.insert(key, value);
	}

	/// Removes a metadata entry.
	pub fn clear_metadata(&self, key: &str) {
		self.inner
			.metadata
			.write()
			.unwrap_or_else(|e| e.into_inner())
			.remove(key);
	}

	/// Adds a breadcrumb to the trail attached to later reports.
	pub fn leave_breadcrumb(&self, breadcrumb: Breadcrumb) {
		self.inner.leave_breadcrumb(breadcrumb);
	}

	pub fn clear_breadcrumbs(&self) {
		self.inner
			.breadcrumbs
			.lock()
			.unwrap_or_else(|e| e.into_inner())
			.clear();
	}

	/// Sets the user attached to later reports.
	pub fn set_user(&self, user: UserContext) {
		*self.inner.user.write().unwrap_or_else(|e| e.into_inner()) = Some(user);
	}

	pub fn clear_user(&self) {
		*self.inner.user.write().unwrap_or_else(|e| e.into_inner()) = None;
	}

	/// Delivers every stored report and session payload.
	pub async fn flush(&self) -> Result<FlushSummary> {
		let inner = Arc::clone(&self.inner);
		let summary = tokio::task::spawn_blocking(move || inner.flush_blocking()).await?;
		Ok(summary)
	}

	/// Blocking form of [`Self::flush`]. Must not be called from inside an
	/// async runtime.
	pub fn flush_blocking(&self) -> FlushSummary {
		self.inner.flush_blocking()
	}

	/// Flushes every `interval` on the current tokio runtime, backing off
	/// while the collector is unavailable. The timer stops when dropped or
	/// when the client shuts down.
	pub fn start_flush_timer(&self, interval: Duration) -> Result<FlushTimer> {
		self.start_flush_timer_with_backoff(interval, BackoffConfig::default())
	}

	pub fn start_flush_timer_with_backoff(
		&self,
		interval: Duration,
		backoff: BackoffConfig,
	) -> Result<FlushTimer> {
		self.check_closed()?;
		tokio::runtime::Handle::try_current().map_err(|_| CrashSdkError::NoRuntime)?;

		let inner = Arc::clone(&self.inner);
		Ok(FlushTimer::spawn(interval, backoff, move || {
			let inner = Arc::clone(&inner);
			async move {
				if inner.is_closed() {
					return None;
				}
				match tokio::task::spawn_blocking(move || inner.flush_blocking()).await {
					Ok(summary) => Some(summary),
					Err(e) => {
						warn!(error = %e, "scheduled flush failed");
						None
					}
				}
			}
		}))
	}

	/// Shuts down the client, removing it from the panic interceptor and
	/// ending the current session.
	///
	/// Stored payloads stay on disk for the next run.
	pub fn shutdown(&self) {
		if self.inner.closed.swap(true, Ordering::SeqCst) {
			return;
		}

		let registration = self
			.inner
			.registration
			.lock()
			.unwrap_or_else(|e| e.into_inner())
			.take();
		if let Some(id) = registration {
			FailureInterceptor::unregister_registration(id);
		}
		self.inner.sessions.end_session();

		info!("Crash client shutdown");
	}

	/// Returns true if the client has been shut down.
	pub fn is_closed(&self) -> bool {
		self.inner.is_closed()
	}

	fn check_closed(&self) -> Result<()> {
		if self.inner.is_closed() {
			return Err(CrashSdkError::ClientShutdown);
		}
		Ok(())
	}

	fn flush_in_background(&self) {
		let inner = Arc::clone(&self.inner);
		let spawned = std::thread::Builder::new()
			.name("loom-crash-flush".to_string())
			.spawn(move || {
				inner.flush_blocking();
			});

		if let Err(e) = spawned {
			warn!(error = %e, "failed to start delivery worker");
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::delivery::tests::ScriptedTransport;
	use crate::transport::DeliveryOutcome;
	use loom_crash_core::{Payload, REDACTED};
	use std::time::Instant;
	use tempfile::TempDir;

	fn builder(tmp: &TempDir, transport: Arc<ScriptedTransport>) -> CrashClientBuilder {
		CrashClientBuilder::new()
			.api_key("key_123")
			.notify_endpoint("https://collector.example/notify")
			.store_dir(tmp.path())
			.auto_detect_errors(false)
			.auto_track_sessions(false)
			.transport(transport)
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

	fn sent_reports(transport: &ScriptedTransport) -> Vec<Report> {
		transport
			.sent
			.lock()
			.unwrap()
			.iter()
			.filter(|(kind, _)| *kind == loom_crash_core::PayloadKind::Report)
			.map(|(_, body)| Report::from_bytes(body).unwrap())
			.collect()
	}

	#[test]
	fn test_builder_requires_api_key() {
		let result = CrashClientBuilder::new()
			.notify_endpoint("https://example.com")
			.build();

		assert!(matches!(result, Err(CrashSdkError::InvalidApiKey)));
	}

	#[test]
	fn test_builder_requires_notify_endpoint() {
		let result = CrashClientBuilder::new().api_key("key_123").build();

		assert!(matches!(result, Err(CrashSdkError::InvalidEndpoint(_))));
	}

	#[test]
	fn test_builder_rejects_invalid_endpoint() {
		let result = CrashClientBuilder::new()
			.api_key("key_123")
			.notify_endpoint("not a url")
			.build();

		assert!(matches!(result, Err(CrashSdkError::InvalidEndpoint(_))));
	}

	#[test]
	fn test_builder_defaults() {
		let tmp = TempDir::new().unwrap();
		let client = builder(&tmp, Arc::new(ScriptedTransport::default()))
			.notify_endpoint("https://collector.example/notify/")
			.build()
			.unwrap();
		let config = client.config();

		assert_eq!(config.notify_endpoint, "https://collector.example/notify");
		assert_eq!(config.sessions_endpoint, "https://collector.example/notify/sessions");
		assert_eq!(config.release_stage, DEFAULT_RELEASE_STAGE);
		assert_eq!(config.max_stored_reports, DEFAULT_MAX_STORED_REPORTS);
		assert_eq!(config.delivery_timeout, DEFAULT_DELIVERY_TIMEOUT);
	}

	#[test]
	fn test_notify_persists_and_delivers() {
		let tmp = TempDir::new().unwrap();
		let transport = Arc::new(ScriptedTransport::default());
		let client = builder(&tmp, transport.clone())
			.project_package("loom_crash")
			.build()
			.unwrap();
		client.set_metadata("tenant", "acme");

		let err = std::io::Error::new(std::io::ErrorKind::Other, "disk full");
		let id = client.notify(&err).unwrap().unwrap();

		assert!(wait_for(|| sent_reports(&transport).len() == 1));
		let report = sent_reports(&transport).remove(0);
		assert_eq!(report.id, id);
		assert_eq!(report.error_class, "std::io::error::Error");
		assert_eq!(report.message, "disk full");
		assert_eq!(report.severity, Severity::Warning);
		assert!(!report.unhandled);
		assert_eq!(report.context.get("tenant"), Some(&serde_json::json!("acme")));
		assert!(wait_for(|| client.inner.reports.store().is_empty()));
	}

	#[test]
	fn test_undelivered_report_stays_queued() {
		let tmp = TempDir::new().unwrap();
		let transport = Arc::new(ScriptedTransport::new([DeliveryOutcome::TransientFailure(
			"offline".to_string(),
		)]));
		let client = builder(&tmp, transport.clone()).build().unwrap();

		client
			.notify_message("Timeout", "upstream timed out", Severity::Error)
			.unwrap();

		assert!(wait_for(|| transport.sent_count() == 1));
		assert_eq!(client.inner.reports.store().len(), 1);
	}

	#[test]
	fn test_leftover_reports_are_flushed_on_build() {
		let tmp = TempDir::new().unwrap();
		let store = PayloadStore::<Report>::new(tmp.path().join("reports"), StoreConfig::default());
		store.write(&Report::builder("panic", "from last run").unhandled().build());
		drop(store);

		let transport = Arc::new(ScriptedTransport::default());
		let _client = builder(&tmp, transport.clone()).build().unwrap();

		assert!(wait_for(|| sent_reports(&transport).len() == 1));
		assert_eq!(sent_reports(&transport)[0].message, "from last run");
	}

	#[test]
	fn test_ignored_class_is_not_stored() {
		let tmp = TempDir::new().unwrap();
		let client = builder(&tmp, Arc::new(ScriptedTransport::default()))
			.ignore_classes(["Noise"])
			.build()
			.unwrap();

		let id = client.notify_message("Noise", "ignored", Severity::Info).unwrap();

		assert!(id.is_none());
		assert!(client.inner.reports.store().is_empty());
	}

	#[test]
	fn test_disabled_release_stage_captures_nothing() {
		let tmp = TempDir::new().unwrap();
		let client = builder(&tmp, Arc::new(ScriptedTransport::default()))
			.release_stage("development")
			.enabled_release_stages(["production"])
			.build()
			.unwrap();

		let id = client.notify_message("Error", "nope", Severity::Error).unwrap();

		assert!(id.is_none());
		assert!(client.inner.reports.store().is_empty());
	}

	#[test]
	fn test_reports_carry_session_counters() {
		let tmp = TempDir::new().unwrap();
		let transport = Arc::new(ScriptedTransport::default());
		let client = builder(&tmp, transport.clone()).build().unwrap();
		let session_id = client.start_session();

		client.notify_message("A", "first", Severity::Warning).unwrap();
		client.notify_message("B", "second", Severity::Warning).unwrap();

		assert!(wait_for(|| sent_reports(&transport).len() == 2));
		let mut counts: Vec<u32> = sent_reports(&transport)
			.iter()
			.map(|r| {
				let session = r.session.as_ref().unwrap();
				assert_eq!(session.id, session_id);
				session.handled_count
			})
			.collect();
		counts.sort();
		assert_eq!(counts, vec![1, 2]);
	}

	#[test]
	fn test_unhandled_failure_is_persisted_and_delivered() {
		let tmp = TempDir::new().unwrap();
		let transport = Arc::new(ScriptedTransport::default());
		let client = builder(&tmp, transport.clone()).build().unwrap();
		client.start_session();

		let event = FailureEvent {
			message: "index out of bounds".to_string(),
			location: Some("src/main.rs:10:5".to_string()),
			thread: Some("worker".to_string()),
			frames: vec![loom_crash_core::RawFrame::new("run").with_class("my_app::worker")],
			occurred_at: chrono::Utc::now(),
		};
		client.inner.handle_failure(&event).unwrap();

		let report = sent_reports(&transport).remove(0);
		assert!(report.unhandled);
		assert_eq!(report.severity, Severity::Error);
		assert_eq!(report.error_class, PANIC_ERROR_CLASS);
		assert_eq!(report.stacktrace.frames[0].method, "my_app::worker.run");
		assert_eq!(report.session.unwrap().unhandled_count, 1);
		assert_eq!(
			report.context.get("failure.thread"),
			Some(&serde_json::json!("worker"))
		);
		assert!(client.inner.reports.store().is_empty());
	}

	#[test]
	fn test_shutdown_prevents_capture() {
		let tmp = TempDir::new().unwrap();
		let client = builder(&tmp, Arc::new(ScriptedTransport::default()))
			.build()
			.unwrap();

		client.shutdown();

		let result = client.notify_message("Error", "late", Severity::Error);
		assert!(matches!(result, Err(CrashSdkError::ClientShutdown)));
	}

	#[test]
	fn test_double_shutdown_is_ok() {
		let tmp = TempDir::new().unwrap();
		let client = builder(&tmp, Arc::new(ScriptedTransport::default()))
			.build()
			.unwrap();

		client.shutdown();
		client.shutdown();
		assert!(client.is_closed());
	}

	#[tokio::test]
	async fn test_flush_delivers_stored_reports() {
		let tmp = TempDir::new().unwrap();
		let transport = Arc::new(ScriptedTransport::default());
		let client = builder(&tmp, transport.clone()).build().unwrap();
		let store = client.inner.reports.store();
		store.write(&Report::builder("panic", "queued").build());

		// The startup flush may already have picked it up.
		let summary = client.flush().await.unwrap();

		assert!(summary.delivered <= 1);
		assert!(wait_for(|| store.is_empty()));
	}

	#[tokio::test]
	async fn test_flush_timer_requires_open_client() {
		let tmp = TempDir::new().unwrap();
		let client = builder(&tmp, Arc::new(ScriptedTransport::default()))
			.build()
			.unwrap();
		client.shutdown();

		let result = client.start_flush_timer(Duration::from_secs(1));
		assert!(matches!(result, Err(CrashSdkError::ClientShutdown)));
	}

	#[test]
	fn test_flush_timer_requires_runtime() {
		let tmp = TempDir::new().unwrap();
		let client = builder(&tmp, Arc::new(ScriptedTransport::default()))
			.build()
			.unwrap();

		let result = client.start_flush_timer(Duration::from_secs(1));
		assert!(matches!(result, Err(CrashSdkError::NoRuntime)));
	}

	#[test]
	fn test_reports_carry_breadcrumbs_and_user() {
		let tmp = TempDir::new().unwrap();
		let transport = Arc::new(ScriptedTransport::default());
		let client = builder(&tmp, transport.clone())
			.max_breadcrumbs(2)
			.build()
			.unwrap();
		client.set_user(UserContext {
			id: Some("u-1".to_string()),
			email: Some("ops@example.com".to_string()),
			name: None,
		});
		for step in ["login", "open", "save"] {
			client.leave_breadcrumb(Breadcrumb::new("navigation").with_message(step));
		}

		client.notify_message("SaveFailed", "disk full", Severity::Error).unwrap();

		assert!(wait_for(|| sent_reports(&transport).len() == 1));
		let report = sent_reports(&transport).remove(0);
		let trail: Vec<_> = report
			.breadcrumbs
			.iter()
			.filter_map(|b| b.message.as_deref())
			.collect();
		assert_eq!(trail, vec!["open", "save"]);
		assert_eq!(report.user.unwrap().id.as_deref(), Some("u-1"));
	}

	#[test]
	fn test_captured_report_leaves_error_breadcrumb() {
		let tmp = TempDir::new().unwrap();
		let transport = Arc::new(ScriptedTransport::default());
		let client = builder(&tmp, transport.clone()).build().unwrap();
		client.clear_user();

		client.notify_message("First", "one", Severity::Warning).unwrap();
		client.notify_message("Second", "two", Severity::Warning).unwrap();

		assert!(wait_for(|| sent_reports(&transport).len() == 2));
		let second = sent_reports(&transport)
			.into_iter()
			.find(|r| r.error_class == "Second")
			.unwrap();
		let crumb = second.breadcrumbs.last().unwrap();
		assert_eq!(crumb.category, "error");
		assert_eq!(crumb.message.as_deref(), Some("First"));
		assert_eq!(crumb.level, BreadcrumbLevel::Error);
		assert!(second.user.is_none());
	}

	#[test]
	fn test_on_error_can_edit_report() {
		let tmp = TempDir::new().unwrap();
		let transport = Arc::new(ScriptedTransport::default());
		let client = builder(&tmp, transport.clone())
			.on_error(|report| {
				report.severity = Severity::Info;
				report.context.insert("team", "payments");
				true
			})
			.build()
			.unwrap();

		client.notify_message("Slow", "took 3s", Severity::Warning).unwrap();

		assert!(wait_for(|| sent_reports(&transport).len() == 1));
		let report = sent_reports(&transport).remove(0);
		assert_eq!(report.severity, Severity::Info);
		assert_eq!(report.context.get("team"), Some(&serde_json::json!("payments")));
	}

	#[test]
	fn test_on_error_can_drop_report() {
		let tmp = TempDir::new().unwrap();
		let client = builder(&tmp, Arc::new(ScriptedTransport::default()))
			.on_error(|report| report.error_class != "Expected")
			.build()
			.unwrap();
		client.start_session();

		let id = client
			.notify_message("Expected", "user cancelled", Severity::Info)
			.unwrap();

		assert!(id.is_none());
		assert!(client.inner.reports.store().is_empty());
		assert_eq!(client.inner.sessions.session_info().unwrap().handled_count, 0);
	}

	#[test]
	fn test_dropped_panic_report_is_not_stored() {
		let tmp = TempDir::new().unwrap();
		let transport = Arc::new(ScriptedTransport::default());
		let client = builder(&tmp, transport.clone())
			.on_error(|report| !report.unhandled)
			.build()
			.unwrap();

		let event = FailureEvent {
			message: "boom".to_string(),
			location: None,
			thread: None,
			frames: Vec::new(),
			occurred_at: chrono::Utc::now(),
		};
		client.inner.handle_failure(&event).unwrap();

		assert!(client.inner.reports.store().is_empty());
		assert!(sent_reports(&transport).is_empty());
	}

	#[test]
	fn test_redact_keys_cover_context_and_breadcrumbs() {
		let tmp = TempDir::new().unwrap();
		let transport = Arc::new(ScriptedTransport::default());
		let client = builder(&tmp, transport.clone())
			.redact_keys(["password", "token"])
			.build()
			.unwrap();
		client.set_metadata("password", "hunter2");
		client.set_metadata("tenant", "acme");
		client.leave_breadcrumb(Breadcrumb::new("request").with_data("token", "abc"));

		client.notify_message("AuthFailed", "denied", Severity::Warning).unwrap();

		assert!(wait_for(|| sent_reports(&transport).len() == 1));
		let report = sent_reports(&transport).remove(0);
		assert_eq!(report.context.get("password"), Some(&serde_json::json!(REDACTED)));
		assert_eq!(report.context.get("tenant"), Some(&serde_json::json!("acme")));
		assert_eq!(report.breadcrumbs[0].data["token"], REDACTED);
	}

	#[test]
	fn test_breadcrumb_and_redaction_defaults() {
		let tmp = TempDir::new().unwrap();
		let client = builder(&tmp, Arc::new(ScriptedTransport::default()))
			.max_breadcrumbs(500)
			.build()
			.unwrap();

		assert_eq!(client.config().max_breadcrumbs, MAX_BREADCRUMBS);
		assert_eq!(client.config().redact_keys, vec!["password".to_string()]);
	}

	struct FixedContext;

	impl ContextProvider for FixedContext {
		fn snapshot(&self) -> ContextSnapshot {
			ContextSnapshot::new().with("os", "plan9")
		}
	}

	#[test]
	fn test_context_provider_replaces_metadata() {
		let tmp = TempDir::new().unwrap();
		let client = builder(&tmp, Arc::new(ScriptedTransport::default()))
			.context_provider(Arc::new(FixedContext))
			.build()
			.unwrap();
		client.set_metadata("tenant", "acme");

		let context = client.inner.context();

		assert_eq!(context.get("os"), Some(&serde_json::json!("plan9")));
		assert!(context.get("tenant").is_none());
		assert_eq!(context.get("sdk.name"), Some(&serde_json::json!(SDK_NAME)));
	}
}
