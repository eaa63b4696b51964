// Copyright 2018-2026 the Zipline authors. MIT license.
//! `ZiplineScope`: a lifetime group of outbound proxies belonging to one
//! logical task (spec §4.5).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::endpoint::CallHandler;
use crate::error::MultiError;

struct ZiplineScopeInner {
  members: Mutex<Vec<Arc<CallHandler>>>,
  closed: AtomicBool,
}

/// A set of outbound proxies, tracked by their shared [`CallHandler`]
/// (independent of the proxy's concrete interface type `T` — see
/// `DESIGN.md` for why `CallHandler`, not the typed proxy, is the closable
/// unit). Cheap to clone (an `Arc` around its state), so a
/// [`crate::endpoint::ReferenceSerializer`] can hold the scope a decoded
/// reference proxy should join without borrowing it.
#[derive(Clone)]
pub struct ZiplineScope {
  inner: Arc<ZiplineScopeInner>,
}

impl Default for ZiplineScope {
  fn default() -> Self {
    Self::new()
  }
}

impl ZiplineScope {
  pub fn new() -> Self {
    ZiplineScope {
      inner: Arc::new(ZiplineScopeInner {
        members: Mutex::new(Vec::new()),
        closed: AtomicBool::new(false),
      }),
    }
  }

  pub fn is_closed(&self) -> bool {
    self.inner.closed.load(Ordering::Acquire)
  }

  /// Adds a freshly taken proxy's handler to the scope. If the scope is
  /// already closed, the added proxy is closed immediately rather than
  /// silently adopted (spec: "Adding to a closed scope immediately closes
  /// the added proxy").
  pub fn add(&self, handler: Arc<CallHandler>) {
    if self.is_closed() {
      let handler = handler.clone();
      tokio::spawn(async move {
        let _ = handler.close().await;
      });
      return;
    }
    self.inner.members.lock().push(handler);
  }

  /// Closes every still-open member exactly once. Idempotent: closing an
  /// already-closed scope is a no-op. Per-member failures are aggregated
  /// into a single [`MultiError`] rather than propagated individually.
  pub async fn close(&self) -> Result<(), MultiError> {
    if self.inner.closed.swap(true, Ordering::AcqRel) {
      return Ok(());
    }
    let members = std::mem::take(&mut *self.inner.members.lock());
    let mut errors = Vec::new();
    for handler in members {
      if let Err(err) = handler.close().await {
        errors.push(err);
      }
    }
    if errors.is_empty() {
      Ok(())
    } else {
      Err(MultiError(errors))
    }
  }

  /// Number of members currently tracked, for tests and leak diagnostics.
  pub fn len(&self) -> usize {
    self.inner.members.lock().len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

/// Closes `scope` and reports any aggregated failure to `on_error`
/// instead of propagating it, matching the spec's "reported to the
/// listener, not re-thrown."
pub async fn close_reporting<F: FnOnce(MultiError)>(scope: &ZiplineScope, on_error: F) {
  if let Err(multi) = scope.close().await {
    on_error(multi);
  }
}
