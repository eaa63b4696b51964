// Copyright 2018-2026 the Zipline authors. MIT license.
//! The built-in host services bound onto every `Endpoint` a JS application
//! runs against: a timer (`setTimeout`) and a console bridge. The timer
//! is grounded on `cli/global_timer.rs`, the original pre-`tokio` Deno
//! `GlobalTimer` (a new pending delay cancels whichever one was pending
//! before it), generalized from one delay at a time to many independently
//! cancellable `timeout_id`s and adapted onto `zipline-core`'s
//! `ZiplineService`/`ServiceAdapter` seam. The console bridge's level
//! mapping follows `cli/lsp/logging.rs`'s `log::Level`-keyed dispatch.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::Level;
use parking_lot::Mutex;
use zipline_core::{CallHandler, Endpoint, EncodedValue, FunctionDescriptor, ServiceAdapter, ZiplineError, ZiplineService};

/// The JS-side half of the timer bridge: fired by [`TokioTimerService`] once
/// a scheduled delay elapses, the way the source system's dispatcher runs
/// the microtask queued by `setTimeout`'s callback (spec §4.7). Fetched by
/// the host under the conventional name `zipline/js`.
#[async_trait]
pub trait JsDispatcherService: ZiplineService {
  async fn run_job(&self, timeout_id: u64);
}

static DISPATCHER_FUNCTIONS: &[FunctionDescriptor] = &[FunctionDescriptor {
  signature: "fun runJob(kotlin.Long): Unit",
  is_suspending: false,
}];

pub struct JsDispatcherAdapter;

#[async_trait]
impl ServiceAdapter<dyn JsDispatcherService> for JsDispatcherAdapter {
  fn functions(&self) -> &'static [FunctionDescriptor] {
    DISPATCHER_FUNCTIONS
  }

  async fn invoke_on_instance(
    &self,
    instance: &dyn JsDispatcherService,
    ordinal: usize,
    mut args: Vec<EncodedValue>,
  ) -> Result<EncodedValue, ZiplineError> {
    assert_eq!(ordinal, 0);
    let timeout_id: u64 =
      serde_json::from_value(args.remove(0).0).map_err(|e| ZiplineError::Protocol(e.to_string()))?;
    instance.run_job(timeout_id).await;
    Ok(EncodedValue::null())
  }

  fn create_outbound_proxy(&self, handler: Arc<CallHandler>) -> Arc<dyn JsDispatcherService> {
    struct Proxy(Arc<CallHandler>);

    #[async_trait]
    impl ZiplineService for Proxy {}

    #[async_trait]
    impl JsDispatcherService for Proxy {
      async fn run_job(&self, timeout_id: u64) {
        let args = vec![EncodedValue(serde_json::json!(timeout_id))];
        let _ = self.0.call(0, args).await;
      }
    }

    Arc::new(Proxy(handler))
  }
}

/// `setTimeout`/`clearTimeout`-equivalent (spec §4.7): `set_timeout`
/// schedules `js.runJob(timeoutId)` to fire on the dispatcher after
/// `delay_ms`, fire-and-forget from the caller's perspective; a repeated
/// `set_timeout` for the same id replaces (and aborts) the prior schedule.
/// `clear_timeout` cancels a still-pending job outright.
#[async_trait]
pub trait HostTimerService: ZiplineService {
  async fn set_timeout(&self, timeout_id: u64, delay_ms: u64);
  async fn clear_timeout(&self, timeout_id: u64);
}

/// Schedules each timer as its own spawned task rather than a single timer
/// wheel: the delay counts are small and this keeps cancellation a plain
/// `JoinHandle::abort`.
pub struct TokioTimerService {
  dispatcher: Arc<dyn JsDispatcherService>,
  pending: Mutex<HashMap<u64, tokio::task::JoinHandle<()>>>,
}

impl TokioTimerService {
  pub fn new(dispatcher: Arc<dyn JsDispatcherService>) -> Self {
    TokioTimerService {
      dispatcher,
      pending: Mutex::new(HashMap::new()),
    }
  }
}

#[async_trait]
impl ZiplineService for TokioTimerService {
  /// Cancelling the host scope cancels pending timers (spec §4.7): every
  /// job still scheduled when this service closes is aborted rather than
  /// left to fire into a torn-down bridge.
  async fn close(&self) {
    let pending = std::mem::take(&mut *self.pending.lock());
    for (_, handle) in pending {
      handle.abort();
    }
  }
}

#[async_trait]
impl HostTimerService for TokioTimerService {
  async fn set_timeout(&self, timeout_id: u64, delay_ms: u64) {
    let dispatcher = self.dispatcher.clone();
    let handle = tokio::spawn(async move {
      tokio::time::sleep(Duration::from_millis(delay_ms)).await;
      dispatcher.run_job(timeout_id).await;
    });
    if let Some(prior) = self.pending.lock().insert(timeout_id, handle) {
      prior.abort();
    }
  }

  async fn clear_timeout(&self, timeout_id: u64) {
    if let Some(handle) = self.pending.lock().remove(&timeout_id) {
      handle.abort();
    }
  }
}

static TIMER_FUNCTIONS: &[FunctionDescriptor] = &[
  FunctionDescriptor {
    signature: "fun setTimeout(kotlin.Long, kotlin.Long): Unit",
    is_suspending: false,
  },
  FunctionDescriptor {
    signature: "fun clearTimeout(kotlin.Long): Unit",
    is_suspending: false,
  },
];

pub struct TimerServiceAdapter;

#[async_trait]
impl ServiceAdapter<dyn HostTimerService> for TimerServiceAdapter {
  fn functions(&self) -> &'static [FunctionDescriptor] {
    TIMER_FUNCTIONS
  }

  async fn invoke_on_instance(
    &self,
    instance: &dyn HostTimerService,
    ordinal: usize,
    mut args: Vec<EncodedValue>,
  ) -> Result<EncodedValue, ZiplineError> {
    match ordinal {
      0 => {
        let timeout_id: u64 =
          serde_json::from_value(args.remove(0).0).map_err(|e| ZiplineError::Protocol(e.to_string()))?;
        let delay_ms: u64 =
          serde_json::from_value(args.remove(0).0).map_err(|e| ZiplineError::Protocol(e.to_string()))?;
        instance.set_timeout(timeout_id, delay_ms).await;
        Ok(EncodedValue::null())
      }
      1 => {
        let timeout_id: u64 =
          serde_json::from_value(args.remove(0).0).map_err(|e| ZiplineError::Protocol(e.to_string()))?;
        instance.clear_timeout(timeout_id).await;
        Ok(EncodedValue::null())
      }
      other => Err(ZiplineError::Protocol(format!("no ordinal {other}"))),
    }
  }

  fn create_outbound_proxy(&self, handler: Arc<CallHandler>) -> Arc<dyn HostTimerService> {
    struct Proxy(Arc<CallHandler>);

    #[async_trait]
    impl ZiplineService for Proxy {}

    #[async_trait]
    impl HostTimerService for Proxy {
      async fn set_timeout(&self, timeout_id: u64, delay_ms: u64) {
        let args = vec![
          EncodedValue(serde_json::json!(timeout_id)),
          EncodedValue(serde_json::json!(delay_ms)),
        ];
        let _ = self.0.call(0, args).await;
      }

      async fn clear_timeout(&self, timeout_id: u64) {
        let args = vec![EncodedValue(serde_json::json!(timeout_id))];
        let _ = self.0.call(1, args).await;
      }
    }

    Arc::new(Proxy(handler))
  }
}

/// `console.*`-equivalent: a fire-and-forget log call from JS, mapped onto
/// the `log` crate at a level matching the JS method name.
#[async_trait]
pub trait ConsoleService: ZiplineService {
  async fn log(&self, level: ConsoleLevel, message: String);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ConsoleLevel {
  Debug,
  Info,
  Warn,
  Error,
}

impl From<ConsoleLevel> for Level {
  fn from(level: ConsoleLevel) -> Level {
    match level {
      ConsoleLevel::Debug => Level::Debug,
      ConsoleLevel::Info => Level::Info,
      ConsoleLevel::Warn => Level::Warn,
      ConsoleLevel::Error => Level::Error,
    }
  }
}

pub struct LogConsoleService {
  target: &'static str,
}

impl LogConsoleService {
  pub fn new(target: &'static str) -> Self {
    LogConsoleService { target }
  }
}

#[async_trait]
impl ZiplineService for LogConsoleService {}

#[async_trait]
impl ConsoleService for LogConsoleService {
  async fn log(&self, level: ConsoleLevel, message: String) {
    log::log!(target: self.target, level.into(), "{message}");
  }
}

static CONSOLE_FUNCTIONS: &[FunctionDescriptor] = &[FunctionDescriptor {
  signature: "fun log(app.cash.zipline.ConsoleLevel, kotlin.String): Unit",
  is_suspending: false,
}];

pub struct ConsoleServiceAdapter;

#[async_trait]
impl ServiceAdapter<dyn ConsoleService> for ConsoleServiceAdapter {
  fn functions(&self) -> &'static [FunctionDescriptor] {
    CONSOLE_FUNCTIONS
  }

  async fn invoke_on_instance(
    &self,
    instance: &dyn ConsoleService,
    ordinal: usize,
    mut args: Vec<EncodedValue>,
  ) -> Result<EncodedValue, ZiplineError> {
    assert_eq!(ordinal, 0);
    let message: String = serde_json::from_value(args.remove(0).0).map_err(|e| ZiplineError::Protocol(e.to_string()))?;
    let level: ConsoleLevel =
      serde_json::from_value(args.remove(0).0).map_err(|e| ZiplineError::Protocol(e.to_string()))?;
    instance.log(level, message).await;
    Ok(EncodedValue::null())
  }

  fn create_outbound_proxy(&self, handler: Arc<CallHandler>) -> Arc<dyn ConsoleService> {
    struct Proxy(Arc<CallHandler>);

    #[async_trait]
    impl ZiplineService for Proxy {}

    #[async_trait]
    impl ConsoleService for Proxy {
      async fn log(&self, level: ConsoleLevel, message: String) {
        let args = vec![
          EncodedValue(serde_json::to_value(message).unwrap()),
          EncodedValue(serde_json::to_value(level).unwrap()),
        ];
        let _ = self.0.call(0, args).await;
      }
    }

    Arc::new(Proxy(handler))
  }
}

/// Binds the built-in host services onto `endpoint` under their
/// conventional names, the way the source system's `Zipline.create()`
/// wires up `consoleService`/`hostTimeApi` before any application module
/// is loaded. Takes the peer's `zipline/js` dispatcher to drive the timer
/// (spec §4.7 "Both sides fetch the peer platform service under
/// `zipline/js` / `zipline/host`") — the app side must have bound its
/// dispatcher under that name before (or racing, since `take` doesn't
/// round-trip) this runs.
pub async fn bootstrap_host_services(endpoint: &Endpoint, console_target: &'static str) {
  endpoint
    .bind::<dyn ConsoleService, _>(
      "zipline/host/console",
      Arc::new(LogConsoleService::new(console_target)),
      ConsoleServiceAdapter,
    )
    .await;
  let dispatcher = endpoint.take::<dyn JsDispatcherService, _>("zipline/js", &JsDispatcherAdapter, None);
  endpoint
    .bind::<dyn HostTimerService, _>(
      "zipline/host/timer",
      Arc::new(TokioTimerService::new(dispatcher)),
      TimerServiceAdapter,
    )
    .await;
}
