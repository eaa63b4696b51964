// Copyright 2018-2026 the Zipline authors. MIT license.
//! `zipline`: the façade tying the dispatch core (`zipline-core`), the
//! module loader (`zipline-loader`), and the host glue (`zipline-host`)
//! into one handle, the way the source system's top-level `Zipline`
//! class sits over its `Endpoint`/`ManifestVerifier`/engine trio.

use std::sync::Arc;

use async_trait::async_trait;
use zipline_core::{CallChannel, Endpoint, EventListener, NoopEventListener, ZiplineScope};
use zipline_host::bootstrap_host_services;
use zipline_loader::{Manifest, ModuleLoader};

pub use zipline_core::*;
pub use zipline_host::*;
pub use zipline_loader::*;

/// The seam a real JS engine binding plugs its "evaluate this module's
/// bytecode" call into, handed each module of a loaded application in
/// dependency order (spec §4.6). An `async fn` rather than a plain closure
/// because evaluating a module against an engine is itself typically an
/// async operation (scheduled on the engine's own dispatcher thread).
#[async_trait]
pub trait ModuleReceiver: Send + Sync {
  async fn receive_module(&self, id: &str, bytecode: &[u8]);
}

/// One side of a running bridge: an `Endpoint` plus the default
/// [`ZiplineScope`] every service taken through this handle is tracked by,
/// so `close()` releases everything at once (spec §4.5, §4.7).
pub struct Zipline {
  pub endpoint: Endpoint,
  scope: ZiplineScope,
}

impl Zipline {
  pub fn new(channel: Arc<dyn CallChannel>, listener: Arc<dyn EventListener>) -> Self {
    Zipline {
      endpoint: Endpoint::new(channel, listener),
      scope: ZiplineScope::new(),
    }
  }

  pub fn with_default_listener(channel: Arc<dyn CallChannel>) -> Self {
    Self::new(channel, Arc::new(NoopEventListener))
  }

  /// Binds the built-in console/timer host services, the services every
  /// loaded application can assume are already present.
  pub async fn bootstrap_host_services(&self, console_target: &'static str) {
    bootstrap_host_services(&self.endpoint, console_target).await;
  }

  /// Takes a service scoped to this handle's lifetime: it's closed
  /// automatically by [`Zipline::close`] along with everything else taken
  /// through this handle.
  pub fn take<T, A>(&self, name: impl Into<String>, adapter: &A) -> Arc<T>
  where
    T: ZiplineService + ?Sized,
    A: ServiceAdapter<T>,
  {
    self.endpoint.take(name, adapter, Some(&self.scope))
  }

  /// Downloads `manifest`'s modules through `loader` in dependency order,
  /// handing each module's bytes to `receiver` as it becomes available for
  /// evaluation.
  pub async fn load_application(
    &self,
    app_name: &str,
    loader: &ModuleLoader,
    manifest: &Manifest,
    receiver: &dyn ModuleReceiver,
  ) -> Result<(), LoaderError> {
    let modules = loader.receive(app_name, manifest).await?;
    for (id, bytes) in &modules {
      receiver.receive_module(id, bytes).await;
    }
    Ok(())
  }

  /// Number of outbound proxies taken through this handle and not yet
  /// closed — nonzero after `close()` indicates a leaked service (spec §7
  /// "no leaked continuations or services").
  pub fn live_proxy_count(&self) -> usize {
    self.scope.len()
  }

  /// Closes every proxy taken through this handle, then the underlying
  /// `Endpoint`. Per-proxy close failures are aggregated and reported to
  /// the listener rather than propagated (spec §4.5).
  pub async fn close(&self) {
    zipline_core::close_reporting(&self.scope, |errors| {
      log::warn!("errors while closing zipline scope: {errors}");
    })
    .await;
    self.endpoint.close().await;
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use zipline_core::test_support::connected_pair_with_listeners;
  use zipline_core::{CallResult, CallStartToken, FunctionDescriptor};

  #[derive(Default)]
  struct RecordingListener {
    leaked: parking_lot::Mutex<Vec<String>>,
    calls: std::sync::atomic::AtomicU64,
  }

  impl EventListener for RecordingListener {
    fn call_start(&self, _call: &zipline_core::CallEnvelope) -> CallStartToken {
      self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
      CallStartToken(0)
    }

    fn call_end(&self, _call: &zipline_core::CallEnvelope, _result: &CallResult, _token: CallStartToken) {}

    fn service_leaked(&self, name: &str) {
      self.leaked.lock().push(name.to_string());
    }
  }

  #[async_trait::async_trait]
  trait Greeter: ZiplineService {
    async fn greet(&self, name: String) -> String;
  }

  struct LocalGreeter;

  #[async_trait::async_trait]
  impl ZiplineService for LocalGreeter {}

  #[async_trait::async_trait]
  impl Greeter for LocalGreeter {
    async fn greet(&self, name: String) -> String {
      format!("hello, {name}")
    }
  }

  struct GreeterProxy {
    handler: Arc<CallHandler>,
  }

  #[async_trait::async_trait]
  impl ZiplineService for GreeterProxy {
    async fn close(&self) {
      let _ = self.handler.close().await;
    }
  }

  #[async_trait::async_trait]
  impl Greeter for GreeterProxy {
    async fn greet(&self, name: String) -> String {
      let args = vec![EncodedValue(serde_json::json!(name))];
      let result = self.handler.call(0, args).await.expect("greet call");
      serde_json::from_value(result.0).expect("string result")
    }
  }

  static GREETER_FUNCTIONS: &[FunctionDescriptor] = &[
    FunctionDescriptor {
      signature: "fun greet(kotlin.String): kotlin.String",
      is_suspending: false,
    },
    FunctionDescriptor {
      signature: "fun close(): Unit",
      is_suspending: false,
    },
  ];

  struct GreeterAdapter;

  #[async_trait::async_trait]
  impl ServiceAdapter<dyn Greeter> for GreeterAdapter {
    fn functions(&self) -> &'static [FunctionDescriptor] {
      GREETER_FUNCTIONS
    }

    async fn invoke_on_instance(
      &self,
      instance: &dyn Greeter,
      ordinal: usize,
      mut args: Vec<EncodedValue>,
    ) -> Result<EncodedValue, ZiplineError> {
      match ordinal {
        0 => {
          let name: String = serde_json::from_value(args.remove(0).0).unwrap();
          Ok(EncodedValue(serde_json::to_value(instance.greet(name).await).unwrap()))
        }
        1 => {
          instance.close().await;
          Ok(EncodedValue::null())
        }
        other => Err(ZiplineError::Protocol(format!("no ordinal {other}"))),
      }
    }

    fn create_outbound_proxy(&self, handler: Arc<CallHandler>) -> Arc<dyn Greeter> {
      Arc::new(GreeterProxy { handler })
    }
  }

  /// Builds two `Zipline` handles wired directly to each other's
  /// `Endpoint`, the same in-process transport `zipline-core`'s own tests
  /// use in place of a real two-FIFO engine bridge.
  fn connected_handles(
    listener_a: Arc<dyn EventListener>,
    listener_b: Arc<dyn EventListener>,
  ) -> (Zipline, Zipline) {
    let channel_a = zipline_core::test_support::DirectChannel::new();
    let channel_b = zipline_core::test_support::DirectChannel::new();
    let host = Zipline::new(channel_a.clone(), listener_a);
    let app = Zipline::new(channel_b.clone(), listener_b);
    channel_a.bind_peer(app.endpoint.clone());
    channel_b.bind_peer(host.endpoint.clone());
    (host, app)
  }

  #[tokio::test]
  async fn simple_echo_round_trips_through_the_facade() {
    let (host, app) = connected_handles(Arc::new(NoopEventListener), Arc::new(NoopEventListener));
    host
      .endpoint
      .bind::<dyn Greeter, _>("greeter", Arc::new(LocalGreeter), GreeterAdapter)
      .await;
    let greeter = app.take::<dyn Greeter, _>("greeter", &GreeterAdapter);
    assert_eq!(greeter.greet("world".to_string()).await, "hello, world");
  }

  #[tokio::test]
  async fn closing_the_handle_closes_every_taken_proxy() {
    let (host, app) = connected_handles(Arc::new(NoopEventListener), Arc::new(NoopEventListener));
    host
      .endpoint
      .bind::<dyn Greeter, _>("greeter", Arc::new(LocalGreeter), GreeterAdapter)
      .await;
    let greeter = app.take::<dyn Greeter, _>("greeter", &GreeterAdapter);
    assert_eq!(app.live_proxy_count(), 1);
    app.close().await;
    assert_eq!(app.live_proxy_count(), 0);
    assert!(app.endpoint.is_closed());
    let _ = greeter; // held only to prove the scope (not the proxy's drop) did the closing
  }

  #[tokio::test]
  async fn dropping_a_proxy_without_closing_it_reports_a_leak() {
    let listener = Arc::new(RecordingListener::default());
    let (host, app) = connected_handles(Arc::new(NoopEventListener), listener.clone());
    host
      .endpoint
      .bind::<dyn Greeter, _>("greeter", Arc::new(LocalGreeter), GreeterAdapter)
      .await;
    {
      let greeter = app.take::<dyn Greeter, _>("greeter", &GreeterAdapter);
      assert_eq!(greeter.greet("leak".to_string()).await, "hello, leak");
      // `greeter` drops here without `.close()`.
    }
    assert_eq!(listener.leaked.lock().as_slice(), ["greeter"]);
  }
}
