// Copyright 2018-2026 the Zipline authors. MIT license.
//! End-to-end scenarios tying `zipline-core`'s dispatch, `zipline-host`'s
//! built-in services, and `zipline-loader`'s module graph together through
//! the `Zipline` facade, the way the `zipline` crate's own embedders would
//! exercise it rather than any one crate's internals in isolation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use zipline::*;

fn connected(listener_a: Arc<dyn EventListener>, listener_b: Arc<dyn EventListener>) -> (Zipline, Zipline) {
  let channel_a = zipline_core::test_support::DirectChannel::new();
  let channel_b = zipline_core::test_support::DirectChannel::new();
  let host = Zipline::new(channel_a.clone(), listener_a);
  let app = Zipline::new(channel_b.clone(), listener_b);
  channel_a.bind_peer(app.endpoint.clone());
  channel_b.bind_peer(host.endpoint.clone());
  (host, app)
}

/// The app side's half of the timer bridge: recorded rather than wired to
/// a real JS dispatcher, since there's no engine here, just the bridge.
struct RecordingDispatcher(parking_lot::Mutex<Vec<u64>>);

#[async_trait]
impl ZiplineService for RecordingDispatcher {}

#[async_trait]
impl JsDispatcherService for RecordingDispatcher {
  async fn run_job(&self, timeout_id: u64) {
    self.0.lock().push(timeout_id);
  }
}

#[tokio::test]
async fn host_timer_and_console_are_reachable_from_the_app_side() {
  let (host, app) = connected(Arc::new(NoopEventListener), Arc::new(NoopEventListener));
  let dispatcher = Arc::new(RecordingDispatcher(parking_lot::Mutex::new(Vec::new())));
  app
    .endpoint
    .bind::<dyn JsDispatcherService, _>("zipline/js", dispatcher.clone(), JsDispatcherAdapter)
    .await;
  host.bootstrap_host_services("zipline.e2e").await;

  let timer = app.take::<dyn HostTimerService, _>("zipline/host/timer", &TimerServiceAdapter);
  timer.set_timeout(1, 15).await;
  tokio::time::sleep(Duration::from_millis(60)).await;
  assert_eq!(dispatcher.0.lock().as_slice(), &[1]);

  let console = app.take::<dyn ConsoleService, _>("zipline/host/console", &ConsoleServiceAdapter);
  console.log(ConsoleLevel::Info, "hello from app".to_string()).await;
}

#[async_trait]
trait Sleeper: ZiplineService {
  async fn sleep(&self, millis: u64);
}

struct LocalSleeper;

#[async_trait]
impl ZiplineService for LocalSleeper {}

#[async_trait]
impl Sleeper for LocalSleeper {
  async fn sleep(&self, millis: u64) {
    tokio::time::sleep(Duration::from_millis(millis)).await;
  }
}

struct SleeperProxy {
  handler: Arc<CallHandler>,
}

#[async_trait]
impl ZiplineService for SleeperProxy {}

#[async_trait]
impl Sleeper for SleeperProxy {
  async fn sleep(&self, millis: u64) {
    let args = vec![EncodedValue(serde_json::json!(millis))];
    let _ = self.handler.call_suspending(0, args).await;
  }
}

static SLEEPER_FUNCTIONS: &[FunctionDescriptor] = &[FunctionDescriptor {
  signature: "suspend fun sleep(kotlin.Long): Unit",
  is_suspending: true,
}];

struct SleeperAdapter;

#[async_trait]
impl ServiceAdapter<dyn Sleeper> for SleeperAdapter {
  fn functions(&self) -> &'static [FunctionDescriptor] {
    SLEEPER_FUNCTIONS
  }

  async fn invoke_on_instance(
    &self,
    instance: &dyn Sleeper,
    ordinal: usize,
    mut args: Vec<EncodedValue>,
  ) -> Result<EncodedValue, ZiplineError> {
    assert_eq!(ordinal, 0);
    let millis: u64 =
      serde_json::from_value(args.remove(0).0).map_err(|e| ZiplineError::Protocol(e.to_string()))?;
    instance.sleep(millis).await;
    Ok(EncodedValue::null())
  }

  fn create_outbound_proxy(&self, handler: Arc<CallHandler>) -> Arc<dyn Sleeper> {
    Arc::new(SleeperProxy { handler })
  }
}

/// Mirrors spec scenario 2 ("JS service `sleeper.sleep(10)` resumes after
/// >=10ms ... cancelling the caller before 10ms triggers exactly one
/// invocation of the peer-returned cancel service"): the caller abandons
/// the `.await` via `tokio::time::timeout`, and the host's in-flight
/// `sleep` task is aborted rather than left running forever.
#[tokio::test]
async fn abandoning_a_suspending_call_cancels_the_peer_side() {
  let (host, app) = connected(Arc::new(NoopEventListener), Arc::new(NoopEventListener));
  host
    .endpoint
    .bind::<dyn Sleeper, _>("app/sleeper", Arc::new(LocalSleeper), SleeperAdapter)
    .await;
  let sleeper = app.take::<dyn Sleeper, _>("app/sleeper", &SleeperAdapter);

  let outcome = tokio::time::timeout(Duration::from_millis(10), sleeper.sleep(500)).await;
  assert!(outcome.is_err(), "the 500ms sleep must not have resolved within 10ms");

  // Give the cancel-on-drop guard's spawned task a moment to run, then
  // confirm no continuation was left dangling on either side.
  tokio::time::sleep(Duration::from_millis(20)).await;
  assert_eq!(app.endpoint.incomplete_continuations(), 0);
  assert_eq!(host.endpoint.incomplete_continuations(), 0);
}

#[async_trait]
trait Greeter: ZiplineService {
  async fn greet(&self, name: String) -> String;
}

struct LocalGreeter;

#[async_trait]
impl ZiplineService for LocalGreeter {}

#[async_trait]
impl Greeter for LocalGreeter {
  async fn greet(&self, name: String) -> String {
    format!("hello, {name}")
  }
}

struct GreeterProxy {
  handler: Arc<CallHandler>,
}

#[async_trait]
impl ZiplineService for GreeterProxy {
  async fn close(&self) {
    let _ = self.handler.close().await;
  }
}

#[async_trait]
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

#[async_trait]
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

#[derive(Default)]
struct CountingListener {
  leaked: parking_lot::Mutex<Vec<String>>,
  calls: AtomicUsize,
}

impl EventListener for CountingListener {
  fn call_end(&self, _call: &CallEnvelope, _result: &CallResult, _token: CallStartToken) {
    self.calls.fetch_add(1, Ordering::SeqCst);
  }

  fn service_leaked(&self, name: &str) {
    self.leaked.lock().push(name.to_string());
  }
}

#[tokio::test]
async fn application_service_round_trips_and_closing_the_handle_releases_it() {
  let (host, app) = connected(Arc::new(NoopEventListener), Arc::new(NoopEventListener));
  host
    .endpoint
    .bind::<dyn Greeter, _>("app/greeter", Arc::new(LocalGreeter), GreeterAdapter)
    .await;
  let greeter = app.take::<dyn Greeter, _>("app/greeter", &GreeterAdapter);
  assert_eq!(greeter.greet("zipline".to_string()).await, "hello, zipline");
  assert_eq!(app.live_proxy_count(), 1);

  app.close().await;
  assert_eq!(app.live_proxy_count(), 0);
  assert!(app.endpoint.is_closed());
}

#[tokio::test]
async fn forgetting_to_close_a_taken_proxy_is_reported_as_a_leak() {
  let listener = Arc::new(CountingListener::default());
  let (host, app) = connected(Arc::new(NoopEventListener), listener.clone());
  host
    .endpoint
    .bind::<dyn Greeter, _>("app/greeter", Arc::new(LocalGreeter), GreeterAdapter)
    .await;
  {
    let greeter = app.take::<dyn Greeter, _>("app/greeter", &GreeterAdapter);
    assert_eq!(greeter.greet("leaky".to_string()).await, "hello, leaky");
  }
  assert!(listener.calls.load(Ordering::SeqCst) >= 1);
  assert_eq!(listener.leaked.lock().as_slice(), ["app/greeter"]);
}

/// End-to-end module loading: a three-module dependency graph is fetched
/// through embedded + cache + (never-reached) network fetchers and handed
/// to the embedder's callback strictly in dependency order, then the same
/// manifest is loaded a second time from a cold loader whose only source is
/// the warmed file cache, proving no network fetcher runs on a cache hit.
#[tokio::test]
async fn loading_an_application_delivers_modules_in_dependency_order_and_caches_them() {
  use zipline_loader::{sha256_hex, Manifest, ModuleDescriptor, ModuleFile};

  fn descriptor(url: &str, encoded: &[u8], deps: &[&str]) -> ModuleDescriptor {
    ModuleDescriptor {
      url: url.to_string(),
      depends_on_ids: deps.iter().map(|d| d.to_string()).collect(),
      sha256: sha256_hex(encoded),
    }
  }

  let shared_bytes = b"export const shared = 1;".to_vec();
  let ui_bytes = b"import './shared'; export const ui = 2;".to_vec();
  let app_bytes = b"import './ui'; export const main = () => {};".to_vec();
  let shared_encoded = ModuleFile::new(shared_bytes).encode();
  let ui_encoded = ModuleFile::new(ui_bytes).encode();
  let app_encoded = ModuleFile::new(app_bytes).encode();

  let mut embedded = HashMap::new();
  embedded.insert("shared".to_string(), shared_encoded.clone());
  embedded.insert("ui".to_string(), ui_encoded.clone());
  embedded.insert("app".to_string(), app_encoded.clone());

  let mut modules = HashMap::new();
  modules.insert(
    "app".to_string(),
    descriptor("https://example.invalid/app.js", &app_encoded, &["ui"]),
  );
  modules.insert(
    "ui".to_string(),
    descriptor("https://example.invalid/ui.js", &ui_encoded, &["shared"]),
  );
  modules.insert(
    "shared".to_string(),
    descriptor("https://example.invalid/shared.js", &shared_encoded, &[]),
  );
  let manifest = Manifest { modules };

  let dir = tempfile::tempdir().unwrap();
  let cache = Arc::new(zipline_loader::FileBlobStore::new(dir.path()));
  let chain = zipline_loader::FetchChain::new(
    vec![Box::new(zipline_loader::EmbeddedFetcher::new(embedded))],
    cache.clone(),
  );
  let loader = zipline_loader::ModuleLoader::new(chain);

  struct RecordingReceiver(parking_lot::Mutex<Vec<String>>);

  #[async_trait]
  impl ModuleReceiver for RecordingReceiver {
    async fn receive_module(&self, id: &str, _bytecode: &[u8]) {
      self.0.lock().push(id.to_string());
    }
  }

  let (host, _app) = connected(Arc::new(NoopEventListener), Arc::new(NoopEventListener));
  let receiver = RecordingReceiver(parking_lot::Mutex::new(Vec::new()));
  host.load_application("demo", &loader, &manifest, &receiver).await.unwrap();
  assert_eq!(receiver.0.lock().as_slice(), &["shared", "ui", "app"]);

  // A second loader backed only by the now-warmed cache (no embedded bytes
  // at all) must still resolve every module.
  struct PanicsFetcher;
  #[async_trait]
  impl zipline_loader::Fetcher for PanicsFetcher {
    async fn fetch(
      &self,
      _id: &str,
      _module: &zipline_loader::ModuleDescriptor,
    ) -> Result<Option<Vec<u8>>, zipline_loader::LoaderError> {
      panic!("cache should have satisfied every module already");
    }
  }
  let cold_chain = zipline_loader::FetchChain::new(
    vec![
      Box::new(zipline_loader::CachingFetcher::new(cache.clone())),
      Box::new(PanicsFetcher),
    ],
    cache,
  );
  let cold_loader = zipline_loader::ModuleLoader::new(cold_chain);
  let modules = cold_loader.receive("demo", &manifest).await.unwrap();
  assert_eq!(modules.len(), 3);
}

/// `load_or_fall_back` falling through to an embedded fallback manifest
/// when the primary (simulated "downloaded from the network") manifest's
/// bytes are unavailable anywhere in the fetch chain.
#[tokio::test]
async fn load_or_fall_back_uses_the_embedded_manifest_when_the_primary_is_unreachable() {
  use zipline_loader::{sha256_hex, EmbeddedFallback, Manifest, ModuleDescriptor, ModuleFile};

  let primary_bytes = b"primary app bytes".to_vec();
  let fallback_bytes = b"fallback app bytes".to_vec();
  let primary_encoded = ModuleFile::new(primary_bytes).encode();
  let fallback_encoded = ModuleFile::new(fallback_bytes.clone()).encode();

  let mut primary_modules = HashMap::new();
  primary_modules.insert(
    "app".to_string(),
    ModuleDescriptor {
      url: "https://example.invalid/app.js".to_string(),
      depends_on_ids: vec![],
      sha256: sha256_hex(&primary_encoded),
    },
  );
  let primary = Manifest { modules: primary_modules };

  let mut fallback_modules = HashMap::new();
  fallback_modules.insert(
    "app".to_string(),
    ModuleDescriptor {
      url: "https://example.invalid/app-fallback.js".to_string(),
      depends_on_ids: vec![],
      sha256: sha256_hex(&fallback_encoded),
    },
  );
  let fallback = Manifest {
    modules: fallback_modules,
  };

  // The primary chain has no fetcher that can produce the primary's bytes
  // at all, so the primary load fails and `load_or_fall_back` falls
  // through to the embedded fallback manifest, reached with no network.
  let cache = Arc::new(zipline_loader::MemoryBlobStore::new());
  let chain = zipline_loader::FetchChain::new(vec![Box::new(zipline_loader::EmbeddedFetcher::default())], cache);

  let mut manifests = HashMap::new();
  manifests.insert(
    "demo.manifest.zipline.json".to_string(),
    serde_json::to_vec(&fallback).unwrap(),
  );
  let mut fallback_module_bytes = HashMap::new();
  fallback_module_bytes.insert("app".to_string(), fallback_encoded);

  let loader = zipline_loader::ModuleLoader::new(chain)
    .with_embedded_fallback(EmbeddedFallback::new(manifests, fallback_module_bytes));

  let (applied, modules) = loader.load_or_fall_back("demo", &primary).await.unwrap();
  assert_eq!(applied, fallback);
  assert_eq!(modules[0].1, fallback_bytes);
}
