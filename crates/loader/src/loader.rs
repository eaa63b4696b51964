// Copyright 2018-2026 the Zipline authors. MIT license.
//! `ModuleLoader`: downloads a manifest's module graph with bounded
//! concurrency, verifies, unwraps, and caches each module, and delivers the
//! results in dependency order. Also hosts the "load or fall back" and
//! continuous polling entry points (spec §4.6).
//!
//! Grounded on `tests/util/server/src/semaphore.rs`'s `tokio::sync::Semaphore`
//! pattern for bounding concurrent work, and on `cli/module_loader.rs`'s
//! separation of "resolve the graph" from "fetch each node."

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use tokio::sync::Semaphore;
use zipline_core::{EventListener, NoopEventListener};

use crate::cache::MemoryBlobStore;
use crate::error::LoaderError;
use crate::fetcher::{EmbeddedFetcher, FetchChain};
use crate::manifest::Manifest;
use crate::module_file::ModuleFile;

/// Default number of modules downloaded concurrently (spec §4.6 "bounded
/// concurrency, default 3").
pub const DEFAULT_DOWNLOAD_CONCURRENCY: usize = 3;

/// The embedded-at-build-time assets `load_or_fall_back` draws on when the
/// primary load fails: a manifest per application name (filename
/// convention `<appName>.manifest.zipline.json`) plus the module bytes it
/// references, reachable with no network at all (spec §4.6 "Fallback").
pub struct EmbeddedFallback {
  manifests: HashMap<String, Vec<u8>>,
  modules: HashMap<String, Vec<u8>>,
}

impl EmbeddedFallback {
  pub fn new(manifests: HashMap<String, Vec<u8>>, modules: HashMap<String, Vec<u8>>) -> Self {
    EmbeddedFallback { manifests, modules }
  }

  fn manifest_for(&self, app_name: &str) -> Option<&[u8]> {
    self.manifests.get(&format!("{app_name}.manifest.zipline.json")).map(Vec::as_slice)
  }
}

pub struct ModuleLoader {
  chain: FetchChain,
  max_concurrent_downloads: usize,
  concurrency: Arc<Semaphore>,
  listener: Arc<dyn EventListener>,
  embedded_fallback: Option<EmbeddedFallback>,
}

impl ModuleLoader {
  pub fn new(chain: FetchChain) -> Self {
    Self::with_concurrency(chain, DEFAULT_DOWNLOAD_CONCURRENCY, Arc::new(NoopEventListener))
  }

  pub fn with_concurrency(chain: FetchChain, max_concurrent_downloads: usize, listener: Arc<dyn EventListener>) -> Self {
    let max_concurrent_downloads = max_concurrent_downloads.max(1);
    ModuleLoader {
      chain,
      max_concurrent_downloads,
      concurrency: Arc::new(Semaphore::new(max_concurrent_downloads)),
      listener,
      embedded_fallback: None,
    }
  }

  /// Attaches the embedded fallback assets `load_or_fall_back` uses when
  /// the primary load fails.
  pub fn with_embedded_fallback(mut self, fallback: EmbeddedFallback) -> Self {
    self.embedded_fallback = Some(fallback);
    self
  }

  pub fn listener(&self) -> &Arc<dyn EventListener> {
    &self.listener
  }

  /// Downloads every module in `manifest`, respecting the bounded download
  /// concurrency, and returns `(id, bytecode)` pairs in dependency order —
  /// downloads may complete out of order, but delivery never does (spec
  /// invariant: "a module's dependencies are always received first").
  pub async fn receive(&self, app_name: &str, manifest: &Manifest) -> Result<Vec<(String, Vec<u8>)>, LoaderError> {
    let order = manifest.load_order()?;
    self.listener.application_load_start(app_name);

    let results: Vec<Result<(String, Vec<u8>), LoaderError>> = stream::iter(order.iter().copied())
      .map(|(id, module)| {
        let semaphore = self.concurrency.clone();
        let chain = &self.chain;
        let listener = self.listener.clone();
        let app_name = app_name.to_string();
        async move {
          let _permit = semaphore.acquire_owned().await.expect("semaphore is never closed");
          listener.download_start(&app_name, &module.url);
          match chain.fetch(id, module).await.and_then(|bytes| ModuleFile::decode(id, &bytes)) {
            Ok(file) => {
              listener.download_end(&app_name, &module.url);
              Ok((id.to_string(), file.bytecode))
            }
            Err(err) => {
              listener.download_failed(&app_name, &module.url, &err.to_string());
              Err(err)
            }
          }
        }
      })
      .buffer_unordered(usize::MAX)
      .collect()
      .await;

    let mut bytecode_by_id: HashMap<String, Vec<u8>> = HashMap::with_capacity(order.len());
    for result in results {
      match result {
        Ok((id, bytecode)) => {
          bytecode_by_id.insert(id, bytecode);
        }
        Err(err) => {
          self.listener.application_load_failed(app_name, &err.to_string());
          return Err(err);
        }
      }
    }

    let mut ordered = Vec::with_capacity(order.len());
    for (id, _) in &order {
      let bytecode = bytecode_by_id
        .remove(*id)
        .expect("every module in load_order() was downloaded above");
      ordered.push((id.to_string(), bytecode));
    }
    self.listener.application_load_end(app_name);
    Ok(ordered)
  }

  /// Attempts `primary`; if it fails for any reason, falls back to the
  /// embedded manifest named `<appName>.manifest.zipline.json`, fetching
  /// its modules through an embedded-only chain with no network access at
  /// all (spec §4.6 "loadOrFallBack"). If no embedded fallback is attached,
  /// or the fallback itself fails, the *primary* error is what's
  /// propagated.
  pub async fn load_or_fall_back(
    &self,
    app_name: &str,
    primary: &Manifest,
  ) -> Result<(Manifest, Vec<(String, Vec<u8>)>), LoaderError> {
    match self.receive(app_name, primary).await {
      Ok(bytes) => Ok((primary.clone(), bytes)),
      Err(primary_err) => {
        self
          .listener
          .on_listener_error(&format!("primary manifest load failed, falling back: {primary_err}"));
        let Some(fallback) = &self.embedded_fallback else {
          return Err(primary_err);
        };
        let Some(manifest_bytes) = fallback.manifest_for(app_name) else {
          return Err(primary_err);
        };
        let filename = format!("{app_name}.manifest.zipline.json");
        let Ok(fallback_manifest) = Manifest::parse(&filename, manifest_bytes) else {
          return Err(primary_err);
        };

        let embedded_chain = FetchChain::new(
          vec![Box::new(EmbeddedFetcher::new(fallback.modules.clone()))],
          Arc::new(MemoryBlobStore::new()),
        );
        let embedded_loader =
          ModuleLoader::with_concurrency(embedded_chain, self.max_concurrent_downloads, self.listener.clone());
        match embedded_loader.receive(app_name, &fallback_manifest).await {
          Ok(bytes) => Ok((fallback_manifest, bytes)),
          Err(_fallback_err) => Err(primary_err),
        }
      }
    }
  }
}

/// Fetches and parses the manifest document itself. Never cached — spec
/// §4.6 requires polling mode to always see the remote's latest manifest,
/// only the *modules* it references go through the fetch chain/cache.
pub async fn fetch_manifest(client: &reqwest::Client, url: &str) -> Result<Manifest, LoaderError> {
  let response = client.get(url).send().await?;
  let bytes = response.error_for_status()?.bytes().await?;
  Manifest::parse(url, &bytes)
}

/// Continuous/polling mode: periodically re-fetches the manifest URL and
/// only re-downloads its modules when the manifest differs structurally
/// from the previously applied one (spec §4.6 "emits a new loaded instance
/// only when the resulting manifest differs from the previous one,
/// compared structurally").
pub struct ManifestPoller {
  loader: Arc<ModuleLoader>,
  client: reqwest::Client,
  manifest_url: String,
  interval: Duration,
  current_manifest: Mutex<Option<Manifest>>,
}

impl ManifestPoller {
  pub fn new(loader: Arc<ModuleLoader>, client: reqwest::Client, manifest_url: impl Into<String>, interval: Duration) -> Self {
    ManifestPoller {
      loader,
      client,
      manifest_url: manifest_url.into(),
      interval,
      current_manifest: Mutex::new(None),
    }
  }

  /// Checks the manifest URL exactly once. `Ok(None)` means the remote
  /// manifest is structurally identical to what's already loaded — the
  /// steady-state common case, not an error.
  pub async fn poll_once(&self, app_name: &str) -> Result<Option<(Manifest, Vec<(String, Vec<u8>)>)>, LoaderError> {
    let manifest = fetch_manifest(&self.client, &self.manifest_url).await?;
    if self.current_manifest.lock().as_ref() == Some(&manifest) {
      return Ok(None);
    }
    let modules = self.loader.receive(app_name, &manifest).await?;
    *self.current_manifest.lock() = Some(manifest.clone());
    Ok(Some((manifest, modules)))
  }

  /// Runs `poll_once` on a fixed interval until the returned task is
  /// aborted or dropped. A single failed poll is reported to the listener
  /// and does not end continuous mode (spec invariant).
  pub fn spawn(self: Arc<Self>, app_name: String, mut on_update: impl FnMut(Manifest, Vec<(String, Vec<u8>)>) + Send + 'static) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
      let mut ticker = tokio::time::interval(self.interval);
      loop {
        ticker.tick().await;
        match self.poll_once(&app_name).await {
          Ok(Some((manifest, modules))) => on_update(manifest, modules),
          Ok(None) => {}
          Err(err) => self.loader.listener().on_listener_error(&format!("manifest poll failed: {err}")),
        }
      }
    })
  }
}
