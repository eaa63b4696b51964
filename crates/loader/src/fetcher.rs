// Copyright 2018-2026 the Zipline authors. MIT license.
//! The fetch chain: embedded bytes, then local cache, then network (spec
//! §4.6 "Embedded → Cache → HTTP fetchers, in order, first hit wins").
//! Grounded on `cli/module_loader.rs`'s `ModuleLoader` trait (one
//! `resolve`/`load` implementation fronting however a module's bytes
//! actually get fetched), generalized here to an explicit ordered chain
//! of sources instead of one fixed loader, and on `cli/http_util.rs`'s
//! `hyper::Client` usage, adapted here to `reqwest` per the ambient stack.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::cache::BlobStore;
use crate::error::LoaderError;
use crate::manifest::{sha256_hex, ModuleDescriptor};

/// One source of module bytes. Returns `Ok(None)` when this fetcher simply
/// doesn't have the module (so the chain falls through to the next
/// source), and `Err` only for failures that should stop the chain outright
/// (a malformed response, a sha256 mismatch).
#[async_trait]
pub trait Fetcher: Send + Sync {
  async fn fetch(&self, id: &str, module: &ModuleDescriptor) -> Result<Option<Vec<u8>>, LoaderError>;
}

/// Bytes bundled into the host binary/app ahead of time, keyed by module
/// id. Always tried first: no I/O, no verification needed beyond the
/// ordinary sha256 check every fetcher result gets.
#[derive(Default)]
pub struct EmbeddedFetcher {
  modules: HashMap<String, Vec<u8>>,
}

impl EmbeddedFetcher {
  pub fn new(modules: HashMap<String, Vec<u8>>) -> Self {
    EmbeddedFetcher { modules }
  }
}

#[async_trait]
impl Fetcher for EmbeddedFetcher {
  async fn fetch(&self, id: &str, _module: &ModuleDescriptor) -> Result<Option<Vec<u8>>, LoaderError> {
    Ok(self.modules.get(id).cloned())
  }
}

/// Reads from (and, on a later cache-miss-then-download, writes to) a
/// [`BlobStore`] keyed by the module's declared sha256 — content-addressed,
/// so a cache hit never depends on which URL the manifest currently names.
pub struct CachingFetcher {
  store: Arc<dyn BlobStore>,
}

impl CachingFetcher {
  pub fn new(store: Arc<dyn BlobStore>) -> Self {
    CachingFetcher { store }
  }

  pub fn store(&self) -> &Arc<dyn BlobStore> {
    &self.store
  }
}

#[async_trait]
impl Fetcher for CachingFetcher {
  async fn fetch(&self, _id: &str, module: &ModuleDescriptor) -> Result<Option<Vec<u8>>, LoaderError> {
    Ok(self.store.get(&module.sha256).await)
  }
}

/// Downloads over HTTP(S) via `reqwest`, verifying the response against the
/// manifest's declared sha256 before returning it.
pub struct HttpFetcher {
  client: reqwest::Client,
}

impl Default for HttpFetcher {
  fn default() -> Self {
    HttpFetcher {
      client: reqwest::Client::new(),
    }
  }
}

impl HttpFetcher {
  pub fn new(client: reqwest::Client) -> Self {
    HttpFetcher { client }
  }
}

#[async_trait]
impl Fetcher for HttpFetcher {
  async fn fetch(&self, id: &str, module: &ModuleDescriptor) -> Result<Option<Vec<u8>>, LoaderError> {
    let response = self.client.get(&module.url).send().await?;
    let bytes = response.error_for_status()?.bytes().await?.to_vec();
    let actual = sha256_hex(&bytes);
    if actual != module.sha256 {
      return Err(LoaderError::Sha256Mismatch {
        id: id.to_string(),
        expected: module.sha256.clone(),
        actual,
      });
    }
    Ok(Some(bytes))
  }
}

/// Tries each fetcher in order, returning the first hit. A successful
/// fetch from anywhere other than `cache` is written back into `cache` so
/// the next load of the same content is local (spec §4.6 "downloaded
/// modules are cached for subsequent loads").
pub struct FetchChain {
  fetchers: Vec<Box<dyn Fetcher>>,
  cache: Arc<dyn BlobStore>,
}

impl FetchChain {
  pub fn new(fetchers: Vec<Box<dyn Fetcher>>, cache: Arc<dyn BlobStore>) -> Self {
    FetchChain { fetchers, cache }
  }

  pub async fn fetch(&self, id: &str, module: &ModuleDescriptor) -> Result<Vec<u8>, LoaderError> {
    for fetcher in &self.fetchers {
      if let Some(bytes) = fetcher.fetch(id, module).await? {
        let actual = sha256_hex(&bytes);
        if actual != module.sha256 {
          return Err(LoaderError::Sha256Mismatch {
            id: id.to_string(),
            expected: module.sha256.clone(),
            actual,
          });
        }
        let _ = self.cache.put(&module.sha256, &bytes).await;
        return Ok(bytes);
      }
    }
    Err(LoaderError::ModuleUnavailable {
      id: id.to_string(),
      attempted: self.fetchers.len(),
    })
  }
}
