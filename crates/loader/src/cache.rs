// Copyright 2018-2026 the Zipline authors. MIT license.
//! Content-addressed on-disk module cache. Grounded on
//! `cli/cache/http_cache.rs`'s local cache layout and `cli/fs_util.rs`'s
//! write-to-temp-then-rename pattern, so a crash mid-write never leaves a
//! corrupt cache entry visible to a later `fetch`.

use std::path::{Path, PathBuf};

use crate::error::LoaderError;
use crate::manifest::sha256_hex;

/// A content-addressed blob store keyed by sha256. Any two modules with
/// identical bytes share one cache entry, matching the manifest's
/// "identical sha256 ⇒ identical bytes, cache key is content not origin"
/// invariant.
#[async_trait::async_trait]
pub trait BlobStore: Send + Sync {
  async fn get(&self, sha256: &str) -> Option<Vec<u8>>;
  async fn put(&self, sha256: &str, bytes: &[u8]) -> Result<(), LoaderError>;
}

/// The default [`BlobStore`]: one file per sha256 under `root`, written
/// atomically.
pub struct FileBlobStore {
  root: PathBuf,
}

impl FileBlobStore {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    FileBlobStore { root: root.into() }
  }

  fn path_for(&self, sha256: &str) -> PathBuf {
    // Two levels of fan-out, the same shape `http_cache.rs` uses for its
    // on-disk layout, so no single directory accumulates every module.
    let mut path = self.root.clone();
    path.push(&sha256[0..2]);
    path.push(&sha256[2..]);
    path
  }

  async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), LoaderError> {
    if let Some(parent) = path.parent() {
      tokio::fs::create_dir_all(parent).await?;
    }
    let tmp_name = format!(
      "{}.{:x}.tmp",
      path.file_name().and_then(|n| n.to_str()).unwrap_or("blob"),
      std::process::id()
    );
    let tmp_path = path.with_file_name(tmp_name);
    tokio::fs::write(&tmp_path, bytes).await?;
    tokio::fs::rename(&tmp_path, path).await?;
    Ok(())
  }
}

#[async_trait::async_trait]
impl BlobStore for FileBlobStore {
  async fn get(&self, sha256: &str) -> Option<Vec<u8>> {
    tokio::fs::read(self.path_for(sha256)).await.ok()
  }

  async fn put(&self, sha256: &str, bytes: &[u8]) -> Result<(), LoaderError> {
    debug_assert_eq!(sha256_hex(bytes), sha256, "caller must verify content hash first");
    Self::write_atomic(&self.path_for(sha256), bytes).await
  }
}

/// An in-memory [`BlobStore`], used by tests and by embedders that don't
/// want a filesystem dependency (e.g. a WASM host).
#[derive(Default)]
pub struct MemoryBlobStore {
  entries: parking_lot::Mutex<std::collections::HashMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
  pub fn new() -> Self {
    Self::default()
  }
}

#[async_trait::async_trait]
impl BlobStore for MemoryBlobStore {
  async fn get(&self, sha256: &str) -> Option<Vec<u8>> {
    self.entries.lock().get(sha256).cloned()
  }

  async fn put(&self, sha256: &str, bytes: &[u8]) -> Result<(), LoaderError> {
    self.entries.lock().insert(sha256.to_string(), bytes.to_vec());
    Ok(())
  }
}
