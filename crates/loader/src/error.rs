// Copyright 2018-2026 the Zipline authors. MIT license.

use thiserror::Error;

/// Failures specific to fetching, verifying, and applying a manifest's
/// module graph. Distinct from [`zipline_core::ZiplineError`]: loader
/// failures happen before any code ever reaches an `Endpoint`.
#[derive(Debug, Error)]
pub enum LoaderError {
  #[error("couldn't parse manifest at {url}: {source}")]
  ManifestParse {
    url: String,
    #[source]
    source: serde_json::Error,
  },

  #[error("module {id:?} unavailable: tried embedded, cache, and {attempted} remote fetcher(s)")]
  ModuleUnavailable { id: String, attempted: usize },

  #[error("module {id:?}: sha256 mismatch (manifest said {expected}, downloaded content hashes to {actual})")]
  Sha256Mismatch {
    id: String,
    expected: String,
    actual: String,
  },

  #[error("module {id:?}: container version {actual} doesn't match the version this loader understands ({expected})")]
  VersionMismatch { id: String, expected: u32, actual: u32 },

  #[error("manifest module graph is invalid: {0}")]
  InvalidGraph(String),

  #[error("application load failed: {0}")]
  ApplicationLoad(#[source] anyhow::Error),

  #[error(transparent)]
  Io(#[from] std::io::Error),

  #[error(transparent)]
  Http(#[from] reqwest::Error),
}
