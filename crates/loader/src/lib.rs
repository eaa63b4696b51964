// Copyright 2018-2026 the Zipline authors. MIT license.
//! `zipline-loader`: downloads, verifies, and caches the module graph a
//! Zipline application is made of, independent of any particular host or
//! JS engine (spec §4.6). Analogous to `cli/module_loader.rs` and
//! `cli/cache/http_cache.rs` in scope, generalized from "one TypeScript
//! module graph" to "one application's sha256-addressed module graph."

pub mod cache;
pub mod error;
pub mod fetcher;
pub mod loader;
pub mod manifest;
pub mod module_file;

pub use cache::{BlobStore, FileBlobStore, MemoryBlobStore};
pub use error::LoaderError;
pub use fetcher::{CachingFetcher, EmbeddedFetcher, FetchChain, Fetcher, HttpFetcher};
pub use loader::{fetch_manifest, EmbeddedFallback, ManifestPoller, ModuleLoader, DEFAULT_DOWNLOAD_CONCURRENCY};
pub use manifest::{sha256_hex, Manifest, ModuleDescriptor};
pub use module_file::{ModuleFile, CURRENT_ZIPLINE_VERSION};
