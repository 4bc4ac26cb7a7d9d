//! Offline asset caching.
//!
//! An `OfflineWorker` precaches a fixed manifest of assets into a
//! version-tagged static partition at install time, drops partitions of
//! other versions on activation, and then answers requests cache-first for
//! static assets and network-first (with a runtime-partition fallback) for
//! everything else.

pub mod cache;
pub mod error;
pub mod fetch;
pub mod manifest;
pub mod request;
pub mod worker;

pub use cache::{Cache, CacheStorage, CachedData, EntryMeta};
pub use error::{FetchError, OfflineError};
pub use fetch::{Fetcher, HttpFetcher};
pub use manifest::{scan_dir, AssetManifest, CacheNames, DEFAULT_EXTERNAL_ASSETS, DEFAULT_ROUTES};
pub use request::{AssetRequest, AssetResponse, CacheMode};
pub use worker::{BypassReason, FetchOutcome, OfflineWorker, ResponseSource, WorkerState};
