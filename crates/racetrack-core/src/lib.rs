//! Core library for racetrack.
//!
//! - `models`: race records and their status
//! - `storage`: race history persisted as one JSON blob in a key/value area
//! - `offline`: versioned, cache-first asset caching for offline use
//! - `config`: configuration file and directory resolution

pub mod config;
pub mod models;
pub mod offline;
pub mod storage;

pub use config::Config;
pub use models::{RaceRecord, RaceStatus, Racer};
pub use offline::{AssetManifest, CacheStorage, HttpFetcher, OfflineWorker};
pub use storage::{FileStorage, RaceDatabase, RecordStore};
