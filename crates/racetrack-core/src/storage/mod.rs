//! Local persistence for race history and race configuration.
//!
//! The whole history lives as one JSON array under a single key in a
//! `KeyValueStorage` area. `RecordStore` offers get/set/put/delete over that
//! collection and notifies subscribers after each successful write.

pub mod backend;
pub mod database;

pub use backend::{FileStorage, KeyValueStorage, MemoryStorage, StorageError};
pub use database::{
    RaceDatabase, RecordStore, SubscriptionId, HISTORY_CHANGED, RACE_CONFIG_KEY, RACE_HISTORY_KEY,
};
