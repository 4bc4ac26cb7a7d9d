use tracing::{debug, error, warn};

use crate::models::{RaceRecord, RaceStatus};

use super::backend::KeyValueStorage;

/// Storage key holding the serialized race history.
pub const RACE_HISTORY_KEY: &str = "RaceInfoDatabase";

/// Storage key holding the current race configuration.
pub const RACE_CONFIG_KEY: &str = "RaceConfig";

/// Name of the notification sent to listeners after the history is written.
pub const HISTORY_CHANGED: &str = "raceHistoryChanged";

/// Persistence contract for the race history.
///
/// None of these operations surface errors: reads fail soft to an empty
/// collection and writes report success as a boolean.
pub trait RaceDatabase {
    fn get_all(&self) -> Vec<RaceRecord>;

    fn set_all(&self, records: &[RaceRecord]) -> bool;

    fn put(&self, record: RaceRecord) -> bool;

    fn delete(&self, id: &str) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Listener = Box<dyn Fn() + Send + Sync>;

/// Race history kept as one JSON array under a single storage key.
pub struct RecordStore<S> {
    storage: S,
    listeners: Vec<(SubscriptionId, Listener)>,
    next_subscription: u64,
}

impl<S: KeyValueStorage> RecordStore<S> {
    pub fn new(storage: S) -> Self {
        Self {
            storage,
            listeners: Vec::new(),
            next_subscription: 0,
        }
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Register a callback run after every successful history write.
    pub fn subscribe(&mut self, listener: impl Fn() + Send + Sync + 'static) -> SubscriptionId {
        let id = SubscriptionId(self.next_subscription);
        self.next_subscription += 1;
        self.listeners.push((id, Box::new(listener)));
        id
    }

    /// Remove a callback. Returns false if it was not registered.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(sub, _)| *sub != id);
        self.listeners.len() != before
    }

    fn notify(&self) {
        debug!(event = HISTORY_CHANGED, listeners = self.listeners.len(), "Notifying listeners");
        for (_, listener) in &self.listeners {
            listener();
        }
    }

    // ===== Race Config =====

    /// The race configuration saved by the last session, if readable.
    pub fn get_race_config(&self) -> Option<RaceRecord> {
        match self.storage.get_item(RACE_CONFIG_KEY) {
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(config) => Some(config),
                Err(e) => {
                    warn!(key = RACE_CONFIG_KEY, error = %e, "Stored race config is corrupt");
                    None
                }
            },
            Ok(None) => {
                debug!(key = RACE_CONFIG_KEY, "No race config stored");
                None
            }
            Err(e) => {
                warn!(key = RACE_CONFIG_KEY, error = %e, "Failed to read race config");
                None
            }
        }
    }

    pub fn set_race_config(&self, config: &RaceRecord) -> bool {
        let result = serde_json::to_string(config)
            .map_err(Into::into)
            .and_then(|raw| self.storage.set_item(RACE_CONFIG_KEY, &raw));
        match result {
            Ok(()) => true,
            Err(e) => {
                error!(error = %e, "Race config set failed");
                false
            }
        }
    }

    /// Saved race configuration, or a fresh practice session when none is usable.
    pub fn race_config_or_default(&self) -> RaceRecord {
        self.get_race_config()
            .unwrap_or_else(|| RaceRecord::new(RaceStatus::Practice))
    }
}

impl<S: KeyValueStorage> RaceDatabase for RecordStore<S> {
    fn get_all(&self) -> Vec<RaceRecord> {
        let raw = match self.storage.get_item(RACE_HISTORY_KEY) {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                debug!(key = RACE_HISTORY_KEY, "No race history stored");
                return Vec::new();
            }
            Err(e) => {
                warn!(key = RACE_HISTORY_KEY, error = %e, "Failed to read race history");
                return Vec::new();
            }
        };

        match serde_json::from_str(&raw) {
            Ok(records) => records,
            Err(e) => {
                warn!(key = RACE_HISTORY_KEY, error = %e, "Stored race history is corrupt");
                Vec::new()
            }
        }
    }

    fn set_all(&self, records: &[RaceRecord]) -> bool {
        let result = serde_json::to_string(records)
            .map_err(Into::into)
            .and_then(|raw| self.storage.set_item(RACE_HISTORY_KEY, &raw));

        match result {
            Ok(()) => {
                debug!(count = records.len(), "Race history written");
                self.notify();
                true
            }
            Err(e) => {
                error!(error = %e, "All race records set failed");
                false
            }
        }
    }

    fn put(&self, record: RaceRecord) -> bool {
        let mut records = self.get_all();
        match records.iter().position(|r| r.id() == record.id()) {
            Some(index) => records[index] = record,
            None => records.push(record),
        }
        self.set_all(&records)
    }

    fn delete(&self, id: &str) -> bool {
        let mut records = self.get_all();
        match records.iter().position(|r| r.id() == id) {
            Some(index) => {
                records.remove(index);
                self.set_all(&records)
            }
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;
    use crate::storage::{FileStorage, MemoryStorage};

    fn store() -> RecordStore<MemoryStorage> {
        RecordStore::new(MemoryStorage::new())
    }

    fn counter(store: &mut RecordStore<MemoryStorage>) -> (Arc<AtomicUsize>, SubscriptionId) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let id = store.subscribe(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        (count, id)
    }

    fn ids(records: &[RaceRecord]) -> Vec<&str> {
        let mut ids: Vec<&str> = records.iter().map(|r| r.id()).collect();
        ids.sort();
        ids
    }

    #[test]
    fn test_get_all_without_data_is_empty() {
        assert!(store().get_all().is_empty());
    }

    #[test]
    fn test_get_all_with_corrupt_data_is_empty() {
        let store = store();
        store.storage().set_item(RACE_HISTORY_KEY, "{not json").unwrap();
        assert!(store.get_all().is_empty());
    }

    #[test]
    fn test_set_all_empty_then_get_all() {
        let store = store();
        assert!(store.set_all(&[]));
        assert!(store.get_all().is_empty());
        assert_eq!(
            store.storage().get_item(RACE_HISTORY_KEY).unwrap().as_deref(),
            Some("[]")
        );
    }

    #[test]
    fn test_put_distinct_ids_returns_all() {
        let store = store();
        assert!(store.put(RaceRecord::with_id("a", RaceStatus::Practice)));
        assert!(store.put(RaceRecord::with_id("b", RaceStatus::Race)));

        let all = store.get_all();
        assert_eq!(ids(&all), vec!["a", "b"]);
    }

    #[test]
    fn test_put_existing_id_replaces_only_that_record() {
        let store = store();
        store.put(RaceRecord::with_id("a", RaceStatus::Practice));
        let b = RaceRecord::with_id("b", RaceStatus::Race).with_name("Final");
        store.put(b.clone());

        assert!(store.put(RaceRecord::with_id("a", RaceStatus::Race)));

        let all = store.get_all();
        assert_eq!(all.len(), 2);
        let a = all.iter().find(|r| r.id() == "a").unwrap();
        assert_eq!(a.status, RaceStatus::Race);
        assert_eq!(all.iter().find(|r| r.id() == "b"), Some(&b));
    }

    #[test]
    fn test_put_replaces_full_contents() {
        let store = store();
        store.put(RaceRecord::with_id("a", RaceStatus::Practice).with_lap_count(10));
        store.put(RaceRecord::with_id("a", RaceStatus::Practice));

        let all = store.get_all();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].lap_count, None);
    }

    #[test]
    fn test_put_insert_persists_and_notifies() {
        let mut store = store();
        let (count, _) = counter(&mut store);

        store.put(RaceRecord::with_id("a", RaceStatus::Practice));
        assert!(store.storage().get_item(RACE_HISTORY_KEY).unwrap().is_some());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_delete_missing_id_is_noop_success() {
        let mut store = store();
        store.put(RaceRecord::with_id("a", RaceStatus::Practice));
        let before = store.storage().get_item(RACE_HISTORY_KEY).unwrap();
        let (count, _) = counter(&mut store);

        assert!(store.delete("zzz"));
        assert_eq!(store.storage().get_item(RACE_HISTORY_KEY).unwrap(), before);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_delete_removes_record() {
        let store = store();
        store.put(RaceRecord::with_id("a", RaceStatus::Practice));
        store.put(RaceRecord::with_id("b", RaceStatus::Race));

        assert!(store.delete("a"));
        assert_eq!(ids(&store.get_all()), vec!["b"]);
    }

    #[test]
    fn test_set_all_of_get_all_is_idempotent() {
        let store = store();
        store.put(RaceRecord::with_id("a", RaceStatus::Practice).with_name("Warmup"));
        store.put(RaceRecord::with_id("b", RaceStatus::Race));
        let before = store.storage().get_item(RACE_HISTORY_KEY).unwrap();

        assert!(store.set_all(&store.get_all()));
        assert_eq!(store.storage().get_item(RACE_HISTORY_KEY).unwrap(), before);
    }

    #[test]
    fn test_failed_write_keeps_state_and_skips_notification() {
        let mut store = RecordStore::new(MemoryStorage::with_quota(200));
        let (count, _) = counter(&mut store);
        store.put(RaceRecord::with_id("a", RaceStatus::Practice));
        assert_eq!(count.load(Ordering::SeqCst), 1);
        let before = store.storage().get_item(RACE_HISTORY_KEY).unwrap();

        let big = RaceRecord::with_id("b", RaceStatus::Race).with_name("x".repeat(500));
        assert!(!store.put(big));
        assert_eq!(store.storage().get_item(RACE_HISTORY_KEY).unwrap(), before);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unsubscribe_stops_notifications() {
        let mut store = store();
        let (count, id) = counter(&mut store);

        assert!(store.unsubscribe(id));
        assert!(!store.unsubscribe(id));
        store.set_all(&[]);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_race_config_round_trip_and_default() {
        let store = store();
        assert!(store.get_race_config().is_none());
        assert_eq!(store.race_config_or_default().status, RaceStatus::Practice);

        let config = RaceRecord::with_id("cfg", RaceStatus::Race).with_lap_count(25);
        assert!(store.set_race_config(&config));
        assert_eq!(store.get_race_config(), Some(config.clone()));
        assert_eq!(store.race_config_or_default(), config);
        assert!(store.get_all().is_empty());
    }

    #[test]
    fn test_file_backed_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = RecordStore::new(FileStorage::new(dir.path().to_path_buf()).unwrap());
            store.put(RaceRecord::with_id("a", RaceStatus::Race));
        }
        let store = RecordStore::new(FileStorage::new(dir.path().to_path_buf()).unwrap());
        assert_eq!(ids(&store.get_all()), vec!["a"]);
    }
}
