//! Named cache partitions on disk.
//!
//! Each partition is a directory under the cache root. An entry is stored as
//! `<sha256(url)>.json` (metadata) beside `<sha256(url)>.body`; the metadata
//! file is written last, so an entry without it is never served.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use super::{AssetRequest, AssetResponse, FetchError, Fetcher, OfflineError};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedData<T> {
    pub data: T,
    pub cached_at: DateTime<Utc>,
}

impl<T> CachedData<T> {
    pub fn new(data: T) -> Self {
        Self {
            data,
            cached_at: Utc::now(),
        }
    }

    pub fn age_minutes(&self) -> i64 {
        (Utc::now() - self.cached_at).num_minutes()
    }

    pub fn age_display(&self) -> String {
        let minutes = self.age_minutes();
        if minutes < 1 {
            "just now".to_string()
        } else if minutes < 60 {
            format!("{}m ago", minutes)
        } else if minutes < 1440 {
            format!("{}h ago", minutes / 60)
        } else {
            format!("{}d ago", minutes / 1440)
        }
    }
}

/// Metadata stored for one cached response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryMeta {
    pub url: String,
    pub status: u16,
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    pub size: usize,
}

pub(crate) fn entry_key(url: &str) -> String {
    hex::encode(Sha256::digest(url.as_bytes()))
}

/// Root directory holding every cache partition.
pub struct CacheStorage {
    root: PathBuf,
}

impl CacheStorage {
    pub fn new(root: PathBuf) -> Result<Self, OfflineError> {
        std::fs::create_dir_all(&root).map_err(OfflineError::io(&root))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Open a partition, creating it if needed.
    pub fn open(&self, name: &str) -> Result<Cache, OfflineError> {
        let dir = self.root.join(name);
        std::fs::create_dir_all(&dir).map_err(OfflineError::io(&dir))?;
        Ok(Cache {
            name: name.to_string(),
            dir,
        })
    }

    pub fn has(&self, name: &str) -> bool {
        self.root.join(name).is_dir()
    }

    /// Names of all partitions, sorted.
    pub fn keys(&self) -> Result<Vec<String>, OfflineError> {
        let entries = std::fs::read_dir(&self.root).map_err(OfflineError::io(&self.root))?;
        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(OfflineError::io(&self.root))?;
            if entry.path().is_dir() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }

    /// Delete a partition. Returns false if it did not exist.
    pub fn delete(&self, name: &str) -> Result<bool, OfflineError> {
        let dir = self.root.join(name);
        if !dir.is_dir() {
            return Ok(false);
        }
        std::fs::remove_dir_all(&dir).map_err(OfflineError::io(&dir))?;
        debug!(cache = name, "Deleted cache partition");
        Ok(true)
    }

    /// Look `url` up in every partition, in name order.
    pub fn match_url(&self, url: &str) -> Result<Option<AssetResponse>, OfflineError> {
        for name in self.keys()? {
            let cache = Cache {
                dir: self.root.join(&name),
                name,
            };
            if let Some(response) = cache.match_url(url)? {
                return Ok(Some(response));
            }
        }
        Ok(None)
    }
}

/// One cache partition.
pub struct Cache {
    name: String,
    dir: PathBuf,
}

impl Cache {
    pub fn name(&self) -> &str {
        &self.name
    }

    fn meta_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }

    fn body_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.body", key))
    }

    pub fn put(&self, url: &str, response: &AssetResponse) -> Result<(), OfflineError> {
        let key = entry_key(url);
        let body_path = self.body_path(&key);
        let meta_path = self.meta_path(&key);

        let meta = CachedData::new(EntryMeta {
            url: url.to_string(),
            status: response.status,
            headers: response.headers.clone(),
            size: response.body.len(),
        });
        let contents = serde_json::to_string_pretty(&meta)?;

        // Drop the old metadata first so a half-written body is never matched
        if meta_path.exists() {
            std::fs::remove_file(&meta_path).map_err(OfflineError::io(&meta_path))?;
        }
        std::fs::write(&body_path, &response.body).map_err(OfflineError::io(&body_path))?;

        // Metadata goes through a temp file so a torn write never looks like an entry
        let tmp_path = self.dir.join(format!(".{}.json.tmp", key));
        let written = std::fs::write(&tmp_path, contents)
            .and_then(|()| std::fs::rename(&tmp_path, &meta_path));
        if let Err(e) = written {
            let _ = std::fs::remove_file(&tmp_path);
            return Err(OfflineError::io(&meta_path)(e));
        }
        debug!(cache = %self.name, %url, bytes = response.body.len(), "Cached response");
        Ok(())
    }

    fn load_meta(&self, key: &str) -> Result<Option<CachedData<EntryMeta>>, OfflineError> {
        let path = self.meta_path(key);
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(&path).map_err(OfflineError::io(&path))?;
        Ok(Some(serde_json::from_str(&contents)?))
    }

    pub fn match_url(&self, url: &str) -> Result<Option<AssetResponse>, OfflineError> {
        let key = entry_key(url);
        let Some(meta) = self.load_meta(&key)? else {
            return Ok(None);
        };
        let body_path = self.body_path(&key);
        let body = std::fs::read(&body_path).map_err(OfflineError::io(&body_path))?;

        Ok(Some(AssetResponse {
            url: meta.data.url,
            status: meta.data.status,
            headers: meta.data.headers,
            body,
        }))
    }

    pub fn delete(&self, url: &str) -> Result<bool, OfflineError> {
        let key = entry_key(url);
        let meta_path = self.meta_path(&key);
        if !meta_path.exists() {
            return Ok(false);
        }
        std::fs::remove_file(&meta_path).map_err(OfflineError::io(&meta_path))?;
        let body_path = self.body_path(&key);
        if body_path.exists() {
            std::fs::remove_file(&body_path).map_err(OfflineError::io(&body_path))?;
        }
        Ok(true)
    }

    /// Metadata of every entry, sorted by URL.
    pub fn entries(&self) -> Result<Vec<CachedData<EntryMeta>>, OfflineError> {
        let listing = std::fs::read_dir(&self.dir).map_err(OfflineError::io(&self.dir))?;
        let mut entries = Vec::new();
        for item in listing {
            let item = item.map_err(OfflineError::io(&self.dir))?;
            let path = item.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let contents = std::fs::read_to_string(&path).map_err(OfflineError::io(&path))?;
            entries.push(serde_json::from_str::<CachedData<EntryMeta>>(&contents)?);
        }
        entries.sort_by(|a, b| a.data.url.cmp(&b.data.url));
        Ok(entries)
    }

    /// Fetch every URL and store the responses, all or nothing.
    ///
    /// Fetches run concurrently. Nothing is written unless every fetch
    /// succeeded with an OK status.
    pub async fn add_all<F>(&self, fetcher: &F, urls: &[String]) -> Result<usize, OfflineError>
    where
        F: Fetcher + ?Sized,
    {
        let requests = urls
            .iter()
            .map(|url| AssetRequest::parse(url))
            .collect::<Result<Vec<_>, _>>()?;

        let results = join_all(requests.iter().map(|request| fetcher.fetch(request))).await;

        let mut responses = Vec::with_capacity(results.len());
        for (request, result) in requests.iter().zip(results) {
            let url = request.href().to_string();
            let response = result.map_err(|source| OfflineError::Install {
                url: url.clone(),
                source,
            })?;
            if !response.is_ok() {
                return Err(OfflineError::Install {
                    url: url.clone(),
                    source: FetchError::Status {
                        url,
                        status: response.status,
                    },
                });
            }
            responses.push((url, response));
        }

        for (url, response) in &responses {
            self.put(url, response)?;
        }
        info!(cache = %self.name, count = responses.len(), "Precached assets");
        Ok(responses.len())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    fn storage() -> (tempfile::TempDir, CacheStorage) {
        let dir = tempfile::tempdir().unwrap();
        let storage = CacheStorage::new(dir.path().join("caches")).unwrap();
        (dir, storage)
    }

    #[test]
    fn test_put_then_match() {
        let (_dir, storage) = storage();
        let cache = storage.open("cache1").unwrap();
        let mut response = AssetResponse::new("https://a.test/app.js", 200, b"console.log(1)".to_vec());
        response
            .headers
            .push(("content-type".to_string(), "text/javascript".to_string()));

        cache.put("https://a.test/app.js", &response).unwrap();
        assert_eq!(cache.match_url("https://a.test/app.js").unwrap(), Some(response));
        assert_eq!(cache.match_url("https://a.test/other.js").unwrap(), None);
    }

    #[test]
    fn test_storage_match_searches_all_partitions() {
        let (_dir, storage) = storage();
        let runtime = storage.open("offline1").unwrap();
        runtime
            .put("https://a.test/x", &AssetResponse::new("https://a.test/x", 200, b"x".to_vec()))
            .unwrap();
        storage.open("cache1").unwrap();

        let found = storage.match_url("https://a.test/x").unwrap().unwrap();
        assert_eq!(found.body, b"x".to_vec());
    }

    #[test]
    fn test_keys_and_delete() {
        let (_dir, storage) = storage();
        storage.open("offline1").unwrap();
        storage.open("cache1").unwrap();

        assert_eq!(storage.keys().unwrap(), vec!["cache1", "offline1"]);
        assert!(storage.delete("cache1").unwrap());
        assert!(!storage.delete("cache1").unwrap());
        assert!(!storage.has("cache1"));
        assert_eq!(storage.keys().unwrap(), vec!["offline1"]);
    }

    #[test]
    fn test_entries_and_delete_entry() {
        let (_dir, storage) = storage();
        let cache = storage.open("cache1").unwrap();
        for url in ["https://a.test/b", "https://a.test/a"] {
            cache.put(url, &AssetResponse::new(url, 200, b"12345".to_vec())).unwrap();
        }

        let entries = cache.entries().unwrap();
        let urls: Vec<&str> = entries.iter().map(|e| e.data.url.as_str()).collect();
        assert_eq!(urls, vec!["https://a.test/a", "https://a.test/b"]);
        assert_eq!(entries[0].data.size, 5);

        assert!(cache.delete("https://a.test/a").unwrap());
        assert!(cache.match_url("https://a.test/a").unwrap().is_none());
        assert_eq!(cache.entries().unwrap().len(), 1);
    }

    #[test]
    fn test_put_leaves_no_temp_files() {
        let (_dir, storage) = storage();
        let cache = storage.open("cache1").unwrap();
        let url = "https://a.test/app.js";
        cache.put(url, &AssetResponse::new(url, 200, b"one".to_vec())).unwrap();
        cache.put(url, &AssetResponse::new(url, 200, b"two".to_vec())).unwrap();

        let mut names: Vec<String> = std::fs::read_dir(storage.root().join("cache1"))
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        names.sort();
        let key = entry_key(url);
        assert_eq!(names, vec![format!("{}.body", key), format!("{}.json", key)]);
        assert_eq!(cache.match_url(url).unwrap().unwrap().body, b"two".to_vec());
    }

    #[test]
    fn test_truncated_metadata_is_an_error() {
        let (_dir, storage) = storage();
        let cache = storage.open("cache1").unwrap();
        let url = "https://a.test/app.js";
        cache.put(url, &AssetResponse::new(url, 200, b"x".to_vec())).unwrap();
        std::fs::write(cache.meta_path(&entry_key(url)), "{trunc").unwrap();

        assert!(matches!(cache.match_url(url), Err(OfflineError::Serialization(_))));
    }

    #[test]
    fn test_cached_data_age_display() {
        let fresh = CachedData::new(());
        assert_eq!(fresh.age_display(), "just now");

        let mut old = CachedData::new(());
        old.cached_at = Utc::now() - Duration::minutes(90);
        assert_eq!(old.age_display(), "1h ago");

        old.cached_at = Utc::now() - Duration::days(3);
        assert_eq!(old.age_display(), "3d ago");
    }
}
