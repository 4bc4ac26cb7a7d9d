use reqwest::Method;
use tracing::{debug, error, info, warn};

use super::{
    AssetManifest, AssetRequest, AssetResponse, CacheMode, CacheNames, CacheStorage, FetchError,
    Fetcher, OfflineError,
};

/// Lifecycle of an offline worker version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Parsed,
    Installing,
    Installed,
    Activating,
    Activated,
    /// Install failed; this version never takes control.
    Redundant,
}

/// Why a request was left to default network handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BypassReason {
    NotActive,
    NotGet,
    RangeRequest,
    NonHttp,
    DevServer,
    UncachedOnlyIfCached,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
    StaticCache,
    Network,
    RuntimeCache,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Not intercepted; the caller should use the network as usual.
    Passthrough(BypassReason),
    Served {
        response: AssetResponse,
        source: ResponseSource,
    },
}

/// Cache-first asset server for one app version.
///
/// Static assets are fetched once at install and then always served from
/// the static partition. Everything else goes to the network, with OK
/// responses copied to the runtime partition as an offline fallback.
pub struct OfflineWorker<F> {
    manifest: AssetManifest,
    names: CacheNames,
    caches: CacheStorage,
    fetcher: F,
    state: WorkerState,
    clients_claimed: bool,
}

impl<F: Fetcher> OfflineWorker<F> {
    pub fn new(manifest: AssetManifest, caches: CacheStorage, fetcher: F) -> Self {
        let names = manifest.cache_names();
        Self {
            manifest,
            names,
            caches,
            fetcher,
            state: WorkerState::Parsed,
            clients_claimed: false,
        }
    }

    /// Pick up the controlling version from an earlier run.
    ///
    /// The worker is active only when its static partition exists and no
    /// partition of another version is left, i.e. activation has run.
    /// An installed but not yet activated version resumes as `Installed`.
    pub fn resume(manifest: AssetManifest, caches: CacheStorage, fetcher: F) -> Self {
        let mut worker = Self::resume_waiting(manifest, caches, fetcher);
        if worker.state != WorkerState::Installed {
            return worker;
        }
        match worker.stale_partitions() {
            Ok(stale) if stale.is_empty() => {
                worker.state = WorkerState::Activated;
                worker.clients_claimed = true;
            }
            Ok(stale) => {
                debug!(?stale, "Stale caches remain, version not yet activated");
            }
            Err(e) => {
                warn!(error = %e, "Failed to list caches, treating version as not activated");
            }
        }
        worker
    }

    /// Pick up a version whose install completed in an earlier run but
    /// which has not been activated yet.
    pub fn resume_waiting(manifest: AssetManifest, caches: CacheStorage, fetcher: F) -> Self {
        let mut worker = Self::new(manifest, caches, fetcher);
        if worker.caches.has(&worker.names.static_name) {
            worker.state = WorkerState::Installed;
        }
        worker
    }

    /// Partitions that belong to neither of this version's caches.
    fn stale_partitions(&self) -> Result<Vec<String>, OfflineError> {
        Ok(self
            .caches
            .keys()?
            .into_iter()
            .filter(|key| !self.names.contains(key))
            .collect())
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    pub fn clients_claimed(&self) -> bool {
        self.clients_claimed
    }

    pub fn cache_names(&self) -> &CacheNames {
        &self.names
    }

    pub fn caches(&self) -> &CacheStorage {
        &self.caches
    }

    pub fn manifest(&self) -> &AssetManifest {
        &self.manifest
    }

    pub fn fetcher(&self) -> &F {
        &self.fetcher
    }

    fn expect_state(&self, expected: WorkerState) -> Result<(), OfflineError> {
        if self.state != expected {
            return Err(OfflineError::InvalidState {
                expected,
                actual: self.state,
            });
        }
        Ok(())
    }

    /// Precache every manifest asset into the static partition.
    ///
    /// Any failed asset fails the whole install: the partition created by
    /// this attempt is removed and the worker becomes redundant, leaving
    /// partitions of earlier versions in place.
    pub async fn install(&mut self) -> Result<usize, OfflineError> {
        self.expect_state(WorkerState::Parsed)?;
        self.state = WorkerState::Installing;
        info!(version = %self.manifest.version(), assets = self.manifest.to_cache().len(), "Installing");

        let static_name = self.names.static_name.clone();
        let existed = self.caches.has(&static_name);
        let result = match self.caches.open(&static_name) {
            Ok(cache) => cache.add_all(&self.fetcher, self.manifest.to_cache()).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(count) => {
                // Skip waiting: the new version may activate right away
                self.state = WorkerState::Installed;
                info!(cache = %static_name, count, "Install complete");
                Ok(count)
            }
            Err(e) => {
                error!(error = %e, "Install failed");
                if !existed {
                    if let Err(cleanup) = self.caches.delete(&static_name) {
                        warn!(error = %cleanup, "Failed to remove partial static cache");
                    }
                }
                self.state = WorkerState::Redundant;
                Err(e)
            }
        }
    }

    /// Delete partitions left by other versions and take control of clients.
    /// Returns the names of the deleted partitions.
    pub fn activate(&mut self) -> Result<Vec<String>, OfflineError> {
        self.expect_state(WorkerState::Installed)?;
        self.state = WorkerState::Activating;

        let deleted = self.stale_partitions()?;
        for key in &deleted {
            self.caches.delete(key)?;
            info!(cache = %key, "Deleted stale cache");
        }

        self.clients_claimed = true;
        self.state = WorkerState::Activated;
        info!(version = %self.manifest.version(), "Activated");
        Ok(deleted)
    }

    fn bypass_reason(&self, request: &AssetRequest) -> Option<BypassReason> {
        if self.state != WorkerState::Activated {
            return Some(BypassReason::NotActive);
        }
        if request.method != Method::GET {
            return Some(BypassReason::NotGet);
        }
        if request.is_range() {
            return Some(BypassReason::RangeRequest);
        }

        let url = &request.url;
        // Skips data:, blob: and the like
        if !url.scheme().starts_with("http") {
            return Some(BypassReason::NonHttp);
        }
        let origin = self.manifest.origin();
        if url.host_str() == origin.host_str() && url.port() != origin.port() {
            return Some(BypassReason::DevServer);
        }
        if request.cache_mode == CacheMode::OnlyIfCached && !self.manifest.is_static(request.href()) {
            return Some(BypassReason::UncachedOnlyIfCached);
        }
        None
    }

    /// Serve one intercepted request.
    ///
    /// `Err` carries the network failure when neither the network nor the
    /// runtime cache could answer.
    pub async fn handle_fetch(&self, request: &AssetRequest) -> Result<FetchOutcome, OfflineError> {
        if let Some(reason) = self.bypass_reason(request) {
            debug!(url = %request.href(), ?reason, "Not intercepting request");
            return Ok(FetchOutcome::Passthrough(reason));
        }

        if self.manifest.is_static(request.href()) {
            match self.caches.match_url(request.href()) {
                Ok(Some(response)) => {
                    debug!(url = %request.href(), "Serving static asset from cache");
                    return Ok(FetchOutcome::Served {
                        response,
                        source: ResponseSource::StaticCache,
                    });
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(url = %request.href(), error = %e, "Static cache lookup failed, using network");
                }
            }
        }

        self.fetch_and_cache(request).await
    }

    /// Fetch from the network and store OK responses in the runtime
    /// partition; fall back to that partition when the network fails.
    async fn fetch_and_cache(&self, request: &AssetRequest) -> Result<FetchOutcome, OfflineError> {
        let url = request.href();
        let cache = self.caches.open(&self.names.runtime_name)?;

        let failure = match self.fetcher.fetch(request).await {
            Ok(response) if response.is_ok() => {
                if let Err(e) = cache.put(url, &response) {
                    warn!(%url, error = %e, "Failed to store response in runtime cache");
                }
                return Ok(FetchOutcome::Served {
                    response,
                    source: ResponseSource::Network,
                });
            }
            Ok(response) => FetchError::Status {
                url: url.to_string(),
                status: response.status,
            },
            Err(e) => e,
        };

        error!(%url, error = %failure, "Failed to fetch and cache");
        match cache.match_url(url) {
            Ok(Some(response)) => Ok(FetchOutcome::Served {
                response,
                source: ResponseSource::RuntimeCache,
            }),
            Ok(None) => Err(failure.into()),
            Err(e) => {
                warn!(%url, error = %e, "Runtime cache lookup failed");
                Err(failure.into())
            }
        }
    }
}
