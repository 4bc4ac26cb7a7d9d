use std::path::PathBuf;

use thiserror::Error;

use super::worker::WorkerState;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("Network error fetching {url}: {message}")]
    Network { url: String, message: String },

    #[error("Failed to fetch {url} with status {status}")]
    Status { url: String, status: u16 },
}

#[derive(Error, Debug)]
pub enum OfflineError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("Install failed on {url}: {source}")]
    Install {
        url: String,
        #[source]
        source: FetchError,
    },

    #[error("Invalid URL {url}: {message}")]
    InvalidUrl { url: String, message: String },

    #[error("Cache I/O error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cache entry serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Worker is {actual:?}, expected {expected:?}")]
    InvalidState {
        expected: WorkerState,
        actual: WorkerState,
    },
}

impl OfflineError {
    pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |source| OfflineError::Io { path, source }
    }
}
