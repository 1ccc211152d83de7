use std::path::PathBuf;

use crate::config::Config;
use crate::store::UploadStore;

/// shared application state, built once by the composition root and handed
/// to every handler through axum `State`
pub struct AppState {
    /// canonical upload root; every resolved path must start with it
    pub files_dir: PathBuf,
    /// largest file a `new`/`overwrite` upload may declare, in bytes
    pub max_file_size: u64,
    /// chunk size used to reconcile progress from on-disk size
    pub chunk_size: u64,
    /// in-flight chunked uploads
    pub uploads: UploadStore,
}

impl AppState {
    /// create a new app state rooted at an already canonicalized directory
    pub fn new(files_dir: PathBuf, max_file_size: u64, chunk_size: u64) -> Self {
        Self {
            files_dir,
            max_file_size,
            chunk_size,
            uploads: UploadStore::new(),
        }
    }

    pub fn from_config(files_dir: PathBuf, config: &Config) -> Self {
        Self::new(files_dir, config.max_file_size, config.chunk_size)
    }
}
