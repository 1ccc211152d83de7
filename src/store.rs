use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// identifies one logical upload: the resolved, root-confined target path.
/// keying by full path keeps `a/report.pdf` and `b/report.pdf` apart
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct UploadKey(PathBuf);

impl UploadKey {
    pub fn for_target(target: &Path) -> Self {
        Self(target.to_path_buf())
    }
}

/// progress of one in-flight chunked upload
#[derive(Clone, Debug)]
pub struct UploadSession {
    pub total_chunks: u64,
    pub received_chunks: u64,
    pub target_file_path: PathBuf,
    pub last_updated: DateTime<Utc>,
}

impl UploadSession {
    pub fn new(target_file_path: PathBuf, total_chunks: u64, received_chunks: u64) -> Self {
        Self {
            total_chunks,
            received_chunks,
            target_file_path,
            last_updated: Utc::now(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.received_chunks >= self.total_chunks
    }
}

/// in-memory map of upload key -> session.
///
/// Sessions and per-key locks live in separate sharded maps: uploads to
/// different keys never wait on each other, while every request for the same
/// key runs its load-validate-write-store sequence under [`UploadStore::lock`].
#[derive(Default)]
pub struct UploadStore {
    sessions: DashMap<UploadKey, UploadSession>,
    locks: Arc<DashMap<UploadKey, Arc<Mutex<()>>>>,
}

impl UploadStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(&self, key: &UploadKey) -> Option<UploadSession> {
        self.sessions.get(key).map(|entry| entry.value().clone())
    }

    pub fn store(&self, key: UploadKey, session: UploadSession) {
        self.sessions.insert(key, session);
    }

    pub fn delete(&self, key: &UploadKey) -> Option<UploadSession> {
        self.sessions.remove(key).map(|(_, session)| session)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Waits for exclusive access to `key`. Hold the guard across the whole
    /// validate-write-advance sequence for a chunk.
    pub async fn lock(&self, key: &UploadKey) -> KeyGuard {
        // clone out of the shard before awaiting, never hold a dashmap ref across .await
        let mutex = self
            .locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .value()
            .clone();
        let guard = mutex.lock_owned().await;
        KeyGuard {
            key: key.clone(),
            locks: Arc::clone(&self.locks),
            guard: Some(guard),
        }
    }

    #[cfg(test)]
    fn lock_entries(&self) -> usize {
        self.locks.len()
    }
}

/// exclusive access to one upload key; released on drop
pub struct KeyGuard {
    key: UploadKey,
    locks: Arc<DashMap<UploadKey, Arc<Mutex<()>>>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for KeyGuard {
    fn drop(&mut self) {
        // release first, then drop the map entry if nobody else holds or waits on it.
        // remove_if runs under the shard write lock, the same lock `lock` clones under
        drop(self.guard.take());
        self.locks
            .remove_if(&self.key, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}
