//! Injectable cluster state shared by all client sessions of a master.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::cluster::{ManifestTable, SlaveDirectory};

/// Default size of the fixed transfer buffer used for streaming shards.
pub const DEFAULT_TRANSFER_BUF_SIZE: usize = 4096;

/// Table of per-file-name locks. Holding the guard of a name gives exclusive
/// access to that file's manifest and blobs for one whole operation, while
/// operations on different names proceed concurrently.
#[derive(Debug, Clone, Default)]
pub struct FileLocks {
    locks: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl FileLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits until the lock of given file name is acquired.
    pub async fn lock(&self, file_name: &str) -> OwnedMutexGuard<()> {
        let file_lock = {
            let mut locks = self.locks.lock().await;
            // forget entries nobody holds or waits on anymore
            locks.retain(|_, l| Arc::strong_count(l) > 1);
            locks
                .entry(file_name.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        file_lock.lock_owned().await
    }

    /// Number of file names currently tracked.
    #[cfg(test)]
    async fn tracked(&self) -> usize {
        self.locks.lock().await.len()
    }
}

/// Everything a coordinator operation needs to know about the cluster: the
/// static slave directory, the manifest table, the per-file locks, and the
/// fan-out tunables. Cloning gives another handle to the same state.
#[derive(Debug, Clone)]
pub struct ClusterState {
    /// Static configured slaves.
    pub(crate) directory: Arc<SlaveDirectory>,

    /// Recorded manifests.
    pub(crate) manifests: ManifestTable,

    /// Per-file-name operation locks.
    pub(crate) locks: FileLocks,

    /// Size of the transfer buffer for streaming copies.
    pub(crate) transfer_buf_size: usize,

    /// Issue per-slave retrieve/delete requests concurrently?
    pub(crate) parallel_fanout: bool,
}

impl ClusterState {
    /// Creates cluster state with default tunables.
    pub fn new(directory: SlaveDirectory, manifests: ManifestTable) -> Self {
        ClusterState {
            directory: Arc::new(directory),
            manifests,
            locks: FileLocks::new(),
            transfer_buf_size: DEFAULT_TRANSFER_BUF_SIZE,
            parallel_fanout: false,
        }
    }

    /// Sets the transfer buffer size; zero falls back to the default.
    pub fn with_transfer_buf_size(mut self, size: usize) -> Self {
        self.transfer_buf_size = if size == 0 {
            DEFAULT_TRANSFER_BUF_SIZE
        } else {
            size
        };
        self
    }

    /// Enables or disables concurrent per-slave requests.
    pub fn with_parallel_fanout(mut self, parallel: bool) -> Self {
        self.parallel_fanout = parallel;
        self
    }

    pub fn directory(&self) -> &SlaveDirectory {
        &self.directory
    }

    pub fn manifests(&self) -> &ManifestTable {
        &self.manifests
    }
}
