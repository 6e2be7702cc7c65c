//! Shard manifests and the table that keeps them for the lifetime of each
//! file, optionally backed by a file on disk.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use rmp_serde::decode::from_slice as decode_from_slice;
use rmp_serde::encode::to_vec as encode_to_vec;

use tokio::fs;
use tokio::sync::Mutex;

use crate::cluster::Shard;
use crate::utils::ShardError;

/// Authoritative record of which slave holds which byte range of a file.
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub struct ShardManifest {
    /// Name of the file.
    pub file_name: String,

    /// Total size of the file in bytes.
    pub file_size: u64,

    /// Shards in strictly increasing index order.
    pub shards: Vec<Shard>,
}

impl ShardManifest {
    /// Creates a manifest, checking that shards are in index order,
    /// contiguous, and cover exactly `[0, file_size)`.
    pub fn new(
        file_name: String,
        file_size: u64,
        shards: Vec<Shard>,
    ) -> Result<Self, ShardError> {
        let mut next_offset = 0;
        for (i, shard) in shards.iter().enumerate() {
            if shard.index as usize != i || shard.byte_offset != next_offset {
                return Err(ShardError::msg(format!(
                    "shard {} of '{}' out of order",
                    shard.index, file_name
                )));
            }
            next_offset += shard.byte_length;
        }
        if next_offset != file_size {
            return Err(ShardError::msg(format!(
                "shards of '{}' cover {} bytes, expected {}",
                file_name, next_offset, file_size
            )));
        }

        Ok(ShardManifest {
            file_name,
            file_size,
            shards,
        })
    }

    /// IDs of owning slaves in shard order.
    pub fn owners(&self) -> Vec<&str> {
        self.shards.iter().map(|s| s.slave_id.as_str()).collect()
    }
}

/// Map from file name -> manifest, guarded by a mutex so that concurrent
/// client sessions can share it. Cloning gives another handle to the same
/// table.
#[derive(Debug, Clone)]
pub struct ManifestTable {
    /// The manifests themselves.
    manifests: Arc<Mutex<HashMap<String, ShardManifest>>>,

    /// Backing file, if manifests should survive a master restart.
    backer_path: Option<PathBuf>,
}

impl ManifestTable {
    /// Creates an in-memory only manifest table.
    pub fn new() -> Self {
        ManifestTable {
            manifests: Arc::new(Mutex::new(HashMap::new())),
            backer_path: None,
        }
    }

    /// Creates a manifest table backed by the file at `path`, loading all
    /// manifests already recorded in it.
    pub async fn new_and_load(path: &Path) -> Result<Self, ShardError> {
        let manifests = if fs::try_exists(path).await? {
            let bytes = fs::read(path).await?;
            let manifests: HashMap<String, ShardManifest> = if bytes.is_empty()
            {
                HashMap::new()
            } else {
                decode_from_slice(&bytes)?
            };
            pf_info!("m"; "loaded {} manifest(s) from '{}'",
                          manifests.len(), path.display());
            manifests
        } else {
            pf_info!("m"; "manifest file '{}' will be created", path.display());
            HashMap::new()
        };

        Ok(ManifestTable {
            manifests: Arc::new(Mutex::new(manifests)),
            backer_path: Some(path.to_path_buf()),
        })
    }

    /// Returns a copy of the manifest of given file, if recorded.
    pub async fn get(&self, file_name: &str) -> Option<ShardManifest> {
        self.manifests.lock().await.get(file_name).cloned()
    }

    /// Records a manifest, replacing any earlier one of the same file.
    pub async fn insert(
        &self,
        manifest: ShardManifest,
    ) -> Result<Option<ShardManifest>, ShardError> {
        let mut manifests = self.manifests.lock().await;
        if self.backer_path.is_none() {
            return Ok(manifests.insert(manifest.file_name.clone(), manifest));
        }

        // table changes only once the backing file has it
        let mut updated = manifests.clone();
        let old = updated.insert(manifest.file_name.clone(), manifest);
        self.persist(&updated).await?;
        *manifests = updated;
        Ok(old)
    }

    /// Discards the manifest of given file, returning it if it existed.
    pub async fn remove(
        &self,
        file_name: &str,
    ) -> Result<Option<ShardManifest>, ShardError> {
        let mut manifests = self.manifests.lock().await;
        if self.backer_path.is_none() || !manifests.contains_key(file_name) {
            return Ok(manifests.remove(file_name));
        }

        let mut updated = manifests.clone();
        let old = updated.remove(file_name);
        self.persist(&updated).await?;
        *manifests = updated;
        Ok(old)
    }

    /// Names of all recorded files, sorted.
    pub async fn file_names(&self) -> Vec<String> {
        let mut names: Vec<String> =
            self.manifests.lock().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Writes the whole table to the backing file, if any, through a
    /// temporary file and a rename. Caller holds the table lock.
    async fn persist(
        &self,
        manifests: &HashMap<String, ShardManifest>,
    ) -> Result<(), ShardError> {
        if let Some(path) = &self.backer_path {
            let bytes = encode_to_vec(manifests)?;
            let mut tmp_path = path.clone().into_os_string();
            tmp_path.push(".tmp");
            fs::write(&tmp_path, &bytes).await?;
            fs::rename(&tmp_path, path).await?;
            pf_trace!("m"; "persisted {} manifest(s)", manifests.len());
        }
        Ok(())
    }
}

impl Default for ManifestTable {
    fn default() -> Self {
        Self::new()
    }
}
