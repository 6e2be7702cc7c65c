//! Download coordinator: fetches every shard named by the manifest and
//! reassembles them in shard order.

use bytes::Bytes;

use futures::future;

use crate::cluster::{probe, ActiveSlaveSet, ClusterState, Shard};
use crate::master::SlaveLink;
use crate::utils::ShardError;

/// Result of a successful download.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct DownloadOutcome {
    /// Total size of the file.
    pub file_size: u64,

    /// Retrieved parts in shard index order; their concatenation is the
    /// file.
    pub parts: Vec<Bytes>,
}

impl DownloadOutcome {
    /// Concatenates all parts into one buffer.
    pub fn assemble(&self) -> Bytes {
        let mut whole = Vec::with_capacity(self.file_size as usize);
        for part in &self.parts {
            whole.extend_from_slice(part);
        }
        Bytes::from(whole)
    }
}

/// Downloads file `file_name` according to its recorded manifest.
///
/// Liveness is re-probed only to learn which owners are reachable; shard
/// ownership always comes from the manifest. If any shard cannot be
/// fetched, the whole download fails with `PartUnavailable` of the lowest
/// such index and every part fetched so far is discarded.
pub async fn download(
    state: &ClusterState,
    file_name: &str,
) -> Result<DownloadOutcome, ShardError> {
    let _guard = state.locks.lock(file_name).await;

    let manifest = state
        .manifests
        .get(file_name)
        .await
        .ok_or_else(|| ShardError::UnknownFile(file_name.to_string()))?;

    let active = probe(&state.directory).await;
    if active.is_empty() {
        pf_warn!("m"; "refusing download of '{}': no active slaves", file_name);
        return Err(ShardError::NoActiveSlaves);
    }

    let parts = if state.parallel_fanout {
        let fetches = manifest
            .shards
            .iter()
            .map(|shard| fetch_shard(&active, file_name, shard));
        // join_all keeps input order, so results stay in shard order
        future::join_all(fetches)
            .await
            .into_iter()
            .collect::<Result<Vec<Bytes>, ShardError>>()?
    } else {
        let mut parts = Vec::with_capacity(manifest.shards.len());
        for shard in manifest.shards.iter() {
            parts.push(fetch_shard(&active, file_name, shard).await?);
        }
        parts
    };

    pf_info!("m"; "downloaded '{}' ({} bytes) from {:?}",
                  file_name, manifest.file_size, manifest.owners());
    Ok(DownloadOutcome {
        file_size: manifest.file_size,
        parts,
    })
}

/// Fetches one shard from its recorded owner.
async fn fetch_shard(
    active: &ActiveSlaveSet,
    file_name: &str,
    shard: &Shard,
) -> Result<Bytes, ShardError> {
    let unavailable = |reason: String| {
        pf_error!("m"; "part {} of '{}' unavailable: {}",
                       shard.index, file_name, reason);
        ShardError::PartUnavailable(shard.index)
    };

    let slave = active.get(&shard.slave_id).ok_or_else(|| {
        unavailable(format!("owner {} not active", shard.slave_id))
    })?;

    let retrieved = match SlaveLink::open(slave).await {
        Ok(link) => link.retrieve(file_name).await,
        Err(e) => Err(e),
    };
    match retrieved {
        Ok(Some(data)) if data.len() as u64 == shard.byte_length => Ok(data),
        Ok(Some(data)) => Err(unavailable(format!(
            "{} returned {} bytes, expected {}",
            slave.id,
            data.len(),
            shard.byte_length
        ))),
        Ok(None) => Err(unavailable(format!("{} has no such part", slave.id))),
        Err(e) => Err(unavailable(e.to_string())),
    }
}
