//! Upload coordinator: streams a client file shard by shard to the slaves.

use tokio::io::AsyncRead;

use crate::cluster::{plan, probe, ClusterState, ShardManifest};
use crate::master::SlaveLink;
use crate::slave::validate_blob_name;
use crate::utils::ShardError;

/// Result of a successful upload.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct UploadOutcome {
    /// Manifest recorded for the file.
    pub manifest: ShardManifest,

    /// Number of bytes streamed to the slaves.
    pub bytes_transferred: u64,
}

/// Uploads `file_size` bytes read from `src` as file `file_name`.
///
/// Probes liveness, plans one shard per active slave, then streams the
/// shards in index order, each over a fresh connection to its owner. Any
/// failure aborts the remaining shards; shards already stored stay where
/// they are and no manifest is recorded. The unconsumed rest of `src` is
/// left for the caller.
pub async fn upload<R>(
    state: &ClusterState,
    file_name: &str,
    file_size: u64,
    src: &mut R,
) -> Result<UploadOutcome, ShardError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    validate_blob_name(file_name)?;
    let _guard = state.locks.lock(file_name).await;

    let active = probe(&state.directory).await;
    if active.is_empty() {
        pf_warn!("m"; "refusing upload of '{}': no active slaves", file_name);
        return Err(ShardError::NoActiveSlaves);
    }
    let shards = plan(file_size, &active)?;
    pf_info!("m"; "uploading '{}' of {} bytes as {} shard(s)",
                  file_name, file_size, shards.len());

    let mut buf = vec![0; state.transfer_buf_size];
    let mut transferred = 0;
    for shard in shards.iter() {
        let slave = active
            .get(&shard.slave_id)
            .ok_or_else(|| ShardError::SlaveUnreachable(shard.slave_id.clone()))?;
        pf_debug!("m"; "sending shard {} ({} bytes) of '{}' to {}",
                       shard.index, shard.byte_length, file_name, slave.id);

        let stored = match SlaveLink::open(slave).await {
            Ok(link) => {
                link.store(file_name, shard.byte_length, src, &mut buf)
                    .await
            }
            Err(e) => Err(e),
        };
        if let Err(e) = stored {
            pf_error!("m"; "upload of '{}' aborted at shard {}: {}",
                           file_name, shard.index, e);
            return Err(e);
        }
        transferred += shard.byte_length;
    }

    if transferred != file_size {
        return Err(ShardError::TransferIncomplete {
            expected: file_size,
            actual: transferred,
        });
    }

    let manifest =
        ShardManifest::new(file_name.to_string(), file_size, shards)?;
    if state.manifests.insert(manifest.clone()).await?.is_some() {
        pf_debug!("m"; "manifest of '{}' replaced", file_name);
    }
    pf_info!("m"; "uploaded '{}' to {:?}", file_name, manifest.owners());

    Ok(UploadOutcome {
        manifest,
        bytes_transferred: transferred,
    })
}
