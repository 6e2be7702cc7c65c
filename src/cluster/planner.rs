//! Shard planner: deterministic partition of a file into byte ranges.

use serde::{Deserialize, Serialize};

use crate::cluster::ActiveSlaveSet;
use crate::utils::ShardError;

/// A contiguous byte range of a file assigned to exactly one slave.
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub struct Shard {
    /// Position of this shard in the file, starting from 0.
    pub index: u32,

    /// ID of the slave owning this shard.
    pub slave_id: String,

    /// Offset of the first byte of this shard in the file.
    pub byte_offset: u64,

    /// Number of bytes in this shard.
    pub byte_length: u64,
}

/// Splits `file_size` bytes into one shard per active slave, in active-set
/// order. Every shard gets `file_size / N` bytes except the last, which also
/// absorbs `file_size % N`.
pub fn plan(
    file_size: u64,
    active: &ActiveSlaveSet,
) -> Result<Vec<Shard>, ShardError> {
    if active.is_empty() {
        return Err(ShardError::NoActiveSlaves);
    }

    let num_shards = active.len() as u64;
    let base = file_size / num_shards;
    let remainder = file_size % num_shards;

    let mut shards = Vec::with_capacity(active.len());
    let mut offset = 0;
    for (i, slave) in active.iter().enumerate() {
        let last = i + 1 == active.len();
        let length = if last { base + remainder } else { base };
        shards.push(Shard {
            index: u32::try_from(i)?,
            slave_id: slave.id.clone(),
            byte_offset: offset,
            byte_length: length,
        });
        offset += length;
    }

    debug_assert_eq!(offset, file_size);
    Ok(shards)
}
