//! Cluster-level bookkeeping of the master: slave directory, liveness,
//! shard planning, and manifests.

mod directory;
mod manifest;
mod planner;
mod prober;
mod state;

pub use directory::{ClusterConfig, SlaveDescriptor, SlaveDirectory};
pub use manifest::{ManifestTable, ShardManifest};
pub use planner::{plan, Shard};
pub use prober::{probe, ActiveSlaveSet};
pub use state::{ClusterState, FileLocks, DEFAULT_TRANSFER_BUF_SIZE};
