//! Removal fan-out: best-effort delete broadcast to every active slave.

use std::fmt;

use futures::future;

use crate::cluster::{probe, ClusterState, SlaveDescriptor};
use crate::master::SlaveLink;
use crate::utils::ShardError;

/// Outcome of a delete request on one slave.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum RemovalOutcome {
    /// The slave removed its blob.
    Deleted,

    /// The slave had no blob of that name (or could not remove it).
    NotFound,

    /// The slave could not be talked to.
    Unreachable(String),
}

/// Per-slave result of a removal.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct SlaveRemoval {
    /// ID of the slave.
    pub slave_id: String,

    /// What happened on it.
    pub outcome: RemovalOutcome,
}

impl fmt::Display for SlaveRemoval {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.outcome {
            RemovalOutcome::Deleted => {
                write!(f, "{}: part deleted", self.slave_id)
            }
            RemovalOutcome::NotFound => {
                write!(f, "{}: no part deleted", self.slave_id)
            }
            RemovalOutcome::Unreachable(reason) => {
                write!(f, "{}: unreachable ({})", self.slave_id, reason)
            }
        }
    }
}

/// Broadcasts DELETE of `file_name` to every currently active slave, not
/// only to the manifest's owners. Never fails as a whole once some slave is
/// active: each slave's outcome is reported on its own, in active-set order,
/// and the manifest is discarded regardless. A slave that is down keeps its
/// blob.
pub async fn remove(
    state: &ClusterState,
    file_name: &str,
) -> Result<Vec<SlaveRemoval>, ShardError> {
    let _guard = state.locks.lock(file_name).await;

    let active = probe(&state.directory).await;
    if active.is_empty() {
        pf_warn!("m"; "refusing removal of '{}': no active slaves", file_name);
        return Err(ShardError::NoActiveSlaves);
    }

    let results = if state.parallel_fanout {
        future::join_all(active.iter().map(|slave| delete_on(slave, file_name)))
            .await
    } else {
        let mut results = Vec::with_capacity(active.len());
        for slave in active.iter() {
            results.push(delete_on(slave, file_name).await);
        }
        results
    };

    if state.manifests.remove(file_name).await?.is_none() {
        pf_debug!("m"; "no manifest recorded for '{}'", file_name);
    }
    let num_deleted = results
        .iter()
        .filter(|r| r.outcome == RemovalOutcome::Deleted)
        .count();
    pf_info!("m"; "removed '{}' on {} of {} active slave(s)",
                  file_name, num_deleted, results.len());
    Ok(results)
}

/// Sends DELETE to one slave.
async fn delete_on(slave: &SlaveDescriptor, file_name: &str) -> SlaveRemoval {
    let deleted = match SlaveLink::open(slave).await {
        Ok(link) => link.delete(file_name).await,
        Err(e) => Err(e),
    };
    let outcome = match deleted {
        Ok(true) => RemovalOutcome::Deleted,
        Ok(false) => {
            pf_warn!("m"; "{} did not delete '{}'", slave.id, file_name);
            RemovalOutcome::NotFound
        }
        Err(e) => RemovalOutcome::Unreachable(e.to_string()),
    };
    SlaveRemoval {
        slave_id: slave.id.clone(),
        outcome,
    }
}
