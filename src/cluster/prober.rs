//! Liveness prober: which configured slaves are reachable right now.

use crate::cluster::{SlaveDescriptor, SlaveDirectory};
use crate::utils::tcp_connect;

/// Ordered set of slaves found reachable by one probing round, in configured
/// order (not by responsiveness).
#[derive(Debug, PartialEq, Eq, Clone, Default)]
pub struct ActiveSlaveSet {
    slaves: Vec<SlaveDescriptor>,
}

impl ActiveSlaveSet {
    /// Creates an active set from already-probed descriptors.
    pub fn new(slaves: Vec<SlaveDescriptor>) -> Self {
        ActiveSlaveSet { slaves }
    }

    /// Looks up an active slave by its ID.
    pub fn get(&self, id: &str) -> Option<&SlaveDescriptor> {
        self.slaves.iter().find(|s| s.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SlaveDescriptor> {
        self.slaves.iter()
    }

    pub fn ids(&self) -> Vec<&str> {
        self.slaves.iter().map(|s| s.id.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.slaves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slaves.is_empty()
    }
}

/// Probes every configured slave with a bare connect-then-close, one at a
/// time in configured order. Unreachable slaves are logged and omitted. No
/// retries; a slow slave that eventually accepts is counted active.
pub async fn probe(directory: &SlaveDirectory) -> ActiveSlaveSet {
    let mut active = Vec::with_capacity(directory.len());
    for slave in directory.iter() {
        pf_trace!("m"; "probing {} at {}", slave.id, slave.addr());
        match tcp_connect(&slave.host, slave.port).await {
            Ok(stream) => {
                drop(stream); // close right away
                active.push(slave.clone());
            }
            Err(e) => {
                pf_warn!("m"; "slave {} ({}) is unavailable: {}",
                              slave.id, slave.addr(), e);
            }
        }
    }

    pf_debug!("m"; "probed {} active slave(s) out of {}",
                   active.len(), directory.len());
    ActiveSlaveSet::new(active)
}
