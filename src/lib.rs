//! Shardstore: a minimal master/slave sharded file store. The master splits
//! each uploaded file into contiguous shards across the currently reachable
//! slaves, records where every shard went, and reassembles files on
//! download.

#[macro_use]
mod utils;

pub mod client;
pub mod cluster;
pub mod master;
pub mod protocol;
pub mod slave;

pub use utils::{logger_init, ShardError};
