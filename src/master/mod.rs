//! Master side: client sessions and the upload / download / removal
//! coordinators that fan out to the slaves.

mod download;
mod removal;
mod server;
mod session;
mod slavelink;
mod upload;

#[cfg(test)]
mod scenarios;

pub use download::{download, DownloadOutcome};
pub use removal::{remove, RemovalOutcome, SlaveRemoval};
pub use server::{MasterConfig, MasterServer};
pub use session::ClientId;
pub use upload::{upload, UploadOutcome};

pub(crate) use slavelink::SlaveLink;
