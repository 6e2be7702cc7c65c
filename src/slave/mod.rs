//! Storage node ("slave") side: local blob I/O and its protocol handler.

mod blobstore;
mod server;

pub use blobstore::{validate_blob_name, BlobStore};
pub use server::{SlaveConfig, SlaveServer};
