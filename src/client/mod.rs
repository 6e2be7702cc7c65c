//! Client-side stub to the master.

mod stub;

pub use stub::ClientStub;
