//! Helper utilities, functions, and macros.

#[macro_use]
mod print;

#[macro_use]
mod config;

mod error;
mod safetcp;

pub use error::ShardError;
pub use print::logger_init;

pub(crate) use safetcp::{tcp_bind_with_retry, tcp_connect};
