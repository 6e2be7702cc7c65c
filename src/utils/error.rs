//! Customized unified error type.

use std::error;
use std::fmt;
use std::io;
use std::net;
use std::num;
use std::string;

/// Customized error type for shardstore. The named variants are the failure
/// kinds of the coordination core; `Msg` carries everything else.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum ShardError {
    /// No slave reachable, operation refused before any slave I/O.
    NoActiveSlaves,

    /// No manifest recorded for the requested file name.
    UnknownFile(String),

    /// The shard of given index could not be retrieved from its owner.
    PartUnavailable(u32),

    /// Declared and actually transferred byte counts differ.
    TransferIncomplete { expected: u64, actual: u64 },

    /// Connection to the slave of given ID refused or reset.
    SlaveUnreachable(String),

    /// Disk failure, either local or reported by a slave.
    LocalIo(String),

    /// Any other run-time error, stored as its string representation.
    Msg(String),
}

impl ShardError {
    pub fn msg(msg: impl ToString) -> Self {
        ShardError::Msg(msg.to_string())
    }
}

impl fmt::Display for ShardError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ShardError::NoActiveSlaves => write!(f, "no active slaves available"),
            ShardError::UnknownFile(name) => write!(f, "unknown file '{}'", name),
            ShardError::PartUnavailable(index) => {
                write!(f, "part {} of the file is unavailable", index)
            }
            ShardError::TransferIncomplete { expected, actual } => write!(
                f,
                "transfer incomplete: {} of {} bytes transmitted",
                actual, expected
            ),
            ShardError::SlaveUnreachable(id) => {
                write!(f, "slave {} unreachable", id)
            }
            ShardError::LocalIo(msg) => write!(f, "local I/O error: {}", msg),
            ShardError::Msg(msg) => write!(f, "{}", msg), // no literal quotes
        }
    }
}

impl error::Error for ShardError {}

// Helper macro for saving boiler-plate `impl From<X>`s for transparent
// conversion from various common error types to `ShardError`.
macro_rules! impl_from_error {
    ($error:ty) => {
        impl From<$error> for ShardError {
            fn from(e: $error) -> Self {
                // just store the source error's string representation
                ShardError::Msg(e.to_string())
            }
        }
    };
}

// Helper macro for saving boiler-plate `impl From<X<T>>`s for transparent
// conversion from various common generic error types to `ShardError`.
macro_rules! impl_from_error_generic {
    ($error:ty) => {
        impl<T> From<$error> for ShardError {
            fn from(e: $error) -> ShardError {
                ShardError::msg(e.to_string())
            }
        }
    };
}

impl_from_error!(io::Error);
impl_from_error!(string::FromUtf8Error);
impl_from_error!(num::ParseIntError);
impl_from_error!(num::TryFromIntError);
impl_from_error!(net::AddrParseError);
impl_from_error!(toml::de::Error);
impl_from_error!(rmp_serde::encode::Error);
impl_from_error!(rmp_serde::decode::Error);
impl_from_error!(ctrlc::Error);

impl_from_error_generic!(tokio::sync::watch::error::SendError<T>);
