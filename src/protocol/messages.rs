//! Command tokens and status strings of both protocol tiers.

use std::fmt;

/// Commands a client sends to the master, one per round trip.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum ClientCommand {
    /// List the master's local storage directory.
    Listing,

    /// Upload a file: followed by name, i64 size, and the raw bytes.
    Upload,

    /// Download a file: followed by its name.
    Download,

    /// Remove a file from every active slave: followed by its name.
    Remove,

    /// End of session.
    Exit,
}

impl ClientCommand {
    /// Parse command token string into the corresponding enum variant.
    pub fn parse_name(name: &str) -> Option<Self> {
        match name {
            "LISTING" => Some(Self::Listing),
            "UPLOAD" => Some(Self::Upload),
            "DOWNLOAD" => Some(Self::Download),
            "REMOVE" => Some(Self::Remove),
            "EXIT" => Some(Self::Exit),
            _ => None,
        }
    }

    /// Token string sent on the wire.
    pub fn token(&self) -> &'static str {
        match self {
            Self::Listing => "LISTING",
            Self::Upload => "UPLOAD",
            Self::Download => "DOWNLOAD",
            Self::Remove => "REMOVE",
            Self::Exit => "EXIT",
        }
    }
}

impl fmt::Display for ClientCommand {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.token())
    }
}

/// Commands the master sends to a slave, one per ephemeral connection.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum SlaveCommand {
    /// Store a blob: followed by name, i64 length, and the raw bytes.
    Store,

    /// Retrieve a blob: followed by its name.
    Retrieve,

    /// Delete a blob: followed by its name.
    Delete,
}

impl SlaveCommand {
    /// Parse command token string into the corresponding enum variant.
    pub fn parse_name(name: &str) -> Option<Self> {
        match name {
            "STORE" => Some(Self::Store),
            "RETRIEVE" => Some(Self::Retrieve),
            "DELETE" => Some(Self::Delete),
            _ => None,
        }
    }

    /// Token string sent on the wire.
    pub fn token(&self) -> &'static str {
        match self {
            Self::Store => "STORE",
            Self::Retrieve => "RETRIEVE",
            Self::Delete => "DELETE",
        }
    }
}

impl fmt::Display for SlaveCommand {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.token())
    }
}

/// Status strings and markers used in replies.
pub mod status {
    /// Greeting sent by the master on every new client connection.
    pub const WELCOME: &str = "Welcome to the shardstore master";

    /// Prefix of every failure reply to a client.
    pub const ERROR: &str = "ERROR";

    /// Prefix of a successful upload reply.
    pub const UPLOAD_DONE: &str = "UPLOAD_DONE";

    /// Marker preceding the length and bytes of a download.
    pub const DOWNLOAD_READY: &str = "DOWNLOAD_READY";

    /// Prefix of the final reply to a removal.
    pub const REMOVE_DONE: &str = "REMOVE_DONE";

    /// Prefix of the reply to an unrecognized client command.
    pub const UNKNOWN_COMMAND: &str = "Unknown command";

    /// Slave reply to a successful STORE.
    pub const STORE_SUCCESS: &str = "STORE_SUCCESS";

    /// Slave reply to a failed STORE.
    pub const STORE_FAILED: &str = "STORE_FAILED";

    /// Slave reply to a RETRIEVE of a missing blob.
    pub const RETRIEVE_MISSING: &str = "RETRIEVE_MISSING";

    /// Slave reply to an unrecognized command.
    pub const SLAVE_UNKNOWN: &str = "UNKNOWN_COMMAND";

    /// Composes a failure reply carrying given error description.
    pub fn error(reason: impl std::fmt::Display) -> String {
        format!("{}: {}", ERROR, reason)
    }

    /// Whether a reply string reports a failure.
    pub fn is_error(reply: &str) -> bool {
        reply.starts_with(ERROR)
    }
}
