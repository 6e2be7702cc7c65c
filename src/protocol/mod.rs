//! Two-tier wire protocol shared by client, master, and slaves.

mod messages;
mod wire;

pub use messages::{status, ClientCommand, SlaveCommand};
pub use wire::{
    copy_exact, drain, read_bool, read_utf, read_utf_or_eof, write_bool,
    write_utf, CopyFault, MAX_UTF_LEN,
};
