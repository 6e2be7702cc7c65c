//! Client session: one task per connected client, dispatching its text
//! commands to the coordinators.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufStream};
use tokio::net::TcpStream;

use crate::cluster::ClusterState;
use crate::master::{download, remove, upload};
use crate::protocol::{
    drain, read_utf, read_utf_or_eof, status, write_utf, ClientCommand,
};
use crate::utils::ShardError;

/// Client ID type, assigned by the master in accept order.
pub type ClientId = u64;

/// One connected client.
pub(crate) struct ClientSession {
    /// Client ID, for logging.
    id: ClientId,

    /// Client's remote address.
    addr: SocketAddr,

    /// Buffered client connection.
    conn: BufStream<TcpStream>,

    /// Shared cluster state.
    state: ClusterState,

    /// Master's local directory listed by LISTING.
    storage_dir: Option<PathBuf>,
}

impl ClientSession {
    pub(crate) fn new(
        id: ClientId,
        addr: SocketAddr,
        stream: TcpStream,
        state: ClusterState,
        storage_dir: Option<PathBuf>,
    ) -> Self {
        ClientSession {
            id,
            addr,
            conn: BufStream::new(stream),
            state,
            storage_dir,
        }
    }

    /// Session task body. Errors end this session only.
    pub(crate) async fn run(mut self) {
        pf_info!("m"; "client {} connected from {}", self.id, self.addr);
        match self.serve().await {
            Ok(()) => {
                pf_info!("m"; "client {} ({}) disconnected", self.id, self.addr)
            }
            Err(e) => {
                pf_warn!("m"; "client {} ({}) session ended: {}",
                              self.id, self.addr, e)
            }
        }
    }

    /// Sends the welcome message, then serves commands strictly one at a
    /// time until EXIT or the client hangs up.
    async fn serve(&mut self) -> Result<(), ShardError> {
        write_utf(&mut self.conn, status::WELCOME).await?;
        self.conn.flush().await?;

        loop {
            let token = match read_utf_or_eof(&mut self.conn).await? {
                Some(token) => token,
                None => return Ok(()),
            };
            pf_debug!("m"; "client {} command {}", self.id, token);

            match ClientCommand::parse_name(&token) {
                Some(ClientCommand::Listing) => self.handle_listing().await?,
                Some(ClientCommand::Upload) => self.handle_upload().await?,
                Some(ClientCommand::Download) => {
                    self.handle_download().await?
                }
                Some(ClientCommand::Remove) => self.handle_remove().await?,
                Some(ClientCommand::Exit) => return Ok(()),
                None => {
                    pf_warn!("m"; "client {} unknown command '{}'",
                                  self.id, token);
                    write_utf(
                        &mut self.conn,
                        &format!("{}: {}", status::UNKNOWN_COMMAND, token),
                    )
                    .await?;
                }
            }

            self.conn.flush().await?;
        }
    }

    /// Handler of LISTING: the master's own local directory, which does not
    /// necessarily reflect the files stored on the slaves.
    async fn handle_listing(&mut self) -> Result<(), ShardError> {
        let reply = match &self.storage_dir {
            None => status::error("no storage directory configured"),
            Some(dir) => match Self::list_dir(dir).await {
                Ok(names) if names.is_empty() => "No files available.".into(),
                Ok(names) => names.join(", "),
                Err(e) => {
                    pf_warn!("m"; "cannot list '{}': {}", dir.display(), e);
                    status::error("directory not found or invalid")
                }
            },
        };
        write_utf(&mut self.conn, &reply).await
    }

    async fn list_dir(dir: &Path) -> Result<Vec<String>, ShardError> {
        let mut entries = fs::read_dir(dir).await?;
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        Ok(names)
    }

    /// Handler of UPLOAD: name, i64 size, then the raw bytes.
    async fn handle_upload(&mut self) -> Result<(), ShardError> {
        let file_name = read_utf(&mut self.conn).await?;
        let file_size = self.conn.read_i64().await?;
        let file_size = match u64::try_from(file_size) {
            Ok(size) => size,
            Err(_) => {
                let reply = status::error(format!(
                    "invalid file size {}",
                    file_size
                ));
                return write_utf(&mut self.conn, &reply).await;
            }
        };
        pf_info!("m"; "client {} uploads '{}' of {} bytes",
                      self.id, file_name, file_size);

        let mut body = (&mut self.conn).take(file_size);
        let uploaded =
            upload(&self.state, &file_name, file_size, &mut body).await;

        // keep the stream framed: discard whatever the upload did not read
        let leftover = body.limit();
        if leftover > 0 {
            let drained = drain(&mut body, leftover).await?;
            if drained < leftover {
                return Err(ShardError::TransferIncomplete {
                    expected: file_size,
                    actual: file_size - leftover + drained,
                });
            }
        }

        let reply = match uploaded {
            Ok(outcome) => format!(
                "{}: file '{}' distributed to {} slave(s), {} bytes",
                status::UPLOAD_DONE,
                file_name,
                outcome.manifest.shards.len(),
                outcome.bytes_transferred
            ),
            Err(e) => status::error(e),
        };
        write_utf(&mut self.conn, &reply).await
    }

    /// Handler of DOWNLOAD: name. Either the ready marker, i64 length and
    /// the bytes, or a failure notice alone.
    async fn handle_download(&mut self) -> Result<(), ShardError> {
        let file_name = read_utf(&mut self.conn).await?;
        pf_info!("m"; "client {} downloads '{}'", self.id, file_name);

        match download(&self.state, &file_name).await {
            Ok(outcome) => {
                write_utf(&mut self.conn, status::DOWNLOAD_READY).await?;
                self.conn.write_i64(i64::try_from(outcome.file_size)?).await?;
                for part in outcome.parts.iter() {
                    self.conn.write_all(part).await?;
                }
                Ok(())
            }
            Err(e) => write_utf(&mut self.conn, &status::error(e)).await,
        }
    }

    /// Handler of REMOVE: name. One status line per active slave, then a
    /// final confirmation.
    async fn handle_remove(&mut self) -> Result<(), ShardError> {
        let file_name = read_utf(&mut self.conn).await?;
        pf_info!("m"; "client {} removes '{}'", self.id, file_name);

        match remove(&self.state, &file_name).await {
            Ok(results) => {
                for result in results.iter() {
                    write_utf(&mut self.conn, &result.to_string()).await?;
                }
                let reply = format!(
                    "{}: file '{}' removed from {} active slave(s)",
                    status::REMOVE_DONE,
                    file_name,
                    results.len()
                );
                write_utf(&mut self.conn, &reply).await
            }
            Err(e) => write_utf(&mut self.conn, &status::error(e)).await,
        }
    }
}
