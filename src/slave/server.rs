//! Storage node server: accepts one command per connection from the master.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt, BufStream};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;

use crate::cluster::{SlaveDescriptor, DEFAULT_TRANSFER_BUF_SIZE};
use crate::protocol::{
    read_utf, read_utf_or_eof, status, write_bool, write_utf,
    SlaveCommand,
};
use crate::slave::BlobStore;
use crate::utils::{tcp_bind_with_retry, ShardError};

/// Configuration parameters struct.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlaveConfig {
    /// Size of the transfer buffer for receiving blobs.
    pub transfer_buf_size: usize,

    /// Create the storage directory if it does not exist.
    pub create_dir: bool,

    /// Number of retries when binding the listening port.
    pub bind_retries: u8,
}

impl Default for SlaveConfig {
    fn default() -> Self {
        SlaveConfig {
            transfer_buf_size: DEFAULT_TRANSFER_BUF_SIZE,
            create_dir: true,
            bind_retries: 0,
        }
    }
}

/// Storage node serving STORE / RETRIEVE / DELETE requests.
pub struct SlaveServer {
    /// My slave ID.
    me: String,

    /// Listener for master connections.
    listener: TcpListener,

    /// Local blob directory, shared with connection handler tasks.
    store: Arc<BlobStore>,

    /// Configuration parameters.
    config: SlaveConfig,
}

impl SlaveServer {
    /// Creates a storage node for given descriptor: prepares its blob
    /// directory and binds its listening socket. `config_str` is an
    /// optional TOML string of `SlaveConfig` fields.
    pub async fn new_and_setup(
        descriptor: &SlaveDescriptor,
        config_str: Option<&str>,
    ) -> Result<Self, ShardError> {
        let me = descriptor.id.clone();
        let config = parsed_config!(config_str => SlaveConfig;
                                    transfer_buf_size, create_dir,
                                    bind_retries)?;
        if config.transfer_buf_size == 0 {
            return logged_err!(me; "invalid config.transfer_buf_size '{}'",
                                   config.transfer_buf_size);
        }

        let store = BlobStore::new_and_setup(
            me.clone(),
            &descriptor.storage_dir,
            config.create_dir,
        )
        .await?;

        let listener = tcp_bind_with_retry(
            &descriptor.host,
            descriptor.port,
            config.bind_retries,
        )
        .await?;
        pf_info!(me; "storage node listening on '{}'", listener.local_addr()?);

        Ok(SlaveServer {
            me,
            listener,
            store: Arc::new(store),
            config,
        })
    }

    /// Address actually bound, useful when configured with port 0.
    pub fn local_addr(&self) -> Result<SocketAddr, ShardError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept loop. Each connection is served by its own task. Breaks out
    /// only upon the termination signal.
    pub async fn run(
        &mut self,
        mut rx_term: watch::Receiver<bool>,
    ) -> Result<(), ShardError> {
        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    let (stream, addr) = match accepted {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            pf_warn!(self.me; "error accepting connection: {}", e);
                            continue;
                        }
                    };
                    pf_trace!(self.me; "accepted connection from {}", addr);

                    tokio::spawn(Self::connection_task(
                        self.me.clone(),
                        self.store.clone(),
                        self.config.transfer_buf_size,
                        stream,
                        addr,
                    ));
                },

                // receiving termination signal
                _ = rx_term.changed() => {
                    pf_warn!(self.me; "storage node caught termination signal");
                    break;
                }
            }
        }

        Ok(())
    }
}

// SlaveServer per-connection handling
impl SlaveServer {
    /// Serves exactly one command on an accepted connection.
    async fn connection_task(
        me: String,
        store: Arc<BlobStore>,
        buf_size: usize,
        stream: TcpStream,
        addr: SocketAddr,
    ) {
        let mut conn = BufStream::new(stream);
        if let Err(e) =
            Self::serve_command(&me, &store, buf_size, &mut conn).await
        {
            pf_error!(me; "error serving connection from {}: {}", addr, e);
        }
    }

    async fn serve_command(
        me: &str,
        store: &BlobStore,
        buf_size: usize,
        conn: &mut BufStream<TcpStream>,
    ) -> Result<(), ShardError> {
        let cmd = match read_utf_or_eof(conn).await? {
            Some(cmd) => cmd,
            None => {
                // a liveness probe connects and closes without a command
                pf_trace!(me; "connection closed without a command");
                return Ok(());
            }
        };

        match SlaveCommand::parse_name(&cmd) {
            Some(SlaveCommand::Store) => {
                Self::handle_store(me, store, buf_size, conn).await?
            }
            Some(SlaveCommand::Retrieve) => {
                Self::handle_retrieve(me, store, conn).await?
            }
            Some(SlaveCommand::Delete) => {
                Self::handle_delete(me, store, conn).await?
            }
            None => {
                pf_warn!(me; "unknown command '{}'", cmd);
                write_utf(conn, &format!("{} {}", status::SLAVE_UNKNOWN, cmd))
                    .await?;
            }
        }

        conn.flush().await?;
        Ok(())
    }

    /// Handler of STORE: name, i64 length, then the bytes.
    async fn handle_store(
        me: &str,
        store: &BlobStore,
        buf_size: usize,
        conn: &mut BufStream<TcpStream>,
    ) -> Result<(), ShardError> {
        let name = read_utf(conn).await?;
        let len = conn.read_i64().await?;
        pf_debug!(me; "STORE '{}' of {} bytes", name, len);

        let stored = match u64::try_from(len) {
            Ok(len) => {
                let mut buf = vec![0; buf_size];
                store.store(&name, len, conn, &mut buf).await
            }
            Err(_) => Err(ShardError::msg(format!("negative length {}", len))),
        };

        match stored {
            Ok(()) => {
                write_utf(conn, &format!("{} {}", status::STORE_SUCCESS, name))
                    .await?;
            }
            Err(e) => {
                pf_warn!(me; "failed to store '{}': {}", name, e);
                write_utf(conn, &format!("{} {}", status::STORE_FAILED, name))
                    .await?;
            }
        }
        Ok(())
    }

    /// Handler of RETRIEVE: name. Replies found flag, then either the i32
    /// length and bytes or a missing token.
    async fn handle_retrieve(
        me: &str,
        store: &BlobStore,
        conn: &mut BufStream<TcpStream>,
    ) -> Result<(), ShardError> {
        let name = read_utf(conn).await?;
        pf_debug!(me; "RETRIEVE '{}'", name);

        let data = match store.retrieve(&name).await {
            Ok(Some(data)) => match i32::try_from(data.len()) {
                Ok(len) => Some((len, data)),
                Err(_) => {
                    pf_warn!(me; "blob '{}' of {} bytes too large to send",
                                 name, data.len());
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                pf_warn!(me; "failed to retrieve '{}': {}", name, e);
                None
            }
        };

        match data {
            Some((len, data)) => {
                write_bool(conn, true).await?;
                conn.write_i32(len).await?;
                conn.write_all(&data[..]).await?;
            }
            None => {
                write_bool(conn, false).await?;
                write_utf(
                    conn,
                    &format!("{} {}", status::RETRIEVE_MISSING, name),
                )
                .await?;
            }
        }
        Ok(())
    }

    /// Handler of DELETE: name. Replies whether a blob was removed.
    async fn handle_delete(
        me: &str,
        store: &BlobStore,
        conn: &mut BufStream<TcpStream>,
    ) -> Result<(), ShardError> {
        let name = read_utf(conn).await?;
        pf_debug!(me; "DELETE '{}'", name);

        let deleted = match store.delete(&name).await {
            Ok(deleted) => deleted,
            Err(e) => {
                pf_warn!(me; "failed to delete '{}': {}", name, e);
                false
            }
        };
        write_bool(conn, deleted).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    async fn start_slave(
        dir: &tempfile::TempDir,
    ) -> Result<(SocketAddr, watch::Sender<bool>), ShardError> {
        let descriptor = SlaveDescriptor {
            id: "slave1".into(),
            host: "127.0.0.1".into(),
            port: 0,
            storage_dir: dir.path().join("slave1"),
        };
        let mut slave =
            SlaveServer::new_and_setup(&descriptor, Some("transfer_buf_size = 3"))
                .await?;
        let addr = slave.local_addr()?;
        let (tx_term, rx_term) = watch::channel(false);
        tokio::spawn(async move { slave.run(rx_term).await });
        Ok((addr, tx_term))
    }

    async fn connect(addr: SocketAddr) -> Result<BufStream<TcpStream>, ShardError> {
        Ok(BufStream::new(TcpStream::connect(addr).await?))
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn slave_config_rejected() {
        let descriptor = SlaveDescriptor {
            id: "slave9".into(),
            host: "127.0.0.1".into(),
            port: 0,
            storage_dir: PathBuf::from("/tmp/shardstore-never-created"),
        };
        assert!(SlaveServer::new_and_setup(&descriptor, Some("nonsense = 1"))
            .await
            .is_err());
        assert!(
            SlaveServer::new_and_setup(&descriptor, Some("transfer_buf_size = 0"))
                .await
                .is_err()
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn store_retrieve_delete_wire() -> Result<(), ShardError> {
        let dir = tempfile::tempdir()?;
        let (addr, _tx_term) = start_slave(&dir).await?;

        // bare probe connection is tolerated
        drop(TcpStream::connect(addr).await?);

        let mut conn = connect(addr).await?;
        write_utf(&mut conn, "STORE").await?;
        write_utf(&mut conn, "f.bin").await?;
        conn.write_i64(5).await?;
        conn.write_all(b"abcde").await?;
        conn.flush().await?;
        assert_eq!(read_utf(&mut conn).await?, "STORE_SUCCESS f.bin");

        let mut conn = connect(addr).await?;
        write_utf(&mut conn, "RETRIEVE").await?;
        write_utf(&mut conn, "f.bin").await?;
        conn.flush().await?;
        assert!(crate::protocol::read_bool(&mut conn).await?);
        let len = conn.read_i32().await?;
        assert_eq!(len, 5);
        let mut data = vec![0; 5];
        conn.read_exact(&mut data).await?;
        assert_eq!(&data, b"abcde");

        for expected in [true, false] {
            let mut conn = connect(addr).await?;
            write_utf(&mut conn, "DELETE").await?;
            write_utf(&mut conn, "f.bin").await?;
            conn.flush().await?;
            assert_eq!(crate::protocol::read_bool(&mut conn).await?, expected);
        }

        let mut conn = connect(addr).await?;
        write_utf(&mut conn, "RETRIEVE").await?;
        write_utf(&mut conn, "f.bin").await?;
        conn.flush().await?;
        assert!(!crate::protocol::read_bool(&mut conn).await?);
        assert_eq!(read_utf(&mut conn).await?, "RETRIEVE_MISSING f.bin");
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn store_failures_wire() -> Result<(), ShardError> {
        let dir = tempfile::tempdir()?;
        let (addr, _tx_term) = start_slave(&dir).await?;

        // invalid name: bytes still consumed, failure reported
        let mut conn = connect(addr).await?;
        write_utf(&mut conn, "STORE").await?;
        write_utf(&mut conn, "../escape").await?;
        conn.write_i64(4).await?;
        conn.write_all(b"evil").await?;
        conn.flush().await?;
        assert_eq!(read_utf(&mut conn).await?, "STORE_FAILED ../escape");

        // negative length
        let mut conn = connect(addr).await?;
        write_utf(&mut conn, "STORE").await?;
        write_utf(&mut conn, "neg").await?;
        conn.write_i64(-1).await?;
        conn.flush().await?;
        assert_eq!(read_utf(&mut conn).await?, "STORE_FAILED neg");

        // unknown command
        let mut conn = connect(addr).await?;
        write_utf(&mut conn, "UPLOAD").await?;
        conn.flush().await?;
        assert_eq!(read_utf(&mut conn).await?, "UNKNOWN_COMMAND UPLOAD");
        Ok(())
    }
}
