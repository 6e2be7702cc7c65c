//! Ephemeral master -> slave connection carrying exactly one command.

use bytes::{Bytes, BytesMut};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt, BufStream};
use tokio::net::TcpStream;

use crate::cluster::SlaveDescriptor;
use crate::protocol::{
    copy_exact, read_bool, read_utf, status, write_utf, CopyFault,
    SlaveCommand,
};
use crate::utils::{tcp_connect, ShardError};

/// One short-lived connection to a slave. Every request method consumes the
/// link, so the connection is closed once the reply has been read.
pub(crate) struct SlaveLink<'s> {
    /// Descriptor of the slave on the other end.
    slave: &'s SlaveDescriptor,

    /// Buffered connection stream.
    conn: BufStream<TcpStream>,
}

impl<'s> SlaveLink<'s> {
    /// Opens a fresh connection to the slave.
    pub(crate) async fn open(
        slave: &'s SlaveDescriptor,
    ) -> Result<SlaveLink<'s>, ShardError> {
        match tcp_connect(&slave.host, slave.port).await {
            Ok(stream) => Ok(SlaveLink {
                slave,
                conn: BufStream::new(stream),
            }),
            Err(e) => Err(Self::unreachable(slave, e)),
        }
    }

    /// Logs a transport failure and turns it into `SlaveUnreachable`.
    fn unreachable(
        slave: &SlaveDescriptor,
        cause: impl std::fmt::Display,
    ) -> ShardError {
        pf_warn!("m"; "connection to {} ({}) failed: {}",
                      slave.id, slave.addr(), cause);
        ShardError::SlaveUnreachable(slave.id.clone())
    }

    async fn send_header(
        &mut self,
        cmd: SlaveCommand,
        file_name: &str,
    ) -> Result<(), ShardError> {
        write_utf(&mut self.conn, cmd.token()).await?;
        write_utf(&mut self.conn, file_name).await?;
        Ok(())
    }

    /// Sends STORE and streams exactly `len` bytes from `src` through
    /// `buf`. A short read from `src` gives `TransferIncomplete`, a
    /// transport failure `SlaveUnreachable`, and a failure reported by the
    /// slave `LocalIo`.
    pub(crate) async fn store<R>(
        mut self,
        file_name: &str,
        len: u64,
        src: &mut R,
        buf: &mut [u8],
    ) -> Result<(), ShardError>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let slave = self.slave;
        let wire_len = i64::try_from(len)?;
        let sent = async {
            self.send_header(SlaveCommand::Store, file_name).await?;
            self.conn.write_i64(wire_len).await?;
            Ok::<(), ShardError>(())
        }
        .await;
        if let Err(e) = sent {
            return Err(Self::unreachable(slave, e));
        }

        match copy_exact(src, &mut self.conn, len, buf).await {
            Ok(()) => {}
            Err(CopyFault::Source { copied, cause }) => {
                pf_warn!("m"; "client stream ended after {} of {} bytes for {}{}",
                              copied, len, slave.id,
                              cause.map(|e| format!(": {}", e))
                                   .unwrap_or_default());
                return Err(ShardError::TransferIncomplete {
                    expected: len,
                    actual: copied,
                });
            }
            Err(CopyFault::Sink { cause, .. }) => {
                return Err(Self::unreachable(slave, cause));
            }
        }

        let reply = async {
            self.conn.flush().await?;
            read_utf(&mut self.conn).await
        }
        .await
        .map_err(|e| Self::unreachable(slave, e))?;

        if reply.starts_with(status::STORE_SUCCESS) {
            Ok(())
        } else {
            pf_warn!("m"; "{} failed to store '{}': {}",
                          slave.id, file_name, reply);
            Err(ShardError::LocalIo(format!(
                "{} could not store its part",
                slave.id
            )))
        }
    }

    /// Sends RETRIEVE and reads back the blob, or `None` if the slave does
    /// not have it.
    pub(crate) async fn retrieve(
        mut self,
        file_name: &str,
    ) -> Result<Option<Bytes>, ShardError> {
        let slave = self.slave;
        let retrieved = async {
            self.send_header(SlaveCommand::Retrieve, file_name).await?;
            self.conn.flush().await?;

            if !read_bool(&mut self.conn).await? {
                let token = read_utf(&mut self.conn).await?;
                pf_debug!("m"; "{} replied '{}'", slave.id, token);
                return Ok(None);
            }

            let len = self.conn.read_i32().await?;
            let len = usize::try_from(len).map_err(|_| {
                ShardError::msg(format!("invalid part length {}", len))
            })?;
            let mut data = BytesMut::zeroed(len);
            self.conn.read_exact(&mut data[..]).await?;
            Ok::<_, ShardError>(Some(data.freeze()))
        }
        .await;

        retrieved.map_err(|e| Self::unreachable(slave, e))
    }

    /// Sends DELETE and reads back whether the slave removed a blob.
    pub(crate) async fn delete(
        mut self,
        file_name: &str,
    ) -> Result<bool, ShardError> {
        let slave = self.slave;
        let deleted = async {
            self.send_header(SlaveCommand::Delete, file_name).await?;
            self.conn.flush().await?;
            read_bool(&mut self.conn).await
        }
        .await;

        deleted.map_err(|e| Self::unreachable(slave, e))
    }
}
