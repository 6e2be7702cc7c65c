//! Client-side protocol stub talking to the master.

use std::path::{Path, PathBuf};

use tokio::fs::{self, File};
use tokio::io::{
    AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufStream, BufWriter,
};
use tokio::net::TcpStream;

use crate::cluster::DEFAULT_TRANSFER_BUF_SIZE;
use crate::protocol::{
    copy_exact, read_utf, status, write_utf, ClientCommand, CopyFault,
};
use crate::slave::validate_blob_name;
use crate::utils::{tcp_connect, ShardError};

/// Connection stub to the master, one command at a time.
pub struct ClientStub {
    /// Buffered master connection.
    conn: BufStream<TcpStream>,

    /// Welcome message received upon connection.
    welcome: String,

    /// False while a request is outstanding or after it broke off midway;
    /// the connection is then no longer framed.
    in_sync: bool,
}

impl ClientStub {
    /// Connects to the master and reads its welcome message.
    pub async fn connect(host: &str, port: u16) -> Result<Self, ShardError> {
        let stream = tcp_connect(host, port).await?;
        let mut conn = BufStream::new(stream);
        let welcome = read_utf(&mut conn).await?;
        pf_debug!("c"; "connected to master {}:{}: {}", host, port, welcome);
        Ok(ClientStub {
            conn,
            welcome,
            in_sync: true,
        })
    }

    /// Welcome message the master greeted with.
    pub fn welcome(&self) -> &str {
        &self.welcome
    }

    /// Whether the last request completed with a full reply, so that the
    /// connection can carry further commands.
    pub fn is_in_sync(&self) -> bool {
        self.in_sync
    }

    async fn send_command(
        &mut self,
        cmd: ClientCommand,
    ) -> Result<(), ShardError> {
        self.in_sync = false;
        write_utf(&mut self.conn, cmd.token()).await
    }

    /// Reads one status line, turning failure notices into errors.
    async fn recv_status(&mut self) -> Result<String, ShardError> {
        let reply = read_utf(&mut self.conn).await?;
        if status::is_error(&reply) {
            // a failure notice is always the whole reply
            self.in_sync = true;
            Err(ShardError::Msg(reply))
        } else {
            Ok(reply)
        }
    }

    /// Lists the master's local directory.
    pub async fn listing(&mut self) -> Result<String, ShardError> {
        self.send_command(ClientCommand::Listing).await?;
        self.conn.flush().await?;
        let listing = self.recv_status().await?;
        self.in_sync = true;
        Ok(listing)
    }

    /// Uploads `size` bytes read from `src` under `name`. Returns the
    /// master's confirmation.
    pub async fn upload<R>(
        &mut self,
        name: &str,
        size: u64,
        src: &mut R,
    ) -> Result<String, ShardError>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        self.send_command(ClientCommand::Upload).await?;
        write_utf(&mut self.conn, name).await?;
        self.conn.write_i64(i64::try_from(size)?).await?;

        let mut buf = vec![0; DEFAULT_TRANSFER_BUF_SIZE];
        match copy_exact(src, &mut self.conn, size, &mut buf).await {
            Ok(()) => {}
            Err(CopyFault::Source { copied, .. }) => {
                // cannot keep the announced framing anymore
                return logged_err!("c"; "local file ended after {} of {} bytes",
                                        copied, size);
            }
            Err(CopyFault::Sink { cause, .. }) => return Err(cause.into()),
        }
        self.conn.flush().await?;

        let reply = self.recv_status().await?;
        if !reply.starts_with(status::UPLOAD_DONE) {
            return logged_err!("c"; "unexpected upload reply '{}'", reply);
        }
        self.in_sync = true;
        Ok(reply)
    }

    /// Uploads a local file, named on the master by its final path
    /// component.
    pub async fn upload_file(
        &mut self,
        path: &Path,
    ) -> Result<String, ShardError> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                ShardError::msg(format!("invalid file path '{}'", path.display()))
            })?
            .to_string();
        let mut file = File::open(path).await?;
        let size = file.metadata().await?.len();
        self.upload(&name, size, &mut file).await
    }

    /// Downloads `name` into `dst`. Returns the number of bytes written.
    pub async fn download<W>(
        &mut self,
        name: &str,
        dst: &mut W,
    ) -> Result<u64, ShardError>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        self.send_command(ClientCommand::Download).await?;
        write_utf(&mut self.conn, name).await?;
        self.conn.flush().await?;

        let reply = self.recv_status().await?;
        if reply != status::DOWNLOAD_READY {
            return logged_err!("c"; "unexpected download reply '{}'", reply);
        }
        let size = u64::try_from(self.conn.read_i64().await?)?;

        let mut buf = vec![0; DEFAULT_TRANSFER_BUF_SIZE];
        match copy_exact(&mut self.conn, dst, size, &mut buf).await {
            Ok(()) => {}
            Err(CopyFault::Source { copied, .. }) => {
                return Err(ShardError::TransferIncomplete {
                    expected: size,
                    actual: copied,
                });
            }
            Err(CopyFault::Sink { cause, .. }) => return Err(cause.into()),
        }
        self.in_sync = true;
        dst.flush().await?;
        Ok(size)
    }

    /// Downloads `name` into a file of the same name under `dir`. Bytes go
    /// to a hidden temporary file first, which replaces the destination
    /// only once the whole file has arrived; a failed download leaves any
    /// existing file of that name untouched.
    pub async fn download_to_dir(
        &mut self,
        name: &str,
        dir: &Path,
    ) -> Result<(PathBuf, u64), ShardError> {
        validate_blob_name(name)?;
        let path = dir.join(name);
        let tmp_path =
            dir.join(format!(".{}.{:016x}.part", name, rand::random::<u64>()));

        let mut file = BufWriter::new(File::create(&tmp_path).await?);
        let downloaded = self.download(name, &mut file).await;
        drop(file);

        let renamed = match downloaded {
            Ok(size) => fs::rename(&tmp_path, &path)
                .await
                .map(|_| size)
                .map_err(ShardError::from),
            Err(e) => Err(e),
        };
        if renamed.is_err() {
            if let Err(re) = fs::remove_file(&tmp_path).await {
                pf_warn!("c"; "cannot clean up '{}': {}",
                              tmp_path.display(), re);
            }
        }
        renamed.map(|size| (path, size))
    }

    /// Removes `name` from the cluster. Returns the per-slave status lines
    /// followed by the final confirmation.
    pub async fn remove(
        &mut self,
        name: &str,
    ) -> Result<Vec<String>, ShardError> {
        self.send_command(ClientCommand::Remove).await?;
        write_utf(&mut self.conn, name).await?;
        self.conn.flush().await?;

        let mut lines = vec![];
        loop {
            let line = self.recv_status().await?;
            let done = line.starts_with(status::REMOVE_DONE);
            lines.push(line);
            if done {
                self.in_sync = true;
                return Ok(lines);
            }
        }
    }

    /// Sends an arbitrary command token and returns the master's one-line
    /// reply. Meant for commands without arguments.
    pub async fn raw_command(
        &mut self,
        token: &str,
    ) -> Result<String, ShardError> {
        self.in_sync = false;
        write_utf(&mut self.conn, token).await?;
        self.conn.flush().await?;
        let reply = read_utf(&mut self.conn).await?;
        self.in_sync = true;
        Ok(reply)
    }

    /// Ends the session.
    pub async fn exit(mut self) -> Result<(), ShardError> {
        self.send_command(ClientCommand::Exit).await?;
        self.conn.flush().await?;
        Ok(())
    }
}
