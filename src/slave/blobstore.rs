//! Local blob directory of a storage node.

use std::io::ErrorKind;
use std::marker::Unpin;
use std::path::{Path, PathBuf};

use bytes::Bytes;

use tokio::fs::{self, File};
use tokio::io::{AsyncRead, AsyncWriteExt};

use crate::protocol::{copy_exact, drain, CopyFault};
use crate::utils::ShardError;

/// Checks that a blob name is a single plain path component, so that it can
/// never address anything outside the storage directory.
pub fn validate_blob_name(name: &str) -> Result<(), ShardError> {
    if name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\', '\0'])
    {
        return Err(ShardError::msg(format!("invalid blob name '{}'", name)));
    }
    Ok(())
}

/// Directory of named blobs. No concurrency control between operations on
/// the same name: last writer wins.
#[derive(Debug)]
pub struct BlobStore {
    /// My slave ID, for logging.
    me: String,

    /// Directory holding the blobs.
    dir: PathBuf,
}

impl BlobStore {
    /// Opens the blob directory at `dir`, creating it if missing and
    /// `create` is set.
    pub async fn new_and_setup(
        me: String,
        dir: &Path,
        create: bool,
    ) -> Result<Self, ShardError> {
        if !fs::try_exists(dir).await? {
            if !create {
                return logged_err!(me; "storage dir '{}' does not exist",
                                       dir.display());
            }
            fs::create_dir_all(dir).await?;
            pf_info!(me; "created storage dir '{}'", dir.display());
        } else if !fs::metadata(dir).await?.is_dir() {
            return logged_err!(me; "storage path '{}' is not a directory",
                                   dir.display());
        }

        Ok(BlobStore {
            me,
            dir: dir.to_path_buf(),
        })
    }

    /// Path of the blob of given name, after validating the name.
    pub fn blob_path(&self, name: &str) -> Result<PathBuf, ShardError> {
        validate_blob_name(name)?;
        Ok(self.dir.join(name))
    }

    /// Streams exactly `len` bytes from `src` into the blob `name`, creating
    /// or overwriting it. Bytes land in a temporary file first, which is
    /// renamed over the blob only once complete. On any failure other than
    /// a short read, the rest of the `len` bytes are still consumed from
    /// `src` so that the caller can reply on the same stream.
    pub async fn store<R>(
        &self,
        name: &str,
        len: u64,
        src: &mut R,
        buf: &mut [u8],
    ) -> Result<(), ShardError>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let path = match self.blob_path(name) {
            Ok(path) => path,
            Err(e) => return Err(Self::skip_rest(src, len, e).await),
        };
        let tmp_path = self.dir.join(format!(
            ".{}.{:016x}.tmp",
            name,
            rand::random::<u64>()
        ));

        let mut file = match File::create(&tmp_path).await {
            Ok(file) => file,
            Err(e) => {
                let e = ShardError::LocalIo(e.to_string());
                return Err(Self::skip_rest(src, len, e).await);
            }
        };
        let written = match copy_exact(src, &mut file, len, buf).await {
            Ok(()) => file
                .flush()
                .await
                .map_err(|e| ShardError::LocalIo(e.to_string())),
            Err(CopyFault::Source { copied, .. }) => {
                Err(ShardError::TransferIncomplete {
                    expected: len,
                    actual: copied,
                })
            }
            Err(CopyFault::Sink { consumed, cause }) => {
                let e = ShardError::LocalIo(cause.to_string());
                Err(Self::skip_rest(src, len - consumed, e).await)
            }
        };
        drop(file);

        if let Err(e) = written {
            if let Err(rm_err) = fs::remove_file(&tmp_path).await {
                pf_warn!(self.me; "error removing temp file '{}': {}",
                                  tmp_path.display(), rm_err);
            }
            return Err(e);
        }

        fs::rename(&tmp_path, &path)
            .await
            .map_err(|e| ShardError::LocalIo(e.to_string()))?;
        pf_debug!(self.me; "stored blob '{}' of {} bytes", name, len);
        Ok(())
    }

    /// Discards `remaining` bytes of `src`, then hands back `err`.
    async fn skip_rest<R>(src: &mut R, remaining: u64, err: ShardError) -> ShardError
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let _ = drain(src, remaining).await;
        err
    }

    /// Reads the whole blob `name`, or `None` if it does not exist.
    pub async fn retrieve(&self, name: &str) -> Result<Option<Bytes>, ShardError> {
        let path = self.blob_path(name)?;
        match fs::read(&path).await {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ShardError::LocalIo(e.to_string())),
        }
    }

    /// Removes the blob `name`. Returns `false` if it did not exist.
    pub async fn delete(&self, name: &str) -> Result<bool, ShardError> {
        let path = self.blob_path(name)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(ShardError::LocalIo(e.to_string())),
        }
    }
}
