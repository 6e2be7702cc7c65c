//! Framing primitives: length-prefixed UTF-8 tokens, big-endian integers,
//! one-byte booleans, and bounded raw byte copies.

use std::io::{self, ErrorKind};
use std::marker::Unpin;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::utils::ShardError;

/// Maximum encoded byte length of a UTF token (u16 length prefix).
pub const MAX_UTF_LEN: usize = u16::MAX as usize;

/// Reads a UTF token: a big-endian u16 byte length followed by that many
/// bytes of UTF-8.
pub async fn read_utf<R>(conn: &mut R) -> Result<String, ShardError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let len = conn.read_u16().await?;
    read_utf_body(conn, len).await
}

/// Like `read_utf()`, but returns `Ok(None)` if the peer closed the
/// connection before sending the first byte of the token.
pub async fn read_utf_or_eof<R>(
    conn: &mut R,
) -> Result<Option<String>, ShardError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let len = match conn.read_u16().await {
        Ok(len) => len,
        Err(e)
            if e.kind() == ErrorKind::UnexpectedEof
                || e.kind() == ErrorKind::ConnectionReset =>
        {
            return Ok(None);
        }
        Err(e) => return Err(e.into()),
    };
    Ok(Some(read_utf_body(conn, len).await?))
}

async fn read_utf_body<R>(conn: &mut R, len: u16) -> Result<String, ShardError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut buf = vec![0; len as usize];
    conn.read_exact(&mut buf[..]).await?;
    Ok(String::from_utf8(buf)?)
}

/// Writes a UTF token. Fails without writing anything if the string is
/// longer than `MAX_UTF_LEN` bytes.
pub async fn write_utf<W>(conn: &mut W, s: &str) -> Result<(), ShardError>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let len = u16::try_from(s.len()).map_err(|_| {
        ShardError::msg(format!(
            "UTF token of {} bytes exceeds limit {}",
            s.len(),
            MAX_UTF_LEN
        ))
    })?;
    conn.write_u16(len).await?; // send length first
    conn.write_all(s.as_bytes()).await?;
    Ok(())
}

/// Reads a one-byte boolean; any non-zero byte is `true`.
pub async fn read_bool<R>(conn: &mut R) -> Result<bool, ShardError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    Ok(conn.read_u8().await? != 0)
}

/// Writes a one-byte boolean.
pub async fn write_bool<W>(conn: &mut W, b: bool) -> Result<(), ShardError>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    conn.write_u8(u8::from(b)).await?;
    Ok(())
}

/// Which side of a bounded copy went wrong.
#[derive(Debug)]
pub enum CopyFault {
    /// Source reached EOF or failed after `copied` bytes.
    Source {
        copied: u64,
        cause: Option<io::Error>,
    },

    /// Sink failed after `consumed` bytes had been read from the source.
    Sink { consumed: u64, cause: io::Error },
}

/// Copies exactly `len` bytes from `src` to `dst` through `buf`, never
/// holding more than `buf.len()` bytes in memory. Does not flush `dst`.
pub async fn copy_exact<R, W>(
    src: &mut R,
    dst: &mut W,
    len: u64,
    buf: &mut [u8],
) -> Result<(), CopyFault>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    debug_assert!(!buf.is_empty());
    let mut copied = 0;
    while copied < len {
        let want = buf.len().min(usize::try_from(len - copied).unwrap_or(usize::MAX));
        let nread = match src.read(&mut buf[..want]).await {
            Ok(0) => return Err(CopyFault::Source { copied, cause: None }),
            Ok(n) => n,
            Err(e) => {
                return Err(CopyFault::Source {
                    copied,
                    cause: Some(e),
                })
            }
        };
        if let Err(e) = dst.write_all(&buf[..nread]).await {
            return Err(CopyFault::Sink {
                consumed: copied + nread as u64,
                cause: e,
            });
        }
        copied += nread as u64;
    }
    Ok(())
}

/// Reads and discards up to `len` bytes from `src`, returning how many were
/// actually discarded before EOF.
pub async fn drain<R>(src: &mut R, len: u64) -> Result<u64, ShardError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut limited = src.take(len);
    Ok(tokio::io::copy(&mut limited, &mut tokio::io::sink()).await?)
}
