//! TCP bind/connect helper functions.

use std::net::SocketAddr;

use tokio::net::{lookup_host, TcpListener, TcpSocket, TcpStream};
use tokio::time::{self, Duration};

use crate::utils::ShardError;

/// Resolves `host:port` to its first socket address.
async fn resolve(host: &str, port: u16) -> Result<SocketAddr, ShardError> {
    lookup_host((host, port)).await?.next().ok_or_else(|| {
        ShardError::msg(format!("cannot resolve address {}:{}", host, port))
    })
}

/// Binds a listening socket to `host:port`, retrying up to `retries` times
/// with one second in between (useful when a previous process is still
/// lingering on the port).
pub(crate) async fn tcp_bind_with_retry(
    host: &str,
    port: u16,
    mut retries: u8,
) -> Result<TcpListener, ShardError> {
    let bind_addr = resolve(host, port).await?;
    loop {
        let socket = if bind_addr.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        socket.set_reuseaddr(true)?;

        let listened = socket
            .bind(bind_addr)
            .and_then(|_| socket.listen(1024));
        match listened {
            Ok(listener) => return Ok(listener),
            Err(err) => {
                if retries == 0 {
                    return Err(err.into());
                }
                retries -= 1;
                time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
}

/// Opens a fresh connection to `host:port`. No retrying: a refused connect
/// is reported right away. Blocks for as long as the transport takes.
pub(crate) async fn tcp_connect(
    host: &str,
    port: u16,
) -> Result<TcpStream, ShardError> {
    let stream = TcpStream::connect((host, port)).await?;
    stream.set_nodelay(true)?;
    Ok(stream)
}
