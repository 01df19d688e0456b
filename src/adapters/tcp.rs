//! Raw socket transport for LAN instruments.

use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use tracing::info;

use super::{FramedIo, Framing};
use crate::error::TransportError;

/// TCP socket with line framing.
pub type TcpTransport = FramedIo<TcpStream>;

const SOCKET_POLL: Duration = Duration::from_millis(100);

/// Connect to `host:port`, trying each resolved address in turn.
pub fn connect_tcp(
    host: &str,
    port: u16,
    framing: Framing,
    timeout: Duration,
) -> Result<TcpTransport, TransportError> {
    let mut last_err = None;
    for addr in (host, port).to_socket_addrs()? {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(stream) => {
                stream.set_read_timeout(Some(SOCKET_POLL))?;
                stream.set_nodelay(true)?;
                info!(%addr, "TCP connection established");
                return Ok(FramedIo::new(stream, framing, timeout));
            }
            Err(e) => last_err = Some(e),
        }
    }
    Err(last_err.map(TransportError::from).unwrap_or(TransportError::NotConnected))
}
