//! TCP transport: one blocking connection to the server with I/O timeouts.

use std::io;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use sealpost_core::{StreamTransport, Transport};
use tracing::debug;

pub struct TcpTransport {
    inner: StreamTransport<TcpStream>,
}

impl TcpTransport {
    /// Connect to the first reachable address of `host:port`. `timeout` bounds the connect
    /// and every later read and write; None blocks indefinitely.
    pub fn connect(host: &str, port: u16, timeout: Option<Duration>) -> io::Result<Self> {
        let mut last_err = None;
        for addr in (host, port).to_socket_addrs()? {
            let attempt = match timeout {
                Some(t) => TcpStream::connect_timeout(&addr, t),
                None => TcpStream::connect(addr),
            };
            match attempt {
                Ok(stream) => {
                    stream.set_read_timeout(timeout)?;
                    stream.set_write_timeout(timeout)?;
                    stream.set_nodelay(true)?;
                    debug!(%addr, "connected");
                    return Ok(Self {
                        inner: StreamTransport::new(stream),
                    });
                }
                Err(e) => {
                    debug!(%addr, error = %e, "connect failed");
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("{host}:{port} resolved to no addresses"),
            )
        }))
    }

    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.inner.get_ref().peer_addr()
    }
}

impl Transport for TcpTransport {
    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.inner.write_all(bytes)
    }

    fn read_exact(&mut self, n: usize) -> io::Result<Vec<u8>> {
        self.inner.read_exact(n)
    }
}
