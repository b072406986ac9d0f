//! Transport port: a connected duplex byte stream. The session never touches sockets.

use std::io::{self, Read, Write};

/// Blocking, ordered, reliable byte stream to the server.
pub trait Transport {
    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// Read exactly `n` bytes or fail (EOF, timeout, reset).
    fn read_exact(&mut self, n: usize) -> io::Result<Vec<u8>>;
}

/// Adapter for any blocking `Read + Write` stream (TCP, Unix sockets, in-memory pipes).
pub struct StreamTransport<S> {
    stream: S,
}

impl<S: Read + Write> StreamTransport<S> {
    pub fn new(stream: S) -> Self {
        Self { stream }
    }

    pub fn get_ref(&self) -> &S {
        &self.stream
    }

    pub fn into_inner(self) -> S {
        self.stream
    }
}

impl<S: Read + Write> Transport for StreamTransport<S> {
    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.stream.write_all(bytes)?;
        self.stream.flush()
    }

    fn read_exact(&mut self, n: usize) -> io::Result<Vec<u8>> {
        let mut buf = vec![0u8; n];
        self.stream.read_exact(&mut buf)?;
        Ok(buf)
    }
}
