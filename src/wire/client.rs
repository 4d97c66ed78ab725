//! Byte-stream transports used by `Protocol`.

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};

/// Blocking byte-stream connection.
///
/// `receive` fills the whole buffer unless the peer ends the stream first;
/// packets other than the last one of a response are exactly one buffer long,
/// so this is how packet boundaries are recovered.
pub trait ByteStreamClient: Send {
    /// Establish the connection if it is not already open.
    fn connect(&mut self) -> io::Result<()>;

    /// Write all of `data`. Returns the number of bytes written.
    fn send(&mut self, data: &[u8]) -> io::Result<usize>;

    /// Signal that no more bytes will be sent on this connection, so the peer
    /// sees end of stream while we keep reading.
    fn finish_sending(&mut self) -> io::Result<()> {
        Ok(())
    }

    /// Read until `buf` is full or the stream ends. Returns bytes read.
    fn receive(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Drop the connection. The next call reconnects.
    fn close(&mut self);
}

/// TCP implementation. Connects lazily on the first send/receive.
pub struct TcpClient {
    addr: String,
    stream: Option<TcpStream>,
}

impl TcpClient {
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            addr: format!("{}:{}", host, port),
            stream: None,
        }
    }

    /// Wrap an already connected socket, e.g. one accepted by a server.
    pub fn from_stream(stream: TcpStream) -> io::Result<Self> {
        let addr = stream.peer_addr()?.to_string();
        Ok(Self {
            addr,
            stream: Some(stream),
        })
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    fn stream(&mut self) -> io::Result<&mut TcpStream> {
        self.connect()?;
        self.stream
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "not connected"))
    }
}

impl ByteStreamClient for TcpClient {
    fn connect(&mut self) -> io::Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }
        let addrs: Vec<_> = self.addr.to_socket_addrs()?.collect();
        let stream = TcpStream::connect(&addrs[..])?;
        stream.set_nodelay(true)?;
        log::debug!("connected to {}", self.addr);
        self.stream = Some(stream);
        Ok(())
    }

    fn send(&mut self, data: &[u8]) -> io::Result<usize> {
        self.stream()?.write_all(data)?;
        Ok(data.len())
    }

    fn finish_sending(&mut self) -> io::Result<()> {
        self.stream()?.shutdown(Shutdown::Write)
    }

    fn receive(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let stream = self.stream()?;
        let mut filled = 0;
        while filled < buf.len() {
            match stream.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(filled)
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }
}

impl Drop for TcpClient {
    fn drop(&mut self) {
        self.close();
    }
}
