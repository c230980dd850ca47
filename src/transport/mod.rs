//! Plain stream transport
//!
//! This module provides the unencrypted TCP transport that the TLS layer
//! wraps, together with the `StreamTransport` trait every stream transport
//! implements.
//!
//! # Architecture
//!
//! Framing layers are written against `StreamTransport` only:
//!
//! - `PlainSocket` implements it over a raw `TcpStream`
//! - `TlsSocket` implements it over an OpenSSL session running on a `PlainSocket`
//! - Framing code never needs to know which one it was handed
//!
//! # Examples
//!
//! ```no_run
//! use tls_transport::transport::PlainSocket;
//! use tls_transport::StreamTransport;
//! use std::time::Duration;
//!
//! let mut socket = PlainSocket::new("127.0.0.1", 9090);
//! socket.set_connect_timeout(Some(Duration::from_secs(5)));
//! socket.open().unwrap();
//! socket.write_all(b"ping").unwrap();
//! socket.close().unwrap();
//! ```

pub mod server;
pub mod socket;

pub use server::PlainServerSocket;
pub use socket::{PlainSocket, PollEvents};

/// Result type for plain transport operations
pub type Result<T> = std::result::Result<T, Error>;

/// Plain transport errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Socket is not open")]
    NotOpen,

    #[error("Could not resolve {0}")]
    Resolve(String),

    #[error("Timeout")]
    Timeout,
}

/// Default listen backlog for server sockets
pub const DEFAULT_BACKLOG: i32 = 128;

/// Byte-stream transport operations
///
/// The operations mirror those of the plain socket so that a framing layer
/// can run unchanged over either a plain or an encrypted connection.
pub trait StreamTransport {
    /// Error reported by this transport
    type Error: std::error::Error + From<std::io::Error> + Send + Sync + 'static;

    /// Open the transport (connect, and handshake where applicable)
    fn open(&mut self) -> std::result::Result<(), Self::Error>;

    /// Whether the transport is ready for application data
    fn is_open(&self) -> bool;

    /// Read data, returning 0 on orderly shutdown by the peer
    fn read(&mut self, buf: &mut [u8]) -> std::result::Result<usize, Self::Error>;

    /// Write data, returning the number of bytes accepted
    fn write(&mut self, buf: &[u8]) -> std::result::Result<usize, Self::Error>;

    /// Flush buffered data
    fn flush(&mut self) -> std::result::Result<(), Self::Error>;

    /// Close the transport; calling it again is a no-op
    fn close(&mut self) -> std::result::Result<(), Self::Error>;

    /// Write the whole buffer
    fn write_all(&mut self, mut buf: &[u8]) -> std::result::Result<(), Self::Error> {
        while !buf.is_empty() {
            let n = self.write(buf)?;
            if n == 0 {
                return Err(std::io::Error::from(std::io::ErrorKind::WriteZero).into());
            }
            buf = &buf[n..];
        }
        Ok(())
    }

    /// Fill the whole buffer, returning the number of bytes read
    ///
    /// A short count means the peer shut down the stream first.
    fn read_exact(&mut self, buf: &mut [u8]) -> std::result::Result<usize, Self::Error> {
        let mut total = 0;
        while total < buf.len() {
            let n = self.read(&mut buf[total..])?;
            if n == 0 {
                break;
            }
            total += n;
        }
        Ok(total)
    }
}
