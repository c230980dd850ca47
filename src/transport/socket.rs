//! Plain TCP socket transport
//!
//! `PlainSocket` is the unencrypted transport the TLS layer composes. It owns
//! the `TcpStream`, the remote address and the socket options, and exposes a
//! readiness `poll` so that non-blocking sessions can wait for the socket.

use super::{Error, Result, StreamTransport};
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::os::fd::AsRawFd;
use std::time::Duration;

/// Poll events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollEvents {
    Read,
    Write,
}

/// Plain TCP socket
pub struct PlainSocket {
    host: String,
    port: u16,
    stream: Option<TcpStream>,
    peer_addr: Option<SocketAddr>,
    connect_timeout: Option<Duration>,
    recv_timeout: Option<Duration>,
    send_timeout: Option<Duration>,
    nodelay: bool,
    nonblocking: bool,
}

impl PlainSocket {
    /// Create an unconnected socket for `host:port`
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        PlainSocket {
            host: host.into(),
            port,
            stream: None,
            peer_addr: None,
            connect_timeout: None,
            recv_timeout: None,
            send_timeout: None,
            nodelay: true,
            nonblocking: false,
        }
    }

    /// Wrap an already connected stream (e.g. one returned by `accept`)
    pub fn from_stream(stream: TcpStream) -> Result<Self> {
        let peer_addr = stream.peer_addr()?;
        let nodelay = stream.nodelay()?;
        let recv_timeout = stream.read_timeout()?;
        let send_timeout = stream.write_timeout()?;

        Ok(PlainSocket {
            host: peer_addr.ip().to_string(),
            port: peer_addr.port(),
            stream: Some(stream),
            peer_addr: Some(peer_addr),
            connect_timeout: None,
            recv_timeout,
            send_timeout,
            nodelay,
            nonblocking: false,
        })
    }

    /// Host this socket connects to (the peer IP for accepted sockets)
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Remote port
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Address of the connected peer
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    /// Local address of the connected socket
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.stream()?.local_addr()?)
    }

    /// Set the connect timeout (`None` blocks until the OS gives up)
    pub fn set_connect_timeout(&mut self, timeout: Option<Duration>) {
        self.connect_timeout = timeout;
    }

    /// Set the receive timeout, applied immediately if connected
    pub fn set_recv_timeout(&mut self, timeout: Option<Duration>) -> Result<()> {
        if let Some(stream) = &self.stream {
            stream.set_read_timeout(timeout)?;
        }
        self.recv_timeout = timeout;
        Ok(())
    }

    /// Receive timeout
    pub fn recv_timeout(&self) -> Option<Duration> {
        self.recv_timeout
    }

    /// Set the send timeout, applied immediately if connected
    pub fn set_send_timeout(&mut self, timeout: Option<Duration>) -> Result<()> {
        if let Some(stream) = &self.stream {
            stream.set_write_timeout(timeout)?;
        }
        self.send_timeout = timeout;
        Ok(())
    }

    /// Send timeout
    pub fn send_timeout(&self) -> Option<Duration> {
        self.send_timeout
    }

    /// Enable/disable TCP_NODELAY
    pub fn set_nodelay(&mut self, nodelay: bool) -> Result<()> {
        if let Some(stream) = &self.stream {
            stream.set_nodelay(nodelay)?;
        }
        self.nodelay = nodelay;
        Ok(())
    }

    /// Switch the socket between blocking and non-blocking mode
    pub fn set_nonblocking(&mut self, nonblocking: bool) -> Result<()> {
        if let Some(stream) = &self.stream {
            stream.set_nonblocking(nonblocking)?;
        }
        self.nonblocking = nonblocking;
        Ok(())
    }

    /// Whether the socket is in non-blocking mode
    pub fn is_nonblocking(&self) -> bool {
        self.nonblocking
    }

    /// Resolve the host and connect to the first address that accepts
    pub fn connect(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }

        let addrs: Vec<SocketAddr> = (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|e| Error::Resolve(format!("{}:{}: {}", self.host, self.port, e)))?
            .collect();
        if addrs.is_empty() {
            return Err(Error::Resolve(format!("{}:{}", self.host, self.port)));
        }

        let mut last_err = None;
        for addr in addrs {
            match self.connect_addr(addr) {
                Ok(stream) => {
                    self.peer_addr = Some(addr);
                    self.stream = Some(stream);
                    return Ok(());
                }
                Err(e) => last_err = Some(e),
            }
        }

        Err(last_err.unwrap_or(Error::NotOpen))
    }

    fn connect_addr(&self, addr: SocketAddr) -> Result<TcpStream> {
        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
        let sock_addr = SockAddr::from(addr);

        match self.connect_timeout {
            Some(timeout) => socket.connect_timeout(&sock_addr, timeout).map_err(|e| {
                if e.kind() == io::ErrorKind::TimedOut {
                    Error::Timeout
                } else {
                    Error::Io(e)
                }
            })?,
            None => socket.connect(&sock_addr)?,
        }

        socket.set_nodelay(self.nodelay)?;
        socket.set_read_timeout(self.recv_timeout)?;
        socket.set_write_timeout(self.send_timeout)?;
        socket.set_nonblocking(self.nonblocking)?;

        Ok(socket.into())
    }

    /// Poll the socket for events
    ///
    /// Returns true if the socket is ready for the requested operation
    pub fn poll(&self, events: PollEvents, timeout: Option<Duration>) -> Result<bool> {
        use libc::{poll, pollfd, POLLIN, POLLOUT};

        let mut pfd = pollfd {
            fd: self.stream()?.as_raw_fd(),
            events: match events {
                PollEvents::Read => POLLIN,
                PollEvents::Write => POLLOUT,
            },
            revents: 0,
        };

        let timeout_ms = timeout
            .map(|d| d.as_millis().min(i32::MAX as u128) as i32)
            .unwrap_or(-1); // -1 = infinite

        loop {
            let result = unsafe { poll(&mut pfd as *mut pollfd, 1, timeout_ms) };
            if result >= 0 {
                return Ok(result > 0);
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(Error::Io(err));
            }
        }
    }

    /// Clone the underlying stream handle
    pub fn try_clone_stream(&self) -> Result<TcpStream> {
        Ok(self.stream()?.try_clone()?)
    }

    fn stream(&self) -> Result<&TcpStream> {
        self.stream.as_ref().ok_or(Error::NotOpen)
    }

    fn stream_mut(&mut self) -> Result<&mut TcpStream> {
        self.stream.as_mut().ok_or(Error::NotOpen)
    }
}

impl Read for PlainSocket {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.stream.as_mut() {
            Some(stream) => stream.read(buf),
            None => Err(io::ErrorKind::NotConnected.into()),
        }
    }
}

impl Write for PlainSocket {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.stream.as_mut() {
            Some(stream) => stream.write(buf),
            None => Err(io::ErrorKind::NotConnected.into()),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.stream.as_mut() {
            Some(stream) => stream.flush(),
            None => Ok(()),
        }
    }
}

impl StreamTransport for PlainSocket {
    type Error = Error;

    fn open(&mut self) -> Result<()> {
        self.connect()
    }

    fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.stream_mut()?.read(buf).map_err(Error::from)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        self.stream_mut()?.write(buf).map_err(Error::from)
    }

    fn flush(&mut self) -> Result<()> {
        match self.stream.as_mut() {
            Some(stream) => stream.flush().map_err(Error::from),
            None => Ok(()),
        }
    }

    fn close(&mut self) -> Result<()> {
        let Some(stream) = self.stream.take() else {
            return Ok(());
        };

        match stream.shutdown(Shutdown::Both) {
            Ok(()) => Ok(()),
            // Peer already gone
            Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
            Err(e) => Err(Error::Io(e)),
        }
    }
}

impl Drop for PlainSocket {
    fn drop(&mut self) {
        let _ = StreamTransport::close(self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::thread;

    #[test]
    fn test_plain_socket_roundtrip() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut socket = PlainSocket::from_stream(stream).unwrap();
            let mut buf = [0u8; 5];
            assert_eq!(StreamTransport::read_exact(&mut socket, &mut buf).unwrap(), 5);
            StreamTransport::write_all(&mut socket, &buf).unwrap();
        });

        let mut socket = PlainSocket::new("127.0.0.1", addr.port());
        socket.set_connect_timeout(Some(Duration::from_secs(5)));
        socket.open().unwrap();
        assert!(socket.is_open());
        assert_eq!(socket.peer_addr(), Some(addr));

        StreamTransport::write_all(&mut socket, b"Hello").unwrap();
        assert!(socket.poll(PollEvents::Read, Some(Duration::from_secs(5))).unwrap());
        let mut buf = [0u8; 5];
        assert_eq!(StreamTransport::read_exact(&mut socket, &mut buf).unwrap(), 5);
        assert_eq!(&buf, b"Hello");

        handle.join().unwrap();
    }

    #[test]
    fn test_poll_timeout() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let _handle = thread::spawn(move || {
            let (_stream, _) = listener.accept().unwrap();
            thread::sleep(Duration::from_millis(500));
        });

        let mut socket = PlainSocket::new("127.0.0.1", addr.port());
        socket.open().unwrap();
        let ready = socket.poll(PollEvents::Read, Some(Duration::from_millis(50))).unwrap();
        assert!(!ready);
    }

    #[test]
    fn test_close_is_idempotent() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let mut socket = PlainSocket::new("127.0.0.1", addr.port());
        socket.open().unwrap();
        let _accepted = listener.accept().unwrap();

        socket.close().unwrap();
        assert!(!socket.is_open());
        socket.close().unwrap();
    }

    #[test]
    fn test_io_on_unopened_socket() {
        let mut socket = PlainSocket::new("127.0.0.1", 1);
        let mut buf = [0u8; 4];
        assert!(matches!(StreamTransport::read(&mut socket, &mut buf), Err(Error::NotOpen)));
        assert!(matches!(socket.poll(PollEvents::Read, None), Err(Error::NotOpen)));
    }

    #[test]
    fn test_connect_refused() {
        // Bind then drop to find a port nobody listens on
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };

        let mut socket = PlainSocket::new("127.0.0.1", port);
        let err = socket.open().unwrap_err();
        assert!(matches!(err, Error::Io(_)));
        assert!(!socket.is_open());
    }

    #[test]
    fn test_timeouts_apply_to_open_socket() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let mut socket = PlainSocket::new("127.0.0.1", addr.port());
        socket.open().unwrap();
        socket.set_recv_timeout(Some(Duration::from_millis(250))).unwrap();
        assert_eq!(socket.recv_timeout(), Some(Duration::from_millis(250)));

        // The kernel rounds the timeout to its timer tick
        let applied = socket.try_clone_stream().unwrap().read_timeout().unwrap().unwrap();
        assert!(applied >= Duration::from_millis(240) && applied <= Duration::from_millis(300));
    }
}
