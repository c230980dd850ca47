//! Plain TCP server socket

use super::{Error, PlainSocket, Result, DEFAULT_BACKLOG};
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::net::{SocketAddr, TcpListener, ToSocketAddrs};
use std::time::Duration;

/// Listening TCP socket producing `PlainSocket`s
pub struct PlainServerSocket {
    listener: TcpListener,
    local_addr: SocketAddr,
    recv_timeout: Option<Duration>,
    send_timeout: Option<Duration>,
}

impl PlainServerSocket {
    /// Bind and listen on the first address `addr` resolves to
    pub fn bind<A: ToSocketAddrs>(addr: A) -> Result<Self> {
        Self::bind_with_backlog(addr, DEFAULT_BACKLOG)
    }

    /// Bind and listen with an explicit backlog
    pub fn bind_with_backlog<A: ToSocketAddrs>(addr: A, backlog: i32) -> Result<Self> {
        let addr = addr
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| Error::Resolve("no address to bind".to_string()))?;

        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
        socket.set_reuse_address(true)?;
        socket.bind(&SockAddr::from(addr))?;
        socket.listen(backlog)?;

        let listener: TcpListener = socket.into();
        let local_addr = listener.local_addr()?;

        Ok(PlainServerSocket {
            listener,
            local_addr,
            recv_timeout: None,
            send_timeout: None,
        })
    }

    /// Address the server is listening on
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Receive timeout applied to every accepted socket
    pub fn set_recv_timeout(&mut self, timeout: Option<Duration>) {
        self.recv_timeout = timeout;
    }

    /// Send timeout applied to every accepted socket
    pub fn set_send_timeout(&mut self, timeout: Option<Duration>) {
        self.send_timeout = timeout;
    }

    /// Accept the next connection
    pub fn accept(&self) -> Result<PlainSocket> {
        let (stream, _) = self.listener.accept()?;
        let mut socket = PlainSocket::from_stream(stream)?;
        socket.set_nodelay(true)?;
        socket.set_recv_timeout(self.recv_timeout)?;
        socket.set_send_timeout(self.send_timeout)?;
        Ok(socket)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::StreamTransport;
    use std::thread;

    #[test]
    fn test_accept_applies_timeouts() {
        let mut server = PlainServerSocket::bind("127.0.0.1:0").unwrap();
        server.set_recv_timeout(Some(Duration::from_secs(3)));
        let port = server.local_addr().port();

        let handle = thread::spawn(move || {
            let mut client = PlainSocket::new("127.0.0.1", port);
            client.open().unwrap();
            client.write_all(b"ok").unwrap();
        });

        let mut accepted = server.accept().unwrap();
        assert!(accepted.is_open());
        assert_eq!(accepted.recv_timeout(), Some(Duration::from_secs(3)));
        assert_eq!(accepted.host(), "127.0.0.1");

        let mut buf = [0u8; 2];
        assert_eq!(accepted.read_exact(&mut buf).unwrap(), 2);
        assert_eq!(&buf, b"ok");

        handle.join().unwrap();
    }
}
