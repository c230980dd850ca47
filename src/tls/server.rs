//! TLS server socket

use super::authorizer::PeerAuthorizer;
use super::config::Role;
use super::context::TlsContext;
use super::error::{ErrorCode, TlsError};
use super::socket::TlsSocket;
use crate::transport::PlainServerSocket;
use log::debug;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;

/// Listening socket producing `TlsSocket`s
///
/// Accepted sockets are `Connected`; the caller runs the handshake, usually
/// on the thread that serves the connection.
pub struct TlsServerSocket {
    listener: PlainServerSocket,
    context: Arc<TlsContext>,
    authorizer: Option<Arc<dyn PeerAuthorizer>>,
}

impl TlsServerSocket {
    /// Bind and listen with a server-role context
    pub fn bind<A: ToSocketAddrs>(addr: A, context: Arc<TlsContext>) -> Result<Self, TlsError> {
        if context.role() != Role::Server {
            return Err(TlsError::config(
                ErrorCode::ContextInit,
                "server socket requires a server context",
            ));
        }

        let listener =
            PlainServerSocket::bind(addr).map_err(|e| TlsError::from_transport("failed to bind", e))?;
        debug!("TLS server listening on {}", listener.local_addr());

        Ok(TlsServerSocket {
            listener,
            context,
            authorizer: None,
        })
    }

    /// Address the server is listening on
    pub fn local_addr(&self) -> SocketAddr {
        self.listener.local_addr()
    }

    /// Receive timeout applied to every accepted socket
    pub fn set_recv_timeout(&mut self, timeout: Option<Duration>) {
        self.listener.set_recv_timeout(timeout);
    }

    /// Send timeout applied to every accepted socket
    pub fn set_send_timeout(&mut self, timeout: Option<Duration>) {
        self.listener.set_send_timeout(timeout);
    }

    /// Authorizer installed on every accepted socket
    pub fn set_authorizer<A: PeerAuthorizer + 'static>(&mut self, authorizer: A) {
        self.authorizer = Some(Arc::new(authorizer));
    }

    pub fn context(&self) -> &Arc<TlsContext> {
        &self.context
    }

    /// Accept the next connection; the handshake is still pending
    pub fn accept(&self) -> Result<TlsSocket, TlsError> {
        let plain = self
            .listener
            .accept()
            .map_err(|e| TlsError::from_transport("accept failed", e))?;
        debug!("accepted connection from {:?}", plain.peer_addr());

        let mut socket = TlsSocket::with_socket(Arc::clone(&self.context), plain);
        if let Some(authorizer) = &self.authorizer {
            socket.set_shared_authorizer(Arc::clone(authorizer));
        }
        Ok(socket)
    }
}
