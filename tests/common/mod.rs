//! Shared helpers for the TLS integration tests

#![allow(dead_code)]

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tls_transport::tls::{CryptoEngine, Identity, TlsContext, TlsContextBuilder, TlsServerSocket, TlsSocket};

/// Test PKI: one root CA with a server and a client leaf
pub struct Pki {
    pub ca: Identity,
    pub server: Identity,
    pub client: Identity,
}

pub fn pki() -> Pki {
    CryptoEngine::initialize();
    let ca = Identity::certificate_authority("Test Root CA").unwrap();
    let server = ca.issue("localhost").unwrap();
    let client = ca.issue("client.test").unwrap();
    Pki { ca, server, client }
}

/// Client context trusting only the test CA
pub fn client_builder(pki: &Pki) -> TlsContextBuilder {
    TlsContext::client().trust_certificate(pki.ca.certificate().to_owned())
}

/// Server context presenting the CA-issued server identity
pub fn server_builder(pki: &Pki) -> TlsContextBuilder {
    TlsContext::server()
        .identity(pki.server.clone())
        .trust_certificate(pki.ca.certificate().to_owned())
}

pub fn build(builder: TlsContextBuilder) -> Arc<TlsContext> {
    Arc::new(builder.build().unwrap())
}

/// Accept one connection on a loopback port and run `handler` on it
///
/// The handler receives the accepted socket before the handshake.
pub fn serve_once<F, T>(context: Arc<TlsContext>, handler: F) -> (u16, JoinHandle<T>)
where
    F: FnOnce(TlsSocket) -> T + Send + 'static,
    T: Send + 'static,
{
    let mut server = TlsServerSocket::bind("127.0.0.1:0", context).unwrap();
    server.set_recv_timeout(Some(Duration::from_secs(10)));
    server.set_send_timeout(Some(Duration::from_secs(10)));
    let port = server.local_addr().port();

    let handle = thread::spawn(move || {
        let socket = server.accept().unwrap();
        handler(socket)
    });

    (port, handle)
}

/// Client socket with test timeouts
pub fn client_socket(context: Arc<TlsContext>, host: &str, port: u16) -> TlsSocket {
    let mut socket = TlsSocket::new(context, host, port);
    let plain = socket.socket_mut().unwrap();
    plain.set_connect_timeout(Some(Duration::from_secs(5)));
    plain.set_recv_timeout(Some(Duration::from_secs(10))).unwrap();
    plain.set_send_timeout(Some(Duration::from_secs(10))).unwrap();
    socket
}
