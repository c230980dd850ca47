//! TLS socket
//!
//! `TlsSocket` composes a `PlainSocket` with a per-connection OpenSSL
//! session. It implements `StreamTransport`, so framing code written for the
//! plain transport runs unchanged over the encrypted channel, and
//! `TlsHandshake` for the connection state machine.

use super::authorizer::{self, DefaultAuthorizer, PeerAuthorizer, PeerContext, VerifyFailure};
use super::cert::CertInfo;
use super::config::Role;
use super::context::TlsContext;
use super::error::TlsError;
use super::handshake::{self, SocketState, TlsHandshake};
use super::info::SessionInfo;
use crate::transport::{PlainSocket, StreamTransport};
use log::{debug, warn};
use openssl::ssl::{ErrorCode, SslStream};
use openssl::x509::{X509Ref, X509VerifyResult, X509};
use std::io::Write;
use std::mem;
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

enum Channel {
    None,
    Plain(PlainSocket),
    Tls(Box<SslStream<PlainSocket>>),
}

/// State shared with close handles
#[derive(Default)]
struct Shared {
    stream: Mutex<Option<TcpStream>>,
    aborted: AtomicBool,
}

impl Shared {
    fn stream(&self) -> MutexGuard<'_, Option<TcpStream>> {
        self.stream.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Closes a `TlsSocket` from another thread
///
/// This is the only operation that may run concurrently with the owning
/// thread. It shuts the TCP connection down, which unblocks a pending
/// handshake, read or write; those then fail with kind `Transport` and the
/// socket stays `Failed` until its owner calls `close()`.
#[derive(Clone)]
pub struct CloseHandle {
    shared: Arc<Shared>,
}

impl CloseHandle {
    pub fn close(&self) {
        self.shared.aborted.store(true, Ordering::SeqCst);
        if let Some(stream) = self.shared.stream().as_ref() {
            if let Err(e) = stream.shutdown(Shutdown::Both) {
                debug!("shutdown from close handle: {}", e);
            }
        }
    }

    /// Whether `close` was called
    pub fn is_closed(&self) -> bool {
        self.shared.aborted.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for CloseHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloseHandle")
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// TLS-secured stream socket
pub struct TlsSocket {
    context: Arc<TlsContext>,
    state: SocketState,
    channel: Channel,
    host: String,
    authorizer: Option<Arc<dyn PeerAuthorizer>>,
    peer_addr: Option<SocketAddr>,
    session: Option<SessionInfo>,
    shared: Arc<Shared>,
}

impl TlsSocket {
    /// Create an unconnected socket for `host:port`
    pub fn new(context: Arc<TlsContext>, host: impl Into<String>, port: u16) -> Self {
        let host = host.into();
        let socket = PlainSocket::new(host.clone(), port);
        TlsSocket::build(context, host, socket, SocketState::Idle)
    }

    /// Wrap a plain socket, typically one returned by `accept`
    ///
    /// A connected socket starts in `Connected`, ready for the handshake.
    pub fn with_socket(context: Arc<TlsContext>, socket: PlainSocket) -> Self {
        let state = if socket.is_open() {
            SocketState::Connected
        } else {
            SocketState::Idle
        };
        let host = socket.host().to_string();
        let mut tls = TlsSocket::build(context, host, socket, state);
        if state == SocketState::Connected {
            tls.peer_addr = tls.socket().and_then(|s| s.peer_addr());
            tls.register_stream();
        }
        tls
    }

    fn build(context: Arc<TlsContext>, host: String, socket: PlainSocket, state: SocketState) -> Self {
        TlsSocket {
            context,
            state,
            channel: Channel::Plain(socket),
            host,
            authorizer: None,
            peer_addr: None,
            session: None,
            shared: Arc::new(Shared::default()),
        }
    }

    /// Install a peer authorizer; its verdict replaces the built-in one
    pub fn set_authorizer<A: PeerAuthorizer + 'static>(&mut self, authorizer: A) {
        self.authorizer = Some(Arc::new(authorizer));
    }

    /// Install a closure `(certificate, remote address) -> accept` as authorizer
    pub fn set_authorizer_fn<F>(&mut self, f: F)
    where
        F: Fn(Option<&X509Ref>, &SocketAddr) -> bool + Send + Sync + 'static,
    {
        self.set_authorizer(authorizer::authorize_fn(f));
    }

    /// Install an authorizer shared with other sockets
    pub fn set_shared_authorizer(&mut self, authorizer: Arc<dyn PeerAuthorizer>) {
        self.authorizer = Some(authorizer);
    }

    pub fn context(&self) -> &Arc<TlsContext> {
        &self.context
    }

    /// Host this socket connects to
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Remote address once connected
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    /// Underlying plain socket, if not closed
    pub fn socket(&self) -> Option<&PlainSocket> {
        match &self.channel {
            Channel::Plain(socket) => Some(socket),
            Channel::Tls(stream) => Some(stream.get_ref()),
            Channel::None => None,
        }
    }

    /// Underlying plain socket, e.g. to set timeouts or non-blocking mode
    pub fn socket_mut(&mut self) -> Option<&mut PlainSocket> {
        match &mut self.channel {
            Channel::Plain(socket) => Some(socket),
            Channel::Tls(stream) => Some(stream.get_mut()),
            Channel::None => None,
        }
    }

    /// Handle that closes this socket from another thread
    pub fn close_handle(&self) -> CloseHandle {
        CloseHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn state(&self) -> SocketState {
        self.state
    }

    pub fn is_established(&self) -> bool {
        self.state == SocketState::Established
    }

    /// Negotiated session details, once established
    pub fn session_info(&self) -> Option<&SessionInfo> {
        self.session.as_ref()
    }

    /// Peer certificate of an established connection
    pub fn peer_certificate(&self) -> Option<X509> {
        match &self.channel {
            Channel::Tls(stream) if self.state == SocketState::Established => {
                stream.ssl().peer_certificate()
            }
            _ => None,
        }
    }

    /// Connect the underlying plain socket
    ///
    /// Failures are the plain transport's own, available through
    /// [`TlsError::transport_error`].
    pub fn connect(&mut self) -> Result<(), TlsError> {
        match self.state {
            SocketState::Idle => {}
            SocketState::Connected | SocketState::Handshaking | SocketState::Established => {
                return Ok(())
            }
            SocketState::Failed => return Err(TlsError::not_open("connect on a failed socket")),
            SocketState::Closed => return Err(TlsError::not_open("connect on a closed socket")),
        }
        self.check_aborted("connect")?;

        let Channel::Plain(socket) = &mut self.channel else {
            return Err(TlsError::not_open("connect without a socket"));
        };
        if let Err(e) = socket.connect() {
            let context = format!("failed to connect to {}:{}", socket.host(), socket.port());
            return Err(TlsError::from_transport(&context, e));
        }
        let peer_addr = socket.peer_addr();

        self.peer_addr = peer_addr;
        self.register_stream();
        self.state = SocketState::Connected;
        debug!("connected to {}:{} ({:?})", self.host, self.port(), self.peer_addr);
        Ok(())
    }

    /// Perform the TLS handshake and authorize the peer
    pub fn handshake(&mut self) -> Result<(), TlsError> {
        match self.state {
            SocketState::Connected => {}
            SocketState::Established => return Ok(()),
            SocketState::Idle => {
                return Err(TlsError::not_open("handshake requires a connected socket"))
            }
            SocketState::Handshaking | SocketState::Failed => {
                return Err(TlsError::not_open("failed socket must be closed before reuse"))
            }
            SocketState::Closed => return Err(TlsError::not_open("handshake on a closed socket")),
        }
        if let Err(e) = self.check_aborted("TLS handshake") {
            self.state = SocketState::Failed;
            return Err(e);
        }

        let socket = match mem::replace(&mut self.channel, Channel::None) {
            Channel::Plain(socket) => socket,
            other => {
                self.channel = other;
                return Err(TlsError::not_open("handshake without a plain socket"));
            }
        };

        self.state = SocketState::Handshaking;
        match self.run_handshake(socket) {
            Ok(stream) => {
                self.channel = Channel::Tls(Box::new(stream));
                self.state = SocketState::Established;
                Ok(())
            }
            Err(e) => {
                self.state = SocketState::Failed;
                self.shared.stream().take();
                debug!("TLS handshake with {:?} failed: {}", self.peer_addr, e);
                Err(e)
            }
        }
    }

    fn run_handshake(&mut self, socket: PlainSocket) -> Result<SslStream<PlainSocket>, TlsError> {
        let log = authorizer::new_verify_log();
        let ssl = self.context.new_ssl(&self.host, Arc::clone(&log))?;

        let started = match self.context.role() {
            Role::Client => ssl.connect(socket),
            Role::Server => ssl.accept(socket),
        };
        let stream = handshake::drive(started).map_err(|e| self.aborted_or(e, "TLS handshake"))?;

        let failures = authorizer::take_failures(&log);
        self.authorize(&stream, &failures)?;

        let session = SessionInfo::from_ssl(stream.ssl(), failures);
        debug!("TLS session with {:?} established: {}", self.peer_addr, session);
        self.session = Some(session);
        Ok(stream)
    }

    /// Apply the authorizer (or the default policy) to a completed handshake
    fn authorize(&self, stream: &SslStream<PlainSocket>, failures: &[VerifyFailure]) -> Result<(), TlsError> {
        let role = self.context.role();
        let certificate = stream.ssl().peer_certificate();

        if role == Role::Client && certificate.is_none() {
            warn!("TLS server {:?} presented no certificate", self.peer_addr);
            return Err(TlsError::rejected(
                "server presented no certificate",
                X509VerifyResult::APPLICATION_VERIFICATION,
            ));
        }

        let remote_addr = stream
            .get_ref()
            .peer_addr()
            .ok_or_else(|| TlsError::not_open("peer address unavailable"))?;
        let peer = PeerContext {
            certificate: certificate.as_deref(),
            remote_addr,
            failures,
            role,
        };

        let accepted = match &self.authorizer {
            Some(authorizer) => authorizer.authorize(&peer),
            None => DefaultAuthorizer::new(self.context.allows_self_signed()).authorize(&peer),
        };
        if accepted {
            return Ok(());
        }

        let subject = peer
            .certificate
            .map(|c| CertInfo::from_x509(c).to_string())
            .unwrap_or_else(|| "no certificate".to_string());
        let reason = match failures.first() {
            Some(failure) => failure.to_string(),
            None => "rejected by authorizer".to_string(),
        };
        warn!("rejected TLS peer {} ({}): {}", remote_addr, subject, reason);

        let result = if peer.verified() {
            X509VerifyResult::APPLICATION_VERIFICATION
        } else {
            peer.verify_result()
        };
        Err(TlsError::rejected(
            format!("peer {remote_addr} rejected: {reason}"),
            result,
        ))
    }

    fn port(&self) -> u16 {
        self.socket().map(|s| s.port()).unwrap_or(0)
    }

    fn register_stream(&self) {
        let Some(socket) = self.socket() else {
            return;
        };
        match socket.try_clone_stream() {
            Ok(stream) => *self.shared.stream() = Some(stream),
            Err(e) => debug!("close handle unavailable: {}", e),
        }
    }

    fn is_aborted(&self) -> bool {
        self.shared.aborted.load(Ordering::SeqCst)
    }

    fn aborted_error(context: &str) -> TlsError {
        TlsError::not_open(format!("{context}: socket closed from another thread"))
    }

    fn check_aborted(&self, context: &str) -> Result<(), TlsError> {
        if self.is_aborted() {
            return Err(Self::aborted_error(context));
        }
        Ok(())
    }

    fn aborted_or(&self, err: TlsError, context: &str) -> TlsError {
        if self.is_aborted() {
            Self::aborted_error(context)
        } else {
            err
        }
    }

    fn not_established(&self, operation: &str) -> TlsError {
        TlsError::not_open(format!("{operation} on a {} socket", self.state))
    }

    /// Record the outcome of an I/O call on the established channel
    fn finish_io(&mut self, result: Result<usize, TlsError>, context: &str) -> Result<usize, TlsError> {
        match result {
            Ok(0) if self.is_aborted() => {
                self.state = SocketState::Failed;
                Err(Self::aborted_error(context))
            }
            Ok(n) => Ok(n),
            Err(e) => {
                self.state = SocketState::Failed;
                Err(self.aborted_or(e, context))
            }
        }
    }
}

fn read_tls(stream: &mut SslStream<PlainSocket>, buf: &mut [u8]) -> Result<usize, TlsError> {
    loop {
        match stream.ssl_read(buf) {
            Ok(n) => return Ok(n),
            Err(e) if e.code() == ErrorCode::ZERO_RETURN => return Ok(0),
            // EOF without close_notify on older libraries
            Err(e) if e.code() == ErrorCode::SYSCALL && e.io_error().is_none() && e.ssl_error().is_none() => {
                return Ok(0)
            }
            Err(e) if handshake::wants_retry(&e) && stream.get_ref().is_nonblocking() => {
                handshake::wait_ready(stream.get_ref(), e.code(), "TLS read")?;
            }
            Err(e) => return Err(TlsError::from_ssl("TLS read failed", e)),
        }
    }
}

fn write_tls(stream: &mut SslStream<PlainSocket>, buf: &[u8]) -> Result<usize, TlsError> {
    loop {
        match stream.ssl_write(buf) {
            Ok(n) => return Ok(n),
            Err(e) if handshake::wants_retry(&e) && stream.get_ref().is_nonblocking() => {
                handshake::wait_ready(stream.get_ref(), e.code(), "TLS write")?;
            }
            Err(e) => return Err(TlsError::from_ssl("TLS write failed", e)),
        }
    }
}

impl TlsHandshake for TlsSocket {
    fn handshake(&mut self) -> Result<(), TlsError> {
        TlsSocket::handshake(self)
    }

    fn state(&self) -> SocketState {
        self.state
    }

    fn peer_certificate(&self) -> Option<X509> {
        TlsSocket::peer_certificate(self)
    }
}

impl StreamTransport for TlsSocket {
    type Error = TlsError;

    fn open(&mut self) -> Result<(), TlsError> {
        if self.state == SocketState::Idle {
            self.connect()?;
        }
        self.handshake()
    }

    fn is_open(&self) -> bool {
        self.state == SocketState::Established && !self.is_aborted()
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TlsError> {
        if self.state != SocketState::Established {
            return Err(self.not_established("read"));
        }
        if self.is_aborted() {
            return self.finish_io(Ok(0), "TLS read");
        }
        let Channel::Tls(stream) = &mut self.channel else {
            return Err(TlsError::not_open("read without a TLS session"));
        };
        let result = read_tls(stream, buf);
        self.finish_io(result, "TLS read")
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize, TlsError> {
        if self.state != SocketState::Established {
            return Err(self.not_established("write"));
        }
        if self.is_aborted() {
            return self.finish_io(Ok(0), "TLS write");
        }
        let Channel::Tls(stream) = &mut self.channel else {
            return Err(TlsError::not_open("write without a TLS session"));
        };
        let result = write_tls(stream, buf);
        self.finish_io(result, "TLS write")
    }

    fn flush(&mut self) -> Result<(), TlsError> {
        if self.state != SocketState::Established {
            return Err(self.not_established("flush"));
        }
        if self.is_aborted() {
            self.state = SocketState::Failed;
            return Err(Self::aborted_error("TLS flush"));
        }
        let Channel::Tls(stream) = &mut self.channel else {
            return Err(TlsError::not_open("flush without a TLS session"));
        };
        if let Err(e) = stream.flush() {
            self.state = SocketState::Failed;
            return Err(TlsError::from(e));
        }
        Ok(())
    }

    /// Release the session and the socket; always succeeds
    ///
    /// A close_notify is sent on a healthy established connection. Failures
    /// while releasing are logged, not returned.
    fn close(&mut self) -> Result<(), TlsError> {
        if self.state == SocketState::Closed {
            return Ok(());
        }

        match mem::replace(&mut self.channel, Channel::None) {
            Channel::Tls(mut stream) => {
                if self.state == SocketState::Established && !self.is_aborted() {
                    if let Err(e) = stream.shutdown() {
                        debug!("TLS shutdown with {:?}: {}", self.peer_addr, e);
                    }
                }
                if let Err(e) = StreamTransport::close(stream.get_mut()) {
                    warn!("closing socket to {:?} failed: {}", self.peer_addr, e);
                }
            }
            Channel::Plain(mut socket) => {
                if let Err(e) = StreamTransport::close(&mut socket) {
                    warn!("closing socket to {:?} failed: {}", self.peer_addr, e);
                }
            }
            Channel::None => {}
        }

        self.shared.stream().take();
        self.state = SocketState::Closed;
        Ok(())
    }
}

impl Drop for TlsSocket {
    fn drop(&mut self) {
        let _ = StreamTransport::close(self);
    }
}

impl std::fmt::Debug for TlsSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsSocket")
            .field("host", &self.host)
            .field("peer_addr", &self.peer_addr)
            .field("state", &self.state)
            .field("role", &self.context.role())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tls::{CryptoEngine, ErrorKind, Identity};
    use crate::transport::PlainServerSocket;
    use std::thread;

    fn contexts() -> (Arc<TlsContext>, Arc<TlsContext>) {
        CryptoEngine::initialize();
        let ca = Identity::certificate_authority("Unit Root").unwrap();
        let server = TlsContext::server()
            .identity(ca.issue("localhost").unwrap())
            .build()
            .unwrap();
        let client = TlsContext::client()
            .trust_certificate(ca.certificate().to_owned())
            .build()
            .unwrap();
        (Arc::new(server), Arc::new(client))
    }

    #[test]
    fn test_io_before_handshake() {
        let (_, client) = contexts();
        let mut socket = TlsSocket::new(client, "localhost", 1);

        assert_eq!(socket.state(), SocketState::Idle);
        let err = StreamTransport::write(&mut socket, b"x").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transport);
        let err = StreamTransport::flush(&mut socket).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transport);
        assert!(socket.handshake().is_err());
        assert_eq!(socket.state(), SocketState::Idle);
    }

    #[test]
    fn test_handshake_and_session_info() {
        let (server_ctx, client_ctx) = contexts();
        let listener = PlainServerSocket::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().port();

        let server = thread::spawn(move || {
            let plain = listener.accept().unwrap();
            let mut socket = TlsSocket::with_socket(server_ctx, plain);
            assert_eq!(socket.state(), SocketState::Connected);
            socket.handshake().unwrap();

            let mut buf = [0u8; 4];
            assert_eq!(socket.read_exact(&mut buf).unwrap(), 4);
            socket.write_all(&buf).unwrap();
            socket.close().unwrap();
        });

        let mut socket = TlsSocket::new(client_ctx, "localhost", port);
        socket.open().unwrap();
        assert!(socket.is_open());

        let info = socket.session_info().unwrap();
        assert!(info.verified());
        assert_eq!(info.servername.as_deref(), Some("localhost"));
        assert_eq!(info.peer().unwrap().subject, "localhost");
        assert!(socket.peer_certificate().is_some());

        socket.write_all(b"ping").unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(socket.read_exact(&mut buf).unwrap(), 4);
        assert_eq!(&buf, b"ping");

        socket.flush().unwrap();
        socket.close().unwrap();
        assert_eq!(socket.state(), SocketState::Closed);
        assert!(socket.peer_certificate().is_none());
        assert_eq!(socket.flush().unwrap_err().kind(), ErrorKind::Transport);
        server.join().unwrap();
    }
}
