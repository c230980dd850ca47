//! TLS handshake state machine
//!
//! `Idle -> Connected -> Handshaking -> Established`, with `Failed`
//! reachable from `Handshaking` and `Established`, and `Closed` reachable
//! from every state.
//!
//! OpenSSL reports "would block" whenever the socket cannot make progress.
//! On a non-blocking socket the step is retried after waiting for
//! readiness; on a blocking socket it means the socket timeout expired.

use super::error::TlsError;
use crate::transport::{PlainSocket, PollEvents};
use openssl::ssl::{self, ErrorCode, HandshakeError, SslStream};
use openssl::x509::X509;

/// Connection state of a `TlsSocket`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketState {
    /// Not connected yet
    Idle,
    /// TCP connected (or accepted), handshake pending
    Connected,
    /// Handshake in progress
    Handshaking,
    /// Encrypted channel ready for application data
    Established,
    /// Handshake, verification or I/O failed; `close()` before reuse
    Failed,
    Closed,
}

impl SocketState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SocketState::Idle => "idle",
            SocketState::Connected => "connected",
            SocketState::Handshaking => "handshaking",
            SocketState::Established => "established",
            SocketState::Failed => "failed",
            SocketState::Closed => "closed",
        }
    }
}

impl std::fmt::Display for SocketState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Handshake capability of an encrypted transport
pub trait TlsHandshake {
    /// Run the handshake and peer authorization on a connected socket
    fn handshake(&mut self) -> Result<(), TlsError>;

    /// Current connection state
    fn state(&self) -> SocketState;

    /// Peer certificate of an established connection
    fn peer_certificate(&self) -> Option<X509>;
}

/// Whether an SSL error only asks to retry the same step
pub(crate) fn wants_retry(err: &ssl::Error) -> bool {
    let code = err.code();
    code == ErrorCode::WANT_READ || code == ErrorCode::WANT_WRITE
}

/// Wait until the socket is ready for the direction OpenSSL asked for
///
/// Fails with a timeout once the socket's receive or send timeout expires.
pub(crate) fn wait_ready(socket: &PlainSocket, code: ErrorCode, context: &str) -> Result<(), TlsError> {
    let (events, timeout) = if code == ErrorCode::WANT_WRITE {
        (PollEvents::Write, socket.send_timeout())
    } else {
        (PollEvents::Read, socket.recv_timeout())
    };

    match socket.poll(events, timeout) {
        Ok(true) => Ok(()),
        Ok(false) => Err(TlsError::from_transport(context, crate::transport::Error::Timeout)),
        Err(e) => Err(TlsError::from_transport(context, e)),
    }
}

/// Drive a handshake started by `Ssl::connect` or `Ssl::accept` to completion
pub(crate) fn drive(
    mut result: Result<SslStream<PlainSocket>, HandshakeError<PlainSocket>>,
) -> Result<SslStream<PlainSocket>, TlsError> {
    loop {
        match result {
            Ok(stream) => return Ok(stream),
            Err(HandshakeError::SetupFailure(stack)) => {
                return Err(TlsError::from_stack("TLS session setup failed", stack));
            }
            Err(HandshakeError::Failure(mid)) => {
                return Err(TlsError::from_ssl("TLS handshake failed", mid.into_error()));
            }
            Err(HandshakeError::WouldBlock(mid)) => {
                if !mid.get_ref().is_nonblocking() {
                    return Err(TlsError::from_ssl("TLS handshake", mid.into_error()));
                }
                wait_ready(mid.get_ref(), mid.error().code(), "TLS handshake")?;
                result = mid.handshake();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tls::ErrorKind;
    use std::net::TcpListener;
    use std::time::Duration;

    #[test]
    fn test_state_names() {
        assert_eq!(SocketState::Established.to_string(), "established");
        assert_eq!(SocketState::Failed.as_str(), "failed");
    }

    #[test]
    fn test_wait_ready_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let mut socket = PlainSocket::new("127.0.0.1", addr.port());
        socket.set_recv_timeout(Some(Duration::from_millis(50))).unwrap();
        socket.connect().unwrap();
        let _peer = listener.accept().unwrap();

        let err = wait_ready(&socket, ErrorCode::WANT_READ, "test read").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transport);
        assert!(matches!(err.transport_error(), Some(crate::transport::Error::Timeout)));
    }

    #[test]
    fn test_wait_ready_for_write() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let mut socket = PlainSocket::new("127.0.0.1", addr.port());
        socket.connect().unwrap();
        let _peer = listener.accept().unwrap();

        assert!(wait_ready(&socket, ErrorCode::WANT_WRITE, "test write").is_ok());
    }
}
