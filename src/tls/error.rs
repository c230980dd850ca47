//! TLS error taxonomy
//!
//! Every failure of the underlying crypto library is translated here into a
//! `TlsError` carrying one of three stable kinds. Callers branch on
//! [`TlsError::kind`] only; the message and [`ErrorCode`] exist for
//! diagnostics and may differ between OpenSSL versions.

use super::cert::LoadError;
use crate::transport;
use openssl::error::ErrorStack;
use openssl::ssl::{self, ErrorCode as SslErrorCode};
use openssl::x509::X509VerifyResult;
use std::fmt;
use std::io;

/// Stable error kinds reported by the TLS transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Socket-level I/O failure during connect, handshake, read or write
    Transport,
    /// Context or cipher configuration failure; not retryable as configured
    CipherNotAvailable,
    /// Protocol, handshake or peer verification failure
    Ssl,
}

impl ErrorKind {
    /// Numeric code of the kind, stable across releases
    pub fn code(&self) -> u32 {
        match self {
            ErrorKind::Transport => 7,
            ErrorKind::CipherNotAvailable => 8,
            ErrorKind::Ssl => 9,
        }
    }

    /// Get kind as string
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Transport => "transport",
            ErrorKind::CipherNotAvailable => "cipher not available",
            ErrorKind::Ssl => "ssl",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Low-level code behind a `TlsError`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    None,
    /// Requested protocol range cannot be satisfied
    UnsupportedProtocol,
    /// No cipher usable within the requested range
    CipherUnavailable,
    /// Context construction or identity loading failed
    ContextInit,
    /// Packed OpenSSL error code (first entry of the error queue)
    Library(u64),
    /// X509 verification result code
    Verify(i32),
    /// Operating system / I/O error
    Io(io::ErrorKind, Option<i32>),
}

/// TLS transport error
#[derive(Debug, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct TlsError {
    kind: ErrorKind,
    message: String,
    code: ErrorCode,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl TlsError {
    pub(crate) fn new(kind: ErrorKind, message: impl Into<String>, code: ErrorCode) -> Self {
        TlsError {
            kind,
            message: message.into(),
            code,
            source: None,
        }
    }

    fn with_source<E>(mut self, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source = Some(Box::new(source));
        self
    }

    /// Kind of the failure
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Human-readable description
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Underlying low-level code
    pub fn code(&self) -> ErrorCode {
        self.code
    }

    /// Plain transport error this failure was raised from, if any
    pub fn transport_error(&self) -> Option<&transport::Error> {
        self.source.as_deref()?.downcast_ref::<transport::Error>()
    }

    /// Configuration failure while building a context
    pub(crate) fn config(code: ErrorCode, message: impl Into<String>) -> Self {
        TlsError::new(ErrorKind::CipherNotAvailable, message, code)
    }

    /// Configuration failure reported by the library while building a context
    pub(crate) fn config_stack(code: ErrorCode, context: &str, stack: ErrorStack) -> Self {
        let message = format!("{context}: {stack}");
        TlsError::config(code, message).with_source(stack)
    }

    /// Operation attempted in a state that does not allow it
    pub(crate) fn not_open(message: impl Into<String>) -> Self {
        TlsError::new(ErrorKind::Transport, message, ErrorCode::None)
    }

    /// Peer rejected by verification or authorization
    pub(crate) fn rejected(message: impl Into<String>, result: X509VerifyResult) -> Self {
        let code = if result == X509VerifyResult::OK {
            ErrorCode::None
        } else {
            ErrorCode::Verify(result.as_raw())
        };
        TlsError::new(ErrorKind::Ssl, message, code)
    }

    /// Translate an error stack raised outside of an SSL I/O call
    pub(crate) fn from_stack(context: &str, stack: ErrorStack) -> Self {
        let kind = classify_stack(&stack).unwrap_or(ErrorKind::Ssl);
        let code = stack_code(&stack);
        TlsError::new(kind, format!("{context}: {stack}"), code).with_source(stack)
    }

    /// Translate a failed SSL I/O call (handshake, read, write, shutdown)
    pub(crate) fn from_ssl(context: &str, err: ssl::Error) -> Self {
        let code = err.code();

        if code == SslErrorCode::WANT_READ || code == SslErrorCode::WANT_WRITE {
            let message = format!("{context}: timed out");
            let code = ErrorCode::Io(io::ErrorKind::TimedOut, None);
            return TlsError::new(ErrorKind::Transport, message, code).with_source(err);
        }

        if code == SslErrorCode::ZERO_RETURN {
            let message = format!("{context}: connection closed by peer");
            let code = ErrorCode::Io(io::ErrorKind::UnexpectedEof, None);
            return TlsError::new(ErrorKind::Transport, message, code).with_source(err);
        }

        if let Some(io_err) = err.io_error() {
            let message = format!("{context}: {io_err}");
            let code = ErrorCode::Io(io_err.kind(), io_err.raw_os_error());
            return TlsError::new(ErrorKind::Transport, message, code).with_source(err);
        }

        match err.ssl_error() {
            Some(stack) => {
                let kind = classify_stack(stack).unwrap_or(ErrorKind::Ssl);
                let message = format!("{context}: {stack}");
                let code = stack_code(stack);
                TlsError::new(kind, message, code).with_source(err)
            }
            None if code == SslErrorCode::SYSCALL => {
                let message = format!("{context}: unexpected end of stream");
                let code = ErrorCode::Io(io::ErrorKind::UnexpectedEof, None);
                TlsError::new(ErrorKind::Transport, message, code).with_source(err)
            }
            None => {
                let message = format!("{context}: {err}");
                TlsError::new(ErrorKind::Ssl, message, ErrorCode::None).with_source(err)
            }
        }
    }

    /// Translate a plain transport failure, keeping it as the source
    pub(crate) fn from_transport(context: &str, err: transport::Error) -> Self {
        let code = match &err {
            transport::Error::Io(e) => ErrorCode::Io(e.kind(), e.raw_os_error()),
            transport::Error::Timeout => ErrorCode::Io(io::ErrorKind::TimedOut, None),
            transport::Error::NotOpen => ErrorCode::Io(io::ErrorKind::NotConnected, None),
            transport::Error::Resolve(_) => ErrorCode::None,
        };
        TlsError::new(ErrorKind::Transport, format!("{context}: {err}"), code).with_source(err)
    }
}

impl From<LoadError> for TlsError {
    fn from(err: LoadError) -> Self {
        let message = format!("failed to load certificate material: {err}");
        TlsError::config(ErrorCode::ContextInit, message).with_source(err)
    }
}

impl From<io::Error> for TlsError {
    fn from(err: io::Error) -> Self {
        let code = ErrorCode::Io(err.kind(), err.raw_os_error());
        TlsError::new(ErrorKind::Transport, err.to_string(), code).with_source(err)
    }
}

fn stack_code(stack: &ErrorStack) -> ErrorCode {
    stack
        .errors()
        .first()
        .map(|e| ErrorCode::Library(e.code() as u64))
        .unwrap_or(ErrorCode::None)
}

/// Look for queue entries that point at configuration rather than protocol
/// problems.
fn classify_stack(stack: &ErrorStack) -> Option<ErrorKind> {
    for err in stack.errors() {
        let Some(reason) = err.reason() else {
            continue;
        };
        let reason = reason.to_ascii_lowercase();
        if is_cipher_reason(&reason) {
            return Some(ErrorKind::CipherNotAvailable);
        }
        if reason.contains("unexpected eof") {
            return Some(ErrorKind::Transport);
        }
    }
    None
}

fn is_cipher_reason(reason: &str) -> bool {
    const CIPHER_REASONS: &[&str] = &[
        "no cipher match",
        "no ciphers available",
        "no shared cipher",
        "no protocols available",
    ];
    CIPHER_REASONS.iter().any(|r| reason.contains(r))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_codes_are_stable() {
        assert_eq!(ErrorKind::Transport.code(), 7);
        assert_eq!(ErrorKind::CipherNotAvailable.code(), 8);
        assert_eq!(ErrorKind::Ssl.code(), 9);
    }

    #[test]
    fn test_cipher_reasons() {
        assert!(is_cipher_reason("no cipher match"));
        assert!(is_cipher_reason("no shared cipher"));
        assert!(is_cipher_reason("no protocols available"));
        assert!(!is_cipher_reason("certificate verify failed"));
        assert!(!is_cipher_reason("wrong version number"));
    }

    #[test]
    fn test_io_error_is_transport() {
        let err = TlsError::from(io::Error::new(io::ErrorKind::ConnectionReset, "reset"));
        assert_eq!(err.kind(), ErrorKind::Transport);
        assert_eq!(err.code(), ErrorCode::Io(io::ErrorKind::ConnectionReset, None));
    }

    #[test]
    fn test_transport_error_kept_as_source() {
        let err = TlsError::from_transport("connect failed", transport::Error::Timeout);
        assert_eq!(err.kind(), ErrorKind::Transport);
        assert!(matches!(err.transport_error(), Some(transport::Error::Timeout)));
        assert!(err.to_string().starts_with("transport: connect failed"));
    }

    #[test]
    fn test_rejection_carries_verify_code() {
        let err = TlsError::rejected("peer rejected", X509VerifyResult::APPLICATION_VERIFICATION);
        assert_eq!(err.kind(), ErrorKind::Ssl);
        assert_eq!(
            err.code(),
            ErrorCode::Verify(X509VerifyResult::APPLICATION_VERIFICATION.as_raw())
        );

        let err = TlsError::rejected("peer rejected", X509VerifyResult::OK);
        assert_eq!(err.code(), ErrorCode::None);
    }

    #[test]
    fn test_config_errors_are_cipher_kind() {
        let err = TlsError::config(ErrorCode::UnsupportedProtocol, "min above max");
        assert_eq!(err.kind(), ErrorKind::CipherNotAvailable);
        assert_eq!(err.code(), ErrorCode::UnsupportedProtocol);
    }
}
