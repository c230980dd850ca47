//! TLS transport
//!
//! This module implements the encrypted stream transport on top of the
//! plain socket transport, using OpenSSL for the protocol itself.
//!
//! # Architecture
//!
//! 1. `CryptoEngine` brackets the process lifetime of the crypto library
//! 2. `TlsContext` holds the immutable configuration (protocol range, trust
//!    store, identity, verification policy) shared by many sockets
//! 3. `TlsSocket` drives the handshake state machine over a `PlainSocket`
//!    and hands the result of chain verification to a `PeerAuthorizer`
//! 4. Every failure is reported as a `TlsError` of kind `Transport`,
//!    `CipherNotAvailable` or `Ssl`
//!
//! # Examples
//!
//! ## Client
//!
//! ```no_run
//! use tls_transport::tls::{CryptoEngine, Protocol, TlsContext, TlsSocket};
//! use tls_transport::StreamTransport;
//! use std::sync::Arc;
//!
//! CryptoEngine::initialize();
//!
//! let context = TlsContext::client()
//!     .protocol(Protocol::Tlsv1_2)
//!     .trust_file("ca.pem")
//!     .unwrap()
//!     .verify_hostname(true)
//!     .build()
//!     .unwrap();
//!
//! let mut socket = TlsSocket::new(Arc::new(context), "example.com", 9443);
//! socket.open().unwrap();
//! socket.write_all(b"hello").unwrap();
//! socket.close().unwrap();
//! ```
//!
//! ## Server with pinned clients
//!
//! ```no_run
//! use tls_transport::tls::{ClientVerify, CryptoEngine, Identity, PinnedCertificate};
//! use tls_transport::tls::{TlsContext, TlsServerSocket};
//! use std::sync::Arc;
//!
//! CryptoEngine::initialize();
//!
//! let client_cert = Identity::from_file("client.pem").unwrap();
//! let context = TlsContext::server()
//!     .identity_file("server.pem")
//!     .unwrap()
//!     .client_verify(ClientVerify::Required)
//!     .build()
//!     .unwrap();
//!
//! let mut server = TlsServerSocket::bind("0.0.0.0:9443", Arc::new(context)).unwrap();
//! server.set_authorizer(PinnedCertificate::new(client_cert.certificate()).unwrap());
//!
//! let mut socket = server.accept().unwrap();
//! socket.handshake().unwrap();
//! ```

pub mod authorizer;
pub mod cert;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod handshake;
pub mod identity;
pub mod info;
pub mod server;
pub mod socket;

pub use authorizer::{
    authorize_fn, DefaultAuthorizer, FnAuthorizer, PeerAuthorizer, PeerContext, PinnedCertificate,
    VerifyFailure,
};
pub use cert::{
    fingerprint_sha256, load_certificate_from_buffer, load_certificate_from_file, CertInfo,
    CertSlot, CertificateSink, LoadError,
};
pub use config::{ClientVerify, Protocol, ProtocolRange, Role, TlsVersion};
pub use context::{TlsContext, TlsContextBuilder, DEFAULT_CIPHER_LIST};
pub use engine::CryptoEngine;
pub use error::{ErrorCode, ErrorKind, TlsError};
pub use handshake::{SocketState, TlsHandshake};
pub use identity::Identity;
pub use info::SessionInfo;
pub use server::TlsServerSocket;
pub use socket::{CloseHandle, TlsSocket};

/// Result type for TLS operations
pub type Result<T> = std::result::Result<T, TlsError>;
