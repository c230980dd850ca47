//! TLS-secured stream transport
//!
//! This crate provides an encrypted, authenticated byte-stream transport for
//! RPC framing layers. It is built from two layers:
//!
//! - [`transport`]: the plain TCP socket transport and the `StreamTransport`
//!   trait shared by every stream transport
//! - [`tls`]: the TLS transport composing a plain socket with an OpenSSL
//!   session, peer authorization and a small error taxonomy
//!
//! [`config`] maps the textual configuration surface onto TLS contexts.

pub mod config;
pub mod tls;
pub mod transport;

pub use transport::StreamTransport;
