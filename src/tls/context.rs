//! TLS context construction
//!
//! A `TlsContext` is built once from a `TlsContextBuilder` and is immutable
//! afterwards. Wrap it in an `Arc` to share it between sockets; the OpenSSL
//! context inside is safe for concurrent read-only use.

use super::authorizer::{VerifyFailure, VerifyLog};
use super::cert::{self, CertSlot, CertificateSink, LoadError};
use super::config::{ClientVerify, Protocol, ProtocolRange, Role, TlsVersion};
use super::engine::{CryptoEngine, EngineRef};
use super::error::{ErrorCode, TlsError};
use super::identity::Identity;
use log::debug;
use openssl::ssl::{
    HandshakeError, Ssl, SslContext, SslContextBuilder, SslMethod, SslOptions, SslVerifyMode,
};
use openssl::x509::store::X509StoreBuilder;
use openssl::x509::X509;
use std::io::{self, Read, Write};
use std::net::IpAddr;
use std::path::Path;

/// Cipher list used for TLS 1.2 and below unless configured otherwise
pub const DEFAULT_CIPHER_LIST: &str = "ALL:!ADH:!LOW:!EXP:!MD5:@STRENGTH";

/// Immutable TLS configuration shared by sockets
pub struct TlsContext {
    ssl_ctx: SslContext,
    role: Role,
    range: ProtocolRange,
    allow_self_signed: bool,
    client_verify: ClientVerify,
    verify_hostname: bool,
    verify_mode: SslVerifyMode,
    _engine: EngineRef,
}

impl TlsContext {
    /// Create a builder for the given role
    pub fn builder(role: Role) -> TlsContextBuilder {
        TlsContextBuilder::new(role)
    }

    /// Create a client context builder
    pub fn client() -> TlsContextBuilder {
        TlsContextBuilder::new(Role::Client)
    }

    /// Create a server context builder
    pub fn server() -> TlsContextBuilder {
        TlsContextBuilder::new(Role::Server)
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Configured protocol range
    pub fn protocol_range(&self) -> ProtocolRange {
        self.range
    }

    /// Whether a self-signed peer certificate is tolerated by default
    pub fn allows_self_signed(&self) -> bool {
        self.allow_self_signed
    }

    pub fn client_verify(&self) -> ClientVerify {
        self.client_verify
    }

    pub fn verifies_hostname(&self) -> bool {
        self.verify_hostname
    }

    /// Underlying OpenSSL context
    pub fn ssl_context(&self) -> &SslContext {
        &self.ssl_ctx
    }

    /// Create the per-connection session object
    ///
    /// Verification failures are never fatal here: the callback records them
    /// in `log` and lets the handshake finish so that the authorizer decides.
    /// `host` is the name the client connects to and is ignored for servers.
    pub(crate) fn new_ssl(&self, host: &str, log: VerifyLog) -> Result<Ssl, TlsError> {
        CryptoEngine::assert_ready("TLS handshake");

        let mut ssl = Ssl::new(&self.ssl_ctx)
            .map_err(|e| TlsError::from_stack("failed to create TLS session", e))?;

        if self.verify_mode != SslVerifyMode::NONE {
            ssl.set_verify_callback(self.verify_mode, move |preverify_ok, x509_ctx| {
                if !preverify_ok {
                    let failure = VerifyFailure {
                        depth: x509_ctx.error_depth(),
                        result: x509_ctx.error(),
                    };
                    debug!("certificate verification failure: {}", failure);
                    match log.lock() {
                        Ok(mut failures) => failures.push(failure),
                        Err(poisoned) => poisoned.into_inner().push(failure),
                    }
                }
                true
            });
        }

        if self.role == Role::Client && !host.is_empty() {
            match host.parse::<IpAddr>() {
                Ok(ip) => {
                    if self.verify_hostname {
                        ssl.param_mut()
                            .set_ip(ip)
                            .map_err(|e| TlsError::from_stack("failed to set expected IP", e))?;
                    }
                }
                Err(_) => {
                    ssl.set_hostname(host)
                        .map_err(|e| TlsError::from_stack("failed to set SNI hostname", e))?;
                    if self.verify_hostname {
                        ssl.param_mut()
                            .set_host(host)
                            .map_err(|e| TlsError::from_stack("failed to set expected hostname", e))?;
                    }
                }
            }
        }

        Ok(ssl)
    }
}

impl std::fmt::Debug for TlsContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsContext")
            .field("role", &self.role)
            .field("range", &self.range)
            .field("allow_self_signed", &self.allow_self_signed)
            .field("client_verify", &self.client_verify)
            .field("verify_hostname", &self.verify_hostname)
            .finish_non_exhaustive()
    }
}

/// `TlsContext` builder
///
/// Nothing touches OpenSSL until [`build`](TlsContextBuilder::build), so a
/// builder can be assembled before the crypto engine is initialized.
#[derive(Debug, Clone)]
pub struct TlsContextBuilder {
    role: Role,
    range: ProtocolRange,
    cipher_list: String,
    ciphersuites: Option<String>,
    trust: Vec<X509>,
    default_trust: bool,
    identity: Option<Identity>,
    allow_self_signed: bool,
    client_verify: ClientVerify,
    verify_hostname: bool,
}

impl TlsContextBuilder {
    fn new(role: Role) -> Self {
        TlsContextBuilder {
            role,
            range: ProtocolRange::default(),
            cipher_list: DEFAULT_CIPHER_LIST.to_string(),
            ciphersuites: None,
            trust: Vec::new(),
            default_trust: true,
            identity: None,
            allow_self_signed: false,
            client_verify: ClientVerify::None,
            verify_hostname: false,
        }
    }

    /// Select a named protocol
    pub fn protocol(mut self, protocol: Protocol) -> Self {
        self.range = protocol.range();
        self
    }

    /// Select an explicit protocol range
    pub fn protocol_range(mut self, range: ProtocolRange) -> Self {
        self.range = range;
        self
    }

    /// Set cipher list (for TLS <= 1.2)
    pub fn cipher_list(mut self, ciphers: impl Into<String>) -> Self {
        self.cipher_list = ciphers.into();
        self
    }

    /// Set cipher suites (for TLS 1.3)
    pub fn ciphersuites(mut self, suites: impl Into<String>) -> Self {
        self.ciphersuites = Some(suites.into());
        self
    }

    /// Trust a CA certificate
    pub fn trust_certificate(mut self, cert: X509) -> Self {
        self.trust.push(cert);
        self
    }

    /// Trust every certificate of a PEM bundle
    pub fn trust_pem(mut self, pem: &[u8]) -> Result<Self, LoadError> {
        self.load_certificate_buffer(CertSlot::Trust, pem)?;
        Ok(self)
    }

    /// Trust every certificate of a PEM file
    pub fn trust_file<P: AsRef<Path>>(mut self, path: P) -> Result<Self, LoadError> {
        self.load_certificate_file(CertSlot::Trust, path)?;
        Ok(self)
    }

    /// Do not fall back to the platform trust anchors
    ///
    /// Combined with no trusted certificates, every peer chain fails
    /// built-in verification.
    pub fn empty_trust_store(mut self) -> Self {
        self.trust.clear();
        self.default_trust = false;
        self
    }

    /// Use the platform trust anchors when no certificate was trusted explicitly
    pub fn default_trust(mut self, enabled: bool) -> Self {
        self.default_trust = enabled;
        self
    }

    /// Set the local identity
    pub fn identity(mut self, identity: Identity) -> Self {
        self.identity = Some(identity);
        self
    }

    /// Load the local identity from a combined PEM bundle
    pub fn identity_pem(mut self, pem: &[u8]) -> Result<Self, LoadError> {
        self.load_certificate_buffer(CertSlot::Identity, pem)?;
        Ok(self)
    }

    /// Load the local identity from a combined PEM file
    pub fn identity_file<P: AsRef<Path>>(mut self, path: P) -> Result<Self, LoadError> {
        self.load_certificate_file(CertSlot::Identity, path)?;
        Ok(self)
    }

    /// Tolerate self-signed peer certificates
    pub fn allow_self_signed(mut self, allow: bool) -> Self {
        self.allow_self_signed = allow;
        self
    }

    /// Set client certificate verification mode (server role)
    pub fn client_verify(mut self, mode: ClientVerify) -> Self {
        self.client_verify = mode;
        self
    }

    /// Check the server certificate against the host name or IP connected to
    pub fn verify_hostname(mut self, verify: bool) -> Self {
        self.verify_hostname = verify;
        self
    }

    /// Load PEM certificates from a file into `slot`
    pub fn load_certificate_file<P: AsRef<Path>>(&mut self, slot: CertSlot, path: P) -> Result<(), LoadError> {
        cert::load_certificate_from_file(self, slot, path)
    }

    /// Load PEM certificates from memory into `slot`
    pub fn load_certificate_buffer(&mut self, slot: CertSlot, pem: &[u8]) -> Result<(), LoadError> {
        cert::load_certificate_from_buffer(self, slot, pem)
    }

    fn verify_mode(&self) -> SslVerifyMode {
        match (self.role, self.client_verify) {
            (Role::Client, _) => SslVerifyMode::PEER,
            (Role::Server, ClientVerify::None) => SslVerifyMode::NONE,
            (Role::Server, ClientVerify::Optional) => SslVerifyMode::PEER,
            (Role::Server, ClientVerify::Required) => {
                SslVerifyMode::PEER | SslVerifyMode::FAIL_IF_NO_PEER_CERT
            }
        }
    }

    /// Build the TLS context
    ///
    /// # Panics
    ///
    /// Panics if the crypto engine is not initialized.
    pub fn build(self) -> Result<TlsContext, TlsError> {
        let engine = CryptoEngine::acquire("building a TLS context");
        self.range.validate()?;

        let method = match self.role {
            Role::Client => SslMethod::tls_client(),
            Role::Server => SslMethod::tls_server(),
        };
        let mut ctx = SslContextBuilder::new(method).map_err(|e| {
            TlsError::config_stack(ErrorCode::ContextInit, "failed to create SSL context", e)
        })?;

        self.configure_protocols(&mut ctx)?;
        self.check_negotiable()?;
        self.configure_trust(&mut ctx)?;
        self.configure_identity(&mut ctx)?;

        let verify_mode = self.verify_mode();
        ctx.set_verify(verify_mode);
        ctx.set_options(SslOptions::NO_COMPRESSION);

        debug!(
            "built {} TLS context: protocols {}..{}, verify {:?}",
            self.role,
            self.range.min,
            self.range.effective_max(),
            verify_mode
        );

        Ok(TlsContext {
            ssl_ctx: ctx.build(),
            role: self.role,
            range: self.range,
            allow_self_signed: self.allow_self_signed,
            client_verify: self.client_verify,
            verify_hostname: self.verify_hostname,
            verify_mode,
            _engine: engine,
        })
    }

    fn configure_protocols(&self, ctx: &mut SslContextBuilder) -> Result<(), TlsError> {
        let min = self.range.min;
        ctx.set_min_proto_version(Some(min.to_openssl_version()))
            .map_err(|e| {
                TlsError::config_stack(
                    ErrorCode::UnsupportedProtocol,
                    &format!("failed to set minimum protocol {min}"),
                    e,
                )
            })?;
        ctx.set_max_proto_version(self.range.max.map(|v| v.to_openssl_version()))
            .map_err(|e| {
                TlsError::config_stack(ErrorCode::UnsupportedProtocol, "failed to set maximum protocol", e)
            })?;

        if self.range.includes_legacy() {
            ctx.set_cipher_list(&self.cipher_list).map_err(|e| {
                TlsError::config_stack(
                    ErrorCode::CipherUnavailable,
                    &format!("no cipher available for '{}'", self.cipher_list),
                    e,
                )
            })?;
        }

        if let Some(suites) = &self.ciphersuites {
            if self.range.includes_tls13() {
                if suites.trim().is_empty() && !self.range.includes_legacy() {
                    return Err(TlsError::config(
                        ErrorCode::CipherUnavailable,
                        "no TLS 1.3 ciphersuite configured for a TLS 1.3 only range",
                    ));
                }
                ctx.set_ciphersuites(suites).map_err(|e| {
                    TlsError::config_stack(
                        ErrorCode::CipherUnavailable,
                        &format!("no ciphersuite available for '{suites}'"),
                        e,
                    )
                })?;
            }
        }

        Ok(())
    }

    /// Check that the range and ciphers can produce a client hello
    ///
    /// OpenSSL accepts version bounds it was built without, and ciphers that
    /// only exist for versions outside the range, so the only reliable check
    /// is to start a handshake against a sink that never answers.
    fn check_negotiable(&self) -> Result<(), TlsError> {
        let min = self.range.min;
        let max = self.range.effective_max();
        let init_err =
            |e| TlsError::config_stack(ErrorCode::ContextInit, "failed to create hello context", e);

        let mut hello = SslContextBuilder::new(SslMethod::tls_client()).map_err(init_err)?;
        self.configure_protocols(&mut hello)?;
        let hello = hello.build();

        // TLS 1.1 and below sign with SHA-1, which OpenSSL 3 refuses above
        // security level 0
        let level = hello.security_level();
        if max < TlsVersion::Tls12 && level > 0 && openssl::version::number() >= 0x3000_0000 {
            return Err(TlsError::config(
                ErrorCode::UnsupportedProtocol,
                format!("protocols {min}..{max} are disabled at security level {level}"),
            ));
        }

        let ssl = Ssl::new(&hello).map_err(init_err)?;
        match ssl.connect(HelloSink) {
            Ok(_) | Err(HandshakeError::WouldBlock(_)) => Ok(()),
            Err(HandshakeError::SetupFailure(e)) => Err(init_err(e)),
            Err(HandshakeError::Failure(mid)) => {
                let reason = match mid.error().ssl_error() {
                    Some(stack) => stack.to_string(),
                    None => mid.error().to_string(),
                };
                let code = if reason.contains("no ciphers") {
                    ErrorCode::CipherUnavailable
                } else {
                    ErrorCode::UnsupportedProtocol
                };
                Err(TlsError::config(
                    code,
                    format!("protocols {min}..{max} cannot be negotiated: {reason}"),
                ))
            }
        }
    }

    fn configure_trust(&self, ctx: &mut SslContextBuilder) -> Result<(), TlsError> {
        let init_err = |e| TlsError::config_stack(ErrorCode::ContextInit, "failed to build trust store", e);

        if self.trust.is_empty() {
            if self.default_trust {
                ctx.set_default_verify_paths().map_err(init_err)?;
            }
            return Ok(());
        }

        let mut store = X509StoreBuilder::new().map_err(init_err)?;
        for cert in &self.trust {
            store.add_cert(cert.clone()).map_err(init_err)?;
            if self.role == Role::Server && self.client_verify != ClientVerify::None {
                ctx.add_client_ca(cert).map_err(init_err)?;
            }
        }
        ctx.set_cert_store(store.build());
        Ok(())
    }

    fn configure_identity(&self, ctx: &mut SslContextBuilder) -> Result<(), TlsError> {
        let Some(identity) = &self.identity else {
            if self.role == Role::Server {
                return Err(TlsError::config(
                    ErrorCode::ContextInit,
                    "server context requires an identity",
                ));
            }
            return Ok(());
        };

        let init_err =
            |e| TlsError::config_stack(ErrorCode::ContextInit, "failed to load identity", e);

        ctx.set_certificate(identity.certificate()).map_err(init_err)?;
        for extra in identity.chain().iter().skip(1) {
            ctx.add_extra_chain_cert(extra.clone()).map_err(init_err)?;
        }
        ctx.set_private_key(identity.private_key()).map_err(init_err)?;
        ctx.check_private_key().map_err(|e| {
            TlsError::config_stack(
                ErrorCode::ContextInit,
                "private key does not match certificate",
                e,
            )
        })?;
        Ok(())
    }
}

/// Swallows the client hello and never replies
struct HelloSink;

impl Read for HelloSink {
    fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
        Err(io::ErrorKind::WouldBlock.into())
    }
}

impl Write for HelloSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl CertificateSink for TlsContextBuilder {
    fn add_trust_anchors(&mut self, certs: Vec<X509>) {
        self.trust.extend(certs);
    }

    fn set_identity(&mut self, identity: Identity) {
        self.identity = Some(identity);
    }

    fn identity_mut(&mut self) -> Option<&mut Identity> {
        self.identity.as_mut()
    }
}
