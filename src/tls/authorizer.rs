//! Peer authorization
//!
//! The library's own chain verification never aborts a handshake. Every
//! failure it reports is recorded as a [`VerifyFailure`] and, once the
//! handshake has completed, handed to a [`PeerAuthorizer`] together with the
//! peer certificate and address. The authorizer's verdict is final: it may
//! accept a chain the library rejected (pinning) or reject one it accepted.

use super::cert::fingerprint_sha256;
use super::config::Role;
use openssl::error::ErrorStack;
use openssl::x509::{X509Ref, X509VerifyResult};
use std::fmt;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

/// X509_V_ERR_DEPTH_ZERO_SELF_SIGNED_CERT
const DEPTH_ZERO_SELF_SIGNED_CERT: i32 = 18;

/// One failure reported by built-in chain verification
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct VerifyFailure {
    /// Position in the chain, 0 being the peer certificate
    pub depth: u32,
    pub result: X509VerifyResult,
}

impl VerifyFailure {
    /// Whether this is the "self-signed leaf" failure
    pub fn is_self_signed_leaf(&self) -> bool {
        self.depth == 0 && self.result.as_raw() == DEPTH_ZERO_SELF_SIGNED_CERT
    }
}

impl fmt::Debug for VerifyFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VerifyFailure")
            .field("depth", &self.depth)
            .field("code", &self.result.as_raw())
            .field("reason", &self.result.error_string())
            .finish()
    }
}

impl fmt::Display for VerifyFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (depth {})", self.result.error_string(), self.depth)
    }
}

/// Failures collected by the verify callback of one connection
pub(crate) type VerifyLog = Arc<Mutex<Vec<VerifyFailure>>>;

pub(crate) fn new_verify_log() -> VerifyLog {
    Arc::new(Mutex::new(Vec::new()))
}

pub(crate) fn take_failures(log: &VerifyLog) -> Vec<VerifyFailure> {
    match log.lock() {
        Ok(mut failures) => std::mem::take(&mut *failures),
        Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
    }
}

/// What an authorizer gets to see of the peer
#[derive(Clone, Copy)]
pub struct PeerContext<'a> {
    /// Peer certificate; absent only for servers that did not get one
    pub certificate: Option<&'a X509Ref>,
    pub remote_addr: SocketAddr,
    /// Built-in verification failures, empty if the chain verified
    pub failures: &'a [VerifyFailure],
    /// Role of the local endpoint
    pub role: Role,
}

impl<'a> PeerContext<'a> {
    /// Whether built-in chain verification succeeded
    pub fn verified(&self) -> bool {
        self.failures.is_empty()
    }

    /// First failure reported by built-in verification, or `OK`
    pub fn verify_result(&self) -> X509VerifyResult {
        self.failures
            .first()
            .map(|f| f.result)
            .unwrap_or(X509VerifyResult::OK)
    }

    /// Whether the only verification problem is a self-signed peer certificate
    pub fn only_self_signed(&self) -> bool {
        !self.failures.is_empty() && self.failures.iter().all(VerifyFailure::is_self_signed_leaf)
    }
}

/// Validation strategy applied after the library's chain verification
pub trait PeerAuthorizer: Send + Sync {
    /// Return true to accept the peer
    fn authorize(&self, peer: &PeerContext<'_>) -> bool;
}

/// Accepts what built-in verification accepted
///
/// With `allow_self_signed`, a chain whose only failure is a self-signed
/// peer certificate is accepted too. Expired, untrusted-issuer and hostname
/// failures are never tolerated.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultAuthorizer {
    allow_self_signed: bool,
}

impl DefaultAuthorizer {
    pub fn new(allow_self_signed: bool) -> Self {
        DefaultAuthorizer { allow_self_signed }
    }
}

impl PeerAuthorizer for DefaultAuthorizer {
    fn authorize(&self, peer: &PeerContext<'_>) -> bool {
        match peer.certificate {
            // Servers that did not demand a client certificate
            None => peer.role == Role::Server,
            Some(_) => peer.verified() || (self.allow_self_signed && peer.only_self_signed()),
        }
    }
}

/// Authorizer backed by a closure `(certificate, remote address) -> accept`
pub struct FnAuthorizer<F> {
    f: F,
}

impl<F> PeerAuthorizer for FnAuthorizer<F>
where
    F: Fn(Option<&X509Ref>, &SocketAddr) -> bool + Send + Sync,
{
    fn authorize(&self, peer: &PeerContext<'_>) -> bool {
        (self.f)(peer.certificate, &peer.remote_addr)
    }
}

/// Wrap a closure as a `PeerAuthorizer`
pub fn authorize_fn<F>(f: F) -> FnAuthorizer<F>
where
    F: Fn(Option<&X509Ref>, &SocketAddr) -> bool + Send + Sync,
{
    FnAuthorizer { f }
}

/// Accepts exactly the peer certificates whose SHA-256 fingerprint is pinned
///
/// Replaces chain verification entirely, so it also accepts self-signed or
/// otherwise untrusted certificates that are pinned.
#[derive(Debug, Clone, Default)]
pub struct PinnedCertificate {
    fingerprints: Vec<Vec<u8>>,
}

impl PinnedCertificate {
    /// Pin a certificate
    pub fn new(cert: &X509Ref) -> Result<Self, ErrorStack> {
        Ok(PinnedCertificate {
            fingerprints: vec![fingerprint_sha256(cert)?],
        })
    }

    /// Pin a raw SHA-256 fingerprint
    pub fn from_fingerprint(fingerprint: impl Into<Vec<u8>>) -> Self {
        PinnedCertificate {
            fingerprints: vec![fingerprint.into()],
        }
    }

    /// Pin one more certificate
    pub fn add(mut self, cert: &X509Ref) -> Result<Self, ErrorStack> {
        self.fingerprints.push(fingerprint_sha256(cert)?);
        Ok(self)
    }

    fn matches(&self, cert: &X509Ref) -> bool {
        match fingerprint_sha256(cert) {
            Ok(fp) => self.fingerprints.iter().any(|pinned| *pinned == fp),
            Err(_) => false,
        }
    }
}

impl PeerAuthorizer for PinnedCertificate {
    fn authorize(&self, peer: &PeerContext<'_>) -> bool {
        peer.certificate.is_some_and(|cert| self.matches(cert))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tls::{CryptoEngine, Identity};

    fn addr() -> SocketAddr {
        "127.0.0.1:4433".parse().unwrap()
    }

    fn failure(code: i32, depth: u32) -> VerifyFailure {
        // SAFETY: any X509 verify code is a valid value
        VerifyFailure {
            depth,
            result: unsafe { X509VerifyResult::from_raw(code) },
        }
    }

    fn peer<'a>(cert: Option<&'a X509Ref>, failures: &'a [VerifyFailure], role: Role) -> PeerContext<'a> {
        PeerContext {
            certificate: cert,
            remote_addr: addr(),
            failures,
            role,
        }
    }

    #[test]
    fn test_default_accepts_verified_chain() {
        CryptoEngine::initialize();
        let identity = Identity::self_signed("localhost").unwrap();
        let ctx = peer(Some(identity.certificate()), &[], Role::Client);
        assert!(DefaultAuthorizer::new(false).authorize(&ctx));
    }

    #[test]
    fn test_self_signed_carve_out() {
        CryptoEngine::initialize();
        let identity = Identity::self_signed("localhost").unwrap();
        let failures = [failure(DEPTH_ZERO_SELF_SIGNED_CERT, 0)];
        let ctx = peer(Some(identity.certificate()), &failures, Role::Client);

        assert!(ctx.only_self_signed());
        assert!(!DefaultAuthorizer::new(false).authorize(&ctx));
        assert!(DefaultAuthorizer::new(true).authorize(&ctx));
    }

    #[test]
    fn test_carve_out_does_not_cover_other_failures() {
        CryptoEngine::initialize();
        let identity = Identity::self_signed("localhost").unwrap();
        // X509_V_ERR_CERT_HAS_EXPIRED alongside the self-signed failure
        let failures = [failure(DEPTH_ZERO_SELF_SIGNED_CERT, 0), failure(10, 0)];
        let ctx = peer(Some(identity.certificate()), &failures, Role::Client);

        assert!(!ctx.only_self_signed());
        assert!(!DefaultAuthorizer::new(true).authorize(&ctx));
        assert_eq!(ctx.verify_result().as_raw(), DEPTH_ZERO_SELF_SIGNED_CERT);
    }

    #[test]
    fn test_missing_certificate() {
        assert!(DefaultAuthorizer::new(true).authorize(&peer(None, &[], Role::Server)));
        assert!(!DefaultAuthorizer::new(true).authorize(&peer(None, &[], Role::Client)));
    }

    #[test]
    fn test_closure_authorizer_sees_address() {
        let authorizer = authorize_fn(|cert, addr| cert.is_none() && addr.port() == 4433);
        assert!(authorizer.authorize(&peer(None, &[], Role::Server)));
    }

    #[test]
    fn test_pinned_certificate() {
        CryptoEngine::initialize();
        let pinned = Identity::self_signed("pinned").unwrap();
        let other = Identity::self_signed("other").unwrap();
        let authorizer = PinnedCertificate::new(pinned.certificate()).unwrap();
        let failures = [failure(DEPTH_ZERO_SELF_SIGNED_CERT, 0)];

        assert!(authorizer.authorize(&peer(Some(pinned.certificate()), &failures, Role::Client)));
        assert!(!authorizer.authorize(&peer(Some(other.certificate()), &[], Role::Client)));
        assert!(!authorizer.authorize(&peer(None, &[], Role::Server)));
    }
}
