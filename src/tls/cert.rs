//! Certificate loading and inspection
//!
//! This module provides the certificate loading helpers used to populate a
//! context's trust store or identity, and `CertInfo`, the identity summary of
//! a certificate that is safe to put into logs and error messages.

use super::identity::Identity;
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::x509::{X509NameRef, X509Ref, X509};
use std::fs;
use std::path::Path;

/// Certificate loading errors
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(String),
}

/// Slot a loaded certificate is appended to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CertSlot {
    /// Trusted CA certificates used for chain verification
    Trust,
    /// Local identity: certificate chain plus private key
    Identity,
}

/// Target of the certificate loading helpers
pub trait CertificateSink {
    /// Add trust anchors
    fn add_trust_anchors(&mut self, certs: Vec<X509>);

    /// Set the local identity, replacing any previous one
    fn set_identity(&mut self, identity: Identity);

    /// Current local identity, if one was loaded
    fn identity_mut(&mut self) -> Option<&mut Identity>;
}

/// Load PEM certificates from a file into `slot` of `target`
pub fn load_certificate_from_file<T, P>(target: &mut T, slot: CertSlot, path: P) -> Result<(), LoadError>
where
    T: CertificateSink + ?Sized,
    P: AsRef<Path>,
{
    let pem = fs::read(path.as_ref())?;
    load_certificate_from_buffer(target, slot, &pem)
}

/// Load PEM certificates from memory into `slot` of `target`
///
/// For the identity slot, a buffer holding a private key starts a new
/// identity: its certificates (leaf first) followed by the key. A buffer
/// without a key appends its certificates to the chain of the identity
/// already loaded, e.g. intermediates loaded after the leaf.
pub fn load_certificate_from_buffer<T>(target: &mut T, slot: CertSlot, pem: &[u8]) -> Result<(), LoadError>
where
    T: CertificateSink + ?Sized,
{
    match slot {
        CertSlot::Trust => {
            let certs = parse_certificates(pem)?;
            target.add_trust_anchors(certs);
        }
        CertSlot::Identity if contains_private_key(pem) => {
            let identity = Identity::from_pem(pem)?;
            target.set_identity(identity);
        }
        CertSlot::Identity => {
            let certs = parse_certificates(pem)?;
            let Some(identity) = target.identity_mut() else {
                return Err(LoadError::Parse(
                    "no private key for the identity certificate".to_string(),
                ));
            };
            identity.extend_chain(certs);
        }
    }
    Ok(())
}

fn contains_private_key(pem: &[u8]) -> bool {
    const MARKER: &[u8] = b"PRIVATE KEY-----";
    pem.windows(MARKER.len()).any(|w| w == MARKER)
}

/// Parse every certificate of a PEM bundle
pub fn parse_certificates(pem: &[u8]) -> Result<Vec<X509>, LoadError> {
    let certs = X509::stack_from_pem(pem)
        .map_err(|e| LoadError::Parse(format!("Failed to load certificates: {}", e)))?;
    if certs.is_empty() {
        return Err(LoadError::Parse("no certificate found".to_string()));
    }
    Ok(certs)
}

/// SHA-256 fingerprint of a certificate (DER encoding)
pub fn fingerprint_sha256(cert: &X509Ref) -> Result<Vec<u8>, openssl::error::ErrorStack> {
    Ok(cert.digest(MessageDigest::sha256())?.to_vec())
}

/// Certificate information
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertInfo {
    /// Certificate subject (Common Name)
    pub subject: String,
    /// Certificate issuer (Common Name)
    pub issuer: String,
    /// Subject Alternative Names (DNS names and IP addresses)
    pub subject_alt_names: Vec<String>,
}

impl CertInfo {
    /// Extract certificate information from an X.509 certificate
    pub fn from_x509(cert: &X509Ref) -> Self {
        CertInfo {
            subject: Self::get_cn(cert.subject_name()),
            issuer: Self::get_cn(cert.issuer_name()),
            subject_alt_names: Self::get_subject_alt_names(cert),
        }
    }

    /// Get Common Name from X509_NAME
    fn get_cn(name: &X509NameRef) -> String {
        name.entries_by_nid(Nid::COMMONNAME)
            .next()
            .and_then(|entry| entry.data().as_utf8().ok())
            .map(|s| s.to_string())
            .unwrap_or_else(|| "<undef>".to_string())
    }

    /// Get Subject Alternative Names
    fn get_subject_alt_names(cert: &X509Ref) -> Vec<String> {
        let mut names = Vec::new();

        if let Some(san_ext) = cert.subject_alt_names() {
            for name in san_ext {
                if let Some(dns) = name.dnsname() {
                    names.push(format!("DNS:{}", dns));
                } else if let Some(ip) = name.ipaddress() {
                    if let Ok(octets) = <[u8; 4]>::try_from(ip) {
                        names.push(format!("IP:{}", std::net::Ipv4Addr::from(octets)));
                    } else if let Ok(octets) = <[u8; 16]>::try_from(ip) {
                        names.push(format!("IP:{}", std::net::Ipv6Addr::from(octets)));
                    }
                }
            }
        }

        names
    }
}

impl std::fmt::Display for CertInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "subject={} issuer={}", self.subject, self.issuer)
    }
}

/// Extract certificate chain information from an SSL connection
///
/// Index 0 is the peer certificate.
pub fn get_cert_chain(ssl: &openssl::ssl::SslRef) -> Vec<CertInfo> {
    let mut chain = Vec::new();

    let Some(peer_cert) = ssl.peer_certificate() else {
        return chain;
    };
    chain.push(CertInfo::from_x509(&peer_cert));

    // Clients see the leaf again at the head of the chain, servers do not
    let leaf_der = peer_cert.to_der().ok();
    if let Some(cert_chain) = ssl.peer_cert_chain() {
        for (i, cert) in cert_chain.iter().enumerate() {
            if i == 0 && leaf_der.is_some() && cert.to_der().ok() == leaf_der {
                continue;
            }
            chain.push(CertInfo::from_x509(cert));
        }
    }

    chain
}
