//! Local identity: certificate chain and private key
//!
//! Besides loading PEM material, this module can mint small PKIs (a CA, leaf
//! certificates it signs, and self-signed certificates) for development
//! setups and tests. Keys are ECDSA P-256.

use super::cert::{parse_certificates, LoadError};
use openssl::asn1::{Asn1Integer, Asn1Time};
use openssl::bn::{BigNum, MsbOption};
use openssl::ec::{EcGroup, EcKey};
use openssl::error::ErrorStack;
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{PKey, PKeyRef, Private};
use openssl::x509::extension::{
    AuthorityKeyIdentifier, BasicConstraints, ExtendedKeyUsage, KeyUsage, SubjectAlternativeName,
    SubjectKeyIdentifier,
};
use openssl::x509::{X509Builder, X509NameBuilder, X509Ref, X509};
use std::fs;
use std::net::IpAddr;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

const VALIDITY_DAYS: u32 = 365;
const CA_VALIDITY_DAYS: u32 = 3650;

/// Certificate chain (leaf first) with the leaf's private key
#[derive(Clone)]
pub struct Identity {
    chain: Vec<X509>,
    key: PKey<Private>,
}

impl Identity {
    /// Create an identity from a chain and key
    ///
    /// Whether the key matches the leaf is checked when a context is built.
    pub fn new(chain: Vec<X509>, key: PKey<Private>) -> Result<Self, LoadError> {
        if chain.is_empty() {
            return Err(LoadError::Parse("identity needs at least one certificate".to_string()));
        }
        Ok(Identity { chain, key })
    }

    /// Parse a combined PEM bundle holding the chain and the private key
    pub fn from_pem(pem: &[u8]) -> Result<Self, LoadError> {
        Self::from_pem_parts(pem, pem)
    }

    /// Parse a PEM chain and a separate PEM private key
    pub fn from_pem_parts(cert_pem: &[u8], key_pem: &[u8]) -> Result<Self, LoadError> {
        let chain = parse_certificates(cert_pem)?;
        let key = PKey::private_key_from_pem(key_pem)
            .map_err(|e| LoadError::Parse(format!("Failed to load private key: {}", e)))?;
        Self::new(chain, key)
    }

    /// Load a combined PEM bundle from a file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, LoadError> {
        let pem = fs::read(path.as_ref())?;
        Self::from_pem(&pem)
    }

    /// Load the chain and the key from separate PEM files
    pub fn from_files<C: AsRef<Path>, K: AsRef<Path>>(cert: C, key: K) -> Result<Self, LoadError> {
        let cert_pem = fs::read(cert.as_ref())?;
        let key_pem = fs::read(key.as_ref())?;
        Self::from_pem_parts(&cert_pem, &key_pem)
    }

    /// Leaf certificate
    pub fn certificate(&self) -> &X509Ref {
        &self.chain[0]
    }

    /// Full chain, leaf first
    pub fn chain(&self) -> &[X509] {
        &self.chain
    }

    /// Append intermediate certificates to the chain
    pub fn extend_chain<I: IntoIterator<Item = X509>>(&mut self, certs: I) {
        self.chain.extend(certs);
    }

    /// Private key of the leaf
    pub fn private_key(&self) -> &PKeyRef<Private> {
        &self.key
    }

    /// Encode as a combined PEM bundle (chain, then PKCS#8 key)
    pub fn to_pem(&self) -> Result<Vec<u8>, ErrorStack> {
        let mut pem = Vec::new();
        for cert in &self.chain {
            pem.extend_from_slice(&cert.to_pem()?);
        }
        pem.extend_from_slice(&self.key.private_key_to_pem_pkcs8()?);
        Ok(pem)
    }

    /// Generate a self-signed end-entity certificate for `name`
    ///
    /// `name` becomes the Common Name and a DNS or IP subject alternative
    /// name.
    pub fn self_signed(name: &str) -> Result<Self, ErrorStack> {
        let key = new_key()?;
        let cert = build_certificate(name, &key, None, CertProfile::SelfSigned)?;
        Ok(Identity { chain: vec![cert], key })
    }

    /// Generate a root certificate authority
    pub fn certificate_authority(name: &str) -> Result<Self, ErrorStack> {
        let key = new_key()?;
        let cert = build_certificate(name, &key, None, CertProfile::Authority)?;
        Ok(Identity { chain: vec![cert], key })
    }

    /// Issue an end-entity identity for `name` signed by this identity
    ///
    /// The returned chain contains the new leaf followed by this identity's
    /// chain, so intermediate-signed leaves carry their full path.
    pub fn issue(&self, name: &str) -> Result<Identity, ErrorStack> {
        let key = new_key()?;
        let cert = build_certificate(
            name,
            &key,
            Some((self.certificate(), self.private_key())),
            CertProfile::Leaf,
        )?;
        let mut chain = vec![cert];
        chain.extend(self.chain.iter().cloned());
        Ok(Identity { chain, key })
    }
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Identity")
            .field("certificate", &super::cert::CertInfo::from_x509(self.certificate()))
            .field("chain_len", &self.chain.len())
            .finish_non_exhaustive()
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum CertProfile {
    Authority,
    Leaf,
    SelfSigned,
}

fn new_key() -> Result<PKey<Private>, ErrorStack> {
    let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1)?;
    let ec_key = EcKey::generate(&group)?;
    PKey::from_ec_key(ec_key)
}

fn random_serial() -> Result<Asn1Integer, ErrorStack> {
    let mut bn = BigNum::new()?;
    bn.rand(127, MsbOption::MAYBE_ZERO, false)?;
    bn.to_asn1_integer()
}

fn build_certificate(
    name: &str,
    key: &PKey<Private>,
    issuer: Option<(&X509Ref, &PKeyRef<Private>)>,
    profile: CertProfile,
) -> Result<X509, ErrorStack> {
    let mut name_builder = X509NameBuilder::new()?;
    name_builder.append_entry_by_nid(Nid::COMMONNAME, name)?;
    let subject_name = name_builder.build();

    let mut builder = X509Builder::new()?;
    builder.set_version(2)?;
    let serial = random_serial()?;
    builder.set_serial_number(&serial)?;
    builder.set_subject_name(&subject_name)?;
    match issuer {
        Some((issuer_cert, _)) => builder.set_issuer_name(issuer_cert.subject_name())?,
        None => builder.set_issuer_name(&subject_name)?,
    }
    builder.set_pubkey(key)?;

    // Backdate an hour to tolerate clock skew between peers
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let not_before = Asn1Time::from_unix(now.saturating_sub(3600) as libc::time_t)?;
    let days = if profile == CertProfile::Authority {
        CA_VALIDITY_DAYS
    } else {
        VALIDITY_DAYS
    };
    let not_after = Asn1Time::days_from_now(days)?;
    builder.set_not_before(&not_before)?;
    builder.set_not_after(&not_after)?;

    match profile {
        CertProfile::Authority => {
            builder.append_extension(BasicConstraints::new().critical().ca().build()?)?;
            builder.append_extension(
                KeyUsage::new()
                    .critical()
                    .key_cert_sign()
                    .crl_sign()
                    .build()?,
            )?;
        }
        CertProfile::Leaf => {
            builder.append_extension(BasicConstraints::new().build()?)?;
            builder.append_extension(KeyUsage::new().critical().digital_signature().build()?)?;
            builder.append_extension(ExtendedKeyUsage::new().server_auth().client_auth().build()?)?;
        }
        // No KeyUsage: older OpenSSL only treats a self-issued certificate
        // as self-signed when keyCertSign is not excluded.
        CertProfile::SelfSigned => {
            builder.append_extension(BasicConstraints::new().build()?)?;
            builder.append_extension(ExtendedKeyUsage::new().server_auth().client_auth().build()?)?;
        }
    }

    if profile != CertProfile::Authority {
        let mut san = SubjectAlternativeName::new();
        if name.parse::<IpAddr>().is_ok() {
            san.ip(name);
        } else {
            san.dns(name);
        }
        let san = san.build(&builder.x509v3_context(issuer.map(|(c, _)| c), None))?;
        builder.append_extension(san)?;
    }

    let ski = SubjectKeyIdentifier::new().build(&builder.x509v3_context(None, None))?;
    builder.append_extension(ski)?;

    if let Some((issuer_cert, _)) = issuer {
        let aki = AuthorityKeyIdentifier::new()
            .keyid(false)
            .build(&builder.x509v3_context(Some(issuer_cert), None))?;
        builder.append_extension(aki)?;
    }

    let signing_key = match issuer {
        Some((_, issuer_key)) => issuer_key,
        None => key,
    };
    builder.sign(signing_key, MessageDigest::sha256())?;

    Ok(builder.build())
}
