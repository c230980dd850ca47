//! Negotiated session parameters
//!
//! `SessionInfo` is captured once the handshake and peer authorization have
//! succeeded. It only holds identity fields of the peer chain, never key
//! material, so it can be logged as-is.

use super::authorizer::VerifyFailure;
use super::cert::{get_cert_chain, CertInfo};
use openssl::ssl::{NameType, SslRef};

/// Session details available after the handshake
#[derive(Debug, Clone)]
pub struct SessionInfo {
    /// Negotiated protocol version (e.g., "TLSv1.3")
    pub version: String,

    /// Negotiated cipher suite
    pub cipher: String,

    /// SNI servername
    pub servername: Option<String>,

    /// Peer certificate chain (index 0 is the peer certificate)
    pub cert_chain: Vec<CertInfo>,

    /// Failures reported by built-in chain verification
    pub verify_failures: Vec<VerifyFailure>,

    /// Whether the session was resumed
    pub session_reused: bool,
}

impl SessionInfo {
    /// Capture session details from an SSL connection
    pub fn from_ssl(ssl: &SslRef, verify_failures: Vec<VerifyFailure>) -> Self {
        SessionInfo {
            version: ssl.version_str().to_string(),
            cipher: ssl
                .current_cipher()
                .map(|c| c.name().to_string())
                .unwrap_or_else(|| "<undef>".to_string()),
            servername: ssl.servername(NameType::HOST_NAME).map(|s| s.to_string()),
            cert_chain: get_cert_chain(ssl),
            verify_failures,
            session_reused: ssl.session_reused(),
        }
    }

    /// Peer certificate summary
    pub fn peer(&self) -> Option<&CertInfo> {
        self.cert_chain.first()
    }

    /// Whether built-in chain verification accepted the peer
    pub fn verified(&self) -> bool {
        self.verify_failures.is_empty()
    }
}

impl std::fmt::Display for SessionInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.version, self.cipher)?;
        if let Some(peer) = self.peer() {
            write!(f, " peer [{}]", peer)?;
        }
        Ok(())
    }
}
