//! TLS protocol and role settings
//!
//! This module provides the small value types a `TlsContext` is configured
//! with: protocol versions and ranges, the connection role, and the client
//! certificate policy of servers.

use super::error::{ErrorCode, TlsError};
use openssl::ssl::SslVersion;
use std::fmt;
use std::str::FromStr;

/// TLS version
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TlsVersion {
    /// SSL 3.0 (deprecated, discouraged)
    Ssl3,
    /// TLS 1.0
    Tls10,
    /// TLS 1.1
    Tls11,
    /// TLS 1.2
    Tls12,
    /// TLS 1.3
    Tls13,
}

impl TlsVersion {
    /// Get OpenSSL protocol version constant
    pub fn to_openssl_version(&self) -> SslVersion {
        match self {
            TlsVersion::Ssl3 => SslVersion::SSL3,
            TlsVersion::Tls10 => SslVersion::TLS1,
            TlsVersion::Tls11 => SslVersion::TLS1_1,
            TlsVersion::Tls12 => SslVersion::TLS1_2,
            TlsVersion::Tls13 => SslVersion::TLS1_3,
        }
    }

    /// Get version as string
    pub fn as_str(&self) -> &'static str {
        match self {
            TlsVersion::Ssl3 => "SSLv3",
            TlsVersion::Tls10 => "TLSv1.0",
            TlsVersion::Tls11 => "TLSv1.1",
            TlsVersion::Tls12 => "TLSv1.2",
            TlsVersion::Tls13 => "TLSv1.3",
        }
    }

    /// Highest version the linked OpenSSL can negotiate
    pub fn library_max() -> TlsVersion {
        // TLS 1.3 arrived with OpenSSL 1.1.1
        if openssl::version::number() >= 0x1010_1000 {
            TlsVersion::Tls13
        } else {
            TlsVersion::Tls12
        }
    }
}

impl FromStr for TlsVersion {
    type Err = String;

    /// Parse TLS version from string (case-insensitive)
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "SSLV3" | "SSL3" => Ok(TlsVersion::Ssl3),
            "TLSV1.0" | "TLS1.0" | "TLSV1_0" | "TLSV1" | "TLS1" => Ok(TlsVersion::Tls10),
            "TLSV1.1" | "TLS1.1" | "TLSV1_1" => Ok(TlsVersion::Tls11),
            "TLSV1.2" | "TLS1.2" | "TLSV1_2" => Ok(TlsVersion::Tls12),
            "TLSV1.3" | "TLS1.3" | "TLSV1_3" => Ok(TlsVersion::Tls13),
            _ => Err(format!("invalid TLS version: {s}")),
        }
    }
}

impl fmt::Display for TlsVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered (minimum, maximum) protocol version pair
///
/// A missing maximum means the highest version the library supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolRange {
    pub min: TlsVersion,
    pub max: Option<TlsVersion>,
}

impl ProtocolRange {
    /// Range from `min` up to the library maximum
    pub fn at_least(min: TlsVersion) -> Self {
        ProtocolRange { min, max: None }
    }

    /// Range from `min` to `max` inclusive
    pub fn between(min: TlsVersion, max: TlsVersion) -> Self {
        ProtocolRange { min, max: Some(max) }
    }

    /// Exactly one version
    pub fn only(version: TlsVersion) -> Self {
        ProtocolRange::between(version, version)
    }

    /// Effective maximum version
    pub fn effective_max(&self) -> TlsVersion {
        let library_max = TlsVersion::library_max();
        match self.max {
            Some(max) if max < library_max => max,
            _ => library_max,
        }
    }

    /// Check the range is ordered and reachable with the linked library
    pub fn validate(&self) -> Result<(), TlsError> {
        if let Some(max) = self.max {
            if self.min > max {
                return Err(TlsError::config(
                    ErrorCode::UnsupportedProtocol,
                    format!("minimum protocol {} exceeds maximum {}", self.min, max),
                ));
            }
        }

        let library_max = TlsVersion::library_max();
        if self.min > library_max {
            return Err(TlsError::config(
                ErrorCode::UnsupportedProtocol,
                format!(
                    "minimum protocol {} exceeds library maximum {}",
                    self.min, library_max
                ),
            ));
        }

        Ok(())
    }

    /// Whether the range includes TLS 1.3
    pub fn includes_tls13(&self) -> bool {
        self.effective_max() >= TlsVersion::Tls13
    }

    /// Whether the range includes any version below TLS 1.3
    pub fn includes_legacy(&self) -> bool {
        self.min < TlsVersion::Tls13
    }
}

impl Default for ProtocolRange {
    fn default() -> Self {
        Protocol::default().range()
    }
}

/// Named protocol selections accepted in configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Protocol {
    /// Accepts SSLv2/v3 style hellos but only negotiates TLS 1.0 or later
    #[default]
    SslTls,
    /// SSLv3 only; insecure
    Sslv3,
    /// TLS 1.0 or later
    Tlsv1_0,
    /// TLS 1.1 or later
    Tlsv1_1,
    /// TLS 1.2 or later
    Tlsv1_2,
    /// Currently TLS 1.2 or later
    Latest,
}

impl Protocol {
    /// Version range this selection negotiates
    pub fn range(&self) -> ProtocolRange {
        match self {
            Protocol::SslTls | Protocol::Tlsv1_0 => ProtocolRange::at_least(TlsVersion::Tls10),
            Protocol::Sslv3 => ProtocolRange::only(TlsVersion::Ssl3),
            Protocol::Tlsv1_1 => ProtocolRange::at_least(TlsVersion::Tls11),
            Protocol::Tlsv1_2 | Protocol::Latest => ProtocolRange::at_least(TlsVersion::Tls12),
        }
    }
}

impl FromStr for Protocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "SSLTLS" => Ok(Protocol::SslTls),
            "SSLV3" | "SSL3" => Ok(Protocol::Sslv3),
            "TLSV1_0" | "TLSV1.0" | "TLS1.0" | "TLSV1" => Ok(Protocol::Tlsv1_0),
            "TLSV1_1" | "TLSV1.1" | "TLS1.1" => Ok(Protocol::Tlsv1_1),
            "TLSV1_2" | "TLSV1.2" | "TLS1.2" => Ok(Protocol::Tlsv1_2),
            "LATEST" => Ok(Protocol::Latest),
            _ => Err(format!("invalid protocol: {s}")),
        }
    }
}

/// Side of the handshake this endpoint plays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Role {
    #[default]
    Client,
    Server,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Client => "client",
            Role::Server => "server",
        }
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "client" => Ok(Role::Client),
            "server" => Ok(Role::Server),
            _ => Err(format!("invalid role: {s}")),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Client certificate verification mode (server-side)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientVerify {
    /// Don't request client certificates
    #[default]
    None,
    /// Request client certificate but don't require it
    Optional,
    /// Require client certificate
    Required,
}

impl FromStr for ClientVerify {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(ClientVerify::None),
            "optional" | "request" => Ok(ClientVerify::Optional),
            "required" | "require" => Ok(ClientVerify::Required),
            _ => Err(format!("invalid client verify mode: {s}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tls::ErrorKind;

    #[test]
    fn test_tls_version_parsing() {
        assert_eq!("TLSv1.2".parse::<TlsVersion>().unwrap(), TlsVersion::Tls12);
        assert_eq!("tlsv1.3".parse::<TlsVersion>().unwrap(), TlsVersion::Tls13);
        assert_eq!("TLS1.0".parse::<TlsVersion>().unwrap(), TlsVersion::Tls10);
        assert_eq!("TLSv1_1".parse::<TlsVersion>().unwrap(), TlsVersion::Tls11);
        assert!("invalid".parse::<TlsVersion>().is_err());
    }

    #[test]
    fn test_versions_are_ordered() {
        assert!(TlsVersion::Ssl3 < TlsVersion::Tls10);
        assert!(TlsVersion::Tls12 < TlsVersion::Tls13);
    }

    #[test]
    fn test_protocol_ranges() {
        assert_eq!(Protocol::SslTls.range(), ProtocolRange::at_least(TlsVersion::Tls10));
        assert_eq!(Protocol::Sslv3.range(), ProtocolRange::only(TlsVersion::Ssl3));
        assert_eq!(Protocol::Tlsv1_1.range().min, TlsVersion::Tls11);
        assert_eq!(Protocol::Latest.range(), Protocol::Tlsv1_2.range());
        assert_eq!(ProtocolRange::default(), Protocol::SslTls.range());
    }

    #[test]
    fn test_protocol_parsing() {
        assert_eq!("ssltls".parse::<Protocol>().unwrap(), Protocol::SslTls);
        assert_eq!("TLSv1_2".parse::<Protocol>().unwrap(), Protocol::Tlsv1_2);
        assert_eq!("latest".parse::<Protocol>().unwrap(), Protocol::Latest);
        assert!("SSLv2".parse::<Protocol>().is_err());
    }

    #[test]
    fn test_inverted_range_is_rejected() {
        let err = ProtocolRange::between(TlsVersion::Tls12, TlsVersion::Tls10)
            .validate()
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CipherNotAvailable);
        assert_eq!(err.code(), ErrorCode::UnsupportedProtocol);
    }

    #[test]
    fn test_effective_max_is_capped() {
        let range = ProtocolRange::at_least(TlsVersion::Tls12);
        assert_eq!(range.effective_max(), TlsVersion::library_max());

        let range = ProtocolRange::only(TlsVersion::Tls12);
        assert_eq!(range.effective_max(), TlsVersion::Tls12);
        assert!(range.includes_legacy());
        assert!(!range.includes_tls13());
    }

    #[test]
    fn test_role_and_client_verify_parsing() {
        assert_eq!("Server".parse::<Role>().unwrap(), Role::Server);
        assert!("peer".parse::<Role>().is_err());
        assert_eq!("required".parse::<ClientVerify>().unwrap(), ClientVerify::Required);
        assert_eq!("optional".parse::<ClientVerify>().unwrap(), ClientVerify::Optional);
    }
}
