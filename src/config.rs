//! Textual TLS configuration
//!
//! `TlsOptions` is the configuration surface of the transport as plain
//! key/value pairs, as they come from a configuration file or command line.
//! Values are validated when set; certificate material is only read when the
//! context is built.

use crate::tls::{ClientVerify, LoadError, Protocol, Role, TlsContext, TlsContextBuilder, TlsError};
use std::path::PathBuf;

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Unknown option: {0}")]
    UnknownKey(String),

    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Where certificate material comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CertSource {
    File(PathBuf),
    Pem(Vec<u8>),
}

/// TLS options
#[derive(Debug, Clone)]
pub struct TlsOptions {
    pub protocol: Protocol,
    pub role: Role,
    pub trust: Vec<CertSource>,
    pub identity: Option<CertSource>,
    pub self_signed_allowed: bool,
    pub client_verify: ClientVerify,
    pub ciphers: Option<String>,
    pub ciphersuites: Option<String>,
    pub verify_hostname: bool,
    pub default_trust: bool,
}

impl Default for TlsOptions {
    fn default() -> Self {
        TlsOptions {
            protocol: Protocol::default(),
            role: Role::default(),
            trust: Vec::new(),
            identity: None,
            self_signed_allowed: false,
            client_verify: ClientVerify::default(),
            ciphers: None,
            ciphersuites: None,
            verify_hostname: false,
            default_trust: true,
        }
    }
}

impl TlsOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set an option from its textual form
    ///
    /// `trust_file` and `trust_pem` accumulate; every other key overwrites.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let invalid = |message: String| ConfigError::InvalidValue {
            key: key.to_string(),
            message,
        };

        match key {
            "protocol" => self.protocol = value.parse().map_err(invalid)?,
            "role" => self.role = value.parse().map_err(invalid)?,
            "trust_file" => self.trust.push(CertSource::File(PathBuf::from(value))),
            "trust_pem" => self.trust.push(CertSource::Pem(value.as_bytes().to_vec())),
            "identity_file" => self.identity = Some(CertSource::File(PathBuf::from(value))),
            "identity_pem" => self.identity = Some(CertSource::Pem(value.as_bytes().to_vec())),
            "self_signed_allowed" => self.self_signed_allowed = parse_bool(value).map_err(invalid)?,
            "client_verify" => self.client_verify = value.parse().map_err(invalid)?,
            "ciphers" => self.ciphers = Some(value.to_string()),
            "ciphersuites" => self.ciphersuites = Some(value.to_string()),
            "verify_hostname" => self.verify_hostname = parse_bool(value).map_err(invalid)?,
            "default_trust" => self.default_trust = parse_bool(value).map_err(invalid)?,
            _ => return Err(ConfigError::UnknownKey(key.to_string())),
        }
        Ok(())
    }

    /// Parse `key=value` pairs
    pub fn from_pairs<'a, I>(pairs: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut options = TlsOptions::new();
        for (key, value) in pairs {
            options.set(key, value)?;
        }
        Ok(options)
    }

    /// Translate into a context builder, loading certificate material
    pub fn to_builder(&self) -> Result<TlsContextBuilder, LoadError> {
        let mut builder = TlsContext::builder(self.role)
            .protocol(self.protocol)
            .allow_self_signed(self.self_signed_allowed)
            .client_verify(self.client_verify)
            .verify_hostname(self.verify_hostname)
            .default_trust(self.default_trust);

        if let Some(ciphers) = &self.ciphers {
            builder = builder.cipher_list(ciphers.as_str());
        }
        if let Some(suites) = &self.ciphersuites {
            builder = builder.ciphersuites(suites.as_str());
        }

        for source in &self.trust {
            builder = match source {
                CertSource::File(path) => builder.trust_file(path)?,
                CertSource::Pem(pem) => builder.trust_pem(pem)?,
            };
        }

        if let Some(source) = &self.identity {
            builder = match source {
                CertSource::File(path) => builder.identity_file(path)?,
                CertSource::Pem(pem) => builder.identity_pem(pem)?,
            };
        }

        Ok(builder)
    }

    /// Build the context
    ///
    /// Unreadable or malformed certificate material is reported like any
    /// other context construction failure.
    pub fn build(&self) -> Result<TlsContext, TlsError> {
        self.to_builder()?.build()
    }
}

fn parse_bool(value: &str) -> Result<bool, String> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Ok(true),
        "false" | "no" | "off" | "0" => Ok(false),
        _ => Err(format!("expected a boolean, got '{value}'")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = TlsOptions::new();
        assert_eq!(options.protocol, Protocol::SslTls);
        assert_eq!(options.role, Role::Client);
        assert!(!options.self_signed_allowed);
        assert!(options.default_trust);
    }

    #[test]
    fn test_set_known_keys() {
        let options = TlsOptions::from_pairs([
            ("protocol", "TLSv1_2"),
            ("role", "server"),
            ("self_signed_allowed", "true"),
            ("client_verify", "required"),
            ("trust_file", "/etc/ca-a.pem"),
            ("trust_file", "/etc/ca-b.pem"),
            ("identity_file", "/etc/server.pem"),
            ("ciphers", "HIGH:!aNULL"),
        ])
        .unwrap();

        assert_eq!(options.protocol, Protocol::Tlsv1_2);
        assert_eq!(options.role, Role::Server);
        assert!(options.self_signed_allowed);
        assert_eq!(options.client_verify, ClientVerify::Required);
        assert_eq!(options.trust.len(), 2);
        assert_eq!(
            options.identity,
            Some(CertSource::File(PathBuf::from("/etc/server.pem")))
        );
        assert_eq!(options.ciphers.as_deref(), Some("HIGH:!aNULL"));
    }

    #[test]
    fn test_invalid_values() {
        let mut options = TlsOptions::new();
        assert!(matches!(
            options.set("protocol", "SSLv2"),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert!(matches!(
            options.set("self_signed_allowed", "maybe"),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert!(matches!(
            options.set("compression", "on"),
            Err(ConfigError::UnknownKey(_))
        ));
    }

    #[test]
    fn test_missing_file_fails_to_load() {
        let mut options = TlsOptions::new();
        options.set("trust_file", "/nonexistent/ca.pem").unwrap();
        assert!(matches!(options.to_builder(), Err(LoadError::Io(_))));
    }
}
