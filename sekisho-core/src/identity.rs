//! Client identities and the storage keys derived from them.
//!
//! An identity is whatever the caller throttles on, usually the client's network
//! address. Addresses are canonicalized so that the same client always lands on
//! the same counter, and the storage key is a digest of the identity so raw
//! addresses never reach the backend.

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::ValidationError;

/// Longest identity accepted, in bytes.
pub const MAX_IDENTITY_LEN: usize = 256;

/// A validated, canonical client identity.
///
/// # Examples
///
/// ```rust
/// use sekisho_core::ClientIdentity;
///
/// let mapped = ClientIdentity::parse("::ffff:10.0.0.1").unwrap();
/// let plain = ClientIdentity::parse("10.0.0.1").unwrap();
/// assert_eq!(mapped, plain);
///
/// assert!(ClientIdentity::parse("   ").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ClientIdentity(String);

impl ClientIdentity {
    /// Validate and canonicalize an identity string.
    ///
    /// Surrounding whitespace is trimmed. Strings that parse as an IP address are
    /// rewritten to their canonical form; anything else is kept as given.
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        let trimmed = raw.trim();

        if trimmed.is_empty() {
            return Err(ValidationError::InvalidIdentity(
                "Identity must not be empty".to_string(),
            ));
        }

        if trimmed.len() > MAX_IDENTITY_LEN {
            return Err(ValidationError::InvalidIdentity(format!(
                "Identity exceeds {MAX_IDENTITY_LEN} bytes"
            )));
        }

        if trimmed.chars().any(char::is_control) {
            return Err(ValidationError::InvalidIdentity(
                "Identity must not contain control characters".to_string(),
            ));
        }

        match IpAddr::from_str(trimmed) {
            Ok(ip) => Ok(Self::from_ip(ip)),
            Err(_) => Ok(Self(trimmed.to_string())),
        }
    }

    /// Build an identity from a client address.
    pub fn from_ip(ip: IpAddr) -> Self {
        Self(ip.to_canonical().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The storage key for this identity: `prefix` followed by the hex SHA-256
    /// digest of the canonical identity.
    pub fn storage_key(&self, prefix: &str) -> String {
        let digest = Sha256::digest(self.0.as_bytes());
        format!("{prefix}{}", hex::encode(digest))
    }
}

impl fmt::Display for ClientIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ClientIdentity {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ClientIdentity {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl TryFrom<&str> for ClientIdentity {
    type Error = ValidationError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<IpAddr> for ClientIdentity {
    fn from(ip: IpAddr) -> Self {
        Self::from_ip(ip)
    }
}

impl From<ClientIdentity> for String {
    fn from(identity: ClientIdentity) -> Self {
        identity.0
    }
}

impl AsRef<str> for ClientIdentity {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, Ipv6Addr};

    #[test]
    fn test_parse_trims_whitespace() {
        let identity = ClientIdentity::parse("  10.0.0.1\n").unwrap();
        assert_eq!(identity.as_str(), "10.0.0.1");
    }

    #[test]
    fn test_parse_rejects_empty() {
        assert!(matches!(
            ClientIdentity::parse(""),
            Err(ValidationError::InvalidIdentity(_))
        ));
        assert!(matches!(
            ClientIdentity::parse(" \t "),
            Err(ValidationError::InvalidIdentity(_))
        ));
    }

    #[test]
    fn test_parse_rejects_control_characters() {
        assert!(ClientIdentity::parse("10.0.0.1\u{0}evil").is_err());
        assert!(ClientIdentity::parse("user\u{1b}[31m").is_err());
    }

    #[test]
    fn test_parse_rejects_overlong() {
        let long = "a".repeat(MAX_IDENTITY_LEN + 1);
        assert!(ClientIdentity::parse(&long).is_err());

        let max = "a".repeat(MAX_IDENTITY_LEN);
        assert!(ClientIdentity::parse(&max).is_ok());
    }

    #[test]
    fn test_ipv6_is_canonicalized() {
        let upper = ClientIdentity::parse("2001:DB8:0:0:0:0:0:1").unwrap();
        assert_eq!(upper.as_str(), "2001:db8::1");
    }

    #[test]
    fn test_ipv4_mapped_ipv6_collapses_to_ipv4() {
        let mapped = ClientIdentity::parse("::ffff:192.168.1.20").unwrap();
        assert_eq!(mapped.as_str(), "192.168.1.20");

        let v6 = Ipv4Addr::new(192, 168, 1, 20).to_ipv6_mapped();
        let from_ip = ClientIdentity::from_ip(IpAddr::V6(v6));
        assert_eq!(mapped, from_ip);
    }

    #[test]
    fn test_non_address_identity_kept_verbatim() {
        let identity = ClientIdentity::parse("User@Example.com").unwrap();
        assert_eq!(identity.as_str(), "User@Example.com");
    }

    #[test]
    fn test_storage_key_is_prefixed_digest() {
        let identity = ClientIdentity::from_ip(IpAddr::V6(Ipv6Addr::LOCALHOST));
        let key = identity.storage_key("login:");

        assert!(key.starts_with("login:"));
        let digest = &key["login:".len()..];
        assert_eq!(digest.len(), 64);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
        assert!(!key.contains("::1"));
    }

    #[test]
    fn test_storage_key_stable_across_spellings() {
        let a = ClientIdentity::parse("::ffff:10.0.0.1").unwrap();
        let b = ClientIdentity::parse("10.0.0.1").unwrap();
        assert_eq!(a.storage_key("p:"), b.storage_key("p:"));

        let c = ClientIdentity::parse("10.0.0.2").unwrap();
        assert_ne!(a.storage_key("p:"), c.storage_key("p:"));
    }

    #[test]
    fn test_serde_round_trip_validates() {
        let identity: ClientIdentity = serde_json::from_str("\"10.0.0.1\"").unwrap();
        assert_eq!(identity.as_str(), "10.0.0.1");

        let invalid: Result<ClientIdentity, _> = serde_json::from_str("\"\"");
        assert!(invalid.is_err());
    }
}
