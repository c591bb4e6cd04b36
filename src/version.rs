//! Greeting banner recognition.
//!
//! The first line the server sends identifies the product and version, e.g.
//! `Asterisk Call Manager/5.0.4`. The core recognizes the banner and exposes
//! its parts; no further version negotiation is modeled.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::constants::BANNER_PREFIX;

/// The parsed connect banner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolBanner {
    product: String,
    version: String,
}

impl ProtocolBanner {
    /// Split a banner line at the product/version separator.
    ///
    /// Returns `None` when the line does not carry the expected product
    /// prefix — the caller decides whether to proceed anyway.
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        if !line.starts_with(BANNER_PREFIX) {
            return None;
        }
        let (product, version) = match line.rsplit_once('/') {
            Some((product, version)) => (product.to_string(), version.to_string()),
            None => (line.to_string(), String::new()),
        };
        Some(Self { product, version })
    }

    /// Product identifier (`Asterisk Call Manager`).
    pub fn product(&self) -> &str {
        &self.product
    }

    /// Version string (`5.0.4`), empty if the banner carried none.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Leading numeric component of the version, when present.
    pub fn major(&self) -> Option<u32> {
        self.version.split('.').next()?.parse().ok()
    }
}

impl fmt::Display for ProtocolBanner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.version.is_empty() {
            f.write_str(&self.product)
        } else {
            write!(f, "{}/{}", self.product, self.version)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_standard_banner() {
        let banner = ProtocolBanner::parse("Asterisk Call Manager/5.0.4").unwrap();
        assert_eq!(banner.product(), "Asterisk Call Manager");
        assert_eq!(banner.version(), "5.0.4");
        assert_eq!(banner.major(), Some(5));
        assert_eq!(banner.to_string(), "Asterisk Call Manager/5.0.4");
    }

    #[test]
    fn parse_versionless_banner() {
        let banner = ProtocolBanner::parse("Asterisk Call Manager").unwrap();
        assert_eq!(banner.version(), "");
        assert_eq!(banner.major(), None);
    }

    #[test]
    fn unknown_banner_is_none() {
        assert!(ProtocolBanner::parse("SSH-2.0-OpenSSH").is_none());
        assert!(ProtocolBanner::parse("").is_none());
    }
}
