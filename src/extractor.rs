//! Offense detection and address extraction for a single log line.
//!
//! A line is an offense when it contains the source tag, matches the offense
//! pattern, and the IP pattern finds an address-shaped token inside the
//! offense match. Only the text matched by the offense pattern is scanned, so
//! addresses elsewhere on the line (the local listener, a proxy) are never
//! blamed.
//!
//! Matching is textual. A token such as `999.1.1.1` has the right shape and is
//! accepted even though it is not a routable address.

use anyhow::{Context, Result};
use regex::Regex;
use std::fmt;
use std::net::IpAddr;

/// Four dot-separated decimal groups without leading zeros.
const IPV4_SHAPE: &str = r"\b(?:0|[1-9][0-9]{0,2})(?:\.(?:0|[1-9][0-9]{0,2})){3}\b";

/// Eight colon-separated groups of one to four hex digits.
const IPV6_SHAPE: &str = r"(?i)\b[0-9a-f]{1,4}(?::[0-9a-f]{1,4}){7}\b";

/// Default IP-capture pattern: anything shaped like an IPv4 or IPv6 address.
pub const DEFAULT_IP_PATTERN: &str =
    r"(?i)\b(?:0|[1-9][0-9]{0,2})(?:\.(?:0|[1-9][0-9]{0,2})){3}\b|\b[0-9a-f]{1,4}(?::[0-9a-f]{1,4}){7}\b";

/// Address family of an extracted offender, selects the header predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressFamily {
    Ipv4,
    Ipv6,
}

impl AddressFamily {
    /// Family implied by the textual form.
    pub fn of(addr: &str) -> Self {
        if addr.contains(':') {
            AddressFamily::Ipv6
        } else {
            AddressFamily::Ipv4
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AddressFamily::Ipv4 => "ipv4",
            AddressFamily::Ipv6 => "ipv6",
        }
    }
}

impl fmt::Display for AddressFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An address found in an offense line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Offender {
    /// Canonical textual form, used as the ledger key and firewall rule id
    pub addr: String,
    pub family: AddressFamily,
}

impl Offender {
    fn from_token(token: &str, family: AddressFamily) -> Self {
        // Parsed addresses are normalised (IPv6 compression, lower-case hex) so
        // the same host always lands on the same ledger record.
        let addr = match token.parse::<IpAddr>() {
            Ok(ip) => ip.to_string(),
            Err(_) => token.to_ascii_lowercase(),
        };
        Self { addr, family }
    }
}

/// Compiled matcher for one log source.
#[derive(Debug, Clone)]
pub struct AddressExtractor {
    tag: String,
    offense: Regex,
    capture: Regex,
    ipv4: Regex,
    ipv6: Regex,
}

impl AddressExtractor {
    pub fn new(tag: &str, offense_pattern: &str, ip_pattern: &str) -> Result<Self> {
        let offense = Regex::new(offense_pattern)
            .with_context(|| format!("Invalid offense pattern: {}", offense_pattern))?;
        let capture = Regex::new(ip_pattern)
            .with_context(|| format!("Invalid IP pattern: {}", ip_pattern))?;

        Ok(Self {
            tag: tag.to_string(),
            offense,
            capture,
            ipv4: Regex::new(IPV4_SHAPE)?,
            ipv6: Regex::new(IPV6_SHAPE)?,
        })
    }

    /// Extract the offending address from `line`, if the line is an offense.
    pub fn extract(&self, line: &str) -> Option<Offender> {
        if !line.contains(&self.tag) {
            return None;
        }

        let offense = self.offense.find(line)?.as_str();

        // The IP pattern may narrow the search with a capture group; without
        // one each whole match is used.
        let captured: Vec<&str> = self
            .capture
            .captures_iter(offense)
            .filter_map(|caps| caps.get(1).or_else(|| caps.get(0)))
            .map(|m| m.as_str())
            .collect();

        if let Some(m) = captured.iter().find_map(|text| self.ipv4.find(text)) {
            return Some(Offender::from_token(m.as_str(), AddressFamily::Ipv4));
        }
        captured
            .iter()
            .find_map(|text| self.ipv6.find(text))
            .map(|m| Offender::from_token(m.as_str(), AddressFamily::Ipv6))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SSHD_PATTERN: &str = "Connection closed by [1-9][^ ]*";

    fn sshd() -> AddressExtractor {
        AddressExtractor::new("sshd", SSHD_PATTERN, DEFAULT_IP_PATTERN).unwrap()
    }

    #[test]
    fn test_extract_ipv4() {
        let line = "Jan 10 12:00:01 host sshd[123]: Connection closed by 10.0.0.7 port 52144 [preauth]";
        let offender = sshd().extract(line).unwrap();
        assert_eq!(offender.addr, "10.0.0.7");
        assert_eq!(offender.family, AddressFamily::Ipv4);
    }

    #[test]
    fn test_extract_full_ipv6_is_canonicalised() {
        let line = "host sshd[9]: Connection closed by 2001:0DB8:0000:0000:0000:0000:0000:0001 port 22";
        let offender = sshd().extract(line).unwrap();
        assert_eq!(offender.addr, "2001:db8::1");
        assert_eq!(offender.family, AddressFamily::Ipv6);
    }

    #[test]
    fn test_line_without_tag_is_ignored() {
        let line = "host nginx[1]: Connection closed by 10.0.0.7 port 80";
        assert!(sshd().extract(line).is_none());
    }

    #[test]
    fn test_tag_without_address_is_no_offense() {
        let line = "host sshd[1]: Connection closed by authenticating user root";
        assert!(sshd().extract(line).is_none());
    }

    #[test]
    fn test_offense_pattern_must_match() {
        let line = "host sshd[1]: Accepted publickey for alice from 10.0.0.7 port 5000";
        assert!(sshd().extract(line).is_none());
    }

    #[test]
    fn test_only_offense_match_is_scanned() {
        let extractor = AddressExtractor::new(
            "sshd",
            r"Failed password for \S+ from \S+",
            DEFAULT_IP_PATTERN,
        )
        .unwrap();
        let line = "192.168.0.1 sshd[1]: Failed password for root from 203.0.113.9 port 22";
        assert_eq!(extractor.extract(line).unwrap().addr, "203.0.113.9");
    }

    #[test]
    fn test_capture_group_narrows_search() {
        let extractor = AddressExtractor::new(
            "postfix",
            r"SASL LOGIN authentication failed.*",
            r"\[([^\]]+)\]",
        )
        .unwrap();
        let line = "postfix/smtpd[7]: warning: unknown[198.51.100.4]: SASL LOGIN authentication failed: 10.9.9.9";
        // The offense match starts after the bracket, so only 10.9.9.9 is visible
        // and it is not inside a [..] group.
        assert!(extractor.extract(line).is_none());

        let extractor = AddressExtractor::new(
            "postfix",
            r"unknown\[[^\]]+\]: SASL LOGIN authentication failed",
            r"\[([^\]]+)\]",
        )
        .unwrap();
        assert_eq!(extractor.extract(line).unwrap().addr, "198.51.100.4");
    }

    #[test]
    fn test_malformed_but_shaped_token_accepted() {
        let line = "sshd[1]: Connection closed by 999.1.1.1 port 22";
        assert_eq!(sshd().extract(line).unwrap().addr, "999.1.1.1");
    }

    #[test]
    fn test_leading_zero_group_rejected() {
        let line = "sshd[1]: Connection closed by 10.01.1.1 port 22";
        assert!(sshd().extract(line).is_none());
    }

    #[test]
    fn test_ipv4_preferred_over_ipv6() {
        let extractor = AddressExtractor::new("x", ".*", DEFAULT_IP_PATTERN).unwrap();
        let line = "x 1:2:3:4:5:6:7:8 then 10.0.0.1";
        let offender = extractor.extract(line).unwrap();
        assert_eq!(offender.addr, "10.0.0.1");
        assert_eq!(offender.family, AddressFamily::Ipv4);
    }

    #[test]
    fn test_invalid_patterns_rejected() {
        assert!(AddressExtractor::new("sshd", "(unclosed", DEFAULT_IP_PATTERN).is_err());
        assert!(AddressExtractor::new("sshd", SSHD_PATTERN, "[bad").is_err());
    }

    #[test]
    fn test_family_of() {
        assert_eq!(AddressFamily::of("10.0.0.1"), AddressFamily::Ipv4);
        assert_eq!(AddressFamily::of("2001:db8::1"), AddressFamily::Ipv6);
        assert_eq!(AddressFamily::Ipv6.to_string(), "ipv6");
    }
}
