//! Addresses that are counted but never banned.

use anyhow::{bail, Result};
use ipnet::IpNet;
use std::net::IpAddr;

/// Immutable set of exempt addresses and ranges, built once at startup.
#[derive(Debug, Clone, Default)]
pub struct Whitelist {
    networks: Vec<IpNet>,
}

impl Whitelist {
    /// Build from configuration entries (plain IPs or CIDR ranges).
    pub fn from_entries<S: AsRef<str>>(entries: &[S]) -> Result<Self> {
        let networks = entries
            .iter()
            .map(|entry| parse_entry(entry.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { networks })
    }

    /// Whether `addr` must never be banned.
    ///
    /// Tokens that do not parse as an address (shape-only matches such as
    /// `999.1.1.1`) are never exempt.
    pub fn is_exempt(&self, addr: &str) -> bool {
        match addr.parse::<IpAddr>() {
            Ok(ip) => self.networks.iter().any(|net| net.contains(&ip)),
            Err(_) => false,
        }
    }

    pub fn len(&self) -> usize {
        self.networks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.networks.is_empty()
    }
}

/// Parse a whitelist entry. A plain address becomes a /32 or /128 network.
pub fn parse_entry(entry: &str) -> Result<IpNet> {
    let entry = entry.trim();
    if entry.contains('/') {
        return entry
            .parse()
            .map_err(|_| anyhow::anyhow!("Invalid whitelist CIDR: {}", entry));
    }
    match entry.parse::<IpAddr>() {
        Ok(ip) => Ok(IpNet::from(ip)),
        Err(_) => bail!("Invalid whitelist address: {}", entry),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_address() {
        let whitelist = Whitelist::from_entries(&["192.168.1.10"]).unwrap();
        assert!(whitelist.is_exempt("192.168.1.10"));
        assert!(!whitelist.is_exempt("192.168.1.11"));
    }

    #[test]
    fn test_cidr_range() {
        let whitelist = Whitelist::from_entries(&["10.0.0.0/8", "2001:db8::/32"]).unwrap();
        assert!(whitelist.is_exempt("10.200.3.4"));
        assert!(whitelist.is_exempt("2001:db8::1"));
        assert!(!whitelist.is_exempt("11.0.0.1"));
        assert!(!whitelist.is_exempt("2001:db9::1"));
    }

    #[test]
    fn test_families_do_not_cross() {
        let whitelist = Whitelist::from_entries(&["0.0.0.0/0"]).unwrap();
        assert!(whitelist.is_exempt("203.0.113.1"));
        assert!(!whitelist.is_exempt("::1"));
    }

    #[test]
    fn test_unparsable_address_not_exempt() {
        let whitelist = Whitelist::from_entries(&["0.0.0.0/0"]).unwrap();
        assert!(!whitelist.is_exempt("999.1.1.1"));
    }

    #[test]
    fn test_invalid_entries_rejected() {
        assert!(Whitelist::from_entries(&["not-an-ip"]).is_err());
        assert!(Whitelist::from_entries(&["10.0.0.0/33"]).is_err());
        assert!(Whitelist::from_entries(&["/24"]).is_err());
    }

    #[test]
    fn test_empty() {
        let whitelist = Whitelist::default();
        assert!(whitelist.is_empty());
        assert!(!whitelist.is_exempt("127.0.0.1"));
        let whitelist = Whitelist::from_entries(&[" 127.0.0.1 "]).unwrap();
        assert_eq!(whitelist.len(), 1);
    }
}
