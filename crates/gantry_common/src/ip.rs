//! Client IP allowlist rules.
//!
//! Three rule shapes, matching what operators put in namespace configs:
//! an exact address (`10.1.2.3`, `::1`), a CIDR block (`10.0.0.0/8`,
//! `fd00::/16`), or a MySQL-style percent glob (`192.168.1.%`). An empty
//! rule list means allow-all, but that decision belongs to the namespace;
//! this module only parses and matches individual rules.

use std::net::IpAddr;

use crate::error::ConfigError;

/// One parsed allowlist rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IpMatcher {
    Exact(IpAddr),
    Cidr { network: IpAddr, prefix: u8 },
    /// Textual prefix up to (not including) the `%`.
    PrefixGlob(String),
}

impl IpMatcher {
    /// Parse a trimmed, non-empty rule.
    pub fn parse(rule: &str) -> Result<Self, ConfigError> {
        if let Some((addr, prefix)) = rule.split_once('/') {
            let network: IpAddr = addr.parse().map_err(|_| ConfigError::InvalidIpRule {
                rule: rule.to_string(),
                reason: "bad network address".to_string(),
            })?;
            let prefix: u8 = prefix.parse().map_err(|_| ConfigError::InvalidIpRule {
                rule: rule.to_string(),
                reason: "bad prefix length".to_string(),
            })?;
            let max = match network {
                IpAddr::V4(_) => 32,
                IpAddr::V6(_) => 128,
            };
            if prefix > max {
                return Err(ConfigError::InvalidIpRule {
                    rule: rule.to_string(),
                    reason: format!("prefix length exceeds {max}"),
                });
            }
            return Ok(IpMatcher::Cidr { network, prefix });
        }

        if let Some(prefix) = rule.strip_suffix('%') {
            return Ok(IpMatcher::PrefixGlob(prefix.to_string()));
        }

        let addr: IpAddr = rule.parse().map_err(|_| ConfigError::InvalidIpRule {
            rule: rule.to_string(),
            reason: "not an ip address".to_string(),
        })?;
        Ok(IpMatcher::Exact(addr))
    }

    pub fn matches(&self, ip: &IpAddr) -> bool {
        match self {
            IpMatcher::Exact(addr) => addr == ip,
            IpMatcher::Cidr { network, prefix } => cidr_contains(network, *prefix, ip),
            IpMatcher::PrefixGlob(prefix) => ip.to_string().starts_with(prefix.as_str()),
        }
    }
}

fn cidr_contains(network: &IpAddr, prefix: u8, ip: &IpAddr) -> bool {
    match (network, ip) {
        (IpAddr::V4(net), IpAddr::V4(ip)) => {
            let mask = if prefix == 0 {
                0
            } else {
                u32::MAX << (32 - u32::from(prefix))
            };
            u32::from(*net) & mask == u32::from(*ip) & mask
        }
        (IpAddr::V6(net), IpAddr::V6(ip)) => {
            let mask = if prefix == 0 {
                0
            } else {
                u128::MAX << (128 - u32::from(prefix))
            };
            u128::from(*net) & mask == u128::from(*ip) & mask
        }
        // address family mismatch never matches
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_exact_match() {
        let m = IpMatcher::parse("10.1.2.3").unwrap();
        assert!(m.matches(&ip("10.1.2.3")));
        assert!(!m.matches(&ip("10.1.2.4")));
    }

    #[test]
    fn test_cidr_v4() {
        let m = IpMatcher::parse("192.168.0.0/16").unwrap();
        assert!(m.matches(&ip("192.168.77.1")));
        assert!(!m.matches(&ip("192.169.0.1")));
    }

    #[test]
    fn test_cidr_zero_prefix_matches_everything() {
        let m = IpMatcher::parse("0.0.0.0/0").unwrap();
        assert!(m.matches(&ip("8.8.8.8")));
    }

    #[test]
    fn test_cidr_v6() {
        let m = IpMatcher::parse("fd00::/16").unwrap();
        assert!(m.matches(&ip("fd00::1")));
        assert!(!m.matches(&ip("fe80::1")));
    }

    #[test]
    fn test_family_mismatch_never_matches() {
        let m = IpMatcher::parse("10.0.0.0/8").unwrap();
        assert!(!m.matches(&ip("::1")));
    }

    #[test]
    fn test_percent_glob() {
        let m = IpMatcher::parse("192.168.1.%").unwrap();
        assert!(m.matches(&ip("192.168.1.42")));
        assert!(!m.matches(&ip("192.168.2.42")));
    }

    #[test]
    fn test_glob_prefix_is_textual() {
        // "10.1.%" must not match 10.10.x addresses
        let m = IpMatcher::parse("10.1.%").unwrap();
        assert!(m.matches(&ip("10.1.0.9")));
        assert!(!m.matches(&ip("10.10.0.9")));
    }

    #[test]
    fn test_invalid_rules_rejected() {
        assert!(IpMatcher::parse("not-an-ip").is_err());
        assert!(IpMatcher::parse("10.0.0.0/33").is_err());
        assert!(IpMatcher::parse("banana/8").is_err());
    }
}
