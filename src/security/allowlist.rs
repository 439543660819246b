//! Client address normalization and allowlist matching.

use std::net::IpAddr;
use std::str::FromStr;

use ipnet::IpNet;

/// Strip the IPv6-mapped IPv4 prefix (`::ffff:a.b.c.d`) so that the same
/// client is keyed identically on dual-stack listeners.
pub fn normalize(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => IpAddr::V4(v4),
            None => IpAddr::V6(v6),
        },
        v4 => v4,
    }
}

/// One allowlist entry: a single address or a CIDR network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllowEntry {
    Addr(IpAddr),
    Net(IpNet),
}

impl AllowEntry {
    fn matches(&self, raw: IpAddr, normalized: IpAddr) -> bool {
        match self {
            AllowEntry::Addr(addr) => *addr == raw || *addr == normalized,
            AllowEntry::Net(net) => net.contains(&raw) || net.contains(&normalized),
        }
    }
}

impl FromStr for AllowEntry {
    type Err = ipnet::AddrParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.contains('/') {
            return s.parse::<IpNet>().map(|net| AllowEntry::Net(net.trunc()));
        }
        match s.parse::<IpAddr>() {
            Ok(addr) => Ok(AllowEntry::Addr(normalize(addr))),
            // Reuse ipnet's error type for a uniform FromStr.
            Err(_) => s.parse::<IpNet>().map(AllowEntry::Net),
        }
    }
}

/// Set of permitted client addresses. Empty means unrestricted.
#[derive(Debug, Clone, Default)]
pub struct Allowlist {
    entries: Vec<AllowEntry>,
}

impl Allowlist {
    /// Build from configured strings, skipping entries that fail to parse.
    /// Configuration validation rejects those before we get here.
    pub fn from_config(entries: &[String]) -> Self {
        let entries = entries
            .iter()
            .filter_map(|raw| match raw.parse() {
                Ok(entry) => Some(entry),
                Err(_) => {
                    tracing::warn!(entry = %raw, "Ignoring unparseable allowlist entry");
                    None
                }
            })
            .collect();
        Self { entries }
    }

    pub fn is_restricted(&self) -> bool {
        !self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether `ip` may use the proxy. Matches either the raw or the
    /// normalized form of the address.
    pub fn permits(&self, ip: IpAddr) -> bool {
        if self.entries.is_empty() {
            return true;
        }
        let normalized = normalize(ip);
        self.entries.iter().any(|e| e.matches(ip, normalized))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn normalize_strips_mapped_prefix() {
        assert_eq!(normalize(ip("::ffff:10.1.2.3")), ip("10.1.2.3"));
        assert_eq!(normalize(ip("10.1.2.3")), ip("10.1.2.3"));
        assert_eq!(normalize(ip("2001:db8::1")), ip("2001:db8::1"));
        assert_eq!(normalize(ip("::1")), ip("::1"));
    }

    #[test]
    fn empty_allowlist_permits_everyone() {
        let list = Allowlist::default();
        assert!(!list.is_restricted());
        assert!(list.permits(ip("203.0.113.9")));
    }

    #[test]
    fn exact_match_on_normalized_form() {
        let list = Allowlist::from_config(&["127.0.0.1".into()]);
        assert!(list.permits(ip("127.0.0.1")));
        assert!(list.permits(ip("::ffff:127.0.0.1")));
        assert!(!list.permits(ip("127.0.0.2")));
    }

    #[test]
    fn mapped_entry_matches_plain_client() {
        let list = Allowlist::from_config(&["::ffff:192.0.2.7".into()]);
        assert!(list.permits(ip("192.0.2.7")));
    }

    #[test]
    fn cidr_entries_match_ranges() {
        let list = Allowlist::from_config(&["10.0.0.0/8".into(), "2001:db8::/32".into()]);
        assert!(list.permits(ip("10.200.3.4")));
        assert!(list.permits(ip("::ffff:10.0.0.1")));
        assert!(list.permits(ip("2001:db8:1::5")));
        assert!(!list.permits(ip("11.0.0.1")));
    }

    #[test]
    fn garbage_entries_are_dropped() {
        let list = Allowlist::from_config(&["nope".into(), "10.0.0.1".into()]);
        assert_eq!(list.len(), 1);
    }
}
