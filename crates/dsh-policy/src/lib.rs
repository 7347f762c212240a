//! IP block policy: decides whether a resolved address may be returned
//! to a client. Captive portals and filtering resolvers answer unresolved
//! names with loopback or RFC 1918 addresses; such answers must force
//! failover instead of reaching the client.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::OnceLock;

use ipnet::Ipv4Net;
use rustc_hash::FxHashSet;

/// Why an address was rejected. Rules are evaluated in declaration order;
/// the first match wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockReason {
    Loopback,
    Unspecified,
    Private,
    Multicast,
    LinkLocal,
    Reserved,
    KnownBad,
}

impl fmt::Display for BlockReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Loopback => write!(f, "loopback address"),
            Self::Unspecified => write!(f, "unspecified address"),
            Self::Private => write!(f, "private address range"),
            Self::Multicast => write!(f, "multicast address"),
            Self::LinkLocal => write!(f, "link-local address"),
            Self::Reserved => write!(f, "reserved address range"),
            Self::KnownBad => write!(f, "known block list"),
        }
    }
}

/// IANA-reserved and documentation v4 ranges not covered by the
/// std address classification methods.
fn reserved_v4() -> &'static [Ipv4Net] {
    static RANGES: OnceLock<Vec<Ipv4Net>> = OnceLock::new();
    RANGES.get_or_init(|| {
        [
            "240.0.0.0/4",    // class E
            "192.0.0.0/24",   // IETF protocol assignments
            "198.18.0.0/15",  // benchmarking
            "192.0.2.0/24",   // TEST-NET-1
            "198.51.100.0/24", // TEST-NET-2
            "203.0.113.0/24", // TEST-NET-3
        ]
        .iter()
        .map(|s| s.parse().expect("valid CIDR literal"))
        .collect()
    })
}

/// Pure predicate over resolved addresses. The known-bad set is fixed at
/// construction; the rule set never changes while the process runs.
pub struct BlockPolicy {
    known_bad: FxHashSet<IpAddr>,
}

impl BlockPolicy {
    pub fn new() -> Self {
        Self {
            known_bad: FxHashSet::default(),
        }
    }

    pub fn with_known_bad(addrs: impl IntoIterator<Item = IpAddr>) -> Self {
        Self {
            known_bad: addrs.into_iter().collect(),
        }
    }

    /// Add a literal to the known-bad set (construction time only).
    pub fn deny(&mut self, addr: IpAddr) {
        self.known_bad.insert(addr);
    }

    /// Remove a literal from the known-bad set (construction time only).
    pub fn allow(&mut self, addr: IpAddr) {
        self.known_bad.remove(&addr);
    }

    /// First matching rule, or None if the address is acceptable.
    pub fn check(&self, addr: IpAddr) -> Option<BlockReason> {
        let range_reason = match addr {
            IpAddr::V4(v4) => check_v4(v4),
            IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
                Some(v4) => check_v4(v4),
                None => check_v6(v6),
            },
        };
        if range_reason.is_some() {
            return range_reason;
        }
        if self.known_bad.contains(&addr) {
            return Some(BlockReason::KnownBad);
        }
        None
    }

    pub fn is_blocked(&self, addr: IpAddr) -> bool {
        self.check(addr).is_some()
    }
}

impl Default for BlockPolicy {
    fn default() -> Self {
        Self::new()
    }
}

fn check_v4(addr: Ipv4Addr) -> Option<BlockReason> {
    if addr.is_loopback() {
        Some(BlockReason::Loopback)
    } else if addr.is_unspecified() {
        Some(BlockReason::Unspecified)
    } else if addr.is_private() {
        Some(BlockReason::Private)
    } else if addr.is_multicast() {
        Some(BlockReason::Multicast)
    } else if addr.is_link_local() {
        Some(BlockReason::LinkLocal)
    } else if addr.is_broadcast() || reserved_v4().iter().any(|net| net.contains(&addr)) {
        Some(BlockReason::Reserved)
    } else {
        None
    }
}

fn check_v6(addr: Ipv6Addr) -> Option<BlockReason> {
    if addr.is_loopback() {
        Some(BlockReason::Loopback)
    } else if addr.is_unspecified() {
        Some(BlockReason::Unspecified)
    } else if addr.is_unique_local() {
        Some(BlockReason::Private)
    } else if addr.is_multicast() {
        Some(BlockReason::Multicast)
    } else if addr.is_unicast_link_local() {
        Some(BlockReason::LinkLocal)
    } else if is_documentation_v6(addr) {
        Some(BlockReason::Reserved)
    } else {
        None
    }
}

// 2001:db8::/32
fn is_documentation_v6(addr: Ipv6Addr) -> bool {
    let segments = addr.segments();
    segments[0] == 0x2001 && segments[1] == 0x0db8
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    fn make_policy() -> BlockPolicy {
        BlockPolicy::with_known_bad([ip("203.98.7.65")])
    }

    #[test]
    fn test_loopback() {
        let p = make_policy();
        assert_eq!(p.check(ip("127.0.0.1")), Some(BlockReason::Loopback));
        assert_eq!(p.check(ip("127.54.0.3")), Some(BlockReason::Loopback));
        assert_eq!(p.check(ip("::1")), Some(BlockReason::Loopback));
    }

    #[test]
    fn test_unspecified() {
        let p = make_policy();
        assert_eq!(p.check(ip("0.0.0.0")), Some(BlockReason::Unspecified));
        assert_eq!(p.check(ip("::")), Some(BlockReason::Unspecified));
    }

    #[test]
    fn test_private_ranges() {
        let p = make_policy();
        assert_eq!(p.check(ip("10.0.0.5")), Some(BlockReason::Private));
        assert_eq!(p.check(ip("172.16.99.1")), Some(BlockReason::Private));
        assert_eq!(p.check(ip("192.168.1.1")), Some(BlockReason::Private));
        assert_eq!(p.check(ip("fc00::1")), Some(BlockReason::Private));
        assert_eq!(p.check(ip("fd12:3456::1")), Some(BlockReason::Private));
        // 172.32/16 is public
        assert_eq!(p.check(ip("172.32.0.1")), None);
    }

    #[test]
    fn test_multicast() {
        let p = make_policy();
        assert_eq!(p.check(ip("224.0.0.1")), Some(BlockReason::Multicast));
        assert_eq!(p.check(ip("239.255.255.250")), Some(BlockReason::Multicast));
        assert_eq!(p.check(ip("ff02::fb")), Some(BlockReason::Multicast));
    }

    #[test]
    fn test_link_local() {
        let p = make_policy();
        assert_eq!(p.check(ip("169.254.1.1")), Some(BlockReason::LinkLocal));
        assert_eq!(p.check(ip("fe80::1")), Some(BlockReason::LinkLocal));
    }

    #[test]
    fn test_reserved() {
        let p = make_policy();
        assert_eq!(p.check(ip("240.0.0.1")), Some(BlockReason::Reserved));
        assert_eq!(p.check(ip("255.255.255.255")), Some(BlockReason::Reserved));
        assert_eq!(p.check(ip("192.0.2.44")), Some(BlockReason::Reserved));
        assert_eq!(p.check(ip("2001:db8::1")), Some(BlockReason::Reserved));
    }

    #[test]
    fn test_known_bad_list() {
        let p = make_policy();
        assert_eq!(p.check(ip("203.98.7.65")), Some(BlockReason::KnownBad));

        let mut p = make_policy();
        p.allow(ip("203.98.7.65"));
        assert_eq!(p.check(ip("203.98.7.65")), None);
        p.deny(ip("198.100.0.7"));
        assert_eq!(p.check(ip("198.100.0.7")), Some(BlockReason::KnownBad));
    }

    #[test]
    fn test_rule_order_beats_known_bad() {
        // Range rules are evaluated before the known-bad set.
        let p = BlockPolicy::with_known_bad([ip("127.0.0.1")]);
        assert_eq!(p.check(ip("127.0.0.1")), Some(BlockReason::Loopback));
    }

    #[test]
    fn test_public_addresses_pass() {
        let p = make_policy();
        assert_eq!(p.check(ip("8.8.8.8")), None);
        assert_eq!(p.check(ip("1.1.1.1")), None);
        assert_eq!(p.check(ip("93.184.216.34")), None);
        assert_eq!(p.check(ip("2606:4700:4700::1111")), None);
        assert!(!p.is_blocked(ip("8.8.8.8")));
        assert!(p.is_blocked(ip("127.0.0.1")));
    }

    #[test]
    fn test_ipv4_mapped_ipv6() {
        let p = make_policy();
        assert_eq!(p.check(ip("::ffff:192.168.0.1")), Some(BlockReason::Private));
        assert_eq!(p.check(ip("::ffff:8.8.8.8")), None);
    }
}
