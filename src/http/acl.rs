//! The access control list for the HTTP server.
//!
//! Callers are authorized purely by their source address. The node operator
//! provides a list of addresses and subnets via the configuration which is
//! parsed into an [`AccessList`] once at startup and consulted for every
//! request. The loopback networks are always part of the list.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;
use log::{debug, error};
use crate::config::Config;
use crate::error::Failed;


//------------ Subnet --------------------------------------------------------

/// A network given as an address and a prefix length.
///
/// A subnet can be parsed from a single IP address, from CIDR notation such
/// as `192.0.2.0/24`, or, for IPv4, from an address paired with a dotted
/// netmask such as `192.0.2.0/255.255.255.0`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Subnet {
    /// The network address.
    addr: IpAddr,

    /// The number of leading bits that make up the network.
    prefix: u8,
}

impl Subnet {
    /// Creates a subnet from an address and a prefix length.
    ///
    /// # Panics
    ///
    /// The method panics if the prefix length exceeds the address family’s
    /// bit count.
    pub fn new(addr: IpAddr, prefix: u8) -> Self {
        assert!(prefix <= addr_bits(addr));
        Subnet { addr, prefix }
    }

    /// Creates a subnet covering a single host address.
    pub fn host(addr: IpAddr) -> Self {
        Subnet { addr, prefix: addr_bits(addr) }
    }

    /// Returns whether the subnet contains the given address.
    ///
    /// IPv4-mapped IPv6 addresses are compared as their IPv4 form. An
    /// address of the wrong family never matches.
    pub fn contains(self, addr: IpAddr) -> bool {
        let (net, prefix) = canonical_net(self.addr, self.prefix);
        match (net, canonical(addr)) {
            (IpAddr::V4(net), IpAddr::V4(addr)) => {
                prefix_match(&net.octets(), &addr.octets(), prefix)
            }
            (IpAddr::V6(net), IpAddr::V6(addr)) => {
                prefix_match(&net.octets(), &addr.octets(), prefix)
            }
            _ => false
        }
    }
}


//--- FromStr

impl FromStr for Subnet {
    type Err = SubnetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (addr, mask) = match s.split_once('/') {
            Some((addr, mask)) => (addr, Some(mask)),
            None => (s, None)
        };
        let addr = IpAddr::from_str(addr).map_err(|_| SubnetError)?;
        let prefix = match mask {
            None => addr_bits(addr),
            Some(mask) => {
                match u8::from_str(mask) {
                    Ok(prefix) => {
                        if prefix > addr_bits(addr) {
                            return Err(SubnetError)
                        }
                        prefix
                    }
                    Err(_) => {
                        // Not a number, so possibly an IPv4 netmask.
                        if !addr.is_ipv4() {
                            return Err(SubnetError)
                        }
                        netmask_prefix(
                            Ipv4Addr::from_str(mask).map_err(|_| SubnetError)?
                        )?
                    }
                }
            }
        };
        Ok(Subnet::new(addr, prefix))
    }
}


//--- Display

impl fmt::Display for Subnet {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}/{}", self.addr, self.prefix)
    }
}


/// Returns the number of bits in an address of the given family.
fn addr_bits(addr: IpAddr) -> u8 {
    match addr {
        IpAddr::V4(_) => 32,
        IpAddr::V6(_) => 128,
    }
}

/// Converts an IPv4-mapped IPv6 address into its IPv4 form.
fn canonical(addr: IpAddr) -> IpAddr {
    match addr {
        IpAddr::V6(v6) => {
            match v6.to_ipv4_mapped() {
                Some(v4) => IpAddr::V4(v4),
                None => IpAddr::V6(v6)
            }
        }
        addr => addr
    }
}

/// Converts an IPv4-mapped IPv6 network into its IPv4 form.
///
/// The prefix length shrinks along with the address. A mapped network
/// whose prefix ends before the embedded IPv4 part is kept as is.
fn canonical_net(addr: IpAddr, prefix: u8) -> (IpAddr, u8) {
    if let IpAddr::V6(v6) = addr {
        if prefix >= 96 {
            if let Some(v4) = v6.to_ipv4_mapped() {
                return (IpAddr::V4(v4), prefix - 96)
            }
        }
    }
    (addr, prefix)
}

/// Returns whether the first `prefix` bits of two octet strings are equal.
fn prefix_match(left: &[u8], right: &[u8], prefix: u8) -> bool {
    let full = usize::from(prefix / 8);
    if left[..full] != right[..full] {
        return false
    }
    let bits = prefix % 8;
    if bits == 0 {
        return true
    }
    let mask = 0xffu8 << (8 - bits);
    left[full] & mask == right[full] & mask
}

/// Converts a dotted IPv4 netmask into a prefix length.
///
/// The set bits have to be contiguous and leading for the mask to be valid.
fn netmask_prefix(mask: Ipv4Addr) -> Result<u8, SubnetError> {
    let mask = u32::from(mask);
    if mask.leading_ones() != mask.count_ones() {
        return Err(SubnetError)
    }
    Ok(mask.count_ones() as u8)
}


//------------ AccessList ----------------------------------------------------

/// The list of subnets allowed to talk to the HTTP server.
#[derive(Clone, Debug)]
pub struct AccessList {
    /// The allowed subnets in match order.
    subnets: Vec<Subnet>,
}

impl AccessList {
    /// Builds the access list from the configuration.
    ///
    /// The loopback networks come first, followed by the configured
    /// entries in their given order. A malformed entry fails the whole
    /// list with a logged message and no other effect.
    pub fn from_config(config: &Config) -> Result<Self, Failed> {
        let mut subnets = vec![
            // Always allow the IPv4 local subnet.
            Subnet::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 0)), 8),
            // Always allow IPv6 localhost.
            Subnet::host(IpAddr::V6(Ipv6Addr::LOCALHOST)),
        ];
        for allow in &config.rpc_allow_ip {
            match Subnet::from_str(allow) {
                Ok(subnet) => subnets.push(subnet),
                Err(_) => {
                    error!(
                        "Invalid -rpcallowip subnet specification: {}. \
                         Valid are a single IP (e.g. 1.2.3.4), a \
                         network/netmask (e.g. 1.2.3.4/255.255.255.0) or a \
                         network/CIDR (e.g. 1.2.3.4/24).",
                        allow
                    );
                    return Err(Failed)
                }
            }
        }
        debug!(
            "Allowing HTTP connections from: {}",
            subnets.iter().map(|subnet| {
                format!("{subnet} ")
            }).collect::<String>()
        );
        Ok(AccessList { subnets })
    }

    /// Returns whether the given peer address is allowed access.
    pub fn contains(&self, addr: IpAddr) -> bool {
        if addr.is_unspecified() {
            return false
        }
        self.subnets.iter().any(|subnet| subnet.contains(addr))
    }
}


//------------ SubnetError ---------------------------------------------------

/// A subnet specification could not be parsed.
#[derive(Clone, Copy, Debug)]
pub struct SubnetError;


//============ Tests =========================================================

#[cfg(test)]
mod test {
    use super::*;

    fn subnet(s: &str) -> Subnet {
        Subnet::from_str(s).unwrap()
    }

    fn addr(s: &str) -> IpAddr {
        IpAddr::from_str(s).unwrap()
    }

    #[test]
    fn parse_subnets() {
        assert_eq!(
            subnet("1.2.3.4"),
            Subnet::host(addr("1.2.3.4"))
        );
        assert_eq!(
            subnet("192.0.2.0/24"),
            Subnet::new(addr("192.0.2.0"), 24)
        );
        assert_eq!(
            subnet("192.0.2.0/255.255.255.0"),
            Subnet::new(addr("192.0.2.0"), 24)
        );
        assert_eq!(subnet("::1"), Subnet::host(addr("::1")));
        assert_eq!(
            subnet("2001:db8::/32"),
            Subnet::new(addr("2001:db8::"), 32)
        );

        assert!(Subnet::from_str("1.2.3").is_err());
        assert!(Subnet::from_str("1.2.3.4/33").is_err());
        assert!(Subnet::from_str("1.2.3.4/255.0.255.0").is_err());
        assert!(Subnet::from_str("2001:db8::/129").is_err());
        assert!(Subnet::from_str("2001:db8::/255.255.0.0").is_err());
        assert!(Subnet::from_str("foo").is_err());
    }

    #[test]
    fn subnet_matching() {
        assert!(subnet("192.0.2.0/24").contains(addr("192.0.2.17")));
        assert!(!subnet("192.0.2.0/24").contains(addr("192.0.3.17")));
        assert!(subnet("127.0.0.1/8").contains(addr("127.5.5.5")));
        assert!(subnet("1.2.3.4").contains(addr("1.2.3.4")));
        assert!(!subnet("1.2.3.4").contains(addr("1.2.3.5")));
        assert!(subnet("2001:db8::/32").contains(addr("2001:db8:17::1")));
        assert!(!subnet("2001:db8::/32").contains(addr("2001:db9::1")));

        // Prefix lengths that are not multiples of eight.
        assert!(subnet("10.0.0.0/10").contains(addr("10.63.0.1")));
        assert!(!subnet("10.0.0.0/10").contains(addr("10.64.0.1")));

        // IPv4-mapped peers match IPv4 subnets and the other way around.
        assert!(subnet("192.0.2.0/24").contains(addr("::ffff:192.0.2.1")));
        assert!(subnet("::ffff:192.0.2.0/120").contains(addr("192.0.2.1")));

        // Family mismatches never match.
        assert!(!subnet("0.0.0.0/0").contains(addr("::1")));
        assert!(!subnet("::/0").contains(addr("127.0.0.1")));
    }

    #[test]
    fn default_list_is_loopback_only() {
        let list = AccessList::from_config(&Config::default()).unwrap();
        assert!(list.contains(addr("127.0.0.1")));
        assert!(list.contains(addr("127.255.255.255")));
        assert!(list.contains(addr("::1")));
        assert!(!list.contains(addr("192.0.2.1")));
        assert!(!list.contains(addr("::2")));
        assert!(!list.contains(addr("0.0.0.0")));
    }

    #[test]
    fn configured_entries() {
        let config = Config {
            rpc_allow_ip: vec![
                "192.0.2.0/24".into(), "2001:db8::1".into()
            ],
            .. Config::default()
        };
        let list = AccessList::from_config(&config).unwrap();
        assert!(list.contains(addr("192.0.2.200")));
        assert!(list.contains(addr("2001:db8::1")));
        assert!(!list.contains(addr("2001:db8::2")));
        assert!(!list.contains(addr("198.51.100.1")));
    }

    #[test]
    fn bad_entry_fails() {
        let config = Config {
            rpc_allow_ip: vec!["not-an-address".into()],
            .. Config::default()
        };
        assert!(AccessList::from_config(&config).is_err());
    }
}
