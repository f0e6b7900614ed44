//! Address value types.
//!
//! Each wrapper owns one canonical text form: dotted-decimal for IPv4
//! addresses and netmasks, `a.b.c.d/len` for networks, lowercase
//! colon-separated for MACs. `FromStr` accepts the forms clients actually
//! send (MACs may arrive hyphenated from iPXE's `${mac:hexhyp}`).

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use ipnetwork::Ipv4Network;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Parse failure for any of the address types.
#[derive(Debug, Error)]
pub enum AddrError {
    #[error("invalid IPv4 address: {0:?}")]
    InvalidIp(String),

    #[error("invalid network: {0:?}")]
    InvalidNetwork(String),

    #[error("invalid netmask: {0:?}")]
    InvalidNetmask(String),

    #[error("invalid MAC address: {0:?}")]
    InvalidMac(String),
}

/// An IPv4 address. Ordering is numeric (big-endian), which the lease
/// allocator relies on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Ipv4(Ipv4Addr);

impl Ipv4 {
    pub fn new(addr: Ipv4Addr) -> Self {
        Ipv4(addr)
    }

    pub fn addr(&self) -> Ipv4Addr {
        self.0
    }

    pub fn octets(&self) -> [u8; 4] {
        self.0.octets()
    }

    /// The numerically next address, carrying across octet boundaries.
    /// Wraps at 255.255.255.255.
    pub fn next(&self) -> Ipv4 {
        Ipv4(Ipv4Addr::from(u32::from(self.0).wrapping_add(1)))
    }
}

impl From<Ipv4Addr> for Ipv4 {
    fn from(addr: Ipv4Addr) -> Self {
        Ipv4(addr)
    }
}

impl From<Ipv4> for Ipv4Addr {
    fn from(ip: Ipv4) -> Self {
        ip.0
    }
}

impl fmt::Display for Ipv4 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for Ipv4 {
    type Err = AddrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<Ipv4Addr>()
            .map(Ipv4)
            .map_err(|_| AddrError::InvalidIp(s.to_string()))
    }
}

/// An IPv4 network in CIDR notation, canonicalized to its network address
/// (parsing `192.0.2.7/24` yields `192.0.2.0/24`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Cidr(Ipv4Network);

impl Cidr {
    pub fn new(addr: Ipv4Addr, prefix: u8) -> Result<Self, AddrError> {
        let net = Ipv4Network::new(addr, prefix)
            .map_err(|_| AddrError::InvalidNetwork(format!("{addr}/{prefix}")))?;
        // Canonicalize so equal networks compare and render identically.
        let net = Ipv4Network::new(net.network(), prefix)
            .map_err(|_| AddrError::InvalidNetwork(format!("{addr}/{prefix}")))?;
        Ok(Cidr(net))
    }

    /// Build a network from an interface address and its netmask.
    pub fn with_netmask(addr: Ipv4Addr, mask: Netmask) -> Result<Self, AddrError> {
        let net = Ipv4Network::with_netmask(addr, mask.addr())
            .map_err(|_| AddrError::InvalidNetwork(format!("{addr}/{mask}")))?;
        Cidr::new(net.network(), net.prefix())
    }

    pub fn network(&self) -> Ipv4 {
        Ipv4(self.0.network())
    }

    pub fn prefix(&self) -> u8 {
        self.0.prefix()
    }

    pub fn netmask(&self) -> Netmask {
        Netmask(self.0.mask())
    }

    pub fn contains(&self, ip: Ipv4) -> bool {
        self.0.contains(ip.addr())
    }
}

impl fmt::Display for Cidr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.0.network(), self.0.prefix())
    }
}

impl FromStr for Cidr {
    type Err = AddrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let net = s
            .parse::<Ipv4Network>()
            .map_err(|_| AddrError::InvalidNetwork(s.to_string()))?;
        Cidr::new(net.network(), net.prefix())
    }
}

/// A dotted-decimal IPv4 netmask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Netmask(Ipv4Addr);

impl Netmask {
    pub fn new(addr: Ipv4Addr) -> Self {
        Netmask(addr)
    }

    pub fn from_prefix(prefix: u8) -> Result<Self, AddrError> {
        if prefix > 32 {
            return Err(AddrError::InvalidNetmask(format!("/{prefix}")));
        }
        let bits = if prefix == 0 {
            0
        } else {
            u32::MAX << (32 - u32::from(prefix))
        };
        Ok(Netmask(Ipv4Addr::from(bits)))
    }

    pub fn addr(&self) -> Ipv4Addr {
        self.0
    }
}

impl fmt::Display for Netmask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for Netmask {
    type Err = AddrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<Ipv4Addr>()
            .map(Netmask)
            .map_err(|_| AddrError::InvalidNetmask(s.to_string()))
    }
}

/// A 48-bit MAC address. Canonical form is lowercase with colons; parsing
/// also accepts the hyphenated form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MacAddr([u8; 6]);

impl MacAddr {
    pub fn new(octets: [u8; 6]) -> Self {
        MacAddr(octets)
    }

    /// Take a MAC from the leading bytes of a DHCP `chaddr` field.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, AddrError> {
        if bytes.len() < 6 {
            return Err(AddrError::InvalidMac(format!("{bytes:02x?}")));
        }
        let mut octets = [0u8; 6];
        octets.copy_from_slice(&bytes[..6]);
        Ok(MacAddr(octets))
    }

    pub fn octets(&self) -> [u8; 6] {
        self.0
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let o = self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            o[0], o[1], o[2], o[3], o[4], o[5]
        )
    }
}

impl FromStr for MacAddr {
    type Err = AddrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let sep = if s.contains('-') { '-' } else { ':' };
        let mut octets = [0u8; 6];
        let mut count = 0;
        for part in s.split(sep) {
            if count == 6 || part.len() != 2 {
                return Err(AddrError::InvalidMac(s.to_string()));
            }
            octets[count] = u8::from_str_radix(part, 16)
                .map_err(|_| AddrError::InvalidMac(s.to_string()))?;
            count += 1;
        }
        if count != 6 {
            return Err(AddrError::InvalidMac(s.to_string()));
        }
        Ok(MacAddr(octets))
    }
}

macro_rules! text_serde {
    ($ty:ty) => {
        impl Serialize for $ty {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.collect_str(self)
            }
        }

        impl<'de> Deserialize<'de> for $ty {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                s.parse().map_err(de::Error::custom)
            }
        }
    };
}

text_serde!(Ipv4);
text_serde!(Cidr);
text_serde!(Netmask);
text_serde!(MacAddr);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ipv4_parse_display() {
        let ip: Ipv4 = "192.0.2.100".parse().unwrap();
        assert_eq!(ip.to_string(), "192.0.2.100");
        assert!("192.0.2.256".parse::<Ipv4>().is_err());
        assert!("not-an-ip".parse::<Ipv4>().is_err());
    }

    #[test]
    fn ipv4_next_carries_across_octets() {
        let ip: Ipv4 = "192.0.2.255".parse().unwrap();
        assert_eq!(ip.next().to_string(), "192.0.3.0");

        let ip: Ipv4 = "192.0.255.255".parse().unwrap();
        assert_eq!(ip.next().to_string(), "192.1.0.0");

        let ip: Ipv4 = "192.0.2.100".parse().unwrap();
        assert_eq!(ip.next().to_string(), "192.0.2.101");
    }

    #[test]
    fn ipv4_ordering_is_numeric() {
        let a: Ipv4 = "192.0.2.9".parse().unwrap();
        let b: Ipv4 = "192.0.2.10".parse().unwrap();
        // Text ordering would put .9 after .10; numeric ordering must not.
        assert!(a < b);
    }

    #[test]
    fn cidr_canonicalizes_host_bits() {
        let net: Cidr = "198.51.100.17/24".parse().unwrap();
        assert_eq!(net.to_string(), "198.51.100.0/24");
        assert_eq!(net.prefix(), 24);
    }

    #[test]
    fn cidr_contains() {
        let net: Cidr = "192.0.2.0/24".parse().unwrap();
        assert!(net.contains("192.0.2.100".parse().unwrap()));
        assert!(!net.contains("192.0.3.1".parse().unwrap()));
    }

    #[test]
    fn cidr_netmask() {
        let net: Cidr = "198.51.100.0/24".parse().unwrap();
        assert_eq!(net.netmask().to_string(), "255.255.255.0");

        let net: Cidr = "10.0.0.0/23".parse().unwrap();
        assert_eq!(net.netmask().to_string(), "255.255.254.0");
    }

    #[test]
    fn netmask_from_prefix() {
        assert_eq!(Netmask::from_prefix(0).unwrap().to_string(), "0.0.0.0");
        assert_eq!(
            Netmask::from_prefix(32).unwrap().to_string(),
            "255.255.255.255"
        );
        assert!(Netmask::from_prefix(33).is_err());
    }

    #[test]
    fn mac_parse_colon_and_hyphen() {
        let colon: MacAddr = "aa:bb:cc:dd:ee:01".parse().unwrap();
        let hyphen: MacAddr = "aa-bb-cc-dd-ee-01".parse().unwrap();
        assert_eq!(colon, hyphen);
        assert_eq!(hyphen.to_string(), "aa:bb:cc:dd:ee:01");
    }

    #[test]
    fn mac_display_is_lowercase() {
        let mac: MacAddr = "AA:BB:CC:DD:EE:FF".parse().unwrap();
        assert_eq!(mac.to_string(), "aa:bb:cc:dd:ee:ff");
    }

    #[test]
    fn mac_rejects_malformed() {
        assert!("aa:bb:cc:dd:ee".parse::<MacAddr>().is_err());
        assert!("aa:bb:cc:dd:ee:ff:00".parse::<MacAddr>().is_err());
        assert!("zz:bb:cc:dd:ee:ff".parse::<MacAddr>().is_err());
        assert!("".parse::<MacAddr>().is_err());
    }

    #[test]
    fn mac_from_chaddr_bytes() {
        let chaddr = [0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0x01, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0];
        let mac = MacAddr::from_bytes(&chaddr).unwrap();
        assert_eq!(mac.to_string(), "aa:bb:cc:dd:ee:01");
        assert!(MacAddr::from_bytes(&[1, 2, 3]).is_err());
    }

    #[test]
    fn serde_text_forms() {
        let ip: Ipv4 = "192.0.2.1".parse().unwrap();
        assert_eq!(serde_json::to_string(&ip).unwrap(), "\"192.0.2.1\"");
        let back: Ipv4 = serde_json::from_str("\"192.0.2.1\"").unwrap();
        assert_eq!(back, ip);

        let mac: MacAddr = "aa:bb:cc:dd:ee:ff".parse().unwrap();
        assert_eq!(serde_yaml::to_string(&mac).unwrap().trim(), "aa:bb:cc:dd:ee:ff");
    }
}
