//! Runtime configuration assembled from the CLI flags.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use thiserror::Error;

use ursa_types::{Cidr, Ipv4};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid address range {0:?}, expected START:END")]
    InvalidRange(String),

    #[error("range start {start} is after end {end}")]
    StartAfterEnd { start: Ipv4, end: Ipv4 },

    #[error("address {addr} is outside network {network}")]
    OutsideNetwork { addr: Ipv4, network: Cidr },
}

/// An inclusive `START:END` allocation range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddrRange {
    pub start: Ipv4,
    pub end: Ipv4,
}

impl AddrRange {
    /// Both endpoints must fall inside `network`.
    pub fn check_within(&self, network: Cidr) -> Result<(), ConfigError> {
        for addr in [self.start, self.end] {
            if !network.contains(addr) {
                return Err(ConfigError::OutsideNetwork { addr, network });
            }
        }
        Ok(())
    }
}

impl fmt::Display for AddrRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.start, self.end)
    }
}

impl FromStr for AddrRange {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (start, end) = s
            .split_once(':')
            .ok_or_else(|| ConfigError::InvalidRange(s.to_string()))?;
        let start: Ipv4 = start
            .parse()
            .map_err(|_| ConfigError::InvalidRange(s.to_string()))?;
        let end: Ipv4 = end
            .parse()
            .map_err(|_| ConfigError::InvalidRange(s.to_string()))?;
        if start > end {
            return Err(ConfigError::StartAfterEnd { start, end });
        }
        Ok(AddrRange { start, end })
    }
}

/// Everything the supervisor needs to boot.
#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite connection string.
    pub dsn: String,

    /// Interface DHCP binds to; its IPv4 address becomes the server
    /// address for all three daemons.
    pub iface: String,

    /// Management-subnet allocation range. Must lie inside the bound
    /// interface's network, which is only known at startup.
    pub dhcp_range: AddrRange,

    pub service_network: Cidr,
    pub service_range: AddrRange,
    pub service_gateway: Ipv4,
    pub service_dns: Ipv4,

    /// Prefix for generated host names (`cn` -> `cn0001`).
    pub hostname_prefix: String,

    /// Root of the HTTP `/static` tree; also holds the TFTP boot assets.
    pub static_dir: PathBuf,
}

impl Config {
    /// Flag-level validation; the DHCP range is checked later against the
    /// discovered interface network.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.service_range.check_within(self.service_network)?;
        if !self.service_network.contains(self.service_gateway) {
            return Err(ConfigError::OutsideNetwork {
                addr: self.service_gateway,
                network: self.service_network,
            });
        }
        Ok(())
    }
}
