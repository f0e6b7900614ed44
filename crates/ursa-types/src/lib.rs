//! Shared types for the ursa daemons.
//!
//! The address wrappers carry one canonical text form each, used for the
//! database columns, YAML rendering, and log output alike. Conversions in
//! and out happen through `FromStr`/`Display` at the boundary that needs
//! them; nothing here knows about SQL or HTTP.

pub mod addr;
pub mod models;

pub use addr::{AddrError, Cidr, Ipv4, MacAddr, Netmask};
pub use models::{
    Host, Lease, LeaseAddress, SshKey, Subnet, SubnetId, User, MANAGEMENT_SUBNET_ID,
    SERVICE_SUBNET_ID,
};
