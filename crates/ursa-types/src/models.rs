//! Domain models persisted by the store.
//!
//! Values handed to the daemons are copies; the store owns the rows.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::addr::{Cidr, Ipv4, MacAddr};

/// Row id of the management (PXE) subnet.
pub const MANAGEMENT_SUBNET_ID: i64 = 0;

/// Row id of the service (production) subnet.
pub const SERVICE_SUBNET_ID: i64 = 1;

/// Which of the two fixed subnets a lease belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubnetId {
    Management,
    Service,
}

impl SubnetId {
    pub fn row_id(&self) -> i64 {
        match self {
            SubnetId::Management => MANAGEMENT_SUBNET_ID,
            SubnetId::Service => SERVICE_SUBNET_ID,
        }
    }
}

/// An address pool. `start`/`end` are inclusive and lie inside `network`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subnet {
    pub id: i64,
    pub network: Cidr,
    pub start: Ipv4,
    pub end: Ipv4,
    pub gateway: Option<Ipv4>,
    pub dns_server: Option<Ipv4>,
}

/// A persistent (MAC, IP, subnet) binding. Leases never expire and are
/// never deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    pub id: i64,
    pub mac_address: MacAddr,
    pub ip_address: Ipv4,
    pub subnet_id: i64,
}

/// A lease joined with the addressing details of its subnet, as needed to
/// render network configuration for a booted host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseAddress {
    pub id: i64,
    pub ip_address: Ipv4,
    pub network: Cidr,
    pub gateway: Option<Ipv4>,
    pub dns_server: Option<Ipv4>,
}

/// A registered bare-metal node, bound to one management and one service
/// lease. `name` is generated from the row id at registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Host {
    pub id: i64,
    pub uuid: Uuid,
    pub name: String,
    pub serial: String,
    pub product: String,
    pub manufacturer: String,
    pub service_lease_id: i64,
    pub management_lease_id: i64,
}

/// An account rendered into cloud-init user-data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub name: String,
}

/// An SSH public key belonging to a [`User`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SshKey {
    pub id: i64,
    pub key: String,
    pub user_id: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subnet_id_rows_are_fixed() {
        assert_eq!(SubnetId::Management.row_id(), 0);
        assert_eq!(SubnetId::Service.row_id(), 1);
    }

    #[test]
    fn subnet_serde_roundtrip() {
        let subnet = Subnet {
            id: SERVICE_SUBNET_ID,
            network: "198.51.100.0/24".parse().unwrap(),
            start: "198.51.100.100".parse().unwrap(),
            end: "198.51.100.200".parse().unwrap(),
            gateway: Some("198.51.100.1".parse().unwrap()),
            dns_server: Some("8.8.8.8".parse().unwrap()),
        };
        let json = serde_json::to_string(&subnet).unwrap();
        let back: Subnet = serde_json::from_str(&json).unwrap();
        assert_eq!(back, subnet);
    }

    #[test]
    fn subnet_optional_fields_roundtrip() {
        let subnet = Subnet {
            id: MANAGEMENT_SUBNET_ID,
            network: "192.0.2.0/24".parse().unwrap(),
            start: "192.0.2.100".parse().unwrap(),
            end: "192.0.2.200".parse().unwrap(),
            gateway: None,
            dns_server: None,
        };
        let json = serde_json::to_string(&subnet).unwrap();
        let back: Subnet = serde_json::from_str(&json).unwrap();
        assert_eq!(back, subnet);
        assert!(back.gateway.is_none());
    }
}
