//! Durable state for the ursa daemons.
//!
//! One SQLite database holds the two fixed subnets, every lease ever
//! granted, and the host registrations made during the iPXE handshake.
//! All three daemons share a single `Arc<dyn Store>`; every mutation goes
//! through the trait so allocation invariants live in one place.

mod error;
mod sqlite;

#[cfg(test)]
mod tests;

pub use error::{Result, StoreError};
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use uuid::Uuid;

use ursa_types::{Cidr, Host, Ipv4, Lease, LeaseAddress, MacAddr, SshKey, Subnet, User};

/// Storage interface shared by the DHCP and HTTP daemons.
///
/// Methods returning a [`Lease`] or [`Subnet`] hand back value copies;
/// the store owns the rows.
#[async_trait]
pub trait Store: Send + Sync {
    /// Fetch the management (PXE) subnet.
    async fn management_subnet(&self) -> Result<Subnet>;

    /// Fetch the service subnet.
    async fn service_subnet(&self) -> Result<Subnet>;

    /// Create the management subnet at its fixed id. Fails with
    /// [`StoreError::Conflict`] when it already exists.
    async fn create_management_subnet(
        &self,
        network: Cidr,
        start: Ipv4,
        end: Ipv4,
    ) -> Result<Subnet>;

    /// Create the service subnet at its fixed id.
    async fn create_service_subnet(
        &self,
        network: Cidr,
        start: Ipv4,
        end: Ipv4,
        gateway: Ipv4,
        dns_server: Ipv4,
    ) -> Result<Subnet>;

    /// Look up the MAC's lease in the management subnet.
    async fn management_lease(&self, mac: MacAddr) -> Result<Lease>;

    /// Look up the MAC's lease in the service subnet.
    async fn service_lease(&self, mac: MacAddr) -> Result<Lease>;

    /// Allocate the next management address for a MAC and persist the
    /// lease atomically. [`StoreError::Conflict`] if the MAC already holds
    /// one, [`StoreError::PoolExhausted`] past the end of the range.
    async fn create_management_lease(&self, mac: MacAddr) -> Result<Lease>;

    /// Allocate the next service address for a MAC.
    async fn create_service_lease(&self, mac: MacAddr) -> Result<Lease>;

    /// A lease joined with its subnet's addressing details.
    async fn lease_address(&self, id: i64) -> Result<LeaseAddress>;

    /// Record a host seen during the iPXE handshake. Fails with
    /// [`StoreError::Conflict`] on a duplicate uuid, generated name, or
    /// lease linkage.
    async fn register_host(
        &self,
        uuid: Uuid,
        serial: &str,
        product: &str,
        manufacturer: &str,
        service_lease_id: i64,
        management_lease_id: i64,
    ) -> Result<Host>;

    /// The host whose management lease carries this address.
    async fn host_by_address(&self, ip: Ipv4) -> Result<Host>;

    async fn list_users(&self) -> Result<Vec<User>>;

    async fn list_keys_by_user(&self, user_id: i64) -> Result<Vec<SshKey>>;

    async fn create_user(&self, name: &str) -> Result<User>;

    async fn create_key(&self, user_id: i64, key: &str) -> Result<SshKey>;

    /// Release the underlying connections.
    async fn close(&self);
}
