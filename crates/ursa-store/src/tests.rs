//! Tests for the [`Store`] trait against the SQLite backend.

use std::sync::Arc;

use uuid::Uuid;

use ursa_types::{Ipv4, MacAddr};

use crate::{SqliteStore, Store, StoreError};

/// Open a store backed by a file in a tempdir. The tempdir is leaked so
/// the database outlives the helper.
async fn create_store() -> Arc<dyn Store> {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("test.db");
    std::mem::forget(tmp);
    let dsn = format!("sqlite:{}", path.display());
    Arc::new(SqliteStore::open(&dsn, "cn").await.unwrap())
}

async fn create_store_with_subnets() -> Arc<dyn Store> {
    let store = create_store().await;
    store
        .create_management_subnet(
            "192.0.2.0/24".parse().unwrap(),
            "192.0.2.100".parse().unwrap(),
            "192.0.2.200".parse().unwrap(),
        )
        .await
        .unwrap();
    store
        .create_service_subnet(
            "198.51.100.0/24".parse().unwrap(),
            "198.51.100.100".parse().unwrap(),
            "198.51.100.200".parse().unwrap(),
            "198.51.100.1".parse().unwrap(),
            "8.8.8.8".parse().unwrap(),
        )
        .await
        .unwrap();
    store
}

fn mac(n: u8) -> MacAddr {
    MacAddr::new([0xaa, 0xbb, 0xcc, 0xdd, 0xee, n])
}

#[tokio::test]
async fn subnet_roundtrip() {
    let store = create_store_with_subnets().await;

    let mgmt = store.management_subnet().await.unwrap();
    assert_eq!(mgmt.id, 0);
    assert_eq!(mgmt.network.to_string(), "192.0.2.0/24");
    assert_eq!(mgmt.start.to_string(), "192.0.2.100");
    assert_eq!(mgmt.end.to_string(), "192.0.2.200");
    assert!(mgmt.gateway.is_none());
    assert!(mgmt.dns_server.is_none());

    let svc = store.service_subnet().await.unwrap();
    assert_eq!(svc.id, 1);
    assert_eq!(svc.gateway.unwrap().to_string(), "198.51.100.1");
    assert_eq!(svc.dns_server.unwrap().to_string(), "8.8.8.8");
}

#[tokio::test]
async fn subnet_missing_is_not_found() {
    let store = create_store().await;
    let err = store.management_subnet().await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn subnet_recreate_is_conflict() {
    let store = create_store_with_subnets().await;
    let err = store
        .create_management_subnet(
            "192.0.2.0/24".parse().unwrap(),
            "192.0.2.100".parse().unwrap(),
            "192.0.2.200".parse().unwrap(),
        )
        .await
        .unwrap_err();
    assert!(err.is_conflict());
}

#[tokio::test]
async fn lease_allocation_is_sequential() {
    let store = create_store_with_subnets().await;

    let first = store.create_management_lease(mac(1)).await.unwrap();
    assert_eq!(first.ip_address.to_string(), "192.0.2.100");
    assert_eq!(first.subnet_id, 0);

    let second = store.create_management_lease(mac(2)).await.unwrap();
    assert_eq!(second.ip_address.to_string(), "192.0.2.101");

    // The service pool allocates independently.
    let svc = store.create_service_lease(mac(1)).await.unwrap();
    assert_eq!(svc.ip_address.to_string(), "198.51.100.100");
    assert_eq!(svc.subnet_id, 1);
}

#[tokio::test]
async fn lease_lookup_is_scoped_to_subnet() {
    let store = create_store_with_subnets().await;
    store.create_management_lease(mac(1)).await.unwrap();

    let found = store.management_lease(mac(1)).await.unwrap();
    assert_eq!(found.ip_address.to_string(), "192.0.2.100");

    let err = store.service_lease(mac(1)).await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn duplicate_mac_in_subnet_is_conflict() {
    let store = create_store_with_subnets().await;
    store.create_management_lease(mac(1)).await.unwrap();
    let err = store.create_management_lease(mac(1)).await.unwrap_err();
    assert!(err.is_conflict());
}

#[tokio::test]
async fn allocation_carries_across_octet_boundary() {
    let store = create_store().await;
    store
        .create_management_subnet(
            "10.0.0.0/16".parse().unwrap(),
            "10.0.0.254".parse().unwrap(),
            "10.0.1.5".parse().unwrap(),
        )
        .await
        .unwrap();

    let a = store.create_management_lease(mac(1)).await.unwrap();
    assert_eq!(a.ip_address.to_string(), "10.0.0.254");
    let b = store.create_management_lease(mac(2)).await.unwrap();
    assert_eq!(b.ip_address.to_string(), "10.0.0.255");
    // Text ordering would pick 10.0.0.255 > 10.0.1.0 and stall; numeric
    // ordering must continue into the next octet.
    let c = store.create_management_lease(mac(3)).await.unwrap();
    assert_eq!(c.ip_address.to_string(), "10.0.1.0");
    let d = store.create_management_lease(mac(4)).await.unwrap();
    assert_eq!(d.ip_address.to_string(), "10.0.1.1");
}

#[tokio::test]
async fn exhausted_pool_is_an_explicit_error() {
    let store = create_store().await;
    store
        .create_management_subnet(
            "192.0.2.0/24".parse().unwrap(),
            "192.0.2.100".parse().unwrap(),
            "192.0.2.101".parse().unwrap(),
        )
        .await
        .unwrap();

    store.create_management_lease(mac(1)).await.unwrap();
    store.create_management_lease(mac(2)).await.unwrap();
    let err = store.create_management_lease(mac(3)).await.unwrap_err();
    assert!(matches!(err, StoreError::PoolExhausted { subnet_id: 0 }));
}

#[tokio::test]
async fn lease_address_joins_subnet() {
    let store = create_store_with_subnets().await;
    let lease = store.create_service_lease(mac(1)).await.unwrap();

    let addr = store.lease_address(lease.id).await.unwrap();
    assert_eq!(addr.ip_address.to_string(), "198.51.100.100");
    assert_eq!(addr.network.to_string(), "198.51.100.0/24");
    assert_eq!(addr.gateway.unwrap().to_string(), "198.51.100.1");
    assert_eq!(addr.dns_server.unwrap().to_string(), "8.8.8.8");

    let err = store.lease_address(9999).await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn register_host_names_from_row_id() {
    let store = create_store_with_subnets().await;

    let mgmt1 = store.create_management_lease(mac(1)).await.unwrap();
    let svc1 = store.create_service_lease(mac(1)).await.unwrap();
    let host = store
        .register_host(Uuid::new_v4(), "S1", "P1", "M1", svc1.id, mgmt1.id)
        .await
        .unwrap();
    assert_eq!(host.name, "cn0001");
    assert_eq!(host.serial, "S1");

    let mgmt2 = store.create_management_lease(mac(2)).await.unwrap();
    let svc2 = store.create_service_lease(mac(2)).await.unwrap();
    let host2 = store
        .register_host(Uuid::new_v4(), "S2", "P2", "M2", svc2.id, mgmt2.id)
        .await
        .unwrap();
    assert_eq!(host2.name, "cn0002");
}

#[tokio::test]
async fn register_host_duplicate_uuid_is_conflict() {
    let store = create_store_with_subnets().await;
    let uuid = Uuid::new_v4();

    let mgmt1 = store.create_management_lease(mac(1)).await.unwrap();
    let svc1 = store.create_service_lease(mac(1)).await.unwrap();
    store
        .register_host(uuid, "", "", "", svc1.id, mgmt1.id)
        .await
        .unwrap();

    let mgmt2 = store.create_management_lease(mac(2)).await.unwrap();
    let svc2 = store.create_service_lease(mac(2)).await.unwrap();
    let err = store
        .register_host(uuid, "", "", "", svc2.id, mgmt2.id)
        .await
        .unwrap_err();
    assert!(err.is_conflict());
}

#[tokio::test]
async fn register_host_duplicate_lease_link_is_conflict() {
    let store = create_store_with_subnets().await;

    let mgmt = store.create_management_lease(mac(1)).await.unwrap();
    let svc = store.create_service_lease(mac(1)).await.unwrap();
    store
        .register_host(Uuid::new_v4(), "", "", "", svc.id, mgmt.id)
        .await
        .unwrap();

    let err = store
        .register_host(Uuid::new_v4(), "", "", "", svc.id, mgmt.id)
        .await
        .unwrap_err();
    assert!(err.is_conflict());
}

#[tokio::test]
async fn host_by_address_matches_management_lease() {
    let store = create_store_with_subnets().await;

    let mgmt = store.create_management_lease(mac(1)).await.unwrap();
    let svc = store.create_service_lease(mac(1)).await.unwrap();
    let host = store
        .register_host(Uuid::new_v4(), "", "", "", svc.id, mgmt.id)
        .await
        .unwrap();

    let found = store
        .host_by_address("192.0.2.100".parse::<Ipv4>().unwrap())
        .await
        .unwrap();
    assert_eq!(found, host);

    // The service address does not resolve; metadata lookups key on the
    // management lease only.
    let err = store
        .host_by_address("198.51.100.100".parse::<Ipv4>().unwrap())
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn users_and_keys_enumerate_in_insert_order() {
    let store = create_store().await;

    let alice = store.create_user("alice").await.unwrap();
    let bob = store.create_user("bob").await.unwrap();
    store.create_key(alice.id, "ssh-ed25519 AAAA1").await.unwrap();
    store.create_key(alice.id, "ssh-ed25519 AAAA2").await.unwrap();

    let users = store.list_users().await.unwrap();
    assert_eq!(users.len(), 2);
    assert_eq!(users[0].name, "alice");
    assert_eq!(users[1].name, "bob");

    let keys = store.list_keys_by_user(alice.id).await.unwrap();
    assert_eq!(keys.len(), 2);
    assert_eq!(keys[0].key, "ssh-ed25519 AAAA1");

    assert!(store.list_keys_by_user(bob.id).await.unwrap().is_empty());

    let err = store.create_user("alice").await.unwrap_err();
    assert!(err.is_conflict());
}
