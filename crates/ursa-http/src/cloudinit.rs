//! cloud-init document rendering.
//!
//! `meta-data` is a single hostname line; `user-data` is a `#cloud-config`
//! YAML document carrying the account list and the post-boot command chain
//! that hands the service address over to the bonder.

use serde::Serialize;

use ursa_types::{Host, Ipv4, LeaseAddress, SshKey, User};

/// Kernel driver the bonder enslaves.
const BOND_DRIVER: &str = "e1000e";

/// VLAN id of the bonded service interface.
const BOND_VLAN: u16 = 1000;

#[derive(Debug, Serialize)]
struct CloudConfig {
    manage_etc_hosts: bool,
    fqdn: String,
    hostname: String,
    users: Vec<CloudUser>,
    runcmd: Vec<String>,
}

#[derive(Debug, Serialize)]
struct CloudUser {
    name: String,
    sudo: String,
    groups: String,
    ssh_authorized_keys: Vec<String>,
}

/// The `meta-data` document.
pub fn meta_data(host: &Host) -> String {
    format!("hostname: {}\n", host.name)
}

/// The `user-data` document for a host whose service lease is `lease`.
/// `gateway` and `dns` come from the service subnet; `http_host` is the
/// request's `Host` header, so the bonder download URL matches whatever
/// address the client already reached us on.
pub fn user_data(
    host: &Host,
    lease: &LeaseAddress,
    gateway: Ipv4,
    dns: Ipv4,
    users: &[(User, Vec<SshKey>)],
    http_host: &str,
) -> Result<String, serde_yaml::Error> {
    let bonder = format!(
        "/tmp/ursa-bonder -driver {BOND_DRIVER} -vlan {BOND_VLAN} -addr {addr} -mask {mask} -gw {gateway} -dns {dns}",
        addr = lease.ip_address,
        mask = lease.network.netmask(),
    );

    let config = CloudConfig {
        manage_etc_hosts: true,
        fqdn: host.name.clone(),
        hostname: host.name.clone(),
        users: users
            .iter()
            .filter(|(_, keys)| !keys.is_empty())
            .map(|(user, keys)| CloudUser {
                name: user.name.clone(),
                sudo: "ALL=(ALL) NOPASSWD:ALL".to_string(),
                groups: "users, admin".to_string(),
                ssh_authorized_keys: keys.iter().map(|k| k.key.clone()).collect(),
            })
            .collect(),
        runcmd: vec![
            "echo \"dash dash/sh boolean false\" | debconf-set-selections".to_string(),
            "DEBIAN_FRONTEND=noninteractive dpkg-reconfigure dash".to_string(),
            "echo \"configure system description '$(dmidecode -s system-serial-number)'\" >> /etc/lldpd.conf".to_string(),
            "systemctl restart lldpd".to_string(),
            format!("wget http://{http_host}/static/ursa-bonder -O /tmp/ursa-bonder"),
            "chmod +x /tmp/ursa-bonder".to_string(),
            "pkill dhclient".to_string(),
            bonder,
        ],
    };

    Ok(format!("#cloud-config\n{}", serde_yaml::to_string(&config)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_host() -> Host {
        Host {
            id: 1,
            uuid: uuid::Uuid::new_v4(),
            name: "cn0001".to_string(),
            serial: "S1".to_string(),
            product: "P1".to_string(),
            manufacturer: "M1".to_string(),
            service_lease_id: 2,
            management_lease_id: 1,
        }
    }

    fn test_lease() -> LeaseAddress {
        LeaseAddress {
            id: 2,
            ip_address: "198.51.100.100".parse().unwrap(),
            network: "198.51.100.0/24".parse().unwrap(),
            gateway: Some("198.51.100.1".parse().unwrap()),
            dns_server: Some("8.8.8.8".parse().unwrap()),
        }
    }

    #[test]
    fn meta_data_is_one_hostname_line() {
        assert_eq!(meta_data(&test_host()), "hostname: cn0001\n");
    }

    #[test]
    fn user_data_document() {
        let users = vec![
            (
                User {
                    id: 1,
                    name: "alice".to_string(),
                },
                vec![SshKey {
                    id: 1,
                    key: "ssh-ed25519 AAAA1".to_string(),
                    user_id: 1,
                }],
            ),
            // no keys: skipped entirely
            (
                User {
                    id: 2,
                    name: "bob".to_string(),
                },
                vec![],
            ),
        ];

        let lease = test_lease();
        let body = user_data(
            &test_host(),
            &lease,
            lease.gateway.unwrap(),
            lease.dns_server.unwrap(),
            &users,
            "192.0.2.1",
        )
        .unwrap();

        assert!(body.starts_with("#cloud-config\n"));
        assert!(body.contains("manage_etc_hosts: true"));
        assert!(body.contains("fqdn: cn0001"));
        assert!(body.contains("hostname: cn0001"));
        assert!(body.contains("name: alice"));
        assert!(body.contains("ssh-ed25519 AAAA1"));
        assert!(!body.contains("bob"));
        assert!(body.contains("wget http://192.0.2.1/static/ursa-bonder -O /tmp/ursa-bonder"));
        assert!(body.contains(
            "/tmp/ursa-bonder -driver e1000e -vlan 1000 -addr 198.51.100.100 \
             -mask 255.255.255.0 -gw 198.51.100.1 -dns 8.8.8.8"
        ));
        assert!(body.contains("pkill dhclient"));
    }
}
