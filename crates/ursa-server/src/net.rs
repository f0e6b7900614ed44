//! Interface address discovery.

use std::net::Ipv4Addr;

use anyhow::{bail, Context, Result};
use network_interface::{NetworkInterface, NetworkInterfaceConfig};

use ursa_types::{Cidr, Netmask};

/// The first IPv4 address (with its network) configured on `name`.
pub fn interface_ipv4(name: &str) -> Result<(Ipv4Addr, Cidr)> {
    let interfaces =
        NetworkInterface::show().context("failed to enumerate network interfaces")?;

    for iface in interfaces.iter().filter(|iface| iface.name == name) {
        for addr in &iface.addr {
            if let network_interface::Addr::V4(v4) = addr {
                let Some(netmask) = v4.netmask else {
                    continue;
                };
                let network = Cidr::with_netmask(v4.ip, Netmask::new(netmask))
                    .with_context(|| format!("bad netmask {netmask} on {name}"))?;
                return Ok((v4.ip, network));
            }
        }
    }

    bail!("no usable IPv4 address on interface {name}")
}
