//! DHCP server loop.
//!
//! One task, one socket, bound to the configured interface. Every client
//! MAC is backed by a durable lease in the management subnet; the lease is
//! created on first sight and reused forever after.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;

use dhcproto::v4::{Message, MessageType};
use dhcproto::Encodable;
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tracing::{debug, error, info};

use ursa_store::Store;
use ursa_types::{Lease, Subnet};

use crate::error::{DhcpError, Result};
use crate::packet::{DhcpRequest, DhcpResponseBuilder};

/// Leases never expire.
pub const INFINITE_LEASE_SECS: u32 = 0xFFFF_FFFF;

/// DHCP daemon configuration.
#[derive(Debug, Clone)]
pub struct DhcpConfig {
    /// Address written into `siaddr`, server identifier, and boot URLs.
    pub server_ip: Ipv4Addr,

    /// Interface the socket is bound to; requests arriving on any other
    /// interface never reach the loop.
    pub interface: String,
}

impl DhcpConfig {
    pub fn new(server_ip: Ipv4Addr, interface: impl Into<String>) -> Self {
        Self {
            server_ip,
            interface: interface.into(),
        }
    }
}

/// DHCP server for the management subnet.
pub struct DhcpServer {
    config: DhcpConfig,
    store: Arc<dyn Store>,
}

impl DhcpServer {
    pub fn new(config: DhcpConfig, store: Arc<dyn Store>) -> Self {
        Self { config, store }
    }

    /// Serve until the shutdown signal flips. Returns an error only when
    /// the socket cannot be created; per-packet failures are logged and
    /// skipped.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let socket = self.create_socket()?;
        info!(iface = %self.config.interface, server_ip = %self.config.server_ip, "dhcp server started");

        let mut buf = [0u8; 1500];
        loop {
            tokio::select! {
                result = socket.recv_from(&mut buf) => {
                    match result {
                        Ok((len, src)) => {
                            if let Err(e) = self.handle_packet(&socket, &buf[..len]).await {
                                error!(error = %e, src = %src, "error handling dhcp packet");
                            }
                        }
                        Err(e) => {
                            error!(error = %e, "error receiving dhcp packet");
                        }
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("dhcp server shutting down");
                        break;
                    }
                }
            }
        }

        Ok(())
    }

    /// Broadcast-capable socket on 0.0.0.0:67, tied to the configured
    /// interface so the kernel drops traffic from every other one.
    fn create_socket(&self) -> Result<UdpSocket> {
        let bind_addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 67);
        let map_err = |source: std::io::Error| DhcpError::BindFailed {
            addr: bind_addr.into(),
            source,
        };

        let socket = socket2::Socket::new(
            socket2::Domain::IPV4,
            socket2::Type::DGRAM,
            Some(socket2::Protocol::UDP),
        )
        .map_err(map_err)?;

        socket.set_reuse_address(true).map_err(map_err)?;
        socket.set_broadcast(true).map_err(map_err)?;
        #[cfg(target_os = "linux")]
        socket
            .bind_device(Some(self.config.interface.as_bytes()))
            .map_err(map_err)?;
        socket.bind(&bind_addr.into()).map_err(map_err)?;
        socket.set_nonblocking(true).map_err(map_err)?;

        let std_socket: std::net::UdpSocket = socket.into();
        UdpSocket::from_std(std_socket).map_err(map_err)
    }

    async fn handle_packet(&self, socket: &UdpSocket, data: &[u8]) -> Result<()> {
        let request = match DhcpRequest::parse(data) {
            Ok(req) => req,
            Err(e) => {
                debug!(error = %e, "ignoring unparseable packet");
                return Ok(());
            }
        };

        debug!(
            mac = %request.mac,
            msg_type = ?request.message_type,
            is_ipxe = request.is_ipxe,
            "received dhcp request"
        );

        let subnet = self.store.management_subnet().await?;
        let lease = self.lease_for(&request).await?;

        let response = match make_response(self.config.server_ip, &request, &subnet, &lease) {
            Some(resp) => resp,
            None => return Ok(()),
        };
        let bytes = response
            .to_vec()
            .map_err(|e| DhcpError::EncodeError(e.to_string()))?;

        let dest = reply_destination(&request);
        socket.send_to(&bytes, dest).await?;

        info!(
            mac = %request.mac,
            your_ip = %lease.ip_address,
            dest = %dest,
            "sent dhcp response"
        );
        Ok(())
    }

    /// The management lease for the request's MAC, allocated on first
    /// sight.
    async fn lease_for(&self, request: &DhcpRequest) -> Result<Lease> {
        match self.store.management_lease(request.mac).await {
            Ok(lease) => Ok(lease),
            Err(e) if e.is_not_found() => {
                let lease = self.store.create_management_lease(request.mac).await?;
                info!(mac = %request.mac, ip = %lease.ip_address, "allocated management lease");
                Ok(lease)
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Assemble the reply for one request, or `None` for message types the
/// daemon does not answer.
pub(crate) fn make_response(
    server_ip: Ipv4Addr,
    request: &DhcpRequest,
    subnet: &Subnet,
    lease: &Lease,
) -> Option<Message> {
    let response_type = match request.message_type {
        MessageType::Discover => MessageType::Offer,
        MessageType::Request => MessageType::Ack,
        _ => return None,
    };

    let mut builder = DhcpResponseBuilder::new(request.clone(), response_type, server_ip)
        .with_your_ip(lease.ip_address.addr())
        .with_subnet_mask(subnet.network.netmask().addr())
        .with_lease_time(INFINITE_LEASE_SECS);

    if let Some(dns) = subnet.dns_server {
        builder = builder.with_dns_server(dns.addr());
    }
    if let Some(gateway) = subnet.gateway {
        builder = builder.with_gateway(gateway.addr());
    }

    // Second-stage iPXE fetches its script over HTTP; the ${...} fields
    // are substituted by iPXE itself at boot time.
    let boot_file = if request.is_ipxe {
        format!("http://{server_ip}/ipxe?uuid=${{uuid}}&mac=${{mac:hexhyp}}")
    } else {
        "ipxe.efi".to_string()
    };

    Some(builder.with_boot_file(boot_file).build())
}

/// RFC 2131 reply addressing: relay agent on 67 when `giaddr` is set,
/// unicast to `ciaddr`:68 when the client has an address, broadcast
/// otherwise.
fn reply_destination(request: &DhcpRequest) -> SocketAddr {
    if request.relay_ip != Ipv4Addr::UNSPECIFIED {
        SocketAddr::new(request.relay_ip.into(), 67)
    } else if request.client_ip != Ipv4Addr::UNSPECIFIED {
        SocketAddr::new(request.client_ip.into(), 68)
    } else {
        SocketAddr::new(Ipv4Addr::BROADCAST.into(), 68)
    }
}

impl std::fmt::Debug for DhcpServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DhcpServer")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dhcproto::v4::{DhcpOption, Opcode, OptionCode};

    fn request(message_type: MessageType, ipxe: bool) -> DhcpRequest {
        let mut msg = Message::default();
        msg.set_opcode(Opcode::BootRequest);
        msg.set_xid(0xAABBCCDD);
        let mut chaddr = [0u8; 16];
        chaddr[..6].copy_from_slice(&[0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0x01]);
        msg.set_chaddr(&chaddr);
        msg.opts_mut().insert(DhcpOption::MessageType(message_type));
        if ipxe {
            msg.opts_mut().insert(DhcpOption::UserClass(b"iPXE".to_vec()));
        }
        DhcpRequest::parse(&msg.to_vec().unwrap()).unwrap()
    }

    fn subnet() -> Subnet {
        Subnet {
            id: 0,
            network: "192.0.2.0/24".parse().unwrap(),
            start: "192.0.2.100".parse().unwrap(),
            end: "192.0.2.200".parse().unwrap(),
            gateway: None,
            dns_server: None,
        }
    }

    fn lease() -> Lease {
        Lease {
            id: 1,
            mac_address: "aa:bb:cc:dd:ee:01".parse().unwrap(),
            ip_address: "192.0.2.100".parse().unwrap(),
            subnet_id: 0,
        }
    }

    #[test]
    fn discover_yields_offer_with_lease_address() {
        let server = Ipv4Addr::new(192, 0, 2, 1);
        let response =
            make_response(server, &request(MessageType::Discover, false), &subnet(), &lease())
                .unwrap();

        assert_eq!(
            response.opts().get(OptionCode::MessageType),
            Some(&DhcpOption::MessageType(MessageType::Offer))
        );
        assert_eq!(response.yiaddr(), Ipv4Addr::new(192, 0, 2, 100));
        assert_eq!(
            response.opts().get(OptionCode::SubnetMask),
            Some(&DhcpOption::SubnetMask(Ipv4Addr::new(255, 255, 255, 0)))
        );
        assert_eq!(
            response.opts().get(OptionCode::BootfileName),
            Some(&DhcpOption::BootfileName(b"ipxe.efi".to_vec()))
        );
        assert_eq!(
            response.opts().get(OptionCode::ServerIdentifier),
            Some(&DhcpOption::ServerIdentifier(server))
        );
        assert_eq!(
            response.opts().get(OptionCode::AddressLeaseTime),
            Some(&DhcpOption::AddressLeaseTime(INFINITE_LEASE_SECS))
        );
    }

    #[test]
    fn request_yields_ack() {
        let response = make_response(
            Ipv4Addr::new(192, 0, 2, 1),
            &request(MessageType::Request, false),
            &subnet(),
            &lease(),
        )
        .unwrap();
        assert_eq!(
            response.opts().get(OptionCode::MessageType),
            Some(&DhcpOption::MessageType(MessageType::Ack))
        );
    }

    #[test]
    fn other_message_types_are_dropped() {
        let response = make_response(
            Ipv4Addr::new(192, 0, 2, 1),
            &request(MessageType::Release, false),
            &subnet(),
            &lease(),
        );
        assert!(response.is_none());
    }

    #[test]
    fn ipxe_client_gets_script_url_with_literal_placeholders() {
        let response = make_response(
            Ipv4Addr::new(192, 0, 2, 1),
            &request(MessageType::Discover, true),
            &subnet(),
            &lease(),
        )
        .unwrap();

        let expected = b"http://192.0.2.1/ipxe?uuid=${uuid}&mac=${mac:hexhyp}".to_vec();
        assert_eq!(
            response.opts().get(OptionCode::BootfileName),
            Some(&DhcpOption::BootfileName(expected))
        );
    }

    #[test]
    fn gateway_and_dns_flow_into_options() {
        let mut subnet = subnet();
        subnet.gateway = Some("192.0.2.1".parse().unwrap());
        subnet.dns_server = Some("8.8.8.8".parse().unwrap());

        let response = make_response(
            Ipv4Addr::new(192, 0, 2, 1),
            &request(MessageType::Discover, false),
            &subnet,
            &lease(),
        )
        .unwrap();

        assert_eq!(
            response.opts().get(OptionCode::Router),
            Some(&DhcpOption::Router(vec![Ipv4Addr::new(192, 0, 2, 1)]))
        );
        assert_eq!(
            response.opts().get(OptionCode::DomainNameServer),
            Some(&DhcpOption::DomainNameServer(vec![Ipv4Addr::new(8, 8, 8, 8)]))
        );
        assert!(response.opts().get(OptionCode::Unknown(121)).is_some());
    }

    #[test]
    fn reply_addressing() {
        let req = request(MessageType::Discover, false);
        assert_eq!(
            reply_destination(&req),
            SocketAddr::new(Ipv4Addr::BROADCAST.into(), 68)
        );
    }
}
