//! DHCP packet parsing and response construction.

use std::net::Ipv4Addr;

use dhcproto::v4::{DhcpOption, Message, MessageType, Opcode, OptionCode, UnknownOption};
use dhcproto::{Decodable, Encodable};

use ursa_types::MacAddr;

use crate::error::{DhcpError, Result};

/// Classless static route (RFC 3442). dhcproto carries it as a raw option.
const OPT_CLASSLESS_STATIC_ROUTE: u8 = 121;

/// A parsed inbound request with the fields the daemon branches on.
#[derive(Debug, Clone)]
pub struct DhcpRequest {
    /// Original message.
    pub message: Message,

    /// DISCOVER, REQUEST, etc.
    pub message_type: MessageType,

    /// Client MAC from `chaddr`.
    pub mac: MacAddr,

    /// Option-77 user class is exactly the ASCII literal `iPXE`, meaning
    /// the client is the chain-loaded second stage.
    pub is_ipxe: bool,

    /// Transaction id.
    pub xid: u32,

    /// `ciaddr`, set when the client already has an address.
    pub client_ip: Ipv4Addr,

    /// `giaddr`, set on relayed requests.
    pub relay_ip: Ipv4Addr,
}

impl DhcpRequest {
    pub fn parse(data: &[u8]) -> Result<Self> {
        let message =
            Message::from_bytes(data).map_err(|e| DhcpError::ParseError(e.to_string()))?;

        let message_type = message
            .opts()
            .get(OptionCode::MessageType)
            .and_then(|opt| {
                if let DhcpOption::MessageType(mt) = opt {
                    Some(mt.clone())
                } else {
                    None
                }
            })
            .ok_or_else(|| DhcpError::ParseError("missing message type".to_string()))?;

        let mac = MacAddr::from_bytes(message.chaddr())
            .map_err(|e| DhcpError::ParseError(e.to_string()))?;

        let is_ipxe = message
            .opts()
            .get(OptionCode::UserClass)
            .map(|opt| {
                if let DhcpOption::UserClass(class) = opt {
                    class.as_slice() == b"iPXE"
                } else {
                    false
                }
            })
            .unwrap_or(false);

        Ok(Self {
            xid: message.xid(),
            client_ip: message.ciaddr(),
            relay_ip: message.giaddr(),
            message,
            message_type,
            mac,
            is_ipxe,
        })
    }
}

/// Builds the reply for one request. Transaction id, hardware address,
/// flags and relay address are carried over from the request.
pub struct DhcpResponseBuilder {
    request: DhcpRequest,
    message_type: MessageType,
    server_ip: Ipv4Addr,
    your_ip: Option<Ipv4Addr>,
    subnet_mask: Option<Ipv4Addr>,
    gateway: Option<Ipv4Addr>,
    dns_server: Option<Ipv4Addr>,
    lease_time: Option<u32>,
    boot_file: Option<String>,
}

impl DhcpResponseBuilder {
    pub fn new(request: DhcpRequest, message_type: MessageType, server_ip: Ipv4Addr) -> Self {
        Self {
            request,
            message_type,
            server_ip,
            your_ip: None,
            subnet_mask: None,
            gateway: None,
            dns_server: None,
            lease_time: None,
            boot_file: None,
        }
    }

    /// Set `yiaddr`, the address being offered.
    pub fn with_your_ip(mut self, ip: Ipv4Addr) -> Self {
        self.your_ip = Some(ip);
        self
    }

    pub fn with_subnet_mask(mut self, mask: Ipv4Addr) -> Self {
        self.subnet_mask = Some(mask);
        self
    }

    /// Advertise the gateway as router (option 3) and as the default route
    /// in the classless-static-route option (121).
    pub fn with_gateway(mut self, gateway: Ipv4Addr) -> Self {
        self.gateway = Some(gateway);
        self
    }

    pub fn with_dns_server(mut self, dns: Ipv4Addr) -> Self {
        self.dns_server = Some(dns);
        self
    }

    pub fn with_lease_time(mut self, seconds: u32) -> Self {
        self.lease_time = Some(seconds);
        self
    }

    pub fn with_boot_file(mut self, boot_file: impl Into<String>) -> Self {
        self.boot_file = Some(boot_file.into());
        self
    }

    pub fn build(self) -> Message {
        let mut response = Message::default();

        response.set_opcode(Opcode::BootReply);
        response.set_xid(self.request.xid);
        response.set_flags(self.request.message.flags());
        response.set_chaddr(self.request.message.chaddr());
        response.set_giaddr(self.request.relay_ip);
        response.set_siaddr(self.server_ip);
        response.set_sname_str(self.server_ip.to_string());

        if let Some(ip) = self.your_ip {
            response.set_yiaddr(ip);
        }

        response
            .opts_mut()
            .insert(DhcpOption::MessageType(self.message_type));
        response
            .opts_mut()
            .insert(DhcpOption::ServerIdentifier(self.server_ip));
        response
            .opts_mut()
            .insert(DhcpOption::TFTPServerName(
                self.server_ip.to_string().into_bytes(),
            ));

        if let Some(mask) = self.subnet_mask {
            response.opts_mut().insert(DhcpOption::SubnetMask(mask));
        }

        if let Some(seconds) = self.lease_time {
            response
                .opts_mut()
                .insert(DhcpOption::AddressLeaseTime(seconds));
        }

        if let Some(dns) = self.dns_server {
            response
                .opts_mut()
                .insert(DhcpOption::DomainNameServer(vec![dns]));
        }

        if let Some(gateway) = self.gateway {
            response
                .opts_mut()
                .insert(DhcpOption::Router(vec![gateway]));

            // Default route via the gateway: zero-length destination prefix
            // followed by the gateway octets.
            let gw = gateway.octets();
            response.opts_mut().insert(DhcpOption::Unknown(
                UnknownOption::new(
                    OptionCode::Unknown(OPT_CLASSLESS_STATIC_ROUTE),
                    vec![0x00, gw[0], gw[1], gw[2], gw[3]],
                ),
            ));
        }

        if let Some(boot_file) = self.boot_file {
            response.set_fname_str(&boot_file);
            response
                .opts_mut()
                .insert(DhcpOption::BootfileName(boot_file.into_bytes()));
        }

        response
    }

    pub fn build_bytes(self) -> Result<Vec<u8>> {
        self.build()
            .to_vec()
            .map_err(|e| DhcpError::EncodeError(e.to_string()))
    }
}
