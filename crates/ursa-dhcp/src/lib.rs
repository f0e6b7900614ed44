//! DHCPv4 daemon for PXE boot.
//!
//! Listens on UDP/67 bound to a named interface and serves the management
//! subnet only: every client MAC gets a durable lease (allocated on first
//! sight), an infinite lease time, and boot options pointing back at this
//! server. iPXE clients (user-class `iPXE`) are handed the HTTP boot-script
//! URL instead of the firmware filename, which is how the first-stage and
//! second-stage boots are told apart.
//!
//! The loop never exits on a per-packet error; only socket setup is fatal.

pub mod error;
pub mod packet;
pub mod server;

pub use error::{DhcpError, Result};
pub use packet::{DhcpRequest, DhcpResponseBuilder};
pub use server::{DhcpConfig, DhcpServer, INFINITE_LEASE_SECS};
