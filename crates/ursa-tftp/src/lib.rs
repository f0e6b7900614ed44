//! Read-only TFTP daemon (RFC 1350 with RFC 2347/2348/2349 option
//! negotiation).
//!
//! Serves the PXE firmware (`ipxe.efi`) out of a virtual filesystem behind
//! the [`FileProvider`] trait. Writes are refused; a missing file fails the
//! transfer with a protocol-level ERROR. Each transfer runs on its own task
//! and ephemeral socket, so concurrent clients never interleave.

pub mod error;
pub mod packet;
pub mod server;

pub use error::{Result, TftpError};
pub use packet::{ErrorCode, TftpOptions, TftpPacket, TransferMode};
pub use server::{FileProvider, MemoryFileProvider, TftpServer};
