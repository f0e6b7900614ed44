//! Error types for the DHCP daemon.

use std::net::SocketAddr;

use thiserror::Error;

use ursa_store::StoreError;

#[derive(Debug, Error)]
pub enum DhcpError {
    #[error("failed to bind to {addr}: {source}")]
    BindFailed {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse DHCP packet: {0}")]
    ParseError(String),

    #[error("failed to encode DHCP packet: {0}")]
    EncodeError(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, DhcpError>;
