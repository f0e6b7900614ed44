//! Error types for the TFTP daemon.

use std::net::SocketAddr;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TftpError {
    #[error("failed to bind to {addr}: {source}")]
    BindFailed {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid TFTP packet: {0}")]
    InvalidPacket(String),

    #[error("transfer timeout for {filename}")]
    Timeout { filename: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, TftpError>;
