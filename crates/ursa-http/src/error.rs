//! Error types for the HTTP daemon.

use std::net::SocketAddr;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("failed to bind to {addr}: {source}")]
    BindFailed {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, HttpError>;
