//! HTTP daemon.
//!
//! Serves four things on TCP/80: the generated iPXE boot script (which is
//! also the moment a host gets registered), the static boot files, and the
//! cloud-init `meta-data`/`user-data` documents for nocloud-net. Host
//! identity for the `/init/` routes comes from the client's source address,
//! matched against the management lease.

pub mod cloudinit;
pub mod error;
pub mod script;
pub mod server;

pub use error::{HttpError, Result};
pub use server::{router, HttpServer};
