//! Supervisor: boots the DHCP, TFTP and HTTP daemons as concurrent peers
//! over one shared store.
//!
//! The first daemon to fail wins: its error triggers the shared shutdown
//! signal, the surviving daemons close their listeners, and [`run`]
//! returns that error. Ctrl-C takes the same path with a clean exit.

pub mod assets;
pub mod config;
pub mod net;

pub use config::{AddrRange, Config, ConfigError};

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{info, warn};

use ursa_dhcp::{DhcpConfig, DhcpServer};
use ursa_http::HttpServer;
use ursa_store::{SqliteStore, Store};
use ursa_tftp::TftpServer;

use crate::assets::DirectoryFileProvider;

/// Run the service until a fatal error or Ctrl-C.
pub async fn run(config: Config) -> Result<()> {
    config.validate()?;

    let (server_ip, iface_network) = net::interface_ipv4(&config.iface)
        .with_context(|| format!("failed to find address of interface {}", config.iface))?;
    config
        .dhcp_range
        .check_within(iface_network)
        .context("dhcp range does not fit the bound interface")?;

    let store = SqliteStore::open(&config.dsn, &config.hostname_prefix)
        .await
        .context("failed to open datastore")?;
    let store: Arc<dyn Store> = Arc::new(store);

    bootstrap_subnets(store.as_ref(), iface_network, &config).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let ctrl_c_tx = shutdown_tx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("ctrl-c received, shutting down");
            let _ = ctrl_c_tx.send(true);
        }
    });

    let mut daemons = JoinSet::new();

    let dhcp = DhcpServer::new(
        DhcpConfig::new(server_ip, config.iface.as_str()),
        store.clone(),
    );
    let rx = shutdown_rx.clone();
    daemons.spawn(async move {
        info!(addr = %format!("{server_ip}:67"), "starting dhcpd");
        dhcp.run(rx).await.context("dhcp daemon")
    });

    let tftp = TftpServer::new(
        server_ip,
        Arc::new(DirectoryFileProvider::new(config.static_dir.clone())),
    );
    let rx = shutdown_rx.clone();
    daemons.spawn(async move {
        info!(addr = %format!("{server_ip}:69"), "starting tftpd");
        tftp.run(rx).await.context("tftp daemon")
    });

    let http = HttpServer::new(server_ip, store.clone(), &config.static_dir);
    let rx = shutdown_rx;
    daemons.spawn(async move {
        info!(addr = %format!("{server_ip}:80"), "starting httpd");
        http.run(rx).await.context("http daemon")
    });

    // First error wins; the rest are asked to stop and drained.
    let mut first_error: Option<anyhow::Error> = None;
    while let Some(joined) = daemons.join_next().await {
        let result = joined.context("daemon task panicked")?;
        if let Err(e) = result {
            if first_error.is_none() {
                first_error = Some(e);
            }
            let _ = shutdown_tx.send(true);
        }
    }

    store.close().await;

    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Create both subnets if this is the first boot; an existing row is fine
/// and only worth a warning.
async fn bootstrap_subnets(
    store: &dyn Store,
    iface_network: ursa_types::Cidr,
    config: &Config,
) -> Result<()> {
    match store
        .create_management_subnet(iface_network, config.dhcp_range.start, config.dhcp_range.end)
        .await
    {
        Ok(subnet) => info!(network = %subnet.network, range = %config.dhcp_range, "created management subnet"),
        Err(e) if e.is_conflict() => warn!("management subnet already exists"),
        Err(e) => return Err(anyhow::Error::from(e).context("failed to create management subnet")),
    }

    match store
        .create_service_subnet(
            config.service_network,
            config.service_range.start,
            config.service_range.end,
            config.service_gateway,
            config.service_dns,
        )
        .await
    {
        Ok(subnet) => info!(network = %subnet.network, range = %config.service_range, "created service subnet"),
        Err(e) if e.is_conflict() => warn!("service subnet already exists"),
        Err(e) => return Err(anyhow::Error::from(e).context("failed to create service subnet")),
    }

    Ok(())
}
