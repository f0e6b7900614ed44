//! Router, handlers, and the host-registration path.

use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::extract::{ConnectInfo, Host, Query, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::services::ServeDir;
use tracing::{error, info};
use uuid::Uuid;

use ursa_store::{Store, StoreError};
use ursa_types::{Ipv4, MacAddr};

use crate::cloudinit;
use crate::error::{HttpError, Result};
use crate::script;

#[derive(Clone)]
struct AppState {
    store: Arc<dyn Store>,
}

/// Build the application router over a shared store and static-file root.
pub fn router(store: Arc<dyn Store>, static_dir: impl Into<PathBuf>) -> Router {
    let state = AppState { store };

    Router::new()
        .route("/ipxe", get(ipxe_handler))
        .route("/init/meta-data", get(meta_data_handler))
        .route("/init/user-data", get(user_data_handler))
        .nest_service("/static", ServeDir::new(static_dir.into()))
        .layer(middleware::from_fn(log_requests))
        .with_state(state)
}

/// HTTP daemon on TCP/80.
pub struct HttpServer {
    bind_ip: Ipv4Addr,
    store: Arc<dyn Store>,
    static_dir: PathBuf,
}

impl HttpServer {
    pub fn new(bind_ip: Ipv4Addr, store: Arc<dyn Store>, static_dir: impl AsRef<Path>) -> Self {
        Self {
            bind_ip,
            store,
            static_dir: static_dir.as_ref().to_path_buf(),
        }
    }

    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let bind_addr = SocketAddrV4::new(self.bind_ip, 80);
        let listener = TcpListener::bind(bind_addr)
            .await
            .map_err(|source| HttpError::BindFailed {
                addr: bind_addr.into(),
                source,
            })?;

        info!(addr = %bind_addr, "http server started");

        let app = router(self.store.clone(), &self.static_dir);
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            while shutdown.changed().await.is_ok() {
                if *shutdown.borrow() {
                    break;
                }
            }
            info!("http server shutting down");
        })
        .await?;

        Ok(())
    }
}

/// Log the request, run the handler, log the response status.
async fn log_requests(
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    request: Request,
    next: Next,
) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    info!(method = %method, uri = %uri, remote = %remote, "http request");

    let response = next.run(request).await;

    info!(uri = %uri, status = response.status().as_u16(), "http response");
    response
}

#[derive(Debug, Deserialize)]
struct IpxeQuery {
    uuid: String,
    mac: String,
    #[serde(default)]
    serial: String,
    #[serde(default)]
    product: String,
    #[serde(default)]
    manufacturer: String,
}

/// `GET /ipxe`: the second-stage boot fetch. Registers the host (first
/// time only) and hands back the boot script.
async fn ipxe_handler(
    State(state): State<AppState>,
    Host(host_header): Host,
    Query(query): Query<IpxeQuery>,
) -> Response {
    let uuid = match Uuid::parse_str(&query.uuid) {
        Ok(uuid) => uuid,
        Err(e) => {
            error!(error = %e, uuid = %query.uuid, "failed to parse uuid");
            return StatusCode::BAD_REQUEST.into_response();
        }
    };
    let mac = match query.mac.parse::<MacAddr>() {
        Ok(mac) => mac,
        Err(e) => {
            error!(error = %e, mac = %query.mac, "failed to parse mac");
            return StatusCode::BAD_REQUEST.into_response();
        }
    };

    if let Err(e) = register_host_if_absent(
        state.store.as_ref(),
        mac,
        uuid,
        &query.serial,
        &query.product,
        &query.manufacturer,
    )
    .await
    {
        error!(error = %e, mac = %mac, uuid = %uuid, "failed to register host");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    script::boot_script(&host_header).into_response()
}

/// Register a host seen on `/ipxe`, idempotently.
///
/// The management lease must already exist (DHCP ran first); a conflict on
/// the service lease or the host row means a repeat visit and is benign.
async fn register_host_if_absent(
    store: &dyn Store,
    mac: MacAddr,
    uuid: Uuid,
    serial: &str,
    product: &str,
    manufacturer: &str,
) -> std::result::Result<(), StoreError> {
    let management = store.management_lease(mac).await?;

    let service = match store.create_service_lease(mac).await {
        Ok(lease) => lease,
        Err(e) if e.is_conflict() => return Ok(()),
        Err(e) => return Err(e),
    };

    match store
        .register_host(uuid, serial, product, manufacturer, service.id, management.id)
        .await
    {
        Ok(host) => {
            info!(name = %host.name, uuid = %uuid, mac = %mac, "registered host");
            Ok(())
        }
        Err(e) if e.is_conflict() => Ok(()),
        Err(e) => Err(e),
    }
}

/// `GET /init/meta-data`: hostname for cloud-init, keyed on the client's
/// source address.
async fn meta_data_handler(
    State(state): State<AppState>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
) -> Response {
    let host = match host_for_remote(state.store.as_ref(), remote).await {
        Ok(host) => host,
        Err(status) => return status.into_response(),
    };

    cloudinit::meta_data(&host).into_response()
}

/// `GET /init/user-data`: the `#cloud-config` document.
async fn user_data_handler(
    State(state): State<AppState>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    Host(host_header): Host,
) -> Response {
    let host = match host_for_remote(state.store.as_ref(), remote).await {
        Ok(host) => host,
        Err(status) => return status.into_response(),
    };

    let lease = match state.store.lease_address(host.service_lease_id).await {
        Ok(lease) => lease,
        Err(e) => {
            error!(error = %e, lease_id = host.service_lease_id, "failed to get service lease");
            return StatusCode::BAD_REQUEST.into_response();
        }
    };
    let (gateway, dns) = match (lease.gateway, lease.dns_server) {
        (Some(gateway), Some(dns)) => (gateway, dns),
        _ => {
            error!(lease_id = lease.id, "service subnet is missing gateway or dns");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let users = match list_users_with_keys(state.store.as_ref()).await {
        Ok(users) => users,
        Err(e) => {
            error!(error = %e, "failed to list users");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    match cloudinit::user_data(&host, &lease, gateway, dns, &users, &host_header) {
        Ok(body) => body.into_response(),
        Err(e) => {
            error!(error = %e, "failed to render user-data");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn host_for_remote(
    store: &dyn Store,
    remote: SocketAddr,
) -> std::result::Result<ursa_types::Host, StatusCode> {
    let ip = match remote.ip() {
        IpAddr::V4(ip) => Ipv4::new(ip),
        IpAddr::V6(_) => {
            error!(remote = %remote, "non-IPv4 client address");
            return Err(StatusCode::BAD_REQUEST);
        }
    };

    store.host_by_address(ip).await.map_err(|e| {
        error!(error = %e, remote = %remote, "failed to get host by address");
        StatusCode::BAD_REQUEST
    })
}

async fn list_users_with_keys(
    store: &dyn Store,
) -> std::result::Result<Vec<(ursa_types::User, Vec<ursa_types::SshKey>)>, StoreError> {
    let mut out = Vec::new();
    for user in store.list_users().await? {
        let keys = store.list_keys_by_user(user.id).await?;
        out.push((user, keys));
    }
    Ok(out)
}
