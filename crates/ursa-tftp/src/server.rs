//! TFTP server loop and transfer state machine.

use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::error::{Result, TftpError};
use crate::packet::{ErrorCode, TftpOptions, TftpPacket};

/// RFC 1350 block size.
pub const DEFAULT_BLOCK_SIZE: u16 = 512;

/// Largest negotiable block size (RFC 2348).
pub const MAX_BLOCK_SIZE: u16 = 65464;

/// Per-block ACK timeout in seconds when the client negotiates none.
pub const DEFAULT_TIMEOUT_SECS: u8 = 5;

/// Retransmissions before a transfer is abandoned.
pub const MAX_RETRIES: u32 = 5;

/// Read-only virtual filesystem the server resolves requests against.
/// Every requested path is normalized to `"/" + path` before lookup.
#[async_trait]
pub trait FileProvider: Send + Sync {
    async fn get_file(&self, path: &str) -> Option<Bytes>;

    /// Size for the `tsize` option reply.
    async fn get_file_size(&self, path: &str) -> Option<u64>;
}

/// TFTP server.
pub struct TftpServer {
    bind_ip: Ipv4Addr,
    provider: Arc<dyn FileProvider>,
}

impl TftpServer {
    pub fn new(bind_ip: Ipv4Addr, provider: Arc<dyn FileProvider>) -> Self {
        Self { bind_ip, provider }
    }

    /// Serve UDP/69 until shutdown. Each request gets its own task and
    /// ephemeral transfer socket.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let bind_addr = SocketAddrV4::new(self.bind_ip, 69);
        let socket = UdpSocket::bind(bind_addr)
            .await
            .map_err(|source| TftpError::BindFailed {
                addr: bind_addr.into(),
                source,
            })?;

        info!(addr = %bind_addr, "tftp server started");

        let mut buf = [0u8; 2048];
        loop {
            tokio::select! {
                result = socket.recv_from(&mut buf) => {
                    match result {
                        Ok((len, src)) => {
                            let data = buf[..len].to_vec();
                            let provider = self.provider.clone();
                            tokio::spawn(async move {
                                if let Err(e) = handle_request(data, src, provider).await {
                                    error!(error = %e, client = %src, "tftp request failed");
                                }
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "error receiving tftp packet");
                        }
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("tftp server shutting down");
                        break;
                    }
                }
            }
        }

        Ok(())
    }
}

impl std::fmt::Debug for TftpServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TftpServer")
            .field("bind_ip", &self.bind_ip)
            .finish_non_exhaustive()
    }
}

async fn handle_request(
    data: Vec<u8>,
    client: SocketAddr,
    provider: Arc<dyn FileProvider>,
) -> Result<()> {
    match TftpPacket::parse(&data)? {
        TftpPacket::ReadRequest {
            filename, options, ..
        } => handle_read(client, &filename, options, provider).await,
        TftpPacket::WriteRequest { .. } => {
            send_error(client, ErrorCode::AccessViolation, "writes not supported").await
        }
        _ => send_error(client, ErrorCode::IllegalOperation, "unexpected packet").await,
    }
}

async fn handle_read(
    client: SocketAddr,
    filename: &str,
    options: TftpOptions,
    provider: Arc<dyn FileProvider>,
) -> Result<()> {
    let path = filename.trim_start_matches('/');
    debug!(client = %client, path = %path, "read request");

    let file = match provider.get_file(path).await {
        Some(data) => data,
        None => {
            warn!(client = %client, path = %path, "file not found");
            return send_error(client, ErrorCode::FileNotFound, "file not found").await;
        }
    };
    let file_size = file.len() as u64;

    // Each transfer speaks from its own port (RFC 1350 TID rules).
    let socket = UdpSocket::bind("0.0.0.0:0").await?;

    let mut block_size = options
        .blksize
        .map(|b| b.clamp(8, MAX_BLOCK_SIZE))
        .unwrap_or(DEFAULT_BLOCK_SIZE);
    let timeout_secs = options.timeout.unwrap_or(DEFAULT_TIMEOUT_SECS).max(1);
    let ack_timeout = Duration::from_secs(u64::from(timeout_secs));

    // RFC 2347: acknowledge only the options the client asked for. A client
    // that rejects the OACK with ERROR gets a plain 512-byte transfer.
    if !options.is_empty() {
        let oack = TftpPacket::oack(TftpOptions {
            blksize: options.blksize.map(|_| block_size),
            tsize: options.tsize.map(|_| file_size),
            timeout: options.timeout,
        });
        socket.send_to(&oack.encode(), client).await?;

        let mut ack_buf = [0u8; 512];
        match timeout(ack_timeout, socket.recv_from(&mut ack_buf)).await {
            Ok(Ok((len, _))) => match TftpPacket::parse(&ack_buf[..len])? {
                TftpPacket::Ack { block: 0 } => {}
                TftpPacket::Error { code, message } => {
                    warn!(client = %client, code = ?code, message = %message,
                        "client rejected oack, falling back to defaults");
                    block_size = DEFAULT_BLOCK_SIZE;
                }
                _ => {
                    return send_error_on(&socket, client, ErrorCode::IllegalOperation, "expected ack")
                        .await;
                }
            },
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => {
                return Err(TftpError::Timeout {
                    filename: path.to_string(),
                });
            }
        }
    }

    // Classic lockstep: send DATA n, wait for ACK n, retransmit on timeout.
    // A short (or empty) final block terminates the transfer.
    let block_size = usize::from(block_size);
    let mut block: u16 = 1;
    let mut offset = 0usize;

    loop {
        let end = (offset + block_size).min(file.len());
        let chunk = file.slice(offset..end);
        let last = chunk.len() < block_size;
        let packet = TftpPacket::data(block, chunk);

        let mut retries = 0;
        loop {
            socket.send_to(&packet.encode(), client).await?;

            let mut ack_buf = [0u8; 512];
            match timeout(ack_timeout, socket.recv_from(&mut ack_buf)).await {
                Ok(Ok((len, _))) => match TftpPacket::parse(&ack_buf[..len])? {
                    TftpPacket::Ack { block: acked } if acked == block => break,
                    TftpPacket::Ack { .. } => continue, // stale ack, re-await
                    TftpPacket::Error { code, message } => {
                        warn!(client = %client, code = ?code, message = %message,
                            "client aborted transfer");
                        return Ok(());
                    }
                    _ => {
                        return send_error_on(
                            &socket,
                            client,
                            ErrorCode::IllegalOperation,
                            "expected ack",
                        )
                        .await;
                    }
                },
                Ok(Err(e)) => return Err(e.into()),
                Err(_) => {
                    retries += 1;
                    if retries >= MAX_RETRIES {
                        return Err(TftpError::Timeout {
                            filename: path.to_string(),
                        });
                    }
                    debug!(client = %client, block = block, retry = retries, "retransmitting");
                }
            }
        }

        offset = end;
        if last {
            break;
        }
        block = block.wrapping_add(1);
    }

    info!(client = %client, path = %path, bytes = file_size, "transfer completed");
    Ok(())
}

async fn send_error(client: SocketAddr, code: ErrorCode, message: &str) -> Result<()> {
    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    send_error_on(&socket, client, code, message).await
}

async fn send_error_on(
    socket: &UdpSocket,
    client: SocketAddr,
    code: ErrorCode,
    message: &str,
) -> Result<()> {
    socket
        .send_to(&TftpPacket::error(code, message).encode(), client)
        .await?;
    Ok(())
}

/// In-memory provider, used for embedded assets and tests.
#[derive(Default)]
pub struct MemoryFileProvider {
    files: HashMap<String, Bytes>,
}

impl MemoryFileProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_file(&mut self, path: impl Into<String>, data: impl Into<Bytes>) {
        self.files.insert(path.into(), data.into());
    }
}

#[async_trait]
impl FileProvider for MemoryFileProvider {
    async fn get_file(&self, path: &str) -> Option<Bytes> {
        self.files.get(path.trim_start_matches('/')).cloned()
    }

    async fn get_file_size(&self, path: &str) -> Option<u64> {
        self.files
            .get(path.trim_start_matches('/'))
            .map(|b| b.len() as u64)
    }
}
