//! SOCKS5 server half (spec.md §4.F, component F). Accepts loopback SOCKS5
//! connections, parses the CONNECT request, dials the destination on the
//! mesh overlay, and splices bytes bidirectionally.

use crate::mesh::MeshNode;
use eyre::{Context, Result};
use std::net::Ipv4Addr;
use std::sync::Arc;
use tokio::io::{self, AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use tailproxy_proto::socks5::{self, Addr, ATYP_DOMAIN, ATYP_V4, ATYP_V6};

pub struct Socks5Server {
    listener: TcpListener,
    mesh: Arc<dyn MeshNode>,
    shutdown: CancellationToken,
}

impl Socks5Server {
    pub async fn bind(port: u16, mesh: Arc<dyn MeshNode>, shutdown: CancellationToken) -> Result<Self> {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, port))
            .await
            .wrap_err_with(|| format!("binding SOCKS5 listener on 127.0.0.1:{port}"))?;
        Ok(Self {
            listener,
            mesh,
            shutdown,
        })
    }

    pub fn local_port(&self) -> u16 {
        self.listener.local_addr().map(|a| a.port()).unwrap_or(0)
    }

    /// Runs the accept loop until the shutdown token fires.
    #[instrument(skip_all, name = "socks5_server")]
    pub async fn run(self) {
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    debug!("socks5 server shutting down");
                    return;
                }
                accepted = self.listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(v) => v,
                        Err(e) => {
                            warn!("socks5 accept error: {e}");
                            continue;
                        }
                    };
                    debug!(%peer, "accepted socks5 connection");
                    let mesh = Arc::clone(&self.mesh);
                    let child_shutdown = self.shutdown.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, mesh, child_shutdown).await {
                            debug!("socks5 session ended: {e}");
                        }
                    });
                }
            }
        }
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    mesh: Arc<dyn MeshNode>,
    shutdown: CancellationToken,
) -> Result<()> {
    let mut greeting = [0u8; 2];
    stream.read_exact(&mut greeting).await?;
    if greeting[0] != socks5::VERSION {
        // spec.md §8: a truncated or wrong-version greeting is dropped with
        // no further reads — and no reply either, since the client hasn't
        // established a version we could reply under.
        debug!("dropping connection: bad greeting version {:#x}", greeting[0]);
        return Ok(());
    }
    let nmethods = greeting[1] as usize;
    let mut methods = vec![0u8; nmethods];
    stream.read_exact(&mut methods).await?;
    stream
        .write_all(&[socks5::VERSION, socks5::METHOD_NO_AUTH])
        .await?;

    let mut header = [0u8; 4];
    stream.read_exact(&mut header).await?;
    if header[0] != socks5::VERSION {
        return reply_error(&mut stream, socks5::REP_GENERAL_FAILURE).await;
    }
    if header[1] != socks5::CMD_CONNECT {
        return reply_error(&mut stream, socks5::REP_COMMAND_NOT_SUPPORTED).await;
    }

    let dest = match read_addr(&mut stream, header[3]).await {
        Ok(dest) => dest,
        Err(_) => return reply_error(&mut stream, socks5::REP_ADDRESS_TYPE_NOT_SUPPORTED).await,
    };
    let mut port_buf = [0u8; 2];
    stream.read_exact(&mut port_buf).await?;
    let port = u16::from_be_bytes(port_buf);

    let host_port = format!("{}:{}", dest.host_string(), port);
    let upstream = tokio::select! {
        _ = shutdown.cancelled() => return Ok(()),
        dial = mesh.dial(&host_port) => dial,
    };

    let mut upstream = match upstream {
        Ok(s) => s,
        Err(e) => {
            debug!("mesh dial to {host_port} failed: {e}");
            return reply_error(&mut stream, socks5::REP_HOST_UNREACHABLE).await;
        }
    };

    stream
        .write_all(&socks5::encode_connect_reply_success())
        .await?;

    tokio::select! {
        _ = shutdown.cancelled() => {}
        result = io::copy_bidirectional(&mut stream, &mut upstream) => {
            if let Err(e) = result {
                debug!("splice ended: {e}");
            }
        }
    }

    Ok(())
}

async fn read_addr(stream: &mut TcpStream, atyp: u8) -> Result<Addr> {
    match atyp {
        ATYP_V4 => {
            let mut buf = [0u8; 4];
            stream.read_exact(&mut buf).await?;
            Ok(Addr::V4(std::net::Ipv4Addr::from(buf)))
        }
        ATYP_DOMAIN => {
            let mut len_buf = [0u8; 1];
            stream.read_exact(&mut len_buf).await?;
            let mut name = vec![0u8; len_buf[0] as usize];
            stream.read_exact(&mut name).await?;
            let name = String::from_utf8(name).wrap_err("domain name not valid UTF-8")?;
            Ok(Addr::Domain(name))
        }
        ATYP_V6 => {
            let mut buf = [0u8; 16];
            stream.read_exact(&mut buf).await?;
            Ok(Addr::V6(std::net::Ipv6Addr::from(buf)))
        }
        other => Err(eyre::eyre!("unsupported ATYP {other}")),
    }
}

async fn reply_error(stream: &mut TcpStream, rep: u8) -> Result<()> {
    stream
        .write_all(&socks5::encode_connect_reply_error(rep))
        .await?;
    Ok(())
}
