//! Mesh node capability (spec.md §4.E, Design Notes §9, component E in the
//! component table).
//!
//! The overlay-VPN library itself is an external collaborator: this crate
//! never embeds one. Instead, `MeshNode` is the polymorphic transport
//! capability the spec's Design Notes describe — `dial`/`listen` presented
//! the same way a plain TCP facility would be — and [`LoopbackMeshNode`] is
//! the one concrete implementation in this crate: an in-memory stand-in
//! that dials and listens on local loopback, letting the SOCKS5 server and
//! export manager be exercised end-to-end without a real overlay peer.
//! Wiring in an actual overlay client is left to whatever embeds this
//! supervisor.

use async_trait::async_trait;
use eyre::{eyre, Result};
use std::collections::HashMap;
use std::sync::RwLock;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};

/// An overlay peer, as `set_exit_relay` would resolve it.
#[derive(Debug, Clone)]
pub struct PeerInfo {
    pub name: String,
    pub overlay_addrs: Vec<std::net::IpAddr>,
}

/// A byte stream to a dialed destination.
pub trait MeshStream: AsyncRead + AsyncWrite + Send + Unpin {}
impl<T: AsyncRead + AsyncWrite + Send + Unpin> MeshStream for T {}

/// An overlay listener: accepts inbound connections from peers.
#[async_trait]
pub trait MeshListener: Send {
    async fn accept(&mut self) -> std::io::Result<Box<dyn MeshStream>>;
}

/// Capability set the SOCKS5 server and export manager depend on: dial a
/// `host:port` on the overlay, or listen for inbound overlay connections on
/// a given port. `up` brings the node online (may block on interactive
/// auth per spec.md §4.H step 2); `set_exit_relay` applies routing
/// preference toward a named peer (spec.md §4.E).
#[async_trait]
pub trait MeshNode: Send + Sync {
    /// Brings the node online. `auth_secret` is the pre-shared token from
    /// spec.md §4.E: when present, a real implementation authenticates with
    /// it directly; when absent, it drives interactive authentication
    /// (polling status, printing an auth URL to the error stream once) —
    /// the out-of-scope interactive flow itself is an external
    /// collaborator's concern, not this trait's.
    async fn up(&self, auth_secret: Option<&str>) -> Result<()>;
    async fn set_exit_relay(&self, name_or_ip: &str) -> Result<()>;
    async fn dial(&self, host_port: &str) -> std::io::Result<Box<dyn MeshStream>>;
    async fn listen(&self, port: u16) -> std::io::Result<Box<dyn MeshListener>>;
}

struct LoopbackListener(TcpListener);

#[async_trait]
impl MeshListener for LoopbackListener {
    async fn accept(&mut self) -> std::io::Result<Box<dyn MeshStream>> {
        let (stream, _) = self.0.accept().await?;
        Ok(Box::new(stream))
    }
}

/// Offline mesh node used for tests and for running this supervisor
/// without a real overlay: peers are registered in memory, `dial` and
/// `listen` both operate against loopback TCP.
pub struct LoopbackMeshNode {
    peers: RwLock<HashMap<String, PeerInfo>>,
    exit_relay: RwLock<Option<PeerInfo>>,
}

impl LoopbackMeshNode {
    pub fn new() -> Self {
        Self {
            peers: RwLock::new(HashMap::new()),
            exit_relay: RwLock::new(None),
        }
    }

    /// Registers a peer so `set_exit_relay` can find it by name or address.
    pub fn register_peer(&self, peer: PeerInfo) {
        let mut peers = self.peers.write().unwrap();
        for addr in &peer.overlay_addrs {
            peers.insert(addr.to_string(), peer.clone());
        }
        peers.insert(peer.name.clone(), peer);
    }

    pub fn current_exit_relay(&self) -> Option<PeerInfo> {
        self.exit_relay.read().unwrap().clone()
    }
}

impl Default for LoopbackMeshNode {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MeshNode for LoopbackMeshNode {
    async fn up(&self, _auth_secret: Option<&str>) -> Result<()> {
        // No real overlay backend to authenticate against offline; a
        // pre-shared secret, if given, is accepted without being checked.
        Ok(())
    }

    async fn set_exit_relay(&self, name_or_ip: &str) -> Result<()> {
        let peer = self
            .peers
            .read()
            .unwrap()
            .get(name_or_ip)
            .cloned()
            .ok_or_else(|| eyre!("exit relay not found"))?;
        *self.exit_relay.write().unwrap() = Some(peer);
        Ok(())
    }

    async fn dial(&self, host_port: &str) -> std::io::Result<Box<dyn MeshStream>> {
        let stream = TcpStream::connect(host_port).await?;
        Ok(Box::new(stream))
    }

    async fn listen(&self, port: u16) -> std::io::Result<Box<dyn MeshListener>> {
        // Bound on a distinct loopback alias (127.0.0.2) rather than
        // 127.0.0.1: this models the overlay-side virtual interface, which
        // in production is a different network namespace than the child's
        // real loopback socket on the same port number. Binding both to
        // 127.0.0.1 would collide whenever a real listener and its own
        // exported overlay counterpart shared a port.
        let listener = TcpListener::bind(("127.0.0.2", port)).await?;
        Ok(Box::new(LoopbackListener(listener)))
    }
}
