//! Stand-in for the far side of the mesh overlay (spec.md §4.E/§4.F): a
//! plain loopback `TcpListener` that echoes back whatever it receives. Since
//! `LoopbackMeshNode` dials and listens on real loopback sockets, this is
//! everything a test needs to play the role of "the peer on the other end
//! of the overlay" without a real mesh backend.

use anyhow::Result;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// A single-shot echo peer: accepts one connection, echoes every byte read
/// in one `read`/`write` pass, then exits. Good enough for the
/// request/reply shape every scenario test against it needs.
pub struct MockMeshNode {
    pub port: u16,
}

impl MockMeshNode {
    /// Binds on loopback and spawns the accept/echo loop in the background.
    pub async fn spawn() -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let port = listener.local_addr()?.port();
        tokio::spawn(async move {
            if let Ok((mut stream, _)) = listener.accept().await {
                let mut buf = [0u8; 64];
                if let Ok(n) = stream.read(&mut buf).await {
                    if n > 0 {
                        let _ = stream.write_all(&buf[..n]).await;
                    }
                }
            }
        });
        Ok(Self { port })
    }

    /// Binds on the given loopback port rather than an ephemeral one — used
    /// where the test needs a specific, pre-agreed port (e.g. the one an
    /// exported listener will be dialed on).
    pub async fn spawn_on(port: u16) -> Result<Self> {
        let listener = TcpListener::bind(("127.0.0.1", port)).await?;
        tokio::spawn(async move {
            if let Ok((mut stream, _)) = listener.accept().await {
                let mut buf = [0u8; 64];
                if let Ok(n) = stream.read(&mut buf).await {
                    if n > 0 {
                        let _ = stream.write_all(&buf[..n]).await;
                    }
                }
            }
        });
        Ok(Self { port })
    }
}

/// Finds a free loopback TCP port by binding ephemerally and releasing it.
pub async fn free_port() -> Result<u16> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    Ok(listener.local_addr()?.port())
}
