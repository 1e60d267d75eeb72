//! Test client for the exporter's Unix control socket (spec.md §4.B): used
//! by scenario tests that want to drive `ExportManager` directly with a
//! hand-built `ControlMessage`, rather than through a real interposed
//! child (see `MockMeshNode`/`listen_probe` for the latter).

use anyhow::Result;
use std::path::Path;
use std::time::Duration;
use tailproxy_proto::ControlMessage;
use tokio::io::AsyncWriteExt;
use tokio::net::UnixStream;

pub struct ControlSocketClient {
    stream: UnixStream,
}

impl ControlSocketClient {
    /// Connects, retrying for a bit: the export manager's socket may not
    /// exist yet immediately after the supervisor process is spawned.
    pub async fn connect_with_retry(path: &Path) -> Result<Self> {
        let mut attempts = 0;
        loop {
            match UnixStream::connect(path).await {
                Ok(stream) => return Ok(Self { stream }),
                Err(_) if attempts < 20 => {
                    attempts += 1;
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    pub async fn send(&mut self, message: ControlMessage) -> Result<()> {
        self.stream.write_all(message.encode().as_bytes()).await?;
        Ok(())
    }
}
