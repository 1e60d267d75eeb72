//! Export manager (spec.md §4.G, component G). Runs a Unix-domain control
//! socket server; for each `LISTEN`/`CLOSE` record it receives, maintains a
//! per-port overlay listener with reference counting, enforcing the
//! port-matcher policy and the `export-max` cap.

use crate::mesh::MeshNode;
use crate::policy::PortMatcher;
use eyre::{Context, Result};
use std::collections::HashMap;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::io::{self, AsyncBufReadExt, BufReader};
use tokio::net::{TcpStream, UnixListener};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use tailproxy_proto::{ControlMessage, Family};

struct ExporterEntry {
    refcount: usize,
    cancel: CancellationToken,
    accept_task: JoinHandle<()>,
}

pub struct ExportManagerConfig {
    pub socket_path: PathBuf,
    pub allow: PortMatcher,
    pub deny: PortMatcher,
    pub max_entries: usize,
}

pub struct ExportManager {
    config: ExportManagerConfig,
    mesh: Arc<dyn MeshNode>,
    entries: Mutex<HashMap<u16, ExporterEntry>>,
}

impl ExportManager {
    pub fn new(config: ExportManagerConfig, mesh: Arc<dyn MeshNode>) -> Self {
        Self {
            config,
            mesh,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Opens the control socket, chmods it owner-only, and serves incoming
    /// connections until `shutdown` fires (spec.md §4.H step 5).
    #[instrument(skip_all, name = "export_manager")]
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) -> Result<()> {
        if self.config.socket_path.exists() {
            std::fs::remove_file(&self.config.socket_path).wrap_err_with(|| {
                format!(
                    "removing stale control socket {}",
                    self.config.socket_path.display()
                )
            })?;
        }
        let listener = UnixListener::bind(&self.config.socket_path).wrap_err_with(|| {
            format!("binding control socket {}", self.config.socket_path.display())
        })?;
        chmod_owner_only(&self.config.socket_path)?;
        info!(path = %self.config.socket_path.display(), "export manager listening");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = listener.accept() => {
                    let (stream, _) = match accepted {
                        Ok(v) => v,
                        Err(e) => {
                            warn!("control socket accept error: {e}");
                            continue;
                        }
                    };
                    let this = Arc::clone(&self);
                    let child_shutdown = shutdown.clone();
                    tokio::spawn(async move {
                        this.serve_control_connection(stream, child_shutdown).await;
                    });
                }
            }
        }

        self.close_all().await;
        let _ = std::fs::remove_file(&self.config.socket_path);
        Ok(())
    }

    async fn serve_control_connection(
        self: Arc<Self>,
        stream: tokio::net::UnixStream,
        shutdown: CancellationToken,
    ) {
        let mut lines = BufReader::new(stream).lines();
        loop {
            let line = tokio::select! {
                _ = shutdown.cancelled() => return,
                line = lines.next_line() => line,
            };
            match line {
                Ok(Some(line)) => {
                    if let Err(e) = self.handle_line(&line, &shutdown).await {
                        debug!("ignoring malformed control message {line:?}: {e}");
                    }
                }
                Ok(None) => return,
                Err(e) => {
                    warn!("control socket read error: {e}");
                    return
                }
            }
        }
    }

    async fn handle_line(&self, line: &str, shutdown: &CancellationToken) -> Result<()> {
        let msg = ControlMessage::parse(line)?;
        match msg {
            ControlMessage::Listen { family, port } => self.on_listen(family, port, shutdown).await,
            ControlMessage::Close { port, .. } => self.on_close(port).await,
        }
        Ok(())
    }

    async fn on_listen(&self, family: Family, port: u16, shutdown: &CancellationToken) {
        if !PortMatcher::evaluate(&self.config.allow, &self.config.deny, port) {
            debug!(port, "export denied by policy");
            return;
        }

        {
            let mut entries = self.entries.lock().unwrap();
            if let Some(entry) = entries.get_mut(&port) {
                entry.refcount += 1;
                debug!(port, refcount = entry.refcount, "export refcount incremented");
                return;
            }
            if entries.len() >= self.config.max_entries {
                warn!(port, max = self.config.max_entries, "export cap reached, ignoring");
                return;
            }
        }

        let overlay_listener = match self.mesh.listen(port).await {
            Ok(l) => l,
            Err(e) => {
                warn!(port, "failed to open overlay listener: {e}");
                return;
            }
        };

        let cancel = shutdown.child_token();
        let accept_task = tokio::spawn(accept_loop(overlay_listener, port, family, cancel.clone()));

        let mut entries = self.entries.lock().unwrap();
        entries.insert(
            port,
            ExporterEntry {
                refcount: 1,
                cancel,
                accept_task,
            },
        );
        info!(port, "export listener created");
    }

    async fn on_close(&self, port: u16) {
        let finished = {
            let mut entries = self.entries.lock().unwrap();
            match entries.get_mut(&port) {
                Some(entry) => {
                    entry.refcount = entry.refcount.saturating_sub(1);
                    if entry.refcount == 0 {
                        entries.remove(&port)
                    } else {
                        None
                    }
                }
                None => None,
            }
        };
        if let Some(entry) = finished {
            entry.cancel.cancel();
            let _ = entry.accept_task.await;
            info!(port, "export listener removed");
        }
    }

    async fn close_all(&self) {
        let drained: Vec<_> = self.entries.lock().unwrap().drain().collect();
        for (_, entry) in drained {
            entry.cancel.cancel();
            let _ = entry.accept_task.await;
        }
    }
}

async fn accept_loop(
    mut overlay_listener: Box<dyn crate::mesh::MeshListener>,
    port: u16,
    _family: Family,
    cancel: CancellationToken,
) {
    loop {
        let accepted = tokio::select! {
            _ = cancel.cancelled() => return,
            accepted = overlay_listener.accept() => accepted,
        };
        let overlay_conn = match accepted {
            Ok(c) => c,
            Err(e) => {
                debug!(port, "overlay accept ended: {e}");
                return;
            }
        };
        let cancel = cancel.clone();
        tokio::spawn(forward_one(overlay_conn, port, cancel));
    }
}

async fn forward_one(
    mut overlay_conn: Box<dyn crate::mesh::MeshStream>,
    port: u16,
    cancel: CancellationToken,
) {
    let loopback = match TcpStream::connect((Ipv4Addr::LOCALHOST, port)).await {
        Ok(s) => s,
        Err(_) => match TcpStream::connect((Ipv6Addr::LOCALHOST, port)).await {
            Ok(s) => s,
            Err(e) => {
                debug!(port, "both loopback dials failed: {e}");
                return;
            }
        },
    };
    let mut loopback = loopback;

    tokio::select! {
        _ = cancel.cancelled() => {}
        result = io::copy_bidirectional(&mut overlay_conn, &mut loopback) => {
            if let Err(e) = result {
                debug!(port, "export splice ended: {e}");
            }
        }
    }
}

fn chmod_owner_only(path: &Path) -> Result<()> {
    let mut perms = std::fs::metadata(path)?.permissions();
    perms.set_mode(0o700);
    std::fs::set_permissions(path, perms)?;
    Ok(())
}
