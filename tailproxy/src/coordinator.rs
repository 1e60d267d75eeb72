//! Supervisor coordinator (spec.md §4.H, component H): startup order,
//! readiness signalling, child-process launch, shutdown propagation.

use crate::cli::Config;
use crate::environment::Environment;
use crate::export_manager::{ExportManager, ExportManagerConfig};
use crate::mesh::{LoopbackMeshNode, MeshNode};
use crate::socks5_server::Socks5Server;
use crate::{signals, state_dir};
use eyre::{Context, Result};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

pub struct Coordinator {
    config: Config,
}

impl Coordinator {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Runs the full startup sequence and blocks until shutdown, returning
    /// the exit code to propagate (the child's own code, or 0 in
    /// proxy-only mode).
    #[instrument(skip_all, name = "coordinator")]
    pub async fn run(self) -> Result<i32> {
        let root = CancellationToken::new();
        signals::install(root.clone())?;

        // Step 2-3: construct the mesh node, bring it up, apply exit relay.
        let mesh: Arc<dyn MeshNode> = Arc::new(LoopbackMeshNode::new());
        mesh.up(self.config.authkey.as_deref())
            .await
            .wrap_err("bringing mesh node up")?;
        if let Some(exit_node) = &self.config.exit_node {
            mesh.set_exit_relay(exit_node)
                .await
                .wrap_err("applying exit-relay preference")?;
        }

        if self.config.dry_run {
            info!("dry run: configuration is valid, exiting without opening sockets");
            return Ok(0);
        }

        // Step 4: SOCKS5 listener, readiness is implicit in a successful bind.
        let socks5 = Socks5Server::bind(self.config.proxy_port, Arc::clone(&mesh), root.clone())
            .await
            .wrap_err("binding SOCKS5 listener")?;
        let bound_port = socks5.local_port();
        info!(port = bound_port, "socks5 listener ready");
        let socks5_task = tokio::spawn(socks5.run());

        // Step 5: export manager, if enabled.
        let state_dir = state_dir::ensure(&self.config.hostname)?;
        let control_sock = state_dir.join("control.sock");
        let export_task = if self.config.export.enabled {
            let manager = Arc::new(ExportManager::new(
                ExportManagerConfig {
                    socket_path: control_sock.clone(),
                    allow: self.config.export.allow.clone(),
                    deny: self.config.export.deny.clone(),
                    max_entries: self.config.export.max,
                },
                Arc::clone(&mesh),
            ));
            let root = root.clone();
            Some(tokio::spawn(async move { manager.run(root).await }))
        } else {
            None
        };

        // Step 6/7: launch the child, or run proxy-only until interrupted.
        let exit_code = if let Some(command) = self.config.command.clone() {
            self.run_child(command, bound_port, &control_sock, root.clone())
                .await?
        } else {
            root.cancelled().await;
            0
        };

        root.cancel();
        if timeout(SHUTDOWN_GRACE, socks5_task).await.is_err() {
            warn!("socks5 listener did not shut down within the grace period");
        }
        if let Some(task) = export_task {
            match timeout(SHUTDOWN_GRACE, task).await {
                Ok(Ok(Ok(()))) => {}
                Ok(Ok(Err(e))) => warn!("export manager exited with error: {e}"),
                Ok(Err(e)) => warn!("export manager task panicked: {e}"),
                Err(_) => warn!("export manager did not shut down within the grace period"),
            }
        }

        Ok(exit_code)
    }

    async fn run_child(
        &self,
        command: String,
        proxy_port: u16,
        control_sock: &std::path::Path,
        root: CancellationToken,
    ) -> Result<i32> {
        let preload_path = resolve_preload_path()?;

        let mut injected = Environment::new();
        injected.set("TAILPROXY_HOST", "127.0.0.1");
        injected.set("TAILPROXY_PORT", proxy_port.to_string());
        injected.set("LD_PRELOAD", preload_path.to_string_lossy().into_owned());
        if self.config.verbose {
            injected.set("TAILPROXY_VERBOSE", "1");
        }
        if self.config.export.enabled {
            injected.set("TAILPROXY_EXPORT_LISTENERS", "1");
            injected.set("TAILPROXY_CONTROL_SOCK", control_sock.to_string_lossy());
        }

        let mut cmd = Command::new(&command);
        cmd.args(&self.config.args);
        for (key, value) in injected.into_inner() {
            cmd.env(key, value);
        }
        cmd.stdin(Stdio::inherit());
        cmd.stdout(Stdio::inherit());
        cmd.stderr(Stdio::inherit());
        cmd.kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .wrap_err_with(|| format!("spawning child command {command:?}"))?;
        info!(command = %command, "child spawned");

        tokio::select! {
            status = child.wait() => {
                let status = status.wrap_err("waiting for child")?;
                root.cancel();
                Ok(status.code().unwrap_or(1))
            }
            _ = root.cancelled() => {
                let _ = child.start_kill();
                let _ = timeout(SHUTDOWN_GRACE, child.wait()).await;
                Ok(0)
            }
        }
    }
}

/// Locates the interposer `cdylib` that must be co-located with this binary
/// (spec.md §6 "Both supervisor and interposer artefact must be co-located").
/// `TAILPROXY_INTERPOSE_LIB` overrides the search for development/test use;
/// otherwise the library is expected next to the running executable. A
/// missing artefact is a fatal startup error (spec.md §7), since launching
/// the child without it would silently defeat the whole point of this tool.
fn resolve_preload_path() -> Result<std::path::PathBuf> {
    if let Ok(explicit) = std::env::var("TAILPROXY_INTERPOSE_LIB") {
        let path = std::path::PathBuf::from(explicit);
        if !path.is_file() {
            return Err(eyre::eyre!(
                "TAILPROXY_INTERPOSE_LIB points at {}, which does not exist",
                path.display()
            ));
        }
        return Ok(path);
    }

    let exe = std::env::current_exe().wrap_err("resolving current executable path")?;
    let dir = exe
        .parent()
        .ok_or_else(|| eyre::eyre!("executable path {} has no parent directory", exe.display()))?;
    let candidate = dir.join("libtailproxy_interpose.so");
    if !candidate.is_file() {
        return Err(eyre::eyre!(
            "interposer library not found at {} (expected co-located with the tailproxy binary)",
            candidate.display()
        ));
    }
    Ok(candidate)
}
