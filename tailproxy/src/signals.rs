//! Signal handling for the root shutdown sequence (spec.md §4.H, §5):
//! SIGINT/SIGTERM cancel the root `CancellationToken`, which the
//! coordinator uses to tear down every subsystem.
//!
//! The teacher drives signal handling by blocking a dedicated thread in
//! `sigwait` and forwarding through a channel, which suits an init process
//! that must react to signals even while synchronous subprocess calls are
//! in flight. This supervisor's control flow is already fully async, so the
//! same intent — centralised, cancellation-driven signal delivery — is
//! expressed with `tokio::signal::unix` instead of a raw `sigwait` thread.

use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Spawns a task that cancels `shutdown` on the first SIGINT or SIGTERM.
pub fn install(shutdown: CancellationToken) -> eyre::Result<()> {
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => info!("received SIGTERM"),
            _ = sigint.recv() => info!("received SIGINT"),
        }
        shutdown.cancel();
    });

    Ok(())
}
