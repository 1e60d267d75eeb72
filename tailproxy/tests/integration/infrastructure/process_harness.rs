//! Spawns the compiled `tailproxy` binary as a real subprocess, the way the
//! teacher's own process harness spawns `scinit` — black-box, against the
//! actual binary rather than internal crate types (this crate has no lib
//! target to import from `tests/`).

use anyhow::{Context, Result};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, ChildStdout, Command};
use tokio::time::timeout;

pub struct TailproxyProcess {
    pub pid: Pid,
    child: Child,
}

impl TailproxyProcess {
    pub fn spawn(args: &[&str]) -> Result<Self> {
        Self::spawn_with_env(args, &[])
    }

    pub fn spawn_with_env(args: &[&str], env: &[(&str, &str)]) -> Result<Self> {
        let bin = env!("CARGO_BIN_EXE_tailproxy");
        let mut command = Command::new(bin);
        command.args(args);
        for (key, value) in env {
            command.env(key, value);
        }
        command.stdin(Stdio::null());
        command.stdout(Stdio::piped());
        command.stderr(Stdio::piped());
        command.kill_on_drop(true);

        let child = command.spawn().context("spawning tailproxy binary")?;
        let pid = Pid::from_raw(child.id().context("child has no pid")? as i32);
        Ok(Self { pid, child })
    }

    pub fn is_running(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Takes the child's stdout pipe. A supervised child command inherits
    /// this process's stdout (spec.md §4.H), so anything the child prints
    /// surfaces here too — the only way a black-box test can observe child
    /// output without its own lib target to hook into.
    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.child.stdout.take()
    }

    pub fn terminate(&self) -> Result<()> {
        kill(self.pid, Signal::SIGTERM).context("sending SIGTERM")
    }

    pub async fn wait_for_exit_timeout(
        &mut self,
        duration: Duration,
    ) -> Result<Option<std::process::ExitStatus>> {
        match timeout(duration, self.child.wait()).await {
            Ok(status) => Ok(Some(status.context("waiting for child")?)),
            Err(_) => Ok(None),
        }
    }
}
